#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    carnet_server::run().await
}
