use actix_cors::Cors;
use actix_web::middleware::Compress;
use actix_web::{http::header, web, App, HttpServer};
use actix_web_prometheus::PrometheusMetricsBuilder;
use serde::{Deserialize, Serialize};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

pub mod auth;
pub mod carnet;
pub mod config;
pub mod db;
pub mod metrics;
pub mod people;
pub mod storage;
pub mod tenant;

pub use crate::config::AppConfig;
pub use crate::db::AppState;
pub use crate::tenant::TenantId;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            error: error_type.to_string(),
            message: message.to_string(),
            suggestion: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: Option<&str>) -> Self {
        self.suggestion = suggestion.map(str::to_string);
        self
    }

    pub fn not_found(message: &str) -> Self {
        Self::new("NotFound", message)
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new("BadRequest", message)
    }

    pub fn internal_error(message: &str) -> Self {
        Self::new("InternalServerError", message)
    }
}

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::carnet::handlers::stream_carnets,
        crate::carnet::handlers::create_job,
        crate::carnet::handlers::list_jobs,
        crate::carnet::handlers::get_job,
        crate::carnet::handlers::download_job,
        crate::carnet::handlers::download
    ),
    components(
        schemas(
            carnet::CarnetFilters,
            carnet::GenerationRequest,
            carnet::GenerationStatus,
            carnet::Phase,
            carnet::handlers::JobAccepted,
            carnet::validation::ValidationError,
            people::PersonFilter,
            people::KindFilter,
            people::EducationLevel,
            ErrorResponse,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Carnets", description = "ID card generation: streaming, queued jobs and downloads.")
    )
)]
pub struct ApiDoc;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;
    let bind = (config.bind_addr.clone(), config.port);
    let allowed_origins = config.allowed_origins.clone();

    let app_state = match AppState::new_with_config(config).await {
        Ok(state) => web::Data::new(state),
        Err(e) => {
            log::error!(
                "Failed to initialise application state. Check DATABASE_URL and the storage settings in .env. Error: {}",
                e
            );
            return Err(e);
        }
    };

    let prometheus = PrometheusMetricsBuilder::new("carnet_server")
        .endpoint("/metrics")
        .build()
        .map_err(|e| anyhow::anyhow!("failed to create Prometheus middleware: {}", e))?;

    log::info!("Starting server at http://{}:{}", bind.0, bind.1);

    let queue_state = app_state.clone();
    HttpServer::new(move || {
        let app_state = app_state.clone();
        let prometheus = prometheus.clone();
        let cors = allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![
                header::AUTHORIZATION,
                header::ACCEPT,
                header::CONTENT_TYPE,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Compress::default())
            .wrap(prometheus)
            .wrap(cors)
            .app_data(app_state)
            .service(web::scope("/api").configure(carnet::handlers::config))
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
    })
    .keep_alive(actix_web::http::KeepAlive::Os)
    .bind(bind)?
    .run()
    .await?;

    queue_state.queue.shutdown().await;
    Ok(())
}
