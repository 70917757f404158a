use std::convert::Infallible;

use actix_web::http::header;
use actix_web::{web, HttpResponse, Responder};
use futures_util::StreamExt;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::UnboundedReceiverStream;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::filters::CarnetFilters;
use super::paths;
use super::queue::QueueError;
use super::sse::{ChannelSink, SseEvent};
use super::tracker::{GenerationRequest, GenerationStatus};
use super::validation::ValidationErrors;
use super::{suggestion_for, CarnetError};
use crate::db::AppState;
use crate::metrics;
use crate::storage::StorageError;
use crate::tenant::TenantId;
use crate::ErrorResponse;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

#[derive(Serialize, ToSchema)]
pub struct JobAccepted {
    pub id: Uuid,
    pub status: GenerationStatus,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListJobsQuery {
    /// Maximum number of requests to return (default 20, max 100).
    pub limit: Option<usize>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DownloadQuery {
    /// Storage path of the artifact, e.g. `tenants/3/carnets/pdf/carnets_20250101_120000_ab12cd34.pdf`.
    pub path: String,
}

fn validation_response(errors: &ValidationErrors) -> HttpResponse {
    let mut body = ErrorResponse::bad_request(&errors.summary());
    body.suggestion = errors
        .errors()
        .iter()
        .find_map(|e| e.suggestion.clone());
    HttpResponse::BadRequest().json(body)
}

pub(crate) fn carnet_error_response(err: &CarnetError) -> HttpResponse {
    let body = ErrorResponse::new(err.kind(), &err.to_string())
        .with_suggestion(suggestion_for(err));
    match err {
        CarnetError::NoMatch => HttpResponse::UnprocessableEntity().json(body),
        CarnetError::Unauthorized => HttpResponse::Forbidden().json(body),
        CarnetError::RenderFailure(_)
        | CarnetError::RenderTimeout(_)
        | CarnetError::ExportFailure(_) => HttpResponse::InternalServerError().json(body),
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Carnets",
    get,
    path = "/carnets/stream",
    params(CarnetFilters),
    responses(
        (status = 200, description = "Server-sent events: start, progress, then completed or error", content_type = "text/event-stream", body = String),
        (status = 400, description = "Invalid filters", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn stream_carnets(
    tenant: TenantId,
    query: web::Query<CarnetFilters>,
    data: web::Data<AppState>,
) -> impl Responder {
    let filter = match query.normalize() {
        Ok(filter) => filter,
        Err(errors) => return validation_response(&errors),
    };

    info!("Tenant {}: streaming carnet generation for {:?}", tenant, filter);

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let pipeline = data.pipeline.clone();
    tokio::spawn(async move {
        let sink = ChannelSink::new(tx);
        let terminal = match pipeline.run(tenant, &filter, &sink, 1).await {
            Ok(carnet) => {
                metrics::record_generation("stream", "completed");
                SseEvent::from(&carnet)
            }
            Err(e) => {
                warn!("Tenant {}: streaming generation failed: {}", tenant, e);
                metrics::record_generation("stream", e.kind());
                SseEvent::Error {
                    message: e.to_string(),
                }
            }
        };
        if !sink.send(terminal) {
            info!("Tenant {}: client left before the generation finished", tenant);
        }
    });

    let body = UnboundedReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(event.to_bytes()));

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::CONTENT_ENCODING, "identity"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(body)
}

#[utoipa::path(
    context_path = "/api",
    tag = "Carnets",
    post,
    path = "/carnets/jobs",
    request_body = CarnetFilters,
    responses(
        (status = 202, description = "Generation queued", body = JobAccepted),
        (status = 400, description = "Invalid filters", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 503, description = "Queue is full", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_job(
    tenant: TenantId,
    body: web::Json<CarnetFilters>,
    data: web::Data<AppState>,
) -> impl Responder {
    let filter = match body.normalize() {
        Ok(filter) => filter,
        Err(errors) => return validation_response(&errors),
    };

    match data.queue.submit(tenant, filter).await {
        Ok(request) => HttpResponse::Accepted().json(JobAccepted {
            id: request.id,
            status: request.status,
        }),
        Err(e @ (QueueError::Full | QueueError::Closed)) => HttpResponse::ServiceUnavailable()
            .json(
                ErrorResponse::new("ServiceUnavailable", &e.to_string())
                    .with_suggestion(Some("Intente nuevamente en unos minutos.")),
            ),
        Err(QueueError::Store(e)) => {
            error!("Tenant {}: failed to create generation request: {}", tenant, e);
            HttpResponse::InternalServerError().json(ErrorResponse::internal_error(
                "failed to create generation request",
            ))
        }
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Carnets",
    get,
    path = "/carnets/jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "Most recent generation requests of the tenant", body = [GenerationRequest]),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_jobs(
    tenant: TenantId,
    query: web::Query<ListJobsQuery>,
    data: web::Data<AppState>,
) -> impl Responder {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    match data.tracker.list(tenant, limit).await {
        Ok(requests) => HttpResponse::Ok().json(requests),
        Err(e) => {
            error!("Tenant {}: failed to list generation requests: {}", tenant, e);
            HttpResponse::InternalServerError()
                .json(ErrorResponse::internal_error("failed to list generation requests"))
        }
    }
}

async fn find_request(
    data: &AppState,
    tenant: TenantId,
    id: Uuid,
) -> Result<GenerationRequest, HttpResponse> {
    match data.tracker.get(tenant, id).await {
        Ok(Some(request)) => Ok(request),
        Ok(None) => Err(HttpResponse::NotFound().json(ErrorResponse::not_found(&format!(
            "generation request {} not found",
            id
        )))),
        Err(e) => {
            error!("Tenant {}: failed to load request {}: {}", tenant, id, e);
            Err(HttpResponse::InternalServerError()
                .json(ErrorResponse::internal_error("failed to load generation request")))
        }
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Carnets",
    get,
    path = "/carnets/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Generation request id")
    ),
    responses(
        (status = 200, description = "Current status and progress", body = GenerationRequest),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 404, description = "Unknown request", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_job(
    tenant: TenantId,
    id: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> impl Responder {
    match find_request(&data, tenant, id.into_inner()).await {
        Ok(request) => HttpResponse::Ok().json(request),
        Err(response) => response,
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Carnets",
    get,
    path = "/carnets/jobs/{id}/download",
    params(
        ("id" = Uuid, Path, description = "Generation request id")
    ),
    responses(
        (status = 200, description = "Generated PDF", content_type = "application/pdf", body = Vec<u8>),
        (status = 404, description = "Unknown request", body = ErrorResponse),
        (status = 409, description = "Request has not completed", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn download_job(
    tenant: TenantId,
    id: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> impl Responder {
    let request = match find_request(&data, tenant, id.into_inner()).await {
        Ok(request) => request,
        Err(response) => return response,
    };

    match (request.status, request.result_path) {
        (GenerationStatus::Completed, Some(path)) => serve_artifact(&data, tenant, &path).await,
        (status, _) => HttpResponse::Conflict().json(
            ErrorResponse::new(
                "Conflict",
                &format!("generation request {} is {}", request.id, status),
            )
            .with_suggestion(match status {
                GenerationStatus::Failed => Some("Cree una nueva solicitud de generación."),
                _ => Some("Espere a que la generación termine."),
            }),
        ),
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Carnets",
    get,
    path = "/carnets/download",
    params(DownloadQuery),
    responses(
        (status = 200, description = "Stored artifact", content_type = "application/pdf", body = Vec<u8>),
        (status = 403, description = "Path is outside the caller's tenant", body = ErrorResponse),
        (status = 404, description = "Artifact not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn download(
    tenant: TenantId,
    query: web::Query<DownloadQuery>,
    data: web::Data<AppState>,
) -> impl Responder {
    serve_artifact(&data, tenant, &query.path).await
}

async fn serve_artifact(data: &AppState, tenant: TenantId, path: &str) -> HttpResponse {
    if let Err(e) = paths::authorize_download(tenant, path) {
        warn!("Tenant {}: refused download of '{}'", tenant, path);
        return carnet_error_response(&e);
    }

    match data.storage.get(path).await {
        Ok(bytes) => {
            let file_name = sanitize_filename::sanitize(paths::file_name(path));
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            HttpResponse::Ok()
                .content_type(mime.essence_str())
                .insert_header((
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", file_name),
                ))
                .body(bytes)
        }
        Err(StorageError::NotFound(_)) => HttpResponse::NotFound()
            .json(ErrorResponse::not_found(&format!("'{}' not found", path))),
        Err(e) => {
            error!("Tenant {}: failed to read '{}': {}", tenant, path, e);
            HttpResponse::InternalServerError()
                .json(ErrorResponse::internal_error("failed to read artifact"))
        }
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/carnets/stream").route(web::get().to(stream_carnets)))
        .service(
            web::resource("/carnets/jobs")
                .route(web::get().to(list_jobs))
                .route(web::post().to(create_job)),
        )
        .service(web::resource("/carnets/jobs/{id}").route(web::get().to(get_job)))
        .service(web::resource("/carnets/jobs/{id}/download").route(web::get().to(download_job)))
        .service(web::resource("/carnets/download").route(web::get().to(download)))
        .service(web::resource("/carnets/metrics").route(web::get().to(metrics::carnet_metrics)));
}
