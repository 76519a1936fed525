//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use openapi_server::models::{
    CreateProjectRequest, CreateProjectResponse, DeploymentResponse, ErrorResponse,
    HealthResponse, ProjectData, VersionResponse,
};
use tracing::error;

use crate::errors::PipelineError;
use crate::models::deployment::preview_url;
use crate::server::state::ApiState;
use crate::utils::version_info;

impl PipelineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PipelineError::Conflict(_) => StatusCode::CONFLICT,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::HttpError(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "shipyard".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
    })
}

/// `POST /project`: queue a deployment and return its tracking handle
pub async fn create_project_handler(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> Result<impl IntoResponse, PipelineError> {
    let Json(request) = body.map_err(|e| PipelineError::InvalidInput(e.body_text()))?;

    let created = state
        .orchestrator
        .create_deployment(&request.git_url, request.slug.as_deref())
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateProjectResponse {
            status: created.status.to_string(),
            data: ProjectData {
                project_slug: created.deployment_id,
                url: created.preview_url,
            },
        }),
    ))
}

/// `GET /project/{slug}`: current status of a deployment
pub async fn get_project_handler(
    State(state): State<Arc<ApiState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, PipelineError> {
    let record = state
        .registry()
        .get(&slug)
        .ok_or_else(|| PipelineError::NotFound(format!("deployment {}", slug)))?;
    let deployment = record.deployment;

    Ok(Json(DeploymentResponse {
        url: preview_url(&deployment.id, state.orchestrator.router_host()),
        project_slug: deployment.id,
        git_url: deployment.source_url,
        status: deployment.status.to_string(),
        created_at: deployment.created_at,
        updated_at: deployment.updated_at,
    }))
}
