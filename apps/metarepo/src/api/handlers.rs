//! # API Endpoint Handlers

use super::{
    AppState,
    types::{
        EntityResponse, ErrorBody, HealthResponse, HistoryQuery, HistoryResponse,
        RelationshipResponse, RelationshipsQuery, RelationshipsResponse, TransactionResponse,
        parse_operation,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use metarepo_core::{ErrorKind, Guid, MetarepoError};
use serde_json::Value;

/// Header naming the user a write is recorded against.
pub const USER_HEADER: &str = "x-metarepo-user";

/// HTTP status reported for each failure kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidState | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::InvalidParameter => StatusCode::BAD_REQUEST,
        ErrorKind::TypeError => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Repository | ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn read_failed(error: &MetarepoError) -> (StatusCode, ErrorBody) {
    tracing::error!("Read failed: {}", error);
    (status_for(error.kind()), ErrorBody::from(error))
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// TRANSACTION HANDLER
// =============================================================================

/// Run one operation request as one transaction.
pub async fn transaction_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> impl IntoResponse {
    let operation = match parse_operation(request) {
        Ok(operation) => operation,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(TransactionResponse::error(ErrorBody::malformed(e))),
            );
        }
    };

    let user = headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|user| !user.is_empty())
        .unwrap_or(state.default_user.as_str())
        .to_string();

    let mut repository = state.repository.write().await;
    match repository.execute(&user, crate::transaction_time(), operation) {
        Ok(outcome) => (StatusCode::OK, Json(TransactionResponse::success(outcome))),
        Err(e) => (
            status_for(e.kind()),
            Json(TransactionResponse::error(ErrorBody::from(&e))),
        ),
    }
}

// =============================================================================
// READ HANDLERS
// =============================================================================

/// Current state of an entity (full or proxy).
pub async fn entity_handler(
    State(state): State<AppState>,
    Path(guid): Path<String>,
) -> impl IntoResponse {
    let guid = Guid::new(guid);
    let repository = state.repository.read().await;
    match repository.entity(&guid) {
        Ok(Some(entity)) => (
            StatusCode::OK,
            Json(EntityResponse {
                found: true,
                entity: Some(entity),
                error: None,
            }),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(EntityResponse {
                found: false,
                entity: None,
                error: Some(ErrorBody::from(&MetarepoError::EntityNotKnown(guid))),
            }),
        ),
        Err(e) => {
            let (status, body) = read_failed(&e);
            (
                status,
                Json(EntityResponse {
                    found: false,
                    entity: None,
                    error: Some(body),
                }),
            )
        }
    }
}

/// Current state of a relationship.
pub async fn relationship_handler(
    State(state): State<AppState>,
    Path(guid): Path<String>,
) -> impl IntoResponse {
    let guid = Guid::new(guid);
    let repository = state.repository.read().await;
    match repository.relationship(&guid) {
        Ok(Some(relationship)) => (
            StatusCode::OK,
            Json(RelationshipResponse {
                found: true,
                relationship: Some(relationship),
                error: None,
            }),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(RelationshipResponse {
                found: false,
                relationship: None,
                error: Some(ErrorBody::from(&MetarepoError::RelationshipNotKnown(guid))),
            }),
        ),
        Err(e) => {
            let (status, body) = read_failed(&e);
            (
                status,
                Json(RelationshipResponse {
                    found: false,
                    relationship: None,
                    error: Some(body),
                }),
            )
        }
    }
}

/// Relationships attached to an entity.
pub async fn entity_relationships_handler(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    Query(query): Query<RelationshipsQuery>,
) -> impl IntoResponse {
    let repository = state.repository.read().await;
    match repository.relationships_for(&Guid::new(guid), query.include_deleted) {
        Ok(relationships) => (
            StatusCode::OK,
            Json(RelationshipsResponse {
                relationships,
                error: None,
            }),
        ),
        Err(e) => {
            let (status, body) = read_failed(&e);
            (
                status,
                Json(RelationshipsResponse {
                    relationships: Vec::new(),
                    error: Some(body),
                }),
            )
        }
    }
}

/// Stored versions of an entity or relationship, newest first.
///
/// An unknown guid yields an empty list, not an error.
pub async fn history_handler(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let repository = state.repository.read().await;
    match repository.history(&Guid::new(guid.clone()), query.limit()) {
        Ok(versions) => (
            StatusCode::OK,
            Json(HistoryResponse {
                guid,
                versions,
                error: None,
            }),
        ),
        Err(e) => {
            let (status, body) = read_failed(&e);
            (
                status,
                Json(HistoryResponse {
                    guid,
                    versions: Vec::new(),
                    error: Some(body),
                }),
            )
        }
    }
}
