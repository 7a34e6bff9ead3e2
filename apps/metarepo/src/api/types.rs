//! # API Request/Response Types
//!
//! JSON structures for the HTTP API. Operation requests are the core
//! [`Operation`] encoding, e.g.
//!
//! ```json
//! { "operation": "add_entity",
//!   "entity": { "type_name": "Asset", "properties": { "name": { "primitive": { "string": "a" } } } } }
//! ```

use metarepo_core::{
    EntityRecord, ErrorKind, HistoryEntry, MetarepoError, Operation, Relationship, TxError,
    TxOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default number of versions returned by a history request.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Upper bound on versions returned by one history request.
pub const MAX_HISTORY_LIMIT: usize = 1000;

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// A failure as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

impl From<&MetarepoError> for ErrorBody {
    fn from(error: &MetarepoError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            tx_id: None,
            operation: None,
        }
    }
}

impl From<&TxError> for ErrorBody {
    fn from(error: &TxError) -> Self {
        Self {
            kind: error.kind(),
            message: error.source.to_string(),
            tx_id: Some(error.tx_id),
            operation: Some(error.operation.to_string()),
        }
    }
}

impl ErrorBody {
    /// A request that could not be decoded into an operation.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidParameter,
            message: message.into(),
            tx_id: None,
            operation: None,
        }
    }
}

// =============================================================================
// TRANSACTION
// =============================================================================

/// Guid-bearing field of each create operation.
const CREATE_FIELDS: [(&str, &str); 4] = [
    ("add_entity", "entity"),
    ("add_external_entity", "entity"),
    ("add_relationship", "relationship"),
    ("add_external_relationship", "relationship"),
];

/// Decode an operation request, minting a v4 uuid for a create that carries
/// no guid (or an empty one).
pub fn parse_operation(mut request: Value) -> Result<Operation, String> {
    let field = request
        .get("operation")
        .and_then(Value::as_str)
        .and_then(|name| {
            CREATE_FIELDS
                .iter()
                .find(|(operation, _)| *operation == name)
                .map(|(_, field)| *field)
        });

    if let Some(field) = field
        && let Some(instance) = request.get_mut(field).and_then(Value::as_object_mut)
    {
        let missing = instance
            .get("guid")
            .and_then(Value::as_str)
            .is_none_or(str::is_empty);
        if missing {
            let guid = uuid::Uuid::new_v4().to_string();
            tracing::debug!("Minted guid {} for new {}", guid, field);
            instance.insert("guid".to_string(), Value::String(guid));
        }
    }

    serde_json::from_value(request).map_err(|e| format!("Invalid operation request: {}", e))
}

/// Transaction response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TxOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl TransactionResponse {
    pub fn success(outcome: TxOutcome) -> Self {
        Self {
            success: true,
            outcome: Some(outcome),
            error: None,
        }
    }

    pub fn error(error: ErrorBody) -> Self {
        Self {
            success: false,
            outcome: None,
            error: Some(error),
        }
    }
}

// =============================================================================
// READS
// =============================================================================

/// Entity lookup response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityResponse {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Relationship lookup response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipResponse {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<Relationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Query string of `GET /entity/{guid}/relationships`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelationshipsQuery {
    #[serde(default)]
    pub include_deleted: bool,
}

/// Relationships attached to an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipsResponse {
    pub relationships: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Query string of `GET /history/{guid}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .min(MAX_HISTORY_LIMIT)
    }
}

/// Versions of one instance, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub guid: String,
    pub versions: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

// =============================================================================
// TESTS
// =============================================================================
