//! Response envelope shared by errors and message-only endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// `{"status", "message", "data", "error"}` envelope.
///
/// Errors always render through this shape. Successful deletes use it with `data: null`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse {
    pub status: ResponseStatus,
    pub message: String,
    #[schema(value_type = Option<Object>)]
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>, kind: &str) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
            data: None,
            error: Some(kind.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_serializes_null_data_and_error() {
        let value = serde_json::to_value(ApiResponse::success("Transaction deleted successfully")).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "success",
                "message": "Transaction deleted successfully",
                "data": null,
                "error": null
            })
        );
    }

    #[test]
    fn error_carries_kind() {
        let value = serde_json::to_value(ApiResponse::error("Transaction with ID 4 not found", "not_found")).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"], "not_found");
        assert!(value["data"].is_null());
    }
}
