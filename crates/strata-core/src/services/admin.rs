//! Envelope returned by every administrative operation.

use serde::Serialize;

use crate::error::{Error, Result};

/// Machine-readable failure carried by a failed [`AdminResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminError {
    pub kind: &'static str,
    pub message: String,
}

impl From<&Error> for AdminError {
    fn from(error: &Error) -> Self {
        let kind = match error {
            Error::BackendUnavailable { .. } => "backend_unavailable",
            Error::NotFound(_) => "not_found",
            Error::Validation(_) => "validation",
            Error::ConflictUnresolved(_) => "conflict_unresolved",
            Error::CorruptArchive { .. } => "corrupt_archive",
            Error::StorageUnavailable(_) => "storage_unavailable",
            Error::Cancelled => "cancelled",
            Error::LibSql(_) | Error::Io(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::Http(_) => "http",
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

/// `{success, data}` on success, `{success, error}` on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AdminError>,
}

impl<T> AdminResponse<T> {
    pub const fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(AdminError::from(error)),
        }
    }

    /// Convert back into a `Result`, for callers that prefer `?`.
    pub fn into_result(self) -> std::result::Result<T, AdminError> {
        match (self.data, self.error) {
            (Some(data), None) => Ok(data),
            (_, Some(error)) => Err(error),
            (None, None) => Err(AdminError {
                kind: "empty",
                message: "response carried no data".to_string(),
            }),
        }
    }
}

impl<T> From<Result<T>> for AdminResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(error) => {
                tracing::warn!("Admin operation failed: {error}");
                Self::failed(&error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackendId;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn success_envelope_omits_error() {
        let response = AdminResponse::ok(json!({"count": 2}));
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"success": true, "data": {"count": 2}})
        );
    }

    #[test]
    fn failure_envelope_carries_kind_and_message() {
        let response: AdminResponse<()> =
            Err(Error::unavailable(BackendId::Remote, "timeout")).into();
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "success": false,
                "error": {
                    "kind": "backend_unavailable",
                    "message": "Backend remote unavailable: timeout"
                }
            })
        );
        assert_eq!(response.into_result().unwrap_err().kind, "backend_unavailable");
    }
}
