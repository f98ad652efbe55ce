use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::object_service::ObjectError;

impl IntoResponse for ObjectError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }

        let msg = match &self {
            ObjectError::ReadOnly { .. } => format!("READ ONLY: {self}"),
            // internals stay in the log
            ObjectError::Cache(_)
            | ObjectError::Crypto(_)
            | ObjectError::Database(_)
            | ObjectError::Io(_)
            | ObjectError::Zip(_) => "internal server error".to_string(),
            _ => self.to_string(),
        };
        (status, Json(serde_json::json!({ "msg": msg }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use http_body_util::BodyExt;
    use uuid::Uuid;

    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_read_only_carries_banner() {
        let response = ObjectError::ReadOnly {
            stored: "1".into(),
            expected: "2".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(body["msg"].as_str().unwrap().starts_with("READ ONLY"));
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let response =
            ObjectError::Io(std::io::Error::other("/var/cache/secret path")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["msg"], "internal server error");

        let id = Uuid::new_v4();
        let response = ObjectError::Deleted(id).into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(body_json(response).await["msg"]
            .as_str()
            .unwrap()
            .contains(&id.to_string()));
    }
}
