use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tokio::time::timeout;

use super::probe::{ReadinessProbe, ServiceProbe};
use crate::ServiceState;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn handler(State(state): State<ServiceState>) -> Response {
    report(&ServiceProbe(state.objects())).await
}

async fn report(probe: &dyn ReadinessProbe) -> Response {
    let body = match timeout(PROBE_TIMEOUT, probe.probe()).await {
        Ok(Ok(())) => return (StatusCode::OK, Json(json!({"status": "ok"}))).into_response(),
        Ok(Err(reason)) => json!({
            "status": "unavailable",
            "component": reason.component(),
            "message": reason.to_string(),
        }),
        Err(_) => json!({"status": "unavailable", "message": "readiness probe timed out"}),
    };
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;
    use crate::http_server::health::probe::tests::FixedProbe;
    use crate::http_server::health::probe::NotReady;

    #[tokio::test]
    async fn test_report_names_failing_component() {
        assert_eq!(report(&FixedProbe(None)).await.status(), StatusCode::OK);

        let response = report(&FixedProbe(Some(|| NotReady::MetadataStore))).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["component"], "database");

        let response = report(&FixedProbe(Some(|| NotReady::Draining))).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
