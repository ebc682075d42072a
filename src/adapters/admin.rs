//! Read-only view of discovered services plus the scaling acknowledgement stub.
//!
//! Nothing here talks to an orchestrator: a scale request is compared with the number of live
//! instances the registry currently reports and answered with what would happen.
use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;

use crate::core::registry::ServiceRegistry;

const ORCHESTRATION_NOTE: &str = "Real implementation would trigger container orchestration";

/// Admin routes, relative to the configured prefix.
pub fn router<S>(registry: Arc<ServiceRegistry>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/services", get(list_services))
        .route("/services/{name}", get(service_instances))
        .route("/services/{name}/scale", post(scale_service))
        .with_state(registry)
}

async fn list_services(State(registry): State<Arc<ServiceRegistry>>) -> Json<serde_json::Value> {
    Json(json!({ "services": registry.all_services() }))
}

async fn service_instances(
    State(registry): State<Arc<ServiceRegistry>>,
    Path(name): Path<String>,
) -> Json<serde_json::Value> {
    let instances = registry.service_instances(&name);
    Json(json!({
        "service": name,
        "count": instances.len(),
        "instances": instances,
    }))
}

async fn scale_service(
    State(registry): State<Arc<ServiceRegistry>>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(replicas) = params
        .get("replicas")
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|replicas| *replicas >= 1)
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid replicas parameter" })),
        )
            .into_response();
    };

    let current = registry.service_instances(&name).len();
    tracing::info!(
        service = %name,
        current_instances = current,
        target_instances = replicas,
        "Scaling request received"
    );

    let message = match replicas.cmp(&current) {
        Ordering::Greater => "Scaling request accepted",
        Ordering::Less => "Scale down request accepted",
        Ordering::Equal => {
            return Json(json!({
                "message": "No scaling needed, current instance count matches requested",
                "instances": current,
            }))
            .into_response();
        }
    };

    Json(json!({
        "message": message,
        "current_instances": current,
        "target_instances": replicas,
        "status": "in_progress",
        "note": ORCHESTRATION_NOTE,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::{ServerConfig, ServiceConfig},
        ports::registry::{
            InstanceStatus, RegisteredApplication, RegisteredInstance, RegistryError,
            RegistrySource,
        },
    };

    struct StaticSource;

    fn instance(ip: &str, status: InstanceStatus) -> RegisteredInstance {
        RegisteredInstance {
            instance_id: format!("{ip}:8082"),
            app: "COURSE-SERVICE".to_string(),
            host_name: ip.to_string(),
            ip_addr: ip.to_string(),
            port: 8082,
            status,
        }
    }

    #[async_trait]
    impl RegistrySource for StaticSource {
        async fn fetch_applications(&self) -> Result<Vec<RegisteredApplication>, RegistryError> {
            Ok(vec![RegisteredApplication {
                name: "COURSE-SERVICE".to_string(),
                instances: vec![
                    instance("10.0.0.1", InstanceStatus::Up),
                    instance("10.0.0.2", InstanceStatus::Up),
                    instance("10.0.0.3", InstanceStatus::Down),
                ],
            }])
        }
    }

    async fn app() -> Router {
        let config = ServerConfig::builder()
            .service(
                "BACKEND-SERVICE",
                ServiceConfig::with_fallback("http://backend:8081"),
            )
            .build();
        let registry = ServiceRegistry::from_config(&config, Some(Arc::new(StaticSource))).unwrap();
        registry.refresh_once().await.unwrap();
        router(Arc::new(registry))
    }

    async fn call(method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app()
            .await
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_list_and_describe_services() {
        let (status, body) = call("GET", "/services").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["services"]["COURSE-SERVICE"], 2);
        // Fallback URLs are not live instances.
        assert!(body["services"].get("BACKEND-SERVICE").is_none());

        let (_, body) = call("GET", "/services/course-service").await;
        assert_eq!(body["service"], "course-service");
        assert_eq!(body["count"], 2);
        assert_eq!(body["instances"][0], "http://10.0.0.1:8082");

        let (_, body) = call("GET", "/services/UNKNOWN").await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn test_scale_up() {
        let (status, body) = call("POST", "/services/COURSE-SERVICE/scale?replicas=3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Scaling request accepted");
        assert_eq!(body["current_instances"], 2);
        assert_eq!(body["target_instances"], 3);
        assert_eq!(body["status"], "in_progress");
        assert_eq!(body["note"], ORCHESTRATION_NOTE);
    }

    #[tokio::test]
    async fn test_scale_down_and_equal() {
        let (_, body) = call("POST", "/services/COURSE-SERVICE/scale?replicas=1").await;
        assert_eq!(body["message"], "Scale down request accepted");
        assert_eq!(body["target_instances"], 1);

        let (_, body) = call("POST", "/services/COURSE-SERVICE/scale?replicas=2").await;
        assert_eq!(
            body["message"],
            "No scaling needed, current instance count matches requested"
        );
        assert_eq!(body["instances"], 2);
        assert!(body.get("status").is_none());
    }

    #[tokio::test]
    async fn test_invalid_replicas() {
        for uri in [
            "/services/COURSE-SERVICE/scale",
            "/services/COURSE-SERVICE/scale?replicas=0",
            "/services/COURSE-SERVICE/scale?replicas=-2",
            "/services/COURSE-SERVICE/scale?replicas=many",
        ] {
            let (status, body) = call("POST", uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["error"], "Invalid replicas parameter");
        }
    }
}
