// Service discovery and self-registration against a mock Eureka server.
#[cfg(test)]
mod test {
    use std::{
        collections::HashSet,
        net::SocketAddr,
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };

    use axum::{
        Json, Router,
        body::Body,
        extract::{ConnectInfo, Path, State},
        http::{Request, StatusCode},
        response::IntoResponse,
        routing::{get, post, put},
    };
    use http_body_util::BodyExt;
    use lms_gateway::{
        EurekaClient, GatewayService, HttpClientAdapter, HttpHandler, SelfRegistration,
        config::{RegistryConfig, RouteConfig, SelfRegistrationConfig, ServerConfig, ServiceConfig},
        ports::registry::RegistrySource,
        router,
        utils::{GracefulShutdown, ShutdownReason},
    };
    use serde_json::{Value, json};
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    #[derive(Default)]
    struct MockEureka {
        apps: Mutex<Value>,
        failing: AtomicBool,
        calls: Mutex<Vec<String>>,
        registered: Mutex<Option<Value>>,
    }

    impl MockEureka {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    async fn apps(State(mock): State<Arc<MockEureka>>) -> impl IntoResponse {
        if mock.failing.load(Ordering::SeqCst) {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Json(mock.apps.lock().unwrap().clone()).into_response()
    }

    async fn register(
        State(mock): State<Arc<MockEureka>>,
        Path(app): Path<String>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        mock.calls.lock().unwrap().push(format!("register {app}"));
        *mock.registered.lock().unwrap() = Some(body);
        StatusCode::NO_CONTENT
    }

    async fn heartbeat(
        State(mock): State<Arc<MockEureka>>,
        Path((app, id)): Path<(String, String)>,
    ) -> StatusCode {
        mock.calls.lock().unwrap().push(format!("heartbeat {app}/{id}"));
        StatusCode::OK
    }

    async fn deregister(
        State(mock): State<Arc<MockEureka>>,
        Path((app, id)): Path<(String, String)>,
    ) -> StatusCode {
        mock.calls.lock().unwrap().push(format!("deregister {app}/{id}"));
        StatusCode::OK
    }

    async fn spawn_eureka(mock: Arc<MockEureka>) -> String {
        let app = Router::new()
            .route("/eureka/apps", get(apps))
            .route("/eureka/apps/{app}", post(register))
            .route("/eureka/apps/{app}/{id}", put(heartbeat).delete(deregister))
            .with_state(mock);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/eureka")
    }

    async fn spawn_named_backend(name: &'static str) -> SocketAddr {
        let app = Router::new().fallback(move || async move { name });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr
    }

    fn eureka_instance(addr: SocketAddr, status: &str) -> Value {
        json!({
            "instanceId": format!("course-{}", addr.port()),
            "hostName": "localhost",
            "app": "COURSE-SERVICE",
            "ipAddr": addr.ip().to_string(),
            "status": status,
            "port": { "$": addr.port(), "@enabled": "true" },
        })
    }

    fn gateway(eureka_url: &str) -> (Arc<GatewayService>, Router) {
        let config = ServerConfig::builder()
            .registry(RegistryConfig::new(eureka_url))
            .service(
                "COURSE-SERVICE",
                ServiceConfig::with_fallback("http://127.0.0.1:9"),
            )
            .route(RouteConfig::new("/api/courses", "COURSE-SERVICE"))
            .build();
        let source: Arc<dyn RegistrySource> =
            Arc::new(EurekaClient::new(eureka_url, Duration::from_secs(2)).unwrap());
        let gateway = Arc::new(GatewayService::new(Arc::new(config), Some(source)).unwrap());
        let client = HttpClientAdapter::new(Duration::from_secs(5)).unwrap();
        let app = router(Arc::new(HttpHandler::new(gateway.clone(), Arc::new(client))));
        (gateway, app)
    }

    async fn get_text(app: &Router, uri: &str) -> (StatusCode, String) {
        let mut req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_round_robin_over_discovered_instances() {
        let first = spawn_named_backend("first").await;
        let second = spawn_named_backend("second").await;
        let down = spawn_named_backend("down").await;

        let mock = Arc::new(MockEureka::default());
        *mock.apps.lock().unwrap() = json!({
            "applications": {
                "application": [{
                    "name": "COURSE-SERVICE",
                    "instance": [
                        eureka_instance(first, "UP"),
                        eureka_instance(down, "DOWN"),
                        eureka_instance(second, "UP"),
                    ]
                }]
            }
        });
        let url = spawn_eureka(mock.clone()).await;
        let (gateway, app) = gateway(&url);

        assert_eq!(gateway.registry().refresh_once().await.unwrap(), 1);

        let mut seen = Vec::new();
        for _ in 0..4 {
            let (status, body) = get_text(&app, "/api/courses").await;
            assert_eq!(status, StatusCode::OK);
            seen.push(body);
        }
        assert_ne!(seen[0], seen[1]);
        assert_eq!(seen[0], seen[2]);
        assert_eq!(seen[1], seen[3]);
        let distinct: HashSet<_> = seen.into_iter().collect();
        assert_eq!(
            distinct,
            HashSet::from(["first".to_string(), "second".to_string()])
        );

        let (_, body) = get_text(&app, "/admin/scaling/services/COURSE-SERVICE").await;
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["count"], 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_poll_keeps_previous_snapshot() {
        let backend = spawn_named_backend("only").await;
        let mock = Arc::new(MockEureka::default());
        *mock.apps.lock().unwrap() = json!({
            "applications": {
                "application": {
                    "name": "COURSE-SERVICE",
                    "instance": eureka_instance(backend, "UP")
                }
            }
        });
        let url = spawn_eureka(mock.clone()).await;
        let (gateway, app) = gateway(&url);

        gateway.registry().refresh_once().await.unwrap();
        mock.failing.store(true, Ordering::SeqCst);
        assert!(gateway.registry().refresh_once().await.is_err());

        let (status, body) = get_text(&app, "/api/courses").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "only");

        let (_, health) = get_text(&app, "/health").await;
        let health: Value = serde_json::from_str(&health).unwrap();
        assert_eq!(health["services"]["COURSE-SERVICE"], 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreachable_registry_uses_fallback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/eureka", listener.local_addr().unwrap());
        drop(listener);

        let (gateway, _) = gateway(&url);
        assert!(gateway.registry().refresh_once().await.is_err());
        assert_eq!(
            gateway.registry().service_url("COURSE-SERVICE").as_deref(),
            Some("http://127.0.0.1:9")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_self_registration_lifecycle() {
        let mock = Arc::new(MockEureka::default());
        let url = spawn_eureka(mock.clone()).await;
        let client = Arc::new(EurekaClient::new(&url, Duration::from_secs(2)).unwrap());

        let registration = SelfRegistration::from_config(
            client,
            &SelfRegistrationConfig {
                app_name: "api-gateway".to_string(),
                instance_ip: "127.0.0.1".to_string(),
                port: None,
                heartbeat_interval: "100ms".to_string(),
            },
            8080,
        )
        .unwrap();

        let shutdown = GracefulShutdown::new();
        let token = shutdown.shutdown_token();
        let task = tokio::spawn(async move { registration.run(token).await });

        tokio::time::sleep(Duration::from_millis(350)).await;
        shutdown.trigger_shutdown(ShutdownReason::Graceful);
        task.await.unwrap();

        let calls = mock.calls();
        assert_eq!(calls.first().map(String::as_str), Some("register API-GATEWAY"));
        assert!(calls.contains(&"heartbeat API-GATEWAY/API-GATEWAY:127.0.0.1:8080".to_string()));
        assert_eq!(
            calls.last().map(String::as_str),
            Some("deregister API-GATEWAY/API-GATEWAY:127.0.0.1:8080")
        );

        let registered = mock.registered.lock().unwrap().clone().unwrap();
        assert_eq!(registered["instance"]["app"], "API-GATEWAY");
        assert_eq!(registered["instance"]["port"]["$"], 8080);
        assert_eq!(registered["instance"]["status"], "UP");
    }
}
