//! Common test utilities for in-process API testing.
//!
//! This module provides a test fixture that builds the router over a
//! temporary SQLite store and an in-memory request queue, optionally with a
//! running worker pool, so the HTTP surface can be exercised without
//! binding a socket.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use turnstile_core::testing::FlakyStore;

#[allow(unused_imports)]
pub use turnstile_core::testing::fixtures;

use turnstile_core::{
    AdmissionEngine, CapacityStore, Config, DatabaseConfig, EventRegistry, MemoryRequestChannel,
    RequestChannel, ReservationLedger, ServerConfig, SqliteStore, WorkerConfig, WorkerPool,
};


/// Test fixture for API testing.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_booking() {
///     let fixture = TestFixture::new().await;
///     let event_id = fixture.create_event("Concert", 10).await;
///
///     let response = fixture.post("/api/v1/tickets/book", json!({
///         "event_id": event_id,
///         "email": "fan@example.com",
///         "quantity": 2
///     })).await;
///
///     assert_eq!(response.status, 202);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Store shared with the router, for direct assertions
    pub store: Arc<SqliteStore>,
    /// Request queue shared with the router
    pub channel: Arc<MemoryRequestChannel>,
    /// Worker pool (if enabled)
    pub workers: Option<Arc<WorkerPool>>,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a fixture that only queues bookings.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a fixture with running workers.
    pub async fn with_workers() -> Self {
        Self::with_config(TestConfig::with_workers()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
            },
            database: DatabaseConfig {
                path: db_path.clone(),
                ..Default::default()
            },
            workers: WorkerConfig {
                enabled: test_config.enable_workers,
                count: 2,
                ..Default::default()
            },
            ..Default::default()
        };

        let store = Arc::new(
            SqliteStore::new(&db_path, config.database.busy_timeout())
                .expect("Failed to create store"),
        );
        let channel = Arc::new(MemoryRequestChannel::new());

        let workers = if test_config.enable_workers {
            let pool = WorkerPool::new(
                config.workers.clone(),
                Arc::clone(&channel) as Arc<dyn RequestChannel>,
                AdmissionEngine::from_store(Arc::clone(&store)),
            )
            .with_error_backoff(Duration::from_millis(10));
            pool.start().expect("Failed to start worker pool");
            Some(Arc::new(pool))
        } else {
            None
        };

        let router = build_router(config, Arc::clone(&store), &channel, workers.clone());

        Self {
            router,
            store,
            channel,
            workers,
            temp_dir,
        }
    }

    /// Create a fixture whose router reads from a failure-injecting store.
    ///
    /// `fixture.store` is not used by the router in this mode.
    pub async fn with_flaky_store() -> (Self, Arc<FlakyStore>) {
        let mut fixture = Self::new().await;
        let flaky = Arc::new(FlakyStore::new());
        fixture.router = build_router(
            Config::default(),
            Arc::clone(&flaky),
            &fixture.channel,
            None,
        );
        (fixture, flaky)
    }

    /// Register an event through the API and return its id.
    pub async fn create_event(&self, name: &str, capacity: u32) -> String {
        let response = self
            .post("/api/v1/events", json!({ "name": name, "capacity": capacity }))
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body["id"]
            .as_str()
            .expect("event id missing")
            .to_string()
    }

    /// Submit a booking and return the ticket id.
    pub async fn book(&self, event_id: &str, quantity: i64) -> String {
        let response = self
            .post(
                "/api/v1/tickets/book",
                json!({ "event_id": event_id, "email": "fan@example.com", "quantity": quantity }),
            )
            .await;
        assert_eq!(response.status, StatusCode::ACCEPTED, "{}", response.body);
        response.body["ticket_id"]
            .as_str()
            .expect("ticket id missing")
            .to_string()
    }

    /// Poll until a booking is admitted or rejected, or the timeout elapses.
    pub async fn wait_for_decision(
        &self,
        ticket_id: &str,
        timeout: Duration,
    ) -> Option<TestResponse> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let response = self.get(&format!("/api/v1/tickets/{}", ticket_id)).await;
            if response.body["status"] != "pending" {
                return Some(response);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until the queue for an event is drained.
    pub async fn wait_for_empty_queue(&self, event_id: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let response = self.get(&format!("/api/v1/queue/{}/length", event_id)).await;
            if response.body["queue_length"] == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Stop the worker pool, if any.
    pub async fn shutdown(&self) {
        if let Some(pool) = &self.workers {
            pool.stop().await.expect("Failed to stop worker pool");
        }
    }

    /// Send a PUT request with JSON body.
    pub async fn put(&self, path: &str, body: Value) -> TestResponse {
        self.request("PUT", path, Some(body)).await
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        self.request_raw("POST", path, body, "application/json").await
    }

    /// Send a GET request and return the raw body text.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Send a request with raw string body and custom content type.
    async fn request_raw(
        &self,
        method: &str,
        path: &str,
        body: &str,
        content_type: &str,
    ) -> TestResponse {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("Content-Type", content_type)
            .body(Body::from(body.to_string()))
            .unwrap();

        self.send(request).await
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

fn build_router<S>(
    config: Config,
    store: Arc<S>,
    channel: &Arc<MemoryRequestChannel>,
    workers: Option<Arc<WorkerPool>>,
) -> Router
where
    S: EventRegistry + CapacityStore + ReservationLedger + 'static,
{
    let state = Arc::new(turnstile_server::state::AppState::new(
        config,
        store,
        Arc::clone(channel) as Arc<dyn RequestChannel>,
        workers,
    ));
    turnstile_server::api::create_router(state)
}

/// Configuration for test fixture.
#[derive(Debug, Clone, Default)]
pub struct TestConfig {
    /// Run workers that admit queued bookings
    pub enable_workers: bool,
}

impl TestConfig {
    /// Create config with workers enabled.
    pub fn with_workers() -> Self {
        Self {
            enable_workers: true,
        }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}

/// Helper to assert a JSON path equals expected value.
#[macro_export]
macro_rules! assert_json_path {
    ($json:expr, $path:expr, $expected:expr) => {
        let actual = &$json[$path];
        assert_eq!(
            actual, &$expected,
            "Path '{}' expected {:?}, got {:?}",
            $path, $expected, actual
        );
    };
}
