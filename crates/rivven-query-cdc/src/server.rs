//! HTTP endpoint
//!
//! Accepts an [`OperationRequest`] as a JSON body on any path and method,
//! runs it through the pipeline, and answers:
//!
//! | Outcome | Status | Body |
//! |---------|--------|------|
//! | Run succeeded | `200` | empty |
//! | Body is not valid JSON | `400` | parse error |
//! | Run failed | `400` | pipeline error |
//!
//! Body keys match case-insensitively and the body size is not capped.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::pipeline::Pipeline;
use crate::request::OperationRequest;

/// HTTP front end of a [`Pipeline`]
pub struct QueryCdcServer {
    pipeline: Arc<Pipeline>,
    config: ServerConfig,
}

impl QueryCdcServer {
    pub fn new(pipeline: Pipeline, config: ServerConfig) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            config,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", any(dml_endpoint))
            .fallback(dml_endpoint)
            .layer(DefaultBodyLimit::disable())
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.pipeline))
    }

    /// Serve until Ctrl-C.
    pub async fn run(self) -> anyhow::Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(self.config.bind).await?;
        info!("Query CDC endpoint listening on http://{}", self.config.bind);
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        info!("Query CDC endpoint stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn dml_endpoint(State(pipeline): State<Arc<Pipeline>>, body: Bytes) -> Response {
    let request: OperationRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Rejected request body");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    match pipeline.run(&request).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => {
            warn!(kind = %e.kind(), "Processing query failed: {}", e);
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Schema, Value};
    use crate::testing::{MemoryBroker, MemoryQueryEngine};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::util::ServiceExt;

    fn create_test_app(broker: &MemoryBroker) -> Router {
        let engine = MemoryQueryEngine::new(
            Schema::from_names(["id", "name"]),
            vec![vec![Value::Int64(1), Value::from("Alice")]],
        );
        let pipeline = Pipeline::new(Arc::new(engine), Arc::new(broker.clone()));
        QueryCdcServer::new(pipeline, ServerConfig::default()).router()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn test_valid_request() {
        let broker = MemoryBroker::new();
        let app = create_test_app(&broker);

        let body = json!({
            "jobProjectID": "job",
            "query": "SELECT id, name FROM users",
            "pubsubTopic": "projects/p/topics/users",
            "operation": "delete",
        });
        let response = app.oneshot(post("/", body.to_string())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.is_empty());
        assert_eq!(
            broker.published_json(),
            vec![json!({"id": 1, "name": "Alice", "_CHANGE_TYPE": "DELETE"})]
        );
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let broker = MemoryBroker::new();
        let app = create_test_app(&broker);

        let response = app.oneshot(post("/", "{not json")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let text = body_text(response).await;
        assert!(text.contains("key must be a string"), "{text}");
        assert!(broker.resolved_topics().is_empty());
    }

    #[tokio::test]
    async fn test_validation_failure() {
        let broker = MemoryBroker::new();
        let app = create_test_app(&broker);

        let body = json!({
            "jobProjectID": "job",
            "query": "SELECT 1",
            "pubsubTopic": "a/b/c",
            "operation": "UPSERT",
        });
        let response = app.oneshot(post("/", body.to_string())).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_text(response).await,
            "invalid request: topic must have the format projects/<projectID>/topics/<topicName>"
        );
    }

    #[tokio::test]
    async fn test_missing_operation() {
        let broker = MemoryBroker::new();
        let app = create_test_app(&broker);

        let body = json!({
            "jobProjectID": "job",
            "query": "SELECT 1",
            "pubsubTopic": "projects/p/topics/t",
        });
        let response = app.oneshot(post("/", body.to_string())).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_text(response).await,
            "invalid request: operation must be set"
        );
    }

    #[tokio::test]
    async fn test_downstream_failure_is_bad_request() {
        let broker = MemoryBroker::new().fail_publish_at(0, "deadline exceeded");
        let app = create_test_app(&broker);

        let body = json!({
            "jobProjectID": "job",
            "query": "SELECT 1",
            "pubsubTopic": "projects/p/topics/t",
            "operation": "UPSERT",
        });
        let response = app.oneshot(post("/any/path", body.to_string())).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_text(response).await,
            "memory.publish: deadline exceeded"
        );
    }

    #[tokio::test]
    async fn test_field_names_ignore_case() {
        let broker = MemoryBroker::new();
        let app = create_test_app(&broker);

        let body = json!({
            "jobProjectId": "job",
            "Query": "SELECT id, name FROM users",
            "PubsubTopic": "projects/p/topics/users",
            "OPERATION": "upsert",
        });
        let response = app.oneshot(post("/", body.to_string())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(broker.resolved_topics(), vec!["projects/p/topics/users"]);
        assert_eq!(
            broker.published_json(),
            vec![json!({"id": 1, "name": "Alice", "_CHANGE_TYPE": "UPSERT"})]
        );
    }

    #[tokio::test]
    async fn test_large_body_is_accepted() {
        let broker = MemoryBroker::new();
        let app = create_test_app(&broker);

        // Long IN (...) lists push generated queries past a few megabytes
        let ids = vec!["1234567890"; 300_000].join(",");
        let body = json!({
            "jobProjectID": "job",
            "query": format!("SELECT id, name FROM users WHERE id IN ({})", ids),
            "pubsubTopic": "projects/p/topics/users",
            "operation": "DELETE",
        })
        .to_string();
        assert!(body.len() > 3 * 1024 * 1024);

        let response = app.oneshot(post("/", body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(broker.published().len(), 1);
    }
}
