//! HTTP metrics middleware.
//!
//! Sits outside every other layer so rejections produced by axum itself
//! (bad JSON, wrong content type, unknown route, wrong method) are counted
//! alongside handler responses, including the 429s from the rate limiter.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Labels captured before the request is handed on, since the request
/// itself is consumed by the inner service.
struct InFlight {
    method: String,
    path: String,
    started: Instant,
}

impl InFlight {
    fn begin(request: &Request) -> Self {
        Self {
            method: request.method().as_str().to_owned(),
            path: request.uri().path().to_owned(),
            started: Instant::now(),
        }
    }

    fn finish(self, response: &Response) {
        record_http_request(
            &self.method,
            &self.path,
            response.status().as_u16(),
            self.started.elapsed(),
        );
    }
}

pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let in_flight = InFlight::begin(&request);
    let response = next.run(request).await;
    in_flight.finish(&response);
    response
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::errors::ChatError;
    use axum::{
        body::Body,
        http::{header, Method, Request as HttpRequest, StatusCode},
        middleware,
        routing::post,
        Json, Router,
    };
    use chrono::Utc;
    use tower::ServiceExt;

    async fn join(Json(body): Json<serde_json::Value>) -> (StatusCode, Json<serde_json::Value>) {
        (StatusCode::CREATED, Json(body))
    }

    async fn send() -> Result<StatusCode, ChatError> {
        Err(ChatError::RateLimited {
            limit: 20,
            remaining: 0,
            reset_at: Utc::now(),
            retry_after_secs: 42,
        })
    }

    fn app() -> Router {
        Router::new()
            .route("/v1/chat/rooms/:story_id/join", post(join))
            .route("/v1/chat/rooms/:story_id/messages", post(send))
            .layer(middleware::from_fn(http_metrics_middleware))
    }

    fn request(
        method: Method,
        uri: &str,
        content_type: Option<&str>,
        body: &str,
    ) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().method(method).uri(uri);
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        builder
            .body(Body::from(body.to_owned()))
            .expect("request builder should succeed")
    }

    async fn call(request: HttpRequest<Body>) -> Response {
        app().oneshot(request).await.expect("request should succeed")
    }

    #[tokio::test]
    async fn test_handler_response_passes_through() {
        let response = call(request(
            Method::POST,
            "/v1/chat/rooms/story-1/join",
            Some("application/json"),
            r#"{"nickname":"reader"}"#,
        ))
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_rate_limit_headers_survive_the_layer() {
        let response = call(request(
            Method::POST,
            "/v1/chat/rooms/story-1/messages",
            Some("application/json"),
            "{}",
        ))
        .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok()),
            Some("42")
        );
    }

    #[tokio::test]
    async fn test_framework_rejections_are_observed() {
        let wrong_type = call(request(
            Method::POST,
            "/v1/chat/rooms/story-1/join",
            Some("text/plain"),
            "hi",
        ))
        .await;
        assert_eq!(wrong_type.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let wrong_method = call(request(
            Method::GET,
            "/v1/chat/rooms/story-1/join",
            None,
            "",
        ))
        .await;
        assert_eq!(wrong_method.status(), StatusCode::METHOD_NOT_ALLOWED);

        let unrouted = call(request(Method::GET, "/v1/chat/nowhere", None, "")).await;
        assert_eq!(unrouted.status(), StatusCode::NOT_FOUND);
    }
}
