//! Response helpers injected into handlers.
//!
//! Success helpers wrap data unchanged; error helpers produce the uniform
//! `{error_code, message, details?}` body.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

fn with_headers(mut response: Response, headers: Option<HeaderMap>) -> Response {
    if let Some(extra) = headers {
        response.headers_mut().extend(extra);
    }
    response
}

pub fn success(data: Value, message: Option<&str>, headers: Option<HeaderMap>) -> Response {
    let body = match message {
        Some(message) => serde_json::json!({"data": data, "message": message}),
        None => data,
    };
    with_headers((StatusCode::OK, Json(body)).into_response(), headers)
}

pub fn created(data: Value, headers: Option<HeaderMap>) -> Response {
    with_headers((StatusCode::CREATED, Json(data)).into_response(), headers)
}

pub fn no_content(headers: Option<HeaderMap>) -> Response {
    with_headers(StatusCode::NO_CONTENT.into_response(), headers)
}

pub fn error(
    message: &str,
    status: StatusCode,
    details: Option<Value>,
    headers: Option<HeaderMap>,
) -> Response {
    let error_code = match status {
        StatusCode::BAD_REQUEST => "query_error",
        StatusCode::UNAUTHORIZED => "authentication_error",
        StatusCode::FORBIDDEN => "authorization_error",
        StatusCode::NOT_FOUND => "not_found",
        StatusCode::METHOD_NOT_ALLOWED => "method_not_allowed",
        StatusCode::CONFLICT => "conflict",
        StatusCode::UNPROCESSABLE_ENTITY => "validation_error",
        StatusCode::PAYLOAD_TOO_LARGE => "validation_error",
        StatusCode::TOO_MANY_REQUESTS => "rate_limit_exceeded",
        _ => "internal_error",
    };
    let mut body = serde_json::json!({
        "error_code": error_code,
        "message": message,
    });
    if let Some(details) = details {
        body["details"] = details;
    }
    with_headers((status, Json(body)).into_response(), headers)
}

pub fn bad_request(message: &str) -> Response {
    error(message, StatusCode::BAD_REQUEST, None, None)
}

pub fn unauthorized(message: &str) -> Response {
    error(message, StatusCode::UNAUTHORIZED, None, None)
}

pub fn forbidden(message: &str) -> Response {
    error(message, StatusCode::FORBIDDEN, None, None)
}

pub fn not_found(message: &str) -> Response {
    error(message, StatusCode::NOT_FOUND, None, None)
}

pub fn conflict(message: &str) -> Response {
    error(message, StatusCode::CONFLICT, None, None)
}

pub fn unprocessable_entity(message: &str, details: Option<Value>) -> Response {
    error(message, StatusCode::UNPROCESSABLE_ENTITY, details, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn parts(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn success_passes_data_through() {
        let (status, body) = parts(success(serde_json::json!({"ok": true}), None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn created_and_no_content_statuses() {
        let (status, _) = parts(created(serde_json::json!({}), None)).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = parts(no_content(None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn error_helpers_use_the_uniform_shape() {
        let (status, body) = parts(forbidden("nope")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error_code"], "authorization_error");
        assert_eq!(body["message"], "nope");
    }
}
