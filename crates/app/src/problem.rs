use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
}

/// `application/problem+json` error returned to the webhook caller.
#[derive(Debug)]
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
            },
        }
    }

    /// 401 for deliveries whose signature does not verify, whatever the cause.
    pub fn invalid_signature() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "invalid_signature",
            "signature verification failed",
        )
    }

    /// 400 for authenticated deliveries whose body does not parse.
    pub fn malformed_payload(kind: &str, err: serde_json::Error) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "invalid_json",
            format!("failed to parse {kind} payload: {err}"),
        )
    }

    pub fn body_unreadable() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "body_read_failed",
            "failed to read request body",
        )
    }

    #[cfg(test)]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn renders_problem_json() {
        let err = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid json");
        let problem = ProblemResponse::malformed_payload("notification", err);
        assert_eq!(problem.status(), StatusCode::BAD_REQUEST);

        let response = problem.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).expect("content type"),
            "application/problem+json"
        );

        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
        assert_eq!(body["type"], "invalid_json");
        assert_eq!(body["title"], "Bad Request");
        assert!(body["detail"]
            .as_str()
            .expect("detail")
            .starts_with("failed to parse notification payload"));
    }

    #[test]
    fn signature_failures_are_unauthorized() {
        assert_eq!(
            ProblemResponse::invalid_signature().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ProblemResponse::body_unreadable().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
