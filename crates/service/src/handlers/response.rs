use std::collections::HashMap;

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, StatusCode};
use serde::Serialize;
use uuid::Uuid;

use crate::error::OpError;

/// Fully-resolved request context handed in by the HTTP layer: caller
/// identity, verb, parsed query parameters, and whether the request
/// already went through another node's proxy.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user: Option<Uuid>,
    pub verb: String,
    pub query: HashMap<String, String>,
    pub proxied: bool,
}

impl RequestContext {
    pub fn new(user: Option<Uuid>, verb: impl Into<String>) -> Self {
        Self {
            user,
            verb: verb.into(),
            query: HashMap::new(),
            proxied: false,
        }
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Structured response handed back to the HTTP layer. The binding to
/// an actual server framework is external.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        let body = match serde_json::to_vec(value) {
            Ok(body) => body,
            Err(err) => {
                tracing::error!("failed to serialize response body: {err}");
                return Self::empty(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self {
            status,
            headers,
            body: Bytes::from(body),
        }
    }

    pub fn ok_json<T: Serialize>(value: &T) -> Self {
        Self::json(StatusCode::OK, value)
    }

    /// Temporary redirect pointing the client at the owning node.
    pub fn redirect(location: &str) -> Self {
        let mut response = Self::empty(StatusCode::TEMPORARY_REDIRECT);
        match HeaderValue::from_str(location) {
            Ok(value) => {
                response.headers.insert(header::LOCATION, value);
            }
            Err(err) => {
                tracing::error!("unencodable redirect location {location}: {err}");
                response.status = StatusCode::INTERNAL_SERVER_ERROR;
            }
        }
        response
    }

    pub fn from_error(err: &OpError) -> Self {
        Self::json(
            err.status(),
            &serde_json::json!({ "error": err.to_string() }),
        )
    }
}

/// Collapse an orchestrator result into the response the HTTP layer
/// sends.
pub fn respond(result: Result<ApiResponse, OpError>) -> ApiResponse {
    match result {
        Ok(response) => response,
        Err(err) => ApiResponse::from_error(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_carries_location_header() {
        let response = ApiResponse::redirect("http://node2.mesh:9002/api/u/docs/a.txt");
        assert_eq!(response.status, StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers.get(header::LOCATION).unwrap(),
            "http://node2.mesh:9002/api/u/docs/a.txt"
        );
    }

    #[test]
    fn errors_map_through_their_status() {
        let response = respond(Err(OpError::NotFound("u/docs/a.txt".into())));
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }
}
