// Request parsing utilities for HTTP handlers

use hyper::{Body, Response, StatusCode, Uri};
use serde::de::DeserializeOwned;

use crate::web::response_helpers::json_error;
use crate::{sys_debug, sys_error};

/// Parse JSON request body into a typed structure.
///
/// Returns the deserialized value on success, or an error Response on failure.
pub async fn parse_json_body<T: DeserializeOwned>(body: Body) -> Result<T, Response<Body>> {
    let body_bytes = match hyper::body::to_bytes(body).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                "Failed to read request body",
            ));
        }
    };

    if let Ok(body_str) = std::str::from_utf8(&body_bytes) {
        if !body_str.is_empty() {
            sys_debug!("[REQUEST] Body: {}", body_str);
        }
    }

    match serde_json::from_slice::<T>(&body_bytes) {
        Ok(parsed) => Ok(parsed),
        Err(e) => {
            sys_error!("[REQUEST] JSON parsing error: {}", e);
            Err(json_error(StatusCode::BAD_REQUEST, "Invalid JSON format"))
        }
    }
}

/// Extract a query parameter from a URI, URL-decoded.
pub fn get_query_param(uri: &Uri, key: &str) -> Option<String> {
    let query = uri.query()?;

    for param in query.split('&') {
        if let Some((param_key, param_value)) = param.split_once('=') {
            if param_key == key {
                return urlencoding::decode(param_value)
                    .ok()
                    .map(|s| s.to_string());
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Uri;

    #[test]
    fn test_get_query_param_basic() {
        let uri: Uri = "/api/test?foo=bar".parse().unwrap();
        assert_eq!(get_query_param(&uri, "foo"), Some("bar".to_string()));
    }

    #[test]
    fn test_get_query_param_url_encoded() {
        let uri: Uri = "/api/test?path=%2Fsrc%2Fmain.rs".parse().unwrap();
        assert_eq!(get_query_param(&uri, "path"), Some("/src/main.rs".to_string()));
    }

    #[test]
    fn test_get_query_param_not_found() {
        let uri: Uri = "/api/test?foo=bar".parse().unwrap();
        assert_eq!(get_query_param(&uri, "missing"), None);
    }

    #[test]
    fn test_get_query_param_no_query() {
        let uri: Uri = "/api/test".parse().unwrap();
        assert_eq!(get_query_param(&uri, "foo"), None);
    }

    #[tokio::test]
    async fn test_parse_json_body_rejects_malformed_json() {
        #[derive(serde::Deserialize)]
        struct Dummy {
            #[allow(dead_code)]
            name: String,
        }
        let result: Result<Dummy, _> = parse_json_body(Body::from("not json")).await;
        let response = result.err().unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_parse_json_body_accepts_valid_payload() {
        #[derive(serde::Deserialize)]
        struct Dummy {
            name: String,
        }
        let result: Result<Dummy, _> = parse_json_body(Body::from(r#"{"name":"ok"}"#)).await;
        assert_eq!(result.ok().unwrap().name, "ok");
    }
}
