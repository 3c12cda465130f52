//! 参数污染防护
//!
//! 同一个 query 参数出现多次的请求直接拒绝。

use axum::{
    extract::{Query, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::Uri;
use std::collections::HashSet;

use crate::application::ClassifiedError;
use crate::infrastructure::http::error::ApiError;

/// 返回第一个重复的参数名
fn first_duplicate(uri: &Uri) -> Result<Option<String>, ClassifiedError> {
    if uri.query().is_none() {
        return Ok(None);
    }

    let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(uri)
        .map_err(|e| ClassifiedError::bad_request(format!("Malformed query string: {}", e)))?;

    let mut seen = HashSet::new();
    Ok(pairs.into_iter().map(|(k, _)| k).find(|k| !seen.insert(k.clone())))
}

pub async fn parameter_pollution_middleware(request: Request, next: Next) -> Response {
    match first_duplicate(request.uri()) {
        Ok(None) => next.run(request).await,
        Ok(Some(key)) => ApiError::from(ClassifiedError::bad_request(format!(
            "Duplicate query parameter: {}",
            key
        )))
        .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        routing::get,
        Router,
    };
    use tower::util::ServiceExt;

    fn create_test_router() -> Router {
        Router::new()
            .route("/search", get(|| async { "OK" }))
            .layer(axum::middleware::from_fn(parameter_pollution_middleware))
    }

    async fn status_of(uri: &str) -> StatusCode {
        let request = HttpRequest::builder().uri(uri).body(Body::empty()).unwrap();
        create_test_router().oneshot(request).await.unwrap().status()
    }

    #[test]
    fn test_first_duplicate() {
        let uri: Uri = "/x?a=1&b=2&a=3".parse().unwrap();
        assert_eq!(first_duplicate(&uri).unwrap(), Some("a".to_string()));

        let uri: Uri = "/x?a=1&b=2".parse().unwrap();
        assert_eq!(first_duplicate(&uri).unwrap(), None);

        // 编码后的同名参数
        let uri: Uri = "/x?name=1&%6Eame=2".parse().unwrap();
        assert_eq!(first_duplicate(&uri).unwrap(), Some("name".to_string()));
    }

    #[tokio::test]
    async fn test_single_values_pass() {
        assert_eq!(status_of("/search").await, StatusCode::OK);
        assert_eq!(status_of("/search?q=rust&page=2").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_polluted_query_rejected() {
        assert_eq!(status_of("/search?q=a&q=b").await, StatusCode::BAD_REQUEST);
    }
}
