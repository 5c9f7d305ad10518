//! Unexpected failures rendered with the standard error envelope.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::any::Any;
use tracing::error;

use crate::response::{ApiError, ResponseMeta};

/// Set on the bare 500 produced for a panicking handler.
#[derive(Debug, Clone)]
pub struct PanicMessage(pub String);

/// `CatchPanicLayer` handler. The envelope is added by [`recover_internal_errors`],
/// which still has the request in scope.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| err.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());

    let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
    response.extensions_mut().insert(PanicMessage(detail));
    response
}

pub async fn recover_internal_errors(request: Request, next: Next) -> Response {
    let meta = ResponseMeta::new(request.uri().path(), request.headers());
    let method = request.method().clone();

    let response = next.run(request).await;
    match response.extensions().get::<PanicMessage>() {
        Some(PanicMessage(detail)) => {
            error!(
                panic = %detail,
                path = %meta.path,
                method = %method,
                "request handler panicked"
            );
            ApiError::internal().into_response_with(&meta)
        }
        None => response,
    }
}
