//! Outermost guard turning panics into a generic 500 response.
//!
//! Built on `tower_http::catch_panic`. The panic payload is logged, the client
//! only ever sees [`SERVER_ERROR_MESSAGE`], and `Connection: close` tells
//! hyper to drop the connection after the response is written.

use std::any::Any;

use axum::body::Body;
use axum::http::{HeaderValue, Response, StatusCode, header};
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;

use crate::error::{SERVER_ERROR_MESSAGE, error_response};

/// Panic handler signature accepted by [`CatchPanicLayer::custom`].
pub type PanicHandler = fn(Box<dyn Any + Send + 'static>) -> Response<Body>;

pub type RecoverPanicLayer = CatchPanicLayer<PanicHandler>;

pub fn recover_panic() -> RecoverPanicLayer {
    CatchPanicLayer::custom(handle_panic as PanicHandler)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    }
}

fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response<Body> {
    error!(panic = %panic_message(payload.as_ref()), "Recovered from panic while serving request");

    let mut response = error_response(StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR_MESSAGE);
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}
