//! The synthetic response served when the network is unreachable.

use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use prezenta_net::Response;

/// Body of the offline response.
pub const OFFLINE_BODY: &str = "Offline - vezi ca trebuie sa ai internet";

/// Status text of the offline response.
pub const OFFLINE_STATUS_TEXT: &str = "Service nu este disponibil, posibil ca esti offline";

/// Build the 503 substitute for a failed network fetch. Never cached.
pub fn offline_response() -> Response {
    Response::new(StatusCode::SERVICE_UNAVAILABLE, OFFLINE_BODY)
        .with_status_text(OFFLINE_STATUS_TEXT)
        .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
}
