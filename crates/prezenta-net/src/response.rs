//! Responses with single-read bodies.

use std::fmt;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use http::{header::CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, StatusCode};
use mime::Mime;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use url::Url;

use crate::NetError;

/// How much of a response the client context may inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin, fully inspectable.
    #[default]
    Basic,
    /// Cross-origin, exposed through CORS.
    Cors,
    /// Cross-origin without CORS; status and body are not meant to be read.
    Opaque,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Basic => "basic",
            ResponseType::Cors => "cors",
            ResponseType::Opaque => "opaque",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseType {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(ResponseType::Basic),
            "cors" => Ok(ResponseType::Cors),
            "opaque" => Ok(ResponseType::Opaque),
            other => Err(NetError::RequestFailed(format!(
                "unknown response type {other:?}"
            ))),
        }
    }
}

/// Response body variants.
#[derive(Debug)]
enum ResponseBody {
    /// Full body already loaded.
    Full(Bytes),
    /// Streaming body.
    Stream(mpsc::Receiver<Result<Bytes, NetError>>),
    /// Empty.
    Empty,
}

impl ResponseBody {
    async fn read(self) -> Result<Bytes, NetError> {
        match self {
            ResponseBody::Full(b) => Ok(b),
            ResponseBody::Stream(mut rx) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = rx.recv().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
            ResponseBody::Empty => Ok(Bytes::new()),
        }
    }
}

/// HTTP response.
///
/// The body can be read once: [`Response::bytes`] and [`Response::text`]
/// take the response by value.
#[derive(Debug)]
pub struct Response {
    /// Final URL, `None` for responses synthesized locally.
    pub url: Option<Url>,
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    body: ResponseBody,
}

impl Response {
    /// Create a basic response with a fully loaded body.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self {
            url: None,
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers: HeaderMap::new(),
            response_type: ResponseType::Basic,
            body: if body.is_empty() {
                ResponseBody::Empty
            } else {
                ResponseBody::Full(body)
            },
        }
    }

    /// Create a response whose body arrives in chunks over `rx`.
    pub fn from_stream(status: StatusCode, rx: mpsc::Receiver<Result<Bytes, NetError>>) -> Self {
        Self {
            body: ResponseBody::Stream(rx),
            ..Self::new(status, Bytes::new())
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replace all headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = text.into();
        self
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Parsed `Content-Type` header.
    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Get the body as bytes.
    pub async fn bytes(self) -> Result<Bytes, NetError> {
        self.body.read().await
    }

    /// Get the body as text.
    pub async fn text(self) -> Result<String, NetError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| NetError::Body(e.to_string()))
    }

    /// Split the response into two independently readable copies.
    ///
    /// A streaming body is drained first; a loaded body is shared.
    pub async fn tee(self) -> Result<(Response, Response), NetError> {
        let Response {
            url,
            status,
            status_text,
            headers,
            response_type,
            body,
        } = self;

        let (left, right) = match body {
            ResponseBody::Empty => (ResponseBody::Empty, ResponseBody::Empty),
            body => {
                let bytes = body.read().await?;
                (
                    ResponseBody::Full(bytes.clone()),
                    ResponseBody::Full(bytes),
                )
            }
        };

        let copy = Response {
            url: url.clone(),
            status,
            status_text: status_text.clone(),
            headers: headers.clone(),
            response_type,
            body: right,
        };
        let original = Response {
            url,
            status,
            status_text,
            headers,
            response_type,
            body: left,
        };
        Ok((original, copy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_type_round_trip_names() {
        for ty in [ResponseType::Basic, ResponseType::Cors, ResponseType::Opaque] {
            assert_eq!(ty.as_str().parse::<ResponseType>().unwrap(), ty);
        }
        assert!("opaqueredirect".parse::<ResponseType>().is_err());
    }

    #[test]
    fn test_new_response_defaults() {
        let response = Response::new(StatusCode::OK, "hello");
        assert!(response.ok());
        assert_eq!(response.status_text, "OK");
        assert_eq!(response.response_type, ResponseType::Basic);
        assert!(response.url.is_none());
    }

    #[test]
    fn test_content_type() {
        let response = Response::new(StatusCode::OK, "{}").with_header(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        let mime = response.content_type().unwrap();
        assert_eq!(mime.essence_str(), "application/json");
    }

    #[tokio::test]
    async fn test_text() {
        let response = Response::new(StatusCode::OK, "prezent");
        assert_eq!(response.text().await.unwrap(), "prezent");
    }

    #[tokio::test]
    async fn test_tee_full_body() {
        let response = Response::new(StatusCode::OK, "body")
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        let (a, b) = response.tee().await.unwrap();
        assert_eq!(a.headers, b.headers);
        assert_eq!(a.bytes().await.unwrap(), "body");
        assert_eq!(b.bytes().await.unwrap(), "body");
    }

    #[tokio::test]
    async fn test_tee_stream_body() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"chunk-1,"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"chunk-2"))).await.unwrap();
        drop(tx);

        let (a, b) = Response::from_stream(StatusCode::OK, rx).tee().await.unwrap();
        assert_eq!(a.text().await.unwrap(), "chunk-1,chunk-2");
        assert_eq!(b.text().await.unwrap(), "chunk-1,chunk-2");
    }

    #[tokio::test]
    async fn test_tee_propagates_stream_error() {
        let (tx, rx) = mpsc::channel(2);
        tx.send(Err(NetError::Body("reset".to_string()))).await.unwrap();
        drop(tx);

        let result = Response::from_stream(StatusCode::OK, rx).tee().await;
        assert!(matches!(result, Err(NetError::Body(_))));
    }

    #[tokio::test]
    async fn test_empty_body() {
        let response = Response::new(StatusCode::NO_CONTENT, Bytes::new());
        let (a, _b) = response.tee().await.unwrap();
        assert!(a.bytes().await.unwrap().is_empty());
    }
}
