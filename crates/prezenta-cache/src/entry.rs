//! Cache keys and response snapshots.

use std::fmt;

use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use prezenta_net::{Request, Response, ResponseType};
use serde::{Deserialize, Serialize};
use tracing::trace;
use url::Url;

use crate::{CacheError, Result};

/// Normalized request identity.
///
/// Only `GET` requests have a key; the URL is stored without its fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a GET of `url`.
    pub fn from_url(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(url.into())
    }

    /// Key for a request. Fails for anything but `GET`.
    pub fn for_request(request: &Request) -> Result<Self> {
        if request.method != Method::GET {
            return Err(CacheError::UnsupportedMethod(request.method.to_string()));
        }
        Ok(Self::from_url(&request.url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuild a key from its stored form.
    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored response snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Response status text.
    pub status_text: String,

    /// Response headers, in wire order, repeated names kept. Values are raw
    /// bytes since they need not be UTF-8.
    pub headers: Vec<(String, Vec<u8>)>,

    /// Response type at capture time.
    pub response_type: ResponseType,

    /// Response body.
    pub body: Vec<u8>,

    /// When the snapshot was taken.
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Capture a response under `key`, consuming its body.
    pub async fn snapshot(key: &CacheKey, response: Response) -> Result<Self> {
        let status = response.status.as_u16();
        let status_text = response.status_text.clone();
        let response_type = response.response_type;
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();
        let body = response.bytes().await?.to_vec();

        trace!(url = %key, status, body_len = body.len(), "Snapshot taken");

        Ok(Self {
            url: key.as_str().to_string(),
            status,
            status_text,
            headers,
            response_type,
            body,
            cached_at: Utc::now(),
        })
    }

    /// Rebuild a fresh, readable response from the snapshot.
    pub fn to_response(&self) -> Result<Response> {
        let status = StatusCode::from_u16(self.status).map_err(|e| CacheError::Corrupt {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let parsed = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_bytes(value),
            );
            match parsed {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => {
                    return Err(CacheError::Corrupt {
                        url: self.url.clone(),
                        reason: format!("invalid header {name:?}"),
                    })
                }
            }
        }

        let mut response = Response::new(status, self.body.clone())
            .with_headers(headers)
            .with_status_text(self.status_text.clone())
            .with_type(self.response_type);
        if let Ok(url) = Url::parse(&self.url) {
            response = response.with_url(url);
        }
        Ok(response)
    }

    /// First value of a header, case-insensitive. `None` if absent or not
    /// valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| std::str::from_utf8(v).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, SET_COOKIE};

    #[test]
    fn test_key_strips_fragment() {
        let url = Url::parse("https://prezenta.example/verify#step-2").unwrap();
        assert_eq!(
            CacheKey::from_url(&url).as_str(),
            "https://prezenta.example/verify"
        );
    }

    #[test]
    fn test_key_keeps_query() {
        let url = Url::parse("https://prezenta.example/student/scan?room=A1").unwrap();
        assert_eq!(
            CacheKey::from_url(&url).as_str(),
            "https://prezenta.example/student/scan?room=A1"
        );
    }

    #[test]
    fn test_key_rejects_post() {
        let url = Url::parse("https://prezenta.example/api/scanner/mark").unwrap();
        let request = Request::post(url, "{}".into());
        assert!(matches!(
            CacheKey::for_request(&request),
            Err(CacheError::UnsupportedMethod(m)) if m == "POST"
        ));
    }

    #[tokio::test]
    async fn test_snapshot_and_restore() {
        let url = Url::parse("https://prezenta.example/register").unwrap();
        let key = CacheKey::from_url(&url);
        let response = Response::new(StatusCode::OK, "<form></form>")
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/html"))
            .with_header(SET_COOKIE, HeaderValue::from_static("a=1"))
            .with_header(SET_COOKIE, HeaderValue::from_static("b=2"))
            .with_url(url.clone());

        let entry = CacheEntry::snapshot(&key, response).await.unwrap();
        assert_eq!(entry.status, 200);
        assert_eq!(entry.header("Content-Type"), Some("text/html"));
        assert_eq!(entry.headers.len(), 3);

        let restored = entry.to_response().unwrap();
        assert_eq!(restored.status, StatusCode::OK);
        assert_eq!(restored.url.as_ref(), Some(&url));
        assert_eq!(restored.headers.get_all(SET_COOKIE).iter().count(), 2);
        assert_eq!(restored.text().await.unwrap(), "<form></form>");
    }

    #[tokio::test]
    async fn test_non_utf8_header_restored_byte_for_byte() {
        let url = Url::parse("https://prezenta.example/static/export").unwrap();
        let key = CacheKey::from_url(&url);
        let raw = HeaderValue::from_bytes(b"attachment; filename=caf\xe9.txt").unwrap();
        let response =
            Response::new(StatusCode::OK, "csv").with_header(CONTENT_DISPOSITION, raw.clone());

        let entry = CacheEntry::snapshot(&key, response).await.unwrap();
        assert_eq!(entry.header("content-disposition"), None);

        let restored = entry.to_response().unwrap();
        assert_eq!(
            restored.headers.get(CONTENT_DISPOSITION).unwrap().as_bytes(),
            raw.as_bytes()
        );
    }

    #[test]
    fn test_corrupt_status_is_reported() {
        let entry = CacheEntry {
            url: "https://prezenta.example/".to_string(),
            status: 42,
            status_text: String::new(),
            headers: Vec::new(),
            response_type: ResponseType::Basic,
            body: Vec::new(),
            cached_at: Utc::now(),
        };
        assert!(matches!(
            entry.to_response(),
            Err(CacheError::Corrupt { .. })
        ));
    }
}
