//! Network transport.

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use http::HeaderMap;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};
use url::Url;

use crate::{NetError, Request, Response, ResponseType};

/// Chunks buffered between the connection and the body reader.
const BODY_CHANNEL_CAPACITY: usize = 16;

/// Request-in / response-out transport.
///
/// A rejected future means the request never produced a response
/// (unreachable host, connection reset). HTTP error statuses are still
/// `Ok` responses.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>>;
}

/// HTTP fetcher configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Origin the worker serves. Responses from it are classified as basic.
    pub origin: Url,
    /// User agent string.
    pub user_agent: String,
    /// Per-request timeout; `None` leaves the client's own behaviour.
    pub timeout: Option<Duration>,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl LoaderConfig {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            user_agent: format!("Prezenta-Offline/{}", env!("CARGO_PKG_VERSION")),
            timeout: None,
            max_redirects: 10,
        }
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// [`Fetcher`] backed by a reqwest client.
pub struct HttpFetcher {
    client: Client,
    config: LoaderConfig,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects));
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(origin = %config.origin, "HttpFetcher initialized");

        Ok(Self { client, config })
    }

    pub fn origin(&self) -> &Url {
        &self.config.origin
    }

    async fn send(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(ref referrer) = request.referrer {
            req_builder = req_builder.header("Referer", referrer.as_str());
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let response = req_builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let response_type = classify(&self.config.origin, &url, &headers);

        trace!(
            url = %url,
            status = %status,
            response_type = %response_type,
            "Response headers received"
        );

        let (tx, rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        tokio::spawn(pump_body(response, tx));

        Ok(Response::from_stream(status, rx)
            .with_headers(headers)
            .with_url(url)
            .with_type(response_type))
    }
}

/// Forward body chunks until the body ends, fails, or the reader goes away.
async fn pump_body(mut response: reqwest::Response, tx: mpsc::Sender<Result<Bytes, NetError>>) {
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                if tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                break;
            }
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        self.send(request).boxed()
    }
}

/// Classify a response relative to the served origin.
pub fn classify(origin: &Url, final_url: &Url, headers: &HeaderMap) -> ResponseType {
    if final_url.origin() == origin.origin() {
        ResponseType::Basic
    } else if headers.contains_key(ACCESS_CONTROL_ALLOW_ORIGIN) {
        ResponseType::Cors
    } else {
        ResponseType::Opaque
    }
}
