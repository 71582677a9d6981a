use std::io::{Error as IoError, ErrorKind};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::TryStreamExt;
use http::header::{HeaderValue, AUTHORIZATION, USER_AGENT};
use http::{Request, Response};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, BodyStream, Full};
use hyper::body::Bytes;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{connect::HttpConnector, Client as HttpClient};
use hyper_util::rt::TokioExecutor;
use tokio::io::AsyncBufRead;

use super::config::ClientConfig;
use super::error::TransportError;

pub type Body = UnsyncBoxBody<Bytes, IoError>;

/// One HTTP exchange. Implementations must not follow redirects.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn issue(&self, request: Request<Bytes>) -> Result<Response<Body>, TransportError>;
}

pub fn full_body(content: impl Into<Bytes>) -> Body {
    Full::new(content.into())
        .map_err(|e| match e {})
        .boxed_unsync()
}

/// Expose a body as a byte reader, trailers are dropped
pub fn body_reader(body: Body) -> impl AsyncBufRead + Send + 'static {
    let stream_of_bytes =
        BodyStream::new(body).map_ok(|frame| frame.into_data().unwrap_or_default());
    tokio_util::io::StreamReader::new(stream_of_bytes)
}

/// Read at most `limit` bytes of a body, the rest is discarded
pub async fn read_prefix(mut body: Body, limit: usize) -> Result<Vec<u8>, IoError> {
    let mut acc = Vec::new();
    while acc.len() < limit {
        let frame = match body.frame().await {
            Some(frame) => frame?,
            None => break,
        };
        if let Ok(data) = frame.into_data() {
            let take = data.len().min(limit - acc.len());
            acc.extend_from_slice(&data[..take]);
        }
    }
    Ok(acc)
}

/// The transport used outside of tests: hyper's pooled client over rustls
pub struct HyperTransport {
    client: HttpClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    timeout: Option<Duration>,
    user_agent: Option<HeaderValue>,
    authorization: Option<HeaderValue>,
}
impl HyperTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, IoError> {
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let client = HttpClient::builder(TokioExecutor::new()).build(connector);

        let user_agent = match &config.user_agent {
            Some(ua) => Some(
                HeaderValue::from_str(ua).map_err(|e| IoError::new(ErrorKind::InvalidInput, e))?,
            ),
            None => None,
        };

        Ok(Self {
            client,
            timeout: config.timeout_secs.map(Duration::from_secs),
            user_agent,
            authorization: None,
        })
    }

    /// Send a precomputed `Authorization` header with every request
    pub fn with_authorization(mut self, value: HeaderValue) -> Self {
        self.authorization = Some(value);
        self
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn issue(&self, request: Request<Bytes>) -> Result<Response<Body>, TransportError> {
        let (mut parts, body) = request.into_parts();
        if let Some(ua) = &self.user_agent {
            parts.headers.entry(USER_AGENT).or_insert_with(|| ua.clone());
        }
        if let Some(auth) = &self.authorization {
            parts.headers.entry(AUTHORIZATION).or_insert_with(|| auth.clone());
        }
        let request = Request::from_parts(parts, Full::new(body));

        let exchange = self.client.request(request);
        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => exchange.await,
        }
        .map_err(|e| IoError::new(ErrorKind::Other, e))?;

        Ok(response.map(|body| {
            body.map_err(|e| IoError::new(ErrorKind::Other, e))
                .boxed_unsync()
        }))
    }
}
