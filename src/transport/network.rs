use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use http::{Request, Uri};
use http_body_util::{BodyDataStream, BodyExt, Full};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::error::{AttemptError, Error, Failure, TransportErrorKind};
use crate::transport::{
    AttemptRequest, EventSource, Response, StreamConnection, Transport, status_failure,
};
use crate::util::{classify_transport_error, redact_uri_for_logs};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

type HyperClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

#[derive(Clone, Debug)]
pub struct HyperTransport {
    client: HyperClient,
}

impl HyperTransport {
    pub fn new() -> Result<Self, Error> {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_POOL_IDLE_TIMEOUT)
    }

    pub fn with_timeouts(
        connect_timeout: Duration,
        pool_idle_timeout: Duration,
    ) -> Result<Self, Error> {
        let mut connector = HttpConnector::new();
        connector.enforce_http(false);
        connector.set_connect_timeout(Some(connect_timeout));

        let https = HttpsConnectorBuilder::new()
            .with_tls_config(build_tls_config()?)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(connector);
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(pool_idle_timeout.max(Duration::from_millis(1)))
            .build(https);
        Ok(Self { client })
    }

    async fn send(
        client: HyperClient,
        request: AttemptRequest,
    ) -> Result<http::Response<Incoming>, AttemptError> {
        let uri: Uri = request.uri().parse().map_err(|_| Error::InvalidUri {
            uri: request.uri().to_owned(),
        })?;
        let mut builder = Request::builder().method(request.method().clone()).uri(uri);
        for (name, value) in request.headers() {
            builder = builder.header(name, value);
        }
        let http_request = builder
            .body(Full::new(request.body().clone()))
            .map_err(|source| Error::RequestBuild { source })?;

        debug!(
            method = %request.method(),
            uri = %redact_uri_for_logs(request.uri()),
            attempt = request.attempt(),
            "sending request"
        );
        client.request(http_request).await.map_err(|source| {
            AttemptError::Failure(Failure::Transport {
                kind: classify_transport_error(&source),
                message: source.to_string(),
            })
        })
    }
}

impl Transport for HyperTransport {
    fn execute(&self, request: AttemptRequest) -> BoxFuture<'static, Result<Response, AttemptError>> {
        let client = self.client.clone();
        async move {
            let response = Self::send(client, request).await?;
            let (parts, body) = response.into_parts();
            let body = read_body(body).await?;
            Ok(Response::new(parts.status, parts.headers, body))
        }
        .boxed()
    }

    fn connect(
        &self,
        request: AttemptRequest,
    ) -> BoxFuture<'static, Result<StreamConnection, AttemptError>> {
        let client = self.client.clone();
        async move {
            let response = Self::send(client, request.accept_event_stream()).await?;
            let (parts, body) = response.into_parts();
            if !parts.status.is_success() {
                let body = read_body(body).await?;
                return Err(status_failure(parts.status, &parts.headers, &body).into());
            }
            let chunks = BodyDataStream::new(body)
                .map(|chunk| chunk.map_err(read_failure))
                .boxed();
            Ok(StreamConnection::new(
                parts.status,
                parts.headers,
                EventSource::Body(chunks),
            ))
        }
        .boxed()
    }
}

async fn read_body(body: Incoming) -> Result<Bytes, Failure> {
    body.collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(read_failure)
}

fn read_failure(source: hyper::Error) -> Failure {
    Failure::Transport {
        kind: TransportErrorKind::Read,
        message: source.to_string(),
    }
}

fn build_tls_config() -> Result<rustls::ClientConfig, Error> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|source| Error::TlsConfig {
        message: source.to_string(),
    })?
    .with_root_certificates(root_store)
    .with_no_client_auth();
    Ok(config)
}
