use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue, USER_AGENT};
use http::{HeaderMap, Method};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{Instrument, info_span};

use crate::ReboundResult;
use crate::attempt::AttemptLoop;
use crate::backoff::BackoffPolicy;
use crate::error::{AttemptError, Error, Failure};
use crate::handle::RetryHandle;
use crate::observe::Observer;
use crate::sse::ReconnectingStream;
use crate::transport::{AttemptRequest, HyperTransport, Response, Transport, status_failure};
use crate::util::{
    merge_headers, parse_header_name, parse_header_value, redact_uri_for_logs, resolve_uri,
};

const DEFAULT_CLIENT_NAME: &str = "rebound";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Bytes,
    backoff_policy: Option<BackoffPolicy>,
    timeout: Option<Duration>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            backoff_policy: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> ReboundResult<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn json<T>(mut self, value: &T) -> ReboundResult<Self>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(value).map_err(|source| Error::InvalidConfig {
            message: format!("failed to serialize json body: {source}"),
        })?;
        self.body = Bytes::from(body);
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        Ok(self)
    }

    pub fn backoff_policy(mut self, backoff_policy: BackoffPolicy) -> Self {
        self.backoff_policy = Some(backoff_policy);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.max(Duration::from_millis(1)));
        self
    }
}

pub struct ClientBuilder {
    base_url: String,
    default_headers: HeaderMap,
    request_timeout: Duration,
    backoff_policy: BackoffPolicy,
    transport: Option<Arc<dyn Transport>>,
    observer: Option<Arc<dyn Observer>>,
    client_name: String,
}

impl ClientBuilder {
    pub(crate) fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            default_headers: HeaderMap::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            backoff_policy: BackoffPolicy::standard(),
            transport: None,
            observer: None,
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
        }
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> ReboundResult<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.default_header(name, value))
    }

    pub fn backoff_policy(mut self, backoff_policy: BackoffPolicy) -> Self {
        self.backoff_policy = backoff_policy;
        self
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn try_build(self) -> ReboundResult<Client> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new()?),
        };
        let mut default_headers = self.default_headers;
        if !default_headers.contains_key(USER_AGENT) {
            let user_agent = parse_header_value(USER_AGENT.as_str(), &self.client_name)?;
            default_headers.insert(USER_AGENT, user_agent);
        }
        Ok(Client {
            base_url: self.base_url,
            default_headers,
            request_timeout: self.request_timeout,
            backoff_policy: self.backoff_policy,
            transport,
            observer: self.observer,
        })
    }
}

#[derive(Clone)]
pub struct Client {
    base_url: String,
    default_headers: HeaderMap,
    request_timeout: Duration,
    backoff_policy: BackoffPolicy,
    transport: Arc<dyn Transport>,
    observer: Option<Arc<dyn Observer>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .field("backoff_policy", &self.backoff_policy)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn builder(base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    pub fn backoff_policy(&self) -> &BackoffPolicy {
        &self.backoff_policy
    }

    pub fn get(&self, path: impl Into<String>) -> ReboundResult<RetryHandle<Response>> {
        self.execute(Request::get(path))
    }

    pub fn execute(&self, request: Request) -> ReboundResult<RetryHandle<Response>> {
        let (template, policy, limit) = self.prepare(request)?;
        let transport = Arc::clone(&self.transport);
        let redacted_uri = redact_uri_for_logs(template.uri());
        let mut attempt_loop = AttemptLoop::new(policy, move |context| {
            let attempt_request = template.for_attempt(&context);
            let span = info_span!(
                "rebound.request",
                method = %attempt_request.method(),
                uri = %redacted_uri
            );
            let call = transport.execute(attempt_request);
            async move {
                let response = with_timeout(limit, call).await?;
                if response.status().as_u16() >= 400 {
                    return Err(AttemptError::Failure(status_failure(
                        response.status(),
                        response.headers(),
                        response.body(),
                    )));
                }
                Ok(response)
            }
            .instrument(span)
        });
        if let Some(observer) = &self.observer {
            attempt_loop = attempt_loop.observer(Arc::clone(observer));
        }
        Ok(attempt_loop.spawn())
    }

    pub fn stream(&self, request: Request) -> ReboundResult<ReconnectingStream> {
        let (template, policy, limit) = self.prepare(request)?;
        let transport = Arc::clone(&self.transport);
        let redacted_uri = redact_uri_for_logs(template.uri());
        let mut stream = ReconnectingStream::new(policy, move |context| {
            let attempt_request = template.for_attempt(&context);
            let span = info_span!(
                "rebound.stream",
                method = %attempt_request.method(),
                uri = %redacted_uri
            );
            with_timeout(limit, transport.connect(attempt_request)).instrument(span)
        });
        if let Some(observer) = &self.observer {
            stream = stream.observer(Arc::clone(observer));
        }
        Ok(stream)
    }

    fn prepare(&self, request: Request) -> ReboundResult<(AttemptRequest, BackoffPolicy, Duration)> {
        let (uri_text, _uri) = resolve_uri(&self.base_url, &request.path)?;
        let headers = merge_headers(&self.default_headers, &request.headers);
        let template = AttemptRequest::new(request.method, uri_text)
            .with_headers(headers)
            .with_body(request.body);
        let policy = request
            .backoff_policy
            .unwrap_or_else(|| self.backoff_policy.clone());
        let limit = request.timeout.unwrap_or(self.request_timeout);
        Ok((template, policy, limit))
    }
}

async fn with_timeout<T>(
    limit: Duration,
    call: BoxFuture<'static, Result<T, AttemptError>>,
) -> Result<T, AttemptError> {
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AttemptError::Failure(Failure::Timeout {
            timeout_ms: limit.as_millis(),
        })),
    }
}
