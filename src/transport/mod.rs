//! The seam between the attempt engine and whatever produces responses.
//!
//! [`HyperTransport`] talks to the network; [`ScriptedTransport`] replays
//! scripted outcomes. Both are driven by the same attempt loop and the same
//! reconnecting stream.
//!
//! [`ScriptedTransport`]: crate::mock::ScriptedTransport

use std::time::SystemTime;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use http::header::{ACCEPT, HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::attempt::AttemptContext;
use crate::error::{AttemptError, Error, Failure};
use crate::sse::{EventRecord, StreamConfig};
use crate::util::{parse_retry_after, truncate_body};

mod network;

pub use self::network::HyperTransport;

pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";
pub const EVENT_STREAM_MIME: &str = "text/event-stream";

pub trait Transport: Send + Sync {
    fn execute(&self, request: AttemptRequest) -> BoxFuture<'static, Result<Response, AttemptError>>;

    fn connect(
        &self,
        request: AttemptRequest,
    ) -> BoxFuture<'static, Result<StreamConnection, AttemptError>>;
}

#[derive(Clone, Debug)]
pub struct AttemptRequest {
    method: Method,
    uri: String,
    headers: HeaderMap,
    body: Bytes,
    attempt: usize,
    last_event_id: Option<String>,
}

impl AttemptRequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            attempt: 1,
            last_event_id: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub(crate) fn for_attempt(&self, context: &AttemptContext) -> Self {
        let mut request = self.clone();
        request.attempt = context.attempt();
        request.last_event_id = context.last_event_id().map(ToOwned::to_owned);
        if let Some(last_event_id) = context.last_event_id()
            && let Ok(value) = HeaderValue::from_str(last_event_id)
        {
            request
                .headers
                .insert(HeaderName::from_static(LAST_EVENT_ID_HEADER), value);
        }
        request
    }

    pub(crate) fn accept_event_stream(mut self) -> Self {
        if !self.headers.contains_key(ACCEPT) {
            self.headers
                .insert(ACCEPT, HeaderValue::from_static(EVENT_STREAM_MIME));
        }
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }
}

#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T>(&self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body).map_err(|source| Error::Deserialize {
            source,
            body: truncate_body(&self.body),
        })
    }
}

pub(crate) fn status_failure(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Failure {
    Failure::Status {
        status: status.as_u16(),
        body: truncate_body(body),
        retry_after: parse_retry_after(headers, SystemTime::now()),
    }
}

pub enum EventSource {
    Body(BoxStream<'static, Result<Bytes, Failure>>),
    Buffered(Vec<EventRecord>),
    Scheduled(StreamConfig),
}

impl std::fmt::Debug for EventSource {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Body(_) => formatter.write_str("Body(..)"),
            Self::Buffered(events) => formatter.debug_tuple("Buffered").field(events).finish(),
            Self::Scheduled(config) => formatter.debug_tuple("Scheduled").field(config).finish(),
        }
    }
}

#[derive(Debug)]
pub struct StreamConnection {
    status: StatusCode,
    headers: HeaderMap,
    source: EventSource,
    close_with: Option<Failure>,
    interrupt_after: Option<(usize, Failure)>,
}

impl StreamConnection {
    pub fn new(status: StatusCode, headers: HeaderMap, source: EventSource) -> Self {
        Self {
            status,
            headers,
            source,
            close_with: None,
            interrupt_after: None,
        }
    }

    pub fn close_with(mut self, failure: Failure) -> Self {
        self.close_with = Some(failure);
        self
    }

    pub fn interrupt_after(mut self, events: usize, failure: Failure) -> Self {
        self.interrupt_after = Some((events, failure));
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        StatusCode,
        HeaderMap,
        EventSource,
        Option<Failure>,
        Option<(usize, Failure)>,
    ) {
        (
            self.status,
            self.headers,
            self.source,
            self.close_with,
            self.interrupt_after,
        )
    }
}
