//! Scripted outcomes and the patterns that select them.

use std::time::Duration;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method, StatusCode};
use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Failure};
use crate::sse::{EventRecord, StreamConfig};
use crate::transport::{AttemptRequest, EventSource};
use crate::util::{parse_header_name, parse_header_value, path_and_query};

#[derive(Clone, Debug)]
pub enum UrlPattern {
    Any,
    Exact(String),
    Glob { pattern: String, regex: Regex },
}

impl UrlPattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern.is_empty() || pattern == "*" {
            return Self::Any;
        }
        if !pattern.contains('*') {
            return Self::Exact(pattern.to_owned());
        }
        let mut source = String::from("^");
        for (index, literal) in pattern.split('*').enumerate() {
            if index > 0 {
                source.push_str(".*");
            }
            source.push_str(&regex::escape(literal));
        }
        source.push('$');
        match Regex::new(&source) {
            Ok(regex) => Self::Glob {
                pattern: pattern.to_owned(),
                regex,
            },
            Err(_) => Self::Exact(pattern.to_owned()),
        }
    }

    pub fn matches(&self, uri: &str) -> bool {
        let (path, with_query) = path_and_query(uri);
        match self {
            Self::Any => true,
            Self::Exact(expected) => uri == expected || with_query == *expected || path == *expected,
            Self::Glob { regex, .. } => {
                regex.is_match(uri) || regex.is_match(&with_query) || regex.is_match(&path)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum OptionMatcher {
    Header { name: String, value: String },
    BodyEquals(String),
    BodyContains(String),
    JsonPath { path: String, expected: Value },
}

impl OptionMatcher {
    pub fn matches(&self, request: &AttemptRequest) -> bool {
        match self {
            Self::Header { name, value } => request
                .headers()
                .get_all(name.as_str())
                .iter()
                .any(|candidate| candidate.as_bytes() == value.as_bytes()),
            Self::BodyEquals(expected) => request.body().as_ref() == expected.as_bytes(),
            Self::BodyContains(needle) => {
                String::from_utf8_lossy(request.body()).contains(needle.as_str())
            }
            Self::JsonPath { path, expected } => {
                let Ok(body) = serde_json::from_slice::<Value>(request.body()) else {
                    return false;
                };
                body.pointer(&json_pointer(path)) == Some(expected)
            }
        }
    }
}

fn json_pointer(path: &str) -> String {
    if path.starts_with('/') || path.is_empty() {
        return path.to_owned();
    }
    let path = path.strip_prefix("$.").unwrap_or(path);
    let mut pointer = String::new();
    for segment in path.split('.') {
        pointer.push('/');
        pointer.push_str(&segment.replace('~', "~0").replace('/', "~1"));
    }
    pointer
}

#[derive(Clone, Debug)]
pub struct MatchPattern {
    method: Option<String>,
    url: UrlPattern,
    options: Vec<OptionMatcher>,
}

impl MatchPattern {
    pub fn new(method: Option<&str>, url: &str) -> Self {
        Self {
            method: method.map(ToOwned::to_owned),
            url: UrlPattern::parse(url),
            options: Vec::new(),
        }
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn url(&self) -> &UrlPattern {
        &self.url
    }

    pub fn options(&self) -> &[OptionMatcher] {
        &self.options
    }

    pub fn matches(&self, request: &AttemptRequest) -> bool {
        let method_matches = self
            .method
            .as_deref()
            .is_none_or(|method| method.eq_ignore_ascii_case(request.method().as_str()));
        method_matches
            && self.url.matches(request.uri())
            && self.options.iter().all(|option| option.matches(request))
    }
}

#[derive(Clone, Debug)]
pub struct OutcomeDescriptor {
    pattern: MatchPattern,
    reusable: bool,
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
    declared_error: Option<String>,
    retryable: bool,
    delay: Duration,
    events: Option<Vec<EventRecord>>,
    stream: Option<StreamConfig>,
}

impl OutcomeDescriptor {
    pub fn new(method: &Method, url: &str) -> Self {
        Self::with_pattern(MatchPattern::new(Some(method.as_str()), url))
    }

    pub fn get(url: &str) -> Self {
        Self::new(&Method::GET, url)
    }

    pub fn post(url: &str) -> Self {
        Self::new(&Method::POST, url)
    }

    pub fn any() -> Self {
        Self::with_pattern(MatchPattern::new(None, "*"))
    }

    fn with_pattern(pattern: MatchPattern) -> Self {
        Self {
            pattern,
            reusable: false,
            status: 200,
            headers: Vec::new(),
            body: String::new(),
            declared_error: None,
            retryable: true,
            delay: Duration::ZERO,
            events: None,
            stream: None,
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn json(self, value: &Value) -> Self {
        self.header(CONTENT_TYPE.as_str(), "application/json")
            .body(value.to_string())
    }

    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.declared_error = Some(message.into());
        self.retryable = true;
        self
    }

    pub fn fail_terminal(mut self, message: impl Into<String>) -> Self {
        self.declared_error = Some(message.into());
        self.retryable = false;
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn reusable(mut self, reusable: bool) -> Self {
        self.reusable = reusable;
        self
    }

    pub fn events(mut self, events: impl IntoIterator<Item = EventRecord>) -> Self {
        self.events = Some(events.into_iter().collect());
        self
    }

    pub fn stream(mut self, config: StreamConfig) -> Self {
        self.stream = Some(config);
        self
    }

    pub fn match_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.pattern.options.push(OptionMatcher::Header {
            name: name.into().to_ascii_lowercase(),
            value: value.into(),
        });
        self
    }

    pub fn match_body(mut self, body: impl Into<String>) -> Self {
        self.pattern
            .options
            .push(OptionMatcher::BodyEquals(body.into()));
        self
    }

    pub fn match_body_contains(mut self, needle: impl Into<String>) -> Self {
        self.pattern
            .options
            .push(OptionMatcher::BodyContains(needle.into()));
        self
    }

    pub fn match_json(mut self, path: impl Into<String>, expected: Value) -> Self {
        self.pattern.options.push(OptionMatcher::JsonPath {
            path: path.into(),
            expected,
        });
        self
    }

    pub fn pattern(&self) -> &MatchPattern {
        &self.pattern
    }

    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn configured_delay(&self) -> Duration {
        self.delay
    }

    pub fn declared_error(&self) -> Option<&str> {
        self.declared_error.as_deref()
    }

    pub fn matches(&self, request: &AttemptRequest) -> bool {
        self.pattern.matches(request)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if !(100..=599).contains(&self.status) {
            return Err(Error::mock_provider(format!(
                "invalid scripted status code {}",
                self.status
            )));
        }
        if self.events.is_some() && self.stream.is_some() {
            return Err(Error::mock_provider(
                "outcome declares both an event list and a stream config",
            ));
        }
        if let Some(stream) = &self.stream {
            stream.validate()?;
        }
        Ok(())
    }

    pub(crate) fn declared_failure(&self) -> Option<Failure> {
        self.declared_error.as_ref().map(|message| Failure::Scripted {
            message: message.clone(),
            retryable: self.retryable,
            status: (self.status >= 400).then_some(self.status),
        })
    }

    pub(crate) fn has_stream_source(&self) -> bool {
        self.events.is_some() || self.stream.is_some() || !self.body.is_empty()
    }

    pub(crate) fn response_parts(&self) -> Result<(StatusCode, HeaderMap, Bytes), Error> {
        let status = StatusCode::from_u16(self.status).map_err(|source| Error::MockProvider {
            attempts: 0,
            message: format!("invalid scripted status code {}", self.status),
            source: Some(Box::new(source)),
        })?;
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let header_name = parse_header_name(name)?;
            let header_value = parse_header_value(name, value)?;
            headers.append(header_name, header_value);
        }
        Ok((status, headers, Bytes::from(self.body.clone())))
    }

    pub(crate) fn into_event_source(self, body: Bytes) -> EventSource {
        if let Some(events) = self.events {
            return EventSource::Buffered(events);
        }
        if let Some(stream) = self.stream {
            return EventSource::Scheduled(stream);
        }
        if body.is_empty() {
            return EventSource::Buffered(Vec::new());
        }
        EventSource::Body(Box::pin(futures_util::stream::iter([Ok(body)])))
    }
}
