use std::time::Duration;

use http::Method;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum Failure {
    #[error("transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    #[error("http status {status}: {body}")]
    Status {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u128 },
    #[error("{message}")]
    Simulated { message: String },
    #[error("{message}")]
    Scripted {
        message: String,
        retryable: bool,
        status: Option<u16>,
    },
    #[error("event stream closed by server")]
    StreamEnded,
}

impl Failure {
    pub fn simulated(message: impl Into<String>) -> Self {
        Self::Simulated {
            message: message.into(),
        }
    }

    pub fn scripted(message: impl Into<String>, retryable: bool) -> Self {
        Self::Scripted {
            message: message.into(),
            retryable,
            status: None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Scripted { status, .. } => *status,
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    Exhausted,
    Terminal,
    NoMatchingOutcome,
    MockProvider,
    StreamSetup,
    InvalidUri,
    RequestBuild,
    InvalidHeaderName,
    InvalidHeaderValue,
    InvalidConfig,
    TlsConfig,
    Deserialize,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exhausted => "exhausted",
            Self::Terminal => "terminal",
            Self::NoMatchingOutcome => "no_matching_outcome",
            Self::MockProvider => "mock_provider",
            Self::StreamSetup => "stream_setup",
            Self::InvalidUri => "invalid_uri",
            Self::RequestBuild => "request_build",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::InvalidConfig => "invalid_config",
            Self::TlsConfig => "tls_config",
            Self::Deserialize => "deserialize",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("giving up after {attempts} attempt(s): {failure}")]
    Exhausted { attempts: usize, failure: Failure },
    #[error("non-retryable failure after {attempts} attempt(s): {failure}")]
    Terminal { attempts: usize, failure: Failure },
    #[error(
        "unexpected operation after {attempts} attempt(s): no scripted outcome matches {method} {url}"
    )]
    NoMatchingOutcome {
        attempts: usize,
        method: Method,
        url: String,
    },
    #[error("outcome provider failed after {attempts} attempt(s): {message}")]
    MockProvider {
        attempts: usize,
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("failed to set up event stream after {attempts} attempt(s): {message}")]
    StreamSetup { attempts: usize, message: String },
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("invalid client configuration: {message}")]
    InvalidConfig { message: String },
    #[error("invalid tls configuration: {message}")]
    TlsConfig { message: String },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Exhausted { .. } => ErrorCode::Exhausted,
            Self::Terminal { .. } => ErrorCode::Terminal,
            Self::NoMatchingOutcome { .. } => ErrorCode::NoMatchingOutcome,
            Self::MockProvider { .. } => ErrorCode::MockProvider,
            Self::StreamSetup { .. } => ErrorCode::StreamSetup,
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::TlsConfig { .. } => ErrorCode::TlsConfig,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
        }
    }

    pub fn attempts(&self) -> Option<usize> {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::Terminal { attempts, .. }
            | Self::NoMatchingOutcome { attempts, .. }
            | Self::MockProvider { attempts, .. }
            | Self::StreamSetup { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Exhausted { failure, .. } | Self::Terminal { failure, .. } => Some(failure),
            _ => None,
        }
    }

    pub(crate) fn mock_provider(message: impl Into<String>) -> Self {
        Self::MockProvider {
            attempts: 0,
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn stream_setup(message: impl Into<String>) -> Self {
        Self::StreamSetup {
            attempts: 0,
            message: message.into(),
        }
    }

    // Errors raised inside an attempt do not know the loop's count.
    pub(crate) fn at_attempt(mut self, count: usize) -> Self {
        if let Self::NoMatchingOutcome { attempts, .. }
        | Self::MockProvider { attempts, .. }
        | Self::StreamSetup { attempts, .. } = &mut self
        {
            *attempts = count;
        }
        self
    }
}

#[derive(Debug)]
pub enum AttemptError {
    Failure(Failure),
    Fatal(Error),
}

impl From<Failure> for AttemptError {
    fn from(failure: Failure) -> Self {
        Self::Failure(failure)
    }
}

impl From<Error> for AttemptError {
    fn from(error: Error) -> Self {
        Self::Fatal(error)
    }
}
