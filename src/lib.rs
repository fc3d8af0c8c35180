//! `rebound` is an HTTP client core built around one retry engine.
//!
//! Plain requests and Server-Sent-Events connections are both driven by the
//! same attempt loop: delay, execute, classify against a [`BackoffPolicy`],
//! then resolve, reject or try again. Event streams stay connected after a
//! successful attempt and reconnect with the last seen event id when the
//! connection drops. The [`mock`] module replays scripted outcomes through
//! that very loop, so retry behaviour can be tested deterministically.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use rebound::prelude::{BackoffPolicy, Client, Request};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder("https://api.example.com")
//!         .client_name("my-sdk")
//!         .request_timeout(Duration::from_secs(3))
//!         .backoff_policy(
//!             BackoffPolicy::standard()
//!                 .max_attempts(4)
//!                 .initial_delay(Duration::from_millis(200)),
//!         )
//!         .try_build()?;
//!
//!     let response = client.get("/v1/items")?.await.ok_or("cancelled")??;
//!     println!("status={}", response.status());
//!
//!     let stream = client
//!         .stream(Request::get("/v1/events"))?
//!         .on_event(|event| println!("{}: {}", event.event_type(), event.data()))
//!         .on_reconnect(|retry, delay, error| {
//!             eprintln!("reconnect #{retry} in {delay:?}: {error}");
//!         })
//!         .spawn();
//!     tokio::time::sleep(Duration::from_secs(30)).await;
//!     stream.close();
//!     Ok(())
//! }
//! ```
//!
//! # Testing with scripted outcomes
//!
//! ```
//! use std::time::Duration;
//! use rebound::mock::{OutcomeDescriptor, OutcomeMatcher, ScriptedTransport};
//! use rebound::{BackoffPolicy, Client};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), rebound::Error> {
//! let matcher = OutcomeMatcher::new().strict(true);
//! matcher.extend([
//!     OutcomeDescriptor::get("/v1/items").fail("Connection reset by peer"),
//!     OutcomeDescriptor::get("/v1/items").body("[]"),
//! ]);
//! let client = Client::builder("https://api.example.com")
//!     .backoff_policy(BackoffPolicy::standard().initial_delay(Duration::from_millis(1)))
//!     .transport(ScriptedTransport::new(matcher.clone()))
//!     .try_build()?;
//!
//! let response = client.get("/v1/items")?.await.expect("not cancelled")?;
//! assert_eq!(response.text_lossy(), "[]");
//! assert!(matcher.is_empty());
//! # Ok(())
//! # }
//! ```

mod attempt;
mod backoff;
mod client;
mod config;
mod error;
mod handle;
pub mod mock;
mod observe;
pub mod sse;
pub mod transport;
mod util;

pub use crate::attempt::{AttemptContext, AttemptLoop, AttemptState, Step, run};
pub use crate::backoff::{BackoffPolicy, RetryClassifier};
pub use crate::client::{Client, ClientBuilder, Request};
pub use crate::config::{BackoffConfig, ClientConfig};
pub use crate::error::{AttemptError, BoxError, Error, ErrorCode, Failure, TransportErrorKind};
pub use crate::handle::RetryHandle;
pub use crate::observe::Observer;
pub use crate::sse::{EventRecord, ReconnectingStream, StreamConfig, StreamHandle};
pub use crate::transport::{HyperTransport, Response, Transport};

pub type ReboundResult<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        AttemptContext, AttemptError, BackoffPolicy, Client, ClientBuilder, Error, ErrorCode,
        EventRecord, Failure, Observer, ReboundResult, ReconnectingStream, Request, Response,
        RetryClassifier, RetryHandle, StreamConfig, StreamHandle,
    };
}

#[cfg(test)]
mod tests;
