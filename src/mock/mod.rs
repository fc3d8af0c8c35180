//! Deterministic test double for the attempt engine.
//!
//! [`ScriptedTransport`] plugs into the same [`Transport`](crate::Transport)
//! seam as the network transport, so scripted operations go through the exact
//! attempt loop and reconnecting stream used in production.

mod fault;
mod matcher;
mod outcome;
mod transport;

pub use self::fault::{FaultCondition, FaultInjector};
pub use self::matcher::{OutcomeMatcher, OutcomeProvider, provider_fn};
pub use self::outcome::{MatchPattern, OptionMatcher, OutcomeDescriptor, UrlPattern};
pub use self::transport::ScriptedTransport;
