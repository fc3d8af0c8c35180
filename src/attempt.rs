//! The attempt loop: `Scheduled -> Executing -> Evaluating -> {Resolved |
//! Rejected | Scheduled(next)}`.
//!
//! [`AttemptLoop::step`] executes exactly one attempt and evaluates it; the
//! driver spawned by [`AttemptLoop::spawn`] waits out the returned delay and
//! calls `step` again. Every suspension point races against the loop's
//! cancellation token, and the token is re-checked before any observable side
//! effect.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::backoff::BackoffPolicy;
use crate::error::{AttemptError, Error, Failure};
use crate::handle::{RetryHandle, Settlement};
use crate::observe::Observer;

type Operation<T> =
    Box<dyn FnMut(AttemptContext) -> BoxFuture<'static, Result<T, AttemptError>> + Send>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptContext {
    attempt: usize,
    max_attempts: usize,
    last_event_id: Option<String>,
}

impl AttemptContext {
    pub(crate) fn new(attempt: usize, max_attempts: usize, last_event_id: Option<String>) -> Self {
        Self {
            attempt,
            max_attempts,
            last_event_id,
        }
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttemptState {
    attempt: usize,
    cancelled: bool,
    pending_delay: Option<Duration>,
    last_failure: Option<Failure>,
}

impl AttemptState {
    fn new() -> Self {
        Self {
            attempt: 1,
            ..Self::default()
        }
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn pending_delay(&self) -> Option<Duration> {
        self.pending_delay
    }

    pub fn last_failure(&self) -> Option<&Failure> {
        self.last_failure.as_ref()
    }
}

#[derive(Debug)]
pub enum Step<T> {
    Retry(Duration),
    Resolved(T),
    Rejected(Error),
}

pub struct AttemptLoop<T> {
    policy: BackoffPolicy,
    operation: Operation<T>,
    observer: Option<Arc<dyn Observer>>,
    initial_delay: Duration,
    state: AttemptState,
}

impl<T> std::fmt::Debug for AttemptLoop<T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AttemptLoop")
            .field("policy", &self.policy)
            .field("initial_delay", &self.initial_delay)
            .field("state", &self.state)
            .finish()
    }
}

impl<T> AttemptLoop<T>
where
    T: Send + 'static,
{
    pub fn new<F, Fut>(policy: BackoffPolicy, mut operation: F) -> Self
    where
        F: FnMut(AttemptContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, AttemptError>> + Send + 'static,
    {
        Self {
            policy,
            operation: Box::new(move |context| operation(context).boxed()),
            observer: None,
            initial_delay: Duration::ZERO,
            state: AttemptState::new(),
        }
    }

    pub fn initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    pub async fn step(&mut self) -> Step<T> {
        self.state.pending_delay = None;
        let context = AttemptContext::new(
            self.state.attempt,
            self.policy.configured_max_attempts(),
            None,
        );
        if let Some(observer) = &self.observer {
            observer.on_attempt_start(&context);
        }
        debug!("executing attempt");
        let result = (self.operation)(context.clone()).await;
        self.evaluate(&context, result)
    }

    fn evaluate(&mut self, context: &AttemptContext, result: Result<T, AttemptError>) -> Step<T> {
        let attempts = self.state.attempt;
        match result {
            Ok(value) => {
                debug!(attempts, "attempt succeeded");
                Step::Resolved(value)
            }
            Err(AttemptError::Fatal(error)) => {
                let error = error.at_attempt(attempts);
                warn!(attempts, error = %error, "attempt failed fatally");
                Step::Rejected(error)
            }
            Err(AttemptError::Failure(failure)) => {
                let verdict = schedule_retry(&self.policy, attempts, attempts, &failure, || {
                    failure.retry_after()
                });
                match verdict {
                    Ok(delay) => {
                        if let Some(observer) = &self.observer {
                            observer.on_retry_scheduled(context, &failure, delay);
                        }
                        self.state.attempt += 1;
                        self.state.pending_delay = Some(delay);
                        self.state.last_failure = Some(failure);
                        Step::Retry(delay)
                    }
                    Err(error) => {
                        self.state.last_failure = Some(failure);
                        Step::Rejected(error)
                    }
                }
            }
        }
    }

    pub fn spawn(self) -> RetryHandle<T> {
        let cancel = CancellationToken::new();
        let (settlement, receiver) = Settlement::channel();
        let token = cancel.clone();
        let outcome = settlement.clone();
        tokio::spawn(async move {
            if let Some(result) = self.drive(&token).await {
                outcome.complete(result);
            }
        });
        RetryHandle::new(receiver, settlement, cancel)
    }

    async fn drive(mut self, token: &CancellationToken) -> Option<Result<T, Error>> {
        let mut delay = self.initial_delay;
        loop {
            if !delay.is_zero() {
                self.state.pending_delay = Some(delay);
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        self.state.cancelled = true;
                        return None;
                    }
                    _ = sleep(delay) => {}
                }
            }
            if token.is_cancelled() {
                self.state.cancelled = true;
                return None;
            }

            let span = info_span!(
                "rebound.attempt",
                attempt = self.state.attempt,
                max_attempts = self.policy.configured_max_attempts()
            );
            let step = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                step = self.step().instrument(span) => Some(step),
            };
            let Some(step) = step else {
                self.state.cancelled = true;
                return None;
            };
            if token.is_cancelled() {
                self.state.cancelled = true;
                return None;
            }

            match step {
                Step::Retry(next) => delay = next,
                Step::Resolved(value) => return Some(Ok(value)),
                Step::Rejected(error) => return Some(Err(error)),
            }
        }
    }
}

// Delay before retry number `retry`, preferring `advised` over the backoff,
// or the rejection once the budget is spent or the failure is terminal.
pub(crate) fn schedule_retry(
    policy: &BackoffPolicy,
    retry: usize,
    attempts: usize,
    failure: &Failure,
    advised: impl FnOnce() -> Option<Duration>,
) -> Result<Duration, Error> {
    if policy.should_retry(retry, failure) {
        let delay = advised().unwrap_or_else(|| policy.delay(retry));
        warn!(
            attempts,
            retry,
            delay_ms = delay.as_millis() as u64,
            failure = %failure,
            "retry scheduled"
        );
        return Ok(delay);
    }
    warn!(attempts, failure = %failure, "giving up");
    let failure = failure.clone();
    Err(if policy.is_retryable(&failure) {
        Error::Exhausted { attempts, failure }
    } else {
        Error::Terminal { attempts, failure }
    })
}

pub fn run<T, F, Fut>(policy: BackoffPolicy, operation: F) -> RetryHandle<T>
where
    T: Send + 'static,
    F: FnMut(AttemptContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, AttemptError>> + Send + 'static,
{
    AttemptLoop::new(policy, operation).spawn()
}
