//! Reconnecting event streams.
//!
//! A [`ReconnectingStream`] runs the same attempt cycle as the plain attempt
//! loop, but a successful attempt enters a connected phase instead of
//! resolving. Events flow to the event sink until the connection drops; the
//! drop is classified by the backoff policy and, when retryable, the stream
//! reconnects carrying the last event id forward.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::attempt::{AttemptContext, schedule_retry};
use crate::backoff::{BackoffPolicy, apply_jitter};
use crate::error::{AttemptError, Error, Failure};
use crate::handle::Settlement;
use crate::observe::Observer;
use crate::sse::config::StreamConfig;
use crate::sse::parser::EventRecordParser;
use crate::sse::record::EventRecord;
use crate::transport::{EventSource, StreamConnection};

type Connect = Box<
    dyn FnMut(AttemptContext) -> BoxFuture<'static, Result<StreamConnection, AttemptError>> + Send,
>;
type EventSink = Box<dyn FnMut(EventRecord) + Send>;
type ErrorSink = Box<dyn FnMut(&str) + Send>;
type ReconnectObserver = Box<dyn FnMut(usize, Duration, &str) + Send>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconnectState {
    retries: usize,
    attempts: usize,
    connected: bool,
    has_connected: bool,
    last_event_id: Option<String>,
    server_retry_interval: Option<Duration>,
    events_delivered: usize,
}

impl ReconnectState {
    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    pub fn server_retry_interval(&self) -> Option<Duration> {
        self.server_retry_interval
    }

    pub fn events_delivered(&self) -> usize {
        self.events_delivered
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSummary {
    pub attempts: usize,
    pub events_delivered: usize,
    pub last_event_id: Option<String>,
}

#[derive(Debug)]
enum StreamCommand {
    Close,
    ResetLastEventId,
}

#[derive(Debug)]
enum Interrupt {
    Cancelled,
    Closed,
}

enum Wake<T> {
    Cancelled,
    Command(Option<StreamCommand>),
    Ready(T),
}

enum Ending {
    Close,
    Idle,
}

struct Control {
    token: CancellationToken,
    commands: mpsc::UnboundedReceiver<StreamCommand>,
    published: watch::Sender<Option<String>>,
}

pub struct ReconnectingStream {
    policy: BackoffPolicy,
    connect: Connect,
    on_event: Option<EventSink>,
    on_error: Option<ErrorSink>,
    on_reconnect: Option<ReconnectObserver>,
    observer: Option<Arc<dyn Observer>>,
    deliver_keep_alive: bool,
    state: ReconnectState,
}

impl std::fmt::Debug for ReconnectingStream {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ReconnectingStream")
            .field("policy", &self.policy)
            .field("deliver_keep_alive", &self.deliver_keep_alive)
            .field("state", &self.state)
            .finish()
    }
}

impl ReconnectingStream {
    pub fn new<F, Fut>(policy: BackoffPolicy, mut connect: F) -> Self
    where
        F: FnMut(AttemptContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<StreamConnection, AttemptError>> + Send + 'static,
    {
        Self {
            policy,
            connect: Box::new(move |context| connect(context).boxed()),
            on_event: None,
            on_error: None,
            on_reconnect: None,
            observer: None,
            deliver_keep_alive: false,
            state: ReconnectState::default(),
        }
    }

    pub fn on_event<F>(mut self, sink: F) -> Self
    where
        F: FnMut(EventRecord) + Send + 'static,
    {
        self.on_event = Some(Box::new(sink));
        self
    }

    pub fn on_error<F>(mut self, sink: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.on_error = Some(Box::new(sink));
        self
    }

    pub fn on_reconnect<F>(mut self, observer: F) -> Self
    where
        F: FnMut(usize, Duration, &str) + Send + 'static,
    {
        self.on_reconnect = Some(Box::new(observer));
        self
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn deliver_keep_alive(mut self, deliver: bool) -> Self {
        self.deliver_keep_alive = deliver;
        self
    }

    pub fn last_event_id(mut self, last_event_id: impl Into<String>) -> Self {
        self.state.last_event_id = Some(last_event_id.into());
        self
    }

    pub fn state(&self) -> &ReconnectState {
        &self.state
    }

    pub fn spawn(self) -> StreamHandle {
        let cancel = CancellationToken::new();
        let (settlement, receiver) = Settlement::channel();
        let (command_sender, commands) = mpsc::unbounded_channel();
        let (published, last_event_id) = watch::channel(self.state.last_event_id.clone());
        let mut control = Control {
            token: cancel.clone(),
            commands,
            published,
        };
        let outcome = settlement.clone();
        tokio::spawn(async move {
            if let Some(result) = self.drive(&mut control).await {
                outcome.complete(result);
            }
        });
        StreamHandle {
            receiver,
            settlement,
            cancel,
            commands: command_sender,
            last_event_id,
        }
    }

    async fn drive(mut self, control: &mut Control) -> Option<Result<StreamSummary, Error>> {
        let mut delay = Duration::ZERO;
        loop {
            if !delay.is_zero()
                && let Err(interrupt) = self.until(control, sleep(delay)).await
            {
                return self.settle(interrupt);
            }
            if control.token.is_cancelled() {
                return None;
            }

            self.state.attempts += 1;
            let context = AttemptContext::new(
                self.state.attempts,
                self.policy.configured_max_attempts(),
                self.state.last_event_id.clone(),
            );
            if let Some(observer) = &self.observer {
                observer.on_attempt_start(&context);
            }
            let span = info_span!(
                "rebound.stream.attempt",
                attempt = context.attempt(),
                retries = self.state.retries,
                last_event_id = context.last_event_id().unwrap_or_default()
            );
            let connecting = (self.connect)(context.clone()).instrument(span);
            let result = match self.until(control, connecting).await {
                Ok(result) => result,
                Err(interrupt) => return self.settle(interrupt),
            };

            let failure = match result {
                Ok(connection) => match self.connected(control, connection).await {
                    Ok(failure) => failure,
                    Err(interrupt) => return self.settle(interrupt),
                },
                Err(AttemptError::Failure(failure)) => failure,
                Err(AttemptError::Fatal(error)) => {
                    if control.token.is_cancelled() {
                        return None;
                    }
                    let error = error.at_attempt(self.state.attempts);
                    warn!(error = %error, "event stream failed fatally");
                    self.report_error(&error.to_string());
                    return Some(Err(error));
                }
            };

            if control.token.is_cancelled() {
                return None;
            }
            match self.schedule_reconnect(&context, failure) {
                Ok(next) => delay = next,
                Err(error) => return Some(Err(error)),
            }
        }
    }

    async fn connected(
        &mut self,
        control: &mut Control,
        connection: StreamConnection,
    ) -> Result<Failure, Interrupt> {
        let (status, _headers, source, close_with, interrupt_after) = connection.into_parts();
        if self.state.has_connected {
            debug!(status = status.as_u16(), "event stream reconnected");
        } else {
            debug!(status = status.as_u16(), "event stream connected");
        }
        self.state.connected = true;
        self.state.has_connected = true;
        self.state.retries = 0;

        let mut processed = 0_usize;
        if let Some(failure) = tripped(processed, &interrupt_after) {
            return Ok(failure);
        }

        let ending = match source {
            EventSource::Buffered(events) => {
                for event in events {
                    self.deliver(control, event)?;
                    processed += 1;
                    if let Some(failure) = tripped(processed, &interrupt_after) {
                        return Ok(failure);
                    }
                }
                Ending::Idle
            }
            EventSource::Scheduled(StreamConfig::Fixed {
                events,
                interval,
                jitter,
                auto_close,
            }) => {
                for event in events {
                    let tick = if jitter {
                        apply_jitter(interval)
                    } else {
                        interval
                    };
                    self.until(control, sleep(tick)).await?;
                    self.deliver(control, event)?;
                    processed += 1;
                    if let Some(failure) = tripped(processed, &interrupt_after) {
                        return Ok(failure);
                    }
                }
                if auto_close { Ending::Close } else { Ending::Idle }
            }
            EventSource::Scheduled(StreamConfig::Generated {
                generator,
                interval,
                max_events,
            }) => {
                let mut index = 0_usize;
                while max_events.is_none_or(|limit| index < limit) {
                    self.until(control, sleep(interval)).await?;
                    self.deliver(control, generator(index))?;
                    index += 1;
                    processed += 1;
                    if let Some(failure) = tripped(processed, &interrupt_after) {
                        return Ok(failure);
                    }
                }
                Ending::Close
            }
            EventSource::Body(mut body) => {
                let mut parser = EventRecordParser::new();
                loop {
                    match self.until(control, body.next()).await? {
                        Some(Ok(chunk)) => {
                            for record in parser.feed(&chunk) {
                                self.deliver(control, record)?;
                                processed += 1;
                                if let Some(failure) = tripped(processed, &interrupt_after) {
                                    return Ok(failure);
                                }
                            }
                        }
                        Some(Err(failure)) => return Ok(failure),
                        None => {
                            if let Some(record) = parser.finish() {
                                self.deliver(control, record)?;
                            }
                            return Ok(close_with.unwrap_or(Failure::StreamEnded));
                        }
                    }
                }
            }
        };

        if let Some(failure) = close_with {
            return Ok(failure);
        }
        match ending {
            Ending::Close => {
                debug!("event stream completed");
                self.state.connected = false;
                Err(Interrupt::Closed)
            }
            Ending::Idle => Err(self
                .until(control, std::future::pending::<()>())
                .await
                .err()
                .unwrap_or(Interrupt::Closed)),
        }
    }

    fn deliver(&mut self, control: &Control, record: EventRecord) -> Result<(), Interrupt> {
        if control.token.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        if let Some(id) = &record.id {
            self.state.last_event_id = Some(id.clone());
            control.published.send_replace(Some(id.clone()));
        }
        if let Some(retry_ms) = record.retry_ms {
            self.state.server_retry_interval = Some(Duration::from_millis(retry_ms));
        }
        if record.is_keep_alive() && !self.deliver_keep_alive {
            return Ok(());
        }
        self.state.events_delivered += 1;
        debug!(
            event_type = record.event_type(),
            id = record.id.as_deref().unwrap_or_default(),
            "event delivered"
        );
        if let Some(sink) = &mut self.on_event {
            sink(record);
        }
        Ok(())
    }

    fn schedule_reconnect(
        &mut self,
        context: &AttemptContext,
        failure: Failure,
    ) -> Result<Duration, Error> {
        self.state.connected = false;
        self.state.retries += 1;
        let message = failure.to_string();
        self.report_error(&message);

        let retries = self.state.retries;
        let server_retry_interval = &mut self.state.server_retry_interval;
        let delay = schedule_retry(
            &self.policy,
            retries,
            self.state.attempts,
            &failure,
            || server_retry_interval.take().or_else(|| failure.retry_after()),
        )?;
        if let Some(observer) = &self.observer {
            observer.on_retry_scheduled(context, &failure, delay);
        }
        if let Some(on_reconnect) = &mut self.on_reconnect {
            on_reconnect(retries, delay, &message);
        }
        Ok(delay)
    }

    fn report_error(&mut self, message: &str) {
        if let Some(sink) = &mut self.on_error {
            sink(message);
        }
    }

    fn reset_last_event_id(&mut self, control: &Control) {
        self.state.last_event_id = None;
        control.published.send_replace(None);
    }

    fn settle(&self, interrupt: Interrupt) -> Option<Result<StreamSummary, Error>> {
        match interrupt {
            Interrupt::Cancelled => None,
            Interrupt::Closed => Some(Ok(StreamSummary {
                attempts: self.state.attempts,
                events_delivered: self.state.events_delivered,
                last_event_id: self.state.last_event_id.clone(),
            })),
        }
    }

    // Cancellation wins over a simultaneously ready future.
    async fn until<F>(&mut self, control: &mut Control, future: F) -> Result<F::Output, Interrupt>
    where
        F: Future,
    {
        tokio::pin!(future);
        loop {
            let wake = tokio::select! {
                biased;
                _ = control.token.cancelled() => Wake::Cancelled,
                command = control.commands.recv() => Wake::Command(command),
                output = &mut future => Wake::Ready(output),
            };
            match wake {
                Wake::Ready(output) => return Ok(output),
                Wake::Cancelled | Wake::Command(None) => return Err(Interrupt::Cancelled),
                Wake::Command(Some(StreamCommand::Close)) => return Err(Interrupt::Closed),
                Wake::Command(Some(StreamCommand::ResetLastEventId)) => {
                    self.reset_last_event_id(control);
                }
            }
        }
    }
}

fn tripped(processed: usize, interrupt_after: &Option<(usize, Failure)>) -> Option<Failure> {
    match interrupt_after {
        Some((limit, failure)) if processed >= *limit => Some(failure.clone()),
        _ => None,
    }
}

/// Control side of a spawned [`ReconnectingStream`].
///
/// Awaiting the handle yields `Some(Ok(summary))` after a normal close,
/// `Some(Err(..))` once reconnects are exhausted or a fatal error occurs, and
/// `None` after cancellation. Dropping the handle cancels the stream.
#[derive(Debug)]
pub struct StreamHandle {
    receiver: oneshot::Receiver<Result<StreamSummary, Error>>,
    settlement: Settlement<StreamSummary>,
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<StreamCommand>,
    last_event_id: watch::Receiver<Option<String>>,
}

impl StreamHandle {
    /// Stops the stream without settling it. Idempotent. A sink call that is
    /// already running may still finish; no new one starts afterwards, and the
    /// handle resolves to `None`.
    pub fn cancel(&self) {
        self.settlement.abandon();
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn close(&self) {
        let _ = self.commands.send(StreamCommand::Close);
    }

    pub fn reset_last_event_id(&self) {
        let _ = self.commands.send(StreamCommand::ResetLastEventId);
    }

    pub fn last_event_id(&self) -> Option<String> {
        self.last_event_id.borrow().clone()
    }
}

impl Future for StreamHandle {
    type Output = Option<Result<StreamSummary, Error>>;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        std::pin::Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|settled| settled.ok())
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
