use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{AttemptError, Error, Failure};
use crate::mock::fault::{FaultCondition, FaultInjector};
use crate::mock::matcher::OutcomeProvider;
use crate::mock::outcome::OutcomeDescriptor;
use crate::transport::{AttemptRequest, Response, StreamConnection, Transport, status_failure};
use crate::util::redact_uri_for_logs;

// Waits max(outcome, global, fault delay); injected faults win over declared errors.
#[derive(Clone)]
pub struct ScriptedTransport {
    provider: Arc<dyn OutcomeProvider>,
    faults: Arc<FaultInjector>,
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ScriptedTransport")
            .field("faults", &self.faults)
            .finish_non_exhaustive()
    }
}

impl ScriptedTransport {
    pub fn new(provider: impl OutcomeProvider + 'static) -> Self {
        Self {
            provider: Arc::new(provider),
            faults: Arc::new(FaultInjector::none()),
        }
    }

    pub fn faults(mut self, faults: FaultInjector) -> Self {
        self.faults = Arc::new(faults);
        self
    }

    fn prepare(
        &self,
        request: &AttemptRequest,
    ) -> Result<(OutcomeDescriptor, FaultCondition, Duration), Error> {
        let outcome = self.provider.next_outcome(request)?;
        outcome.validate()?;
        let condition = self.faults.next_condition();
        let delay = outcome
            .configured_delay()
            .max(self.faults.configured_global_delay())
            .max(condition.delay);
        debug!(
            method = %request.method(),
            uri = %redact_uri_for_logs(request.uri()),
            attempt = request.attempt(),
            delay_ms = delay.as_millis() as u64,
            injected_failure = condition.should_fail,
            "replaying scripted outcome"
        );
        Ok((outcome, condition, delay))
    }

    async fn settle(
        transport: Self,
        request: AttemptRequest,
    ) -> Result<(OutcomeDescriptor, FaultCondition), AttemptError> {
        let (outcome, condition, delay) = transport.prepare(&request)?;
        if !delay.is_zero() {
            sleep(delay).await;
        }
        if let Some(failure) = condition.failure() {
            return Err(failure.into());
        }
        Ok((outcome, condition))
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, request: AttemptRequest) -> BoxFuture<'static, Result<Response, AttemptError>> {
        let transport = self.clone();
        async move {
            let (outcome, _condition) = Self::settle(transport, request).await?;
            if let Some(failure) = outcome.declared_failure() {
                return Err(failure.into());
            }
            let (status, headers, body) = outcome.response_parts()?;
            Ok(Response::new(status, headers, body))
        }
        .boxed()
    }

    fn connect(
        &self,
        request: AttemptRequest,
    ) -> BoxFuture<'static, Result<StreamConnection, AttemptError>> {
        let transport = self.clone();
        async move {
            let (outcome, condition) = Self::settle(transport, request).await?;
            let declared: Option<Failure> = outcome.declared_failure();
            if let Some(failure) = &declared
                && !outcome.has_stream_source()
            {
                return Err(failure.clone().into());
            }
            let (status, headers, body) = outcome.response_parts()?;
            if declared.is_none() && !status.is_success() {
                return Err(status_failure(status, &headers, &body).into());
            }

            let source = outcome.into_event_source(body);
            let mut connection = StreamConnection::new(status, headers, source);
            if let Some(failure) = declared {
                connection = connection.close_with(failure);
            }
            if let Some((events, failure)) = condition.disconnect_failure() {
                connection = connection.interrupt_after(events, failure);
            }
            Ok(connection)
        }
        .boxed()
    }
}
