use std::sync::{Arc, Mutex};

use crate::error::{BoxError, Error};
use crate::mock::outcome::OutcomeDescriptor;
use crate::transport::AttemptRequest;
use crate::util::{lock_unpoisoned, redact_uri_for_logs};

pub trait OutcomeProvider: Send + Sync {
    fn next_outcome(&self, request: &AttemptRequest) -> Result<OutcomeDescriptor, Error>;
}

#[derive(Debug, Default)]
struct Pool {
    outcomes: Vec<OutcomeDescriptor>,
    strict: bool,
}

// First match in pool order; non-reusable entries are removed when taken.
#[derive(Clone, Debug, Default)]
pub struct OutcomeMatcher {
    pool: Arc<Mutex<Pool>>,
}

impl OutcomeMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict(self, strict: bool) -> Self {
        lock_unpoisoned(&self.pool).strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        lock_unpoisoned(&self.pool).strict
    }

    pub fn push(&self, outcome: OutcomeDescriptor) {
        lock_unpoisoned(&self.pool).outcomes.push(outcome);
    }

    pub fn extend(&self, outcomes: impl IntoIterator<Item = OutcomeDescriptor>) {
        lock_unpoisoned(&self.pool).outcomes.extend(outcomes);
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.pool).outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock_unpoisoned(&self.pool).outcomes.clear();
    }

    pub fn remaining(&self) -> Vec<OutcomeDescriptor> {
        lock_unpoisoned(&self.pool).outcomes.clone()
    }

    pub fn find_match(&self, request: &AttemptRequest) -> Option<(OutcomeDescriptor, usize)> {
        let pool = lock_unpoisoned(&self.pool);
        pool.outcomes
            .iter()
            .position(|outcome| outcome.matches(request))
            .map(|index| (pool.outcomes[index].clone(), index))
    }

    pub fn take_match(&self, request: &AttemptRequest) -> Result<Option<OutcomeDescriptor>, Error> {
        let mut pool = lock_unpoisoned(&self.pool);
        let Some(index) = pool
            .outcomes
            .iter()
            .position(|outcome| outcome.matches(request))
        else {
            if pool.strict {
                return Err(Error::NoMatchingOutcome {
                    attempts: request.attempt(),
                    method: request.method().clone(),
                    url: redact_uri_for_logs(request.uri()),
                });
            }
            return Ok(None);
        };
        if pool.outcomes[index].is_reusable() {
            Ok(Some(pool.outcomes[index].clone()))
        } else {
            Ok(Some(pool.outcomes.remove(index)))
        }
    }
}

impl OutcomeProvider for OutcomeMatcher {
    fn next_outcome(&self, request: &AttemptRequest) -> Result<OutcomeDescriptor, Error> {
        Ok(self
            .take_match(request)?
            .unwrap_or_else(OutcomeDescriptor::any))
    }
}

pub fn provider_fn<F>(provider: F) -> impl OutcomeProvider
where
    F: Fn(usize, Option<&str>) -> Result<OutcomeDescriptor, BoxError> + Send + Sync + 'static,
{
    FnProvider(provider)
}

struct FnProvider<F>(F);

impl<F> OutcomeProvider for FnProvider<F>
where
    F: Fn(usize, Option<&str>) -> Result<OutcomeDescriptor, BoxError> + Send + Sync,
{
    fn next_outcome(&self, request: &AttemptRequest) -> Result<OutcomeDescriptor, Error> {
        let attempt = request.attempt();
        (self.0)(attempt, request.last_event_id()).map_err(|source| Error::MockProvider {
            attempts: attempt,
            message: format!("no outcome available for attempt {attempt}"),
            source: Some(source),
        })
    }
}
