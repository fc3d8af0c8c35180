use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::Failure;

// When set, its answer replaces every other retry rule.
pub trait RetryClassifier: Send + Sync {
    fn should_retry(&self, failure: &Failure) -> bool;
}

struct PredicateClassifier<F>(F);

impl<F> RetryClassifier for PredicateClassifier<F>
where
    F: Fn(&Failure) -> bool + Send + Sync,
{
    fn should_retry(&self, failure: &Failure) -> bool {
        (self.0)(failure)
    }
}

#[derive(Clone)]
pub struct BackoffPolicy {
    max_attempts: usize,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
    retryable_status_codes: BTreeSet<u16>,
    retryable_error_substrings: Vec<String>,
    retry_classifier: Option<Arc<dyn RetryClassifier>>,
}

impl std::fmt::Debug for BackoffPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("BackoffPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .field("retryable_status_codes", &self.retryable_status_codes)
            .field(
                "retryable_error_substrings",
                &self.retryable_error_substrings,
            )
            .field("has_retry_classifier", &self.retry_classifier.is_some())
            .finish()
    }
}

impl BackoffPolicy {
    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            retryable_status_codes: default_retryable_status_codes(),
            retryable_error_substrings: default_retryable_error_substrings(),
            retry_classifier: None,
        }
    }

    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            jitter: false,
            ..Self::standard()
        }
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        if self.max_delay < self.initial_delay {
            self.max_delay = self.initial_delay;
        }
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay.max(self.initial_delay);
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            1.0
        };
        self
    }

    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn retryable_error_substrings<I, S>(mut self, substrings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_error_substrings = substrings.into_iter().map(Into::into).collect();
        self
    }

    pub fn retry_classifier(mut self, retry_classifier: Arc<dyn RetryClassifier>) -> Self {
        self.retry_classifier = Some(retry_classifier);
        self
    }

    pub fn retry_if<F>(self, predicate: F) -> Self
    where
        F: Fn(&Failure) -> bool + Send + Sync + 'static,
    {
        self.retry_classifier(Arc::new(PredicateClassifier(predicate)))
    }

    pub fn configured_max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn configured_max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn jitter_enabled(&self) -> bool {
        self.jitter
    }

    pub fn delay(&self, attempt: usize) -> Duration {
        let raw = self.raw_delay(attempt);
        if self.jitter { apply_jitter(raw) } else { raw }
    }

    pub fn raw_delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        match Duration::try_from_secs_f64(secs) {
            Ok(delay) => delay.min(self.max_delay),
            Err(_) => self.max_delay,
        }
    }

    pub fn is_retryable(&self, failure: &Failure) -> bool {
        if let Some(retry_classifier) = &self.retry_classifier {
            return retry_classifier.should_retry(failure);
        }
        match failure {
            Failure::Scripted { retryable, .. } => *retryable,
            Failure::Status { status, .. } => self.retryable_status_codes.contains(status),
            Failure::StreamEnded => true,
            other => {
                let text = other.to_string();
                self.retryable_error_substrings
                    .iter()
                    .any(|needle| text.contains(needle.as_str()))
            }
        }
    }

    pub fn should_retry(&self, attempt: usize, failure: &Failure) -> bool {
        attempt < self.max_attempts && self.is_retryable(failure)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

pub(crate) fn apply_jitter(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let reduction: f64 = rand::rng().random_range(0.0..=0.5);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 - reduction))
        .map_or(delay, |jittered| jittered.min(delay))
}

pub(crate) fn default_retryable_status_codes() -> BTreeSet<u16> {
    [408_u16, 425, 429, 500, 502, 503, 504].into_iter().collect()
}

pub(crate) fn default_retryable_error_substrings() -> Vec<String> {
    [
        "timed out",
        "Connection refused",
        "Connection reset",
        "connection refused",
        "connection reset",
        "connection closed before message completed",
        "error trying to connect",
        "broken pipe",
        "unexpected eof",
        "dns error",
        "Could not resolve host",
        "Network is unreachable",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::BackoffPolicy;
    use crate::error::{Failure, TransportErrorKind};

    fn deterministic() -> BackoffPolicy {
        BackoffPolicy::standard()
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(30))
            .multiplier(2.0)
            .jitter(false)
    }

    #[test]
    fn exponential_delays_are_capped_at_max_delay() {
        let policy = deterministic();
        let delays: Vec<Duration> = (1..=6).map(|attempt| policy.delay(attempt)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
                Duration::from_secs(30),
            ]
        );
        assert_eq!(policy.delay(10_000), Duration::from_secs(30));
    }

    #[test]
    fn huge_max_delay_saturates_instead_of_panicking() {
        let policy = BackoffPolicy::standard()
            .jitter(false)
            .max_delay(Duration::MAX);
        assert_eq!(policy.delay(200), Duration::MAX);
        assert_eq!(policy.delay(1), Duration::from_secs(1));

        let jittered = policy.jitter(true).delay(200);
        assert!(jittered <= Duration::MAX);
        assert!(jittered >= Duration::from_secs(u64::MAX / 4));
    }

    #[test]
    fn jitter_only_reduces_delay_by_at_most_half() {
        let policy = deterministic().jitter(true);
        for attempt in 1..=8 {
            let raw = policy.raw_delay(attempt);
            for _ in 0..1000 {
                let delay = policy.delay(attempt);
                assert!(delay <= raw, "{delay:?} > {raw:?}");
                assert!(delay >= raw.mul_f64(0.5), "{delay:?} < half of {raw:?}");
            }
        }
    }

    #[test]
    fn max_attempts_is_clamped_to_one() {
        let policy = BackoffPolicy::standard().max_attempts(0);
        assert_eq!(policy.configured_max_attempts(), 1);
        assert!(!policy.should_retry(1, &Failure::StreamEnded));
    }

    #[test]
    fn status_failures_use_configured_codes() {
        let policy = BackoffPolicy::standard().retryable_status_codes([503]);
        let unavailable = Failure::Status {
            status: 503,
            body: String::new(),
            retry_after: None,
        };
        let not_found = Failure::Status {
            status: 404,
            body: String::new(),
            retry_after: None,
        };
        assert!(policy.is_retryable(&unavailable));
        assert!(!policy.is_retryable(&not_found));
    }

    #[test]
    fn message_failures_match_case_sensitive_substrings() {
        let policy = BackoffPolicy::standard().retryable_error_substrings(["Connection reset"]);
        assert!(policy.is_retryable(&Failure::simulated("Connection reset by peer")));
        assert!(!policy.is_retryable(&Failure::simulated("connection RESET by peer")));
        assert!(!policy.is_retryable(&Failure::Transport {
            kind: TransportErrorKind::Tls,
            message: "bad certificate".to_owned(),
        }));
    }

    #[test]
    fn scripted_flag_wins_over_message_text() {
        let policy = BackoffPolicy::standard();
        assert!(!policy.is_retryable(&Failure::scripted("Connection refused", false)));
        assert!(policy.is_retryable(&Failure::scripted("boom", true)));
    }

    #[test]
    fn retry_classifier_short_circuits_everything_else() {
        let policy = BackoffPolicy::standard().retry_if(|failure| failure.status() == Some(404));
        let not_found = Failure::Status {
            status: 404,
            body: String::new(),
            retry_after: None,
        };
        assert!(policy.is_retryable(&not_found));
        assert!(!policy.is_retryable(&Failure::scripted("retry me", true)));
        assert!(!policy.is_retryable(&Failure::Timeout { timeout_ms: 10 }));
    }

    #[test]
    fn timeouts_are_classified_by_message() {
        let policy = BackoffPolicy::standard();
        assert!(policy.is_retryable(&Failure::Timeout { timeout_ms: 250 }));
        let strict = policy.retryable_error_substrings(Vec::<String>::new());
        assert!(!strict.is_retryable(&Failure::Timeout { timeout_ms: 250 }));
    }
}
