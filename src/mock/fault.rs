use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Failure;
use crate::util::lock_unpoisoned;

const DEFAULT_FAULT_MESSAGE: &str = "simulated network failure";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FaultCondition {
    pub should_fail: bool,
    pub delay: Duration,
    pub error_message: Option<String>,
    pub disconnect_after: Option<usize>,
}

impl FaultCondition {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn latency(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn disconnect_after(mut self, events: usize) -> Self {
        self.disconnect_after = Some(events);
        self
    }

    pub(crate) fn failure(&self) -> Option<Failure> {
        self.should_fail.then(|| {
            Failure::simulated(
                self.error_message
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FAULT_MESSAGE.to_owned()),
            )
        })
    }

    pub(crate) fn disconnect_failure(&self) -> Option<(usize, Failure)> {
        self.disconnect_after.map(|events| {
            let message = self
                .error_message
                .clone()
                .unwrap_or_else(|| format!("connection reset after {events} event(s)"));
            (events, Failure::simulated(message))
        })
    }
}

#[derive(Debug)]
enum FaultMode {
    None,
    Scripted(VecDeque<FaultCondition>),
    Random {
        rng: StdRng,
        failure_rate: f64,
        min_latency: Duration,
        max_latency: Duration,
        message: String,
    },
}

#[derive(Debug)]
pub struct FaultInjector {
    mode: Mutex<FaultMode>,
    global_delay: Duration,
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::none()
    }
}

impl FaultInjector {
    pub fn none() -> Self {
        Self {
            mode: Mutex::new(FaultMode::None),
            global_delay: Duration::ZERO,
        }
    }

    pub fn scripted(conditions: impl IntoIterator<Item = FaultCondition>) -> Self {
        Self {
            mode: Mutex::new(FaultMode::Scripted(conditions.into_iter().collect())),
            global_delay: Duration::ZERO,
        }
    }

    pub fn random(seed: u64, failure_rate: f64) -> Self {
        let failure_rate = if failure_rate.is_finite() {
            failure_rate.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            mode: Mutex::new(FaultMode::Random {
                rng: StdRng::seed_from_u64(seed),
                failure_rate,
                min_latency: Duration::ZERO,
                max_latency: Duration::ZERO,
                message: DEFAULT_FAULT_MESSAGE.to_owned(),
            }),
            global_delay: Duration::ZERO,
        }
    }

    pub fn latency_range(self, min: Duration, max: Duration) -> Self {
        if let FaultMode::Random {
            min_latency,
            max_latency,
            ..
        } = &mut *lock_unpoisoned(&self.mode)
        {
            *min_latency = min;
            *max_latency = max.max(min);
        }
        self
    }

    pub fn error_message(self, text: impl Into<String>) -> Self {
        if let FaultMode::Random { message, .. } = &mut *lock_unpoisoned(&self.mode) {
            *message = text.into();
        }
        self
    }

    pub fn global_delay(mut self, delay: Duration) -> Self {
        self.global_delay = delay;
        self
    }

    pub fn configured_global_delay(&self) -> Duration {
        self.global_delay
    }

    pub fn remaining(&self) -> usize {
        match &*lock_unpoisoned(&self.mode) {
            FaultMode::Scripted(queue) => queue.len(),
            _ => 0,
        }
    }

    pub fn next_condition(&self) -> FaultCondition {
        match &mut *lock_unpoisoned(&self.mode) {
            FaultMode::None => FaultCondition::none(),
            FaultMode::Scripted(queue) => queue.pop_front().unwrap_or_default(),
            FaultMode::Random {
                rng,
                failure_rate,
                min_latency,
                max_latency,
                message,
            } => {
                let should_fail = rng.random_bool(*failure_rate);
                let delay = if max_latency > min_latency {
                    Duration::from_secs_f64(
                        rng.random_range(min_latency.as_secs_f64()..=max_latency.as_secs_f64()),
                    )
                } else {
                    *min_latency
                };
                FaultCondition {
                    should_fail,
                    delay,
                    error_message: should_fail.then(|| message.clone()),
                    disconnect_after: None,
                }
            }
        }
    }
}
