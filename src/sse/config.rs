use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::sse::record::EventRecord;

pub type EventGenerator = Arc<dyn Fn(usize) -> EventRecord + Send + Sync>;

#[derive(Clone)]
pub enum StreamConfig {
    Fixed {
        events: Vec<EventRecord>,
        interval: Duration,
        jitter: bool,
        auto_close: bool,
    },
    Generated {
        generator: EventGenerator,
        interval: Duration,
        max_events: Option<usize>,
    },
}

impl StreamConfig {
    pub fn fixed(events: impl IntoIterator<Item = EventRecord>, interval: Duration) -> Self {
        Self::Fixed {
            events: events.into_iter().collect(),
            interval,
            jitter: false,
            auto_close: true,
        }
    }

    pub fn generated<F>(interval: Duration, generator: F) -> Self
    where
        F: Fn(usize) -> EventRecord + Send + Sync + 'static,
    {
        Self::Generated {
            generator: Arc::new(generator),
            interval,
            max_events: None,
        }
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        if let Self::Fixed { jitter, .. } = &mut self {
            *jitter = enabled;
        }
        self
    }

    pub fn auto_close(mut self, enabled: bool) -> Self {
        if let Self::Fixed { auto_close, .. } = &mut self {
            *auto_close = enabled;
        }
        self
    }

    pub fn max_events(mut self, limit: usize) -> Self {
        if let Self::Generated { max_events, .. } = &mut self {
            *max_events = Some(limit);
        }
        self
    }

    pub fn interval(&self) -> Duration {
        match self {
            Self::Fixed { interval, .. } | Self::Generated { interval, .. } => *interval,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        match self {
            Self::Generated {
                interval,
                max_events: None,
                ..
            } if interval.is_zero() => Err(Error::stream_setup(
                "unbounded generated stream requires a non-zero interval",
            )),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for StreamConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed {
                events,
                interval,
                jitter,
                auto_close,
            } => formatter
                .debug_struct("Fixed")
                .field("events", &events.len())
                .field("interval", interval)
                .field("jitter", jitter)
                .field("auto_close", auto_close)
                .finish(),
            Self::Generated {
                interval,
                max_events,
                ..
            } => formatter
                .debug_struct("Generated")
                .field("interval", interval)
                .field("max_events", max_events)
                .finish(),
        }
    }
}
