mod config;
mod parser;
mod record;
mod stream;

pub use self::config::{EventGenerator, StreamConfig};
pub use self::parser::{EventRecordParser, parse_record};
pub use self::record::{DEFAULT_EVENT_TYPE, EventRecord};
pub use self::stream::{ReconnectState, ReconnectingStream, StreamHandle, StreamSummary};
