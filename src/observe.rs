use std::time::Duration;

use crate::attempt::AttemptContext;
use crate::error::Failure;

// Called from inside the loop; implementations must not block.
pub trait Observer: Send + Sync {
    fn on_attempt_start(&self, _context: &AttemptContext) {}

    fn on_retry_scheduled(&self, _context: &AttemptContext, _failure: &Failure, _delay: Duration) {
    }
}
