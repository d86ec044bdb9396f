use std::sync::atomic::{AtomicI64, Ordering};

/// In-memory resume cursor, the `time_us` of the last processed message.
/// Advancement is monotonic; replays can never move it backwards.
pub struct Cursor {
    value: AtomicI64,
}

impl Cursor {
    pub fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
        }
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Returns true if the cursor moved.
    pub fn advance_to(&self, time_us: i64) -> bool {
        self.value.fetch_max(time_us, Ordering::SeqCst) < time_us
    }
}
