/// Client-side flood protection for outbound chat. The server enforces its
/// own limit; this keeps a well-behaved client from ever tripping it.
pub struct ChatRateLimiter {
    limit_per_10s: f32,
    sent_in_epoch: u32,
    epoch: u64,
    last_sent: Option<f64>,
}

impl ChatRateLimiter {
    pub fn new(limit_per_10s: f32) -> Self {
        Self {
            limit_per_10s,
            sent_in_epoch: 0,
            epoch: 0,
            last_sent: None,
        }
    }

    /// Admission test. `now` is wall time in seconds. On admission the
    /// send is recorded; a denied call records nothing.
    pub fn try_admit(&mut self, now: f64) -> bool {
        if self.limit_per_10s <= 0.0 {
            return true;
        }

        // Integer epochs keep float drift from leaking counts across
        // 10-second buckets.
        let epoch = now.max(0.0) as u64 / 10;
        if epoch != self.epoch {
            self.sent_in_epoch = 0;
            self.epoch = epoch;
        }

        if self.sent_in_epoch as f32 >= self.limit_per_10s {
            return false;
        }

        // Even spacing: a fresh epoch alone must not permit a burst right
        // after a full previous epoch.
        if let Some(last) = self.last_sent {
            if now - last < f64::from(10.0 / self.limit_per_10s) {
                return false;
            }
        }

        self.sent_in_epoch += 1;
        self.last_sent = Some(now);
        true
    }
}

/// Cuts a message to `max_chars`, returning whether anything was cut.
/// Truncation is by character so a multi-byte boundary can't split.
pub fn truncate_message(message: &str, max_chars: usize) -> (String, bool) {
    if message.chars().count() <= max_chars {
        (message.to_owned(), false)
    } else {
        (message.chars().take(max_chars).collect(), true)
    }
}
