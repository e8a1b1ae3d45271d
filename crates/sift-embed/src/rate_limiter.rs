use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Token bucket rate limiter. Refills continuously at `refill_per_sec`
/// tokens per second up to `capacity`; `acquire` blocks the calling thread
/// until a token is available.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: u32) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec: refill_per_sec as f64,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(state: &mut BucketState, capacity: f64, refill_per_sec: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * refill_per_sec).min(capacity);
        state.last_refill = now;
    }

    /// Block until one token is available, then consume it.
    pub fn acquire(&self) {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                Self::refill(&mut state, self.capacity, self.refill_per_sec);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Non-blocking attempt to consume one token.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        Self::refill(&mut state, self.capacity, self.refill_per_sec);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_then_refills() {
        let bucket = TokenBucket::new(2, 1000);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        std::thread::sleep(Duration::from_millis(20));
        assert!(bucket.try_acquire());
    }

    #[test]
    fn never_exceeds_capacity() {
        let bucket = TokenBucket::new(3, 1000);
        std::thread::sleep(Duration::from_millis(50));
        let mut acquired = 0;
        while bucket.try_acquire() {
            acquired += 1;
        }
        assert_eq!(acquired, 3);
    }
}
