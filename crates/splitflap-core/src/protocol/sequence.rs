//! Sequence counter used to correlate requests with responses.
//!
//! Every request frame carries a one-byte sequence number and the device
//! echoes it in its reply. A reply whose number does not match the pending
//! request is a late answer to an earlier, timed-out attempt and is dropped.

use std::sync::atomic::{AtomicU8, Ordering};

/// A thread-safe counter that hands out frame sequence numbers.
///
/// Numbers start at 0 and wrap from 255 back to 0.
///
/// # Examples
///
/// ```rust
/// use splitflap_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU8,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self {
            inner: AtomicU8::new(0),
        }
    }

    /// Returns the next sequence number and advances the counter.
    ///
    /// `Relaxed` is enough: the value only tags frames and does not publish
    /// other memory.
    pub fn next(&self) -> u8 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the value the next call to [`next`](Self::next) will produce.
    pub fn current(&self) -> u8 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sequence_counter_starts_at_zero() {
        // Arrange
        let counter = SequenceCounter::new();

        // Act
        let first = counter.next();

        // Assert
        assert_eq!(first, 0);
    }

    #[test]
    fn test_sequence_counter_wraps_at_u8_max() {
        // Arrange – start one step before overflow
        let counter = SequenceCounter {
            inner: AtomicU8::new(u8::MAX),
        };

        // Act
        let before_wrap = counter.next();
        let after_wrap = counter.next();

        // Assert
        assert_eq!(before_wrap, u8::MAX);
        assert_eq!(after_wrap, 0, "counter must wrap to 0 after u8::MAX");
    }

    #[test]
    fn test_current_does_not_increment() {
        let counter = SequenceCounter::new();
        counter.next();

        assert_eq!(counter.current(), 1);
        assert_eq!(counter.next(), 1);
    }

    #[test]
    fn test_sequence_counter_hands_out_distinct_values_across_threads() {
        // Arrange – fewer than 256 draws in total so no wrap can collide
        let counter = Arc::new(SequenceCounter::new());

        // Act
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || (0..50).map(|_| c.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u8> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 200);
    }
}
