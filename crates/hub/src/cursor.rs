//! Opaque, URL-safe resumption tokens encoding `(timestamp_ms, sequence)`.
//!
//! Ordering is lexicographic on the pair; the sequence counter alone is
//! total, the timestamp is advisory. Encoding is independent of
//! channel, so a cursor from one channel is never accidentally comparable
//! to a cursor from another - callers always compare within one ring
//! buffer or event-log channel.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cursor {
    pub timestamp_ms: i64,
    pub sequence: i64,
}

impl Cursor {
    pub fn new(timestamp_ms: i64, sequence: i64) -> Self {
        Self { timestamp_ms, sequence }
    }

    /// Encode as a URL-safe opaque string. Uses a simple fixed-width
    /// hex encoding rather than base64 so the string sorts the same as
    /// the underlying tuple - useful for debugging, not required by the
    /// contract (clients must treat it as opaque).
    pub fn encode(&self) -> String {
        format!("{:016x}-{:016x}", self.timestamp_ms as u64, self.sequence as u64)
    }

    /// Decoding failure (`None`) is distinguishable by callers from
    /// "well-formed but expired" - the latter is a `Cursor` value that
    /// merely compares less than a buffer's oldest retained cursor.
    pub fn decode(s: &str) -> Option<Self> {
        let (ts_hex, seq_hex) = s.split_once('-')?;
        if ts_hex.len() != 16 || seq_hex.len() != 16 {
            return None;
        }
        let timestamp_ms = u64::from_str_radix(ts_hex, 16).ok()? as i64;
        let sequence = u64::from_str_radix(seq_hex, 16).ok()? as i64;
        Some(Self { timestamp_ms, sequence })
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Per-process monotonic source for the sequence half of a cursor. The
/// timestamp half is wall-clock but clamped to never move backwards
/// within this generator's lifetime - a backward NTP step must not make
/// `next()` produce a cursor that sorts before one already handed out,
/// since ordering is lexicographic on `(timestamp_ms, sequence)` and the
/// sequence alone would not save us if the timestamp regressed.
#[derive(Debug, Default)]
pub struct CursorGenerator {
    counter: std::sync::atomic::AtomicI64,
    last_timestamp_ms: std::sync::atomic::AtomicI64,
}

impl CursorGenerator {
    pub fn new() -> Self {
        Self { counter: std::sync::atomic::AtomicI64::new(0), last_timestamp_ms: std::sync::atomic::AtomicI64::new(0) }
    }

    pub fn next(&self) -> Cursor {
        use std::sync::atomic::Ordering;
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        let observed = chrono::Utc::now().timestamp_millis();
        let timestamp_ms = self
            .last_timestamp_ms
            .fetch_max(observed, Ordering::Relaxed)
            .max(observed);
        Cursor::new(timestamp_ms, sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let c = Cursor::new(1_700_000_000_000, 42);
        let encoded = c.encode();
        assert_eq!(Cursor::decode(&encoded), Some(c));
    }

    #[test]
    fn ordering_is_lexicographic_on_the_pair() {
        let a = Cursor::new(100, 5);
        let b = Cursor::new(100, 6);
        let c = Cursor::new(101, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn decode_rejects_malformed_input() {
        for bad in ["", "not-a-cursor", "123-456", "zzzzzzzzzzzzzzzz-0000000000000000"] {
            assert_eq!(Cursor::decode(bad), None, "expected None for {bad:?}");
        }
    }

    #[test]
    fn generator_produces_strictly_increasing_cursors() {
        let gen = CursorGenerator::new();
        let mut prev = gen.next();
        for _ in 0..100 {
            let next = gen.next();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn generator_clamps_timestamp_against_backward_clock_steps() {
        let gen = CursorGenerator::new();
        gen.last_timestamp_ms.store(1_700_000_000_000, std::sync::atomic::Ordering::Relaxed);
        let c = gen.next();
        assert!(c.timestamp_ms >= 1_700_000_000_000);
    }
}
