//! Per-channel bounded ordered log. Append assigns a cursor; range-query
//! replays by cursor. Invariants: cursors strictly increase with append
//! order, size never exceeds capacity, evicted cursors never re-enter.

use std::collections::VecDeque;

use gateway_common::HubMessage;

use crate::cursor::{Cursor, CursorGenerator};

/// Result of a `range` query.
pub struct RangeResult {
    pub messages: Vec<HubMessage>,
    pub last_cursor: Option<Cursor>,
    pub has_more: bool,
    /// True iff `from` was well-formed but older than the oldest retained
    /// cursor - the signal that callers should fall through to the
    /// durable tier.
    pub expired: bool,
}

pub struct RingBuffer {
    capacity: usize,
    messages: VecDeque<HubMessage>,
    generator: CursorGenerator,
    /// Oldest cursor ever evicted from this buffer; used to detect
    /// "expired" even once the buffer has since been refilled past it.
    oldest_evicted: Option<Cursor>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be positive");
        Self { capacity, messages: VecDeque::with_capacity(capacity), generator: CursorGenerator::new(), oldest_evicted: None }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Oldest cursor currently retained, if any.
    pub fn oldest_cursor(&self) -> Option<Cursor> {
        self.messages.front().and_then(|m| Cursor::decode(&m.cursor))
    }

    /// Assigns a cursor, appends at tail, evicting the oldest entry on
    /// overflow. Never awaits - fan-out must not block on this call.
    pub fn append(&mut self, mut message: HubMessage) -> Cursor {
        let cursor = self.generator.next();
        message.cursor = cursor.encode();
        if self.messages.len() >= self.capacity {
            if let Some(evicted) = self.messages.pop_front() {
                if let Some(c) = Cursor::decode(&evicted.cursor) {
                    self.oldest_evicted = Some(match self.oldest_evicted {
                        Some(existing) if existing < c => existing,
                        _ => c,
                    });
                }
            }
        }
        self.messages.push_back(message);
        cursor
    }

    /// Messages with cursor strictly greater than `from`, ascending, up to
    /// `limit`. `from = None` returns from the very start of what's
    /// retained (equivalent to "everything currently buffered").
    pub fn range(&self, from: Option<Cursor>, limit: usize) -> RangeResult {
        // A cursor is expired relative to this buffer iff it is at or
        // before the newest cursor ever evicted - once something has been
        // evicted, the buffer's current oldest retained cursor is always
        // strictly newer than `oldest_evicted`, so this check alone is
        // sufficient without separately consulting `oldest_cursor()`.
        let expired = match from {
            Some(from) => self.oldest_evicted.map_or(false, |evicted| from <= evicted),
            None => false,
        };

        let mut messages = Vec::new();
        let mut has_more = false;
        for msg in self.messages.iter() {
            let Some(cursor) = Cursor::decode(&msg.cursor) else { continue };
            if let Some(from) = from {
                if cursor <= from {
                    continue;
                }
            }
            if messages.len() == limit {
                has_more = true;
                break;
            }
            messages.push(msg.clone());
        }

        let last_cursor = messages.last().and_then(|m| Cursor::decode(&m.cursor));
        RangeResult { messages, last_cursor, has_more, expired }
    }

    /// Most recent `limit` messages, ascending.
    pub fn latest(&self, limit: usize) -> Vec<HubMessage> {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gateway_common::MessageType;

    fn msg() -> HubMessage {
        HubMessage {
            id: uuid::Uuid::new_v4(),
            cursor: String::new(),
            timestamp: Utc::now(),
            channel: "agent:output:a1".to_string(),
            message_type: MessageType::AgentOutputChunk,
            payload: serde_json::json!({}),
            metadata: None,
        }
    }

    #[test]
    fn append_assigns_strictly_increasing_cursors() {
        let mut rb = RingBuffer::new(10);
        let c1 = rb.append(msg());
        let c2 = rb.append(msg());
        let c3 = rb.append(msg());
        assert!(c1 < c2);
        assert!(c2 < c3);
    }

    #[test]
    fn capacity_is_enforced_and_oldest_evicted() {
        let mut rb = RingBuffer::new(2);
        let c1 = rb.append(msg());
        let _c2 = rb.append(msg());
        let _c3 = rb.append(msg());
        assert_eq!(rb.len(), 2);
        assert!(rb.oldest_cursor().unwrap() > c1);
    }

    #[test]
    fn range_returns_only_messages_after_cursor_ascending() {
        let mut rb = RingBuffer::new(10);
        let c1 = rb.append(msg());
        let _c2 = rb.append(msg());
        let _c3 = rb.append(msg());
        let result = rb.range(Some(c1), 100);
        assert_eq!(result.messages.len(), 2);
        assert!(!result.expired);
        assert!(!result.has_more);
    }

    #[test]
    fn range_respects_limit_and_flags_has_more() {
        let mut rb = RingBuffer::new(10);
        for _ in 0..5 {
            rb.append(msg());
        }
        let result = rb.range(None, 2);
        assert_eq!(result.messages.len(), 2);
        assert!(result.has_more);
    }

    #[test]
    fn range_flags_expired_when_cursor_evicted() {
        let mut rb = RingBuffer::new(2);
        let c1 = rb.append(msg());
        let _c2 = rb.append(msg());
        let _c3 = rb.append(msg());
        let _c4 = rb.append(msg());
        let result = rb.range(Some(c1), 100);
        assert!(result.expired);
        assert!(result.messages.is_empty() || result.messages.len() <= 2);
    }

    #[test]
    fn latest_returns_ascending_tail() {
        let mut rb = RingBuffer::new(10);
        for _ in 0..5 {
            rb.append(msg());
        }
        let latest = rb.latest(2);
        assert_eq!(latest.len(), 2);
        let c0 = Cursor::decode(&latest[0].cursor).unwrap();
        let c1 = Cursor::decode(&latest[1].cursor).unwrap();
        assert!(c0 < c1);
    }
}
