//! Accumulation buffer shared between delta ingestion and the flush ticker.

use parking_lot::Mutex;

/// Text accumulated for one streaming attempt.
///
/// Ingestion appends deltas while the flusher takes snapshots; the lock is
/// held only for the append or the snapshot itself, never across a transport
/// edit.
#[derive(Default)]
pub struct ResponseBuffer {
    state: Mutex<BufferState>,
}

#[derive(Default)]
struct BufferState {
    text: String,
    flushed_len: usize,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta to the accumulated text.
    pub fn append(&self, delta: &str) {
        self.state.lock().text.push_str(delta);
    }

    /// Snapshot for a periodic flush.
    ///
    /// Returns the full text so far when it grew since the last snapshot,
    /// `None` when nothing changed. Within one attempt the text is
    /// append-only, so successive snapshots are strict extensions of each
    /// other.
    pub fn snapshot_if_changed(&self) -> Option<String> {
        let mut state = self.state.lock();
        if state.text.len() == state.flushed_len {
            return None;
        }
        state.flushed_len = state.text.len();
        Some(state.text.clone())
    }

    /// The complete accumulated text, marked as flushed.
    pub fn take_final(&self) -> String {
        let mut state = self.state.lock();
        state.flushed_len = state.text.len();
        state.text.clone()
    }

    /// Discard everything accumulated so far. Used before a retry attempt so
    /// the fresh stream starts from an empty buffer.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.text.clear();
        state.flushed_len = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().text.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_only_when_grown() {
        let buffer = ResponseBuffer::new();
        assert!(buffer.snapshot_if_changed().is_none());

        buffer.append("Hel");
        assert_eq!(buffer.snapshot_if_changed().as_deref(), Some("Hel"));
        assert!(buffer.snapshot_if_changed().is_none());

        buffer.append("lo");
        assert_eq!(buffer.snapshot_if_changed().as_deref(), Some("Hello"));
    }

    #[test]
    fn test_snapshots_are_prefix_monotone() {
        let buffer = ResponseBuffer::new();
        let mut snapshots = Vec::new();

        for delta in ["Hel", "lo, ", "wor", "ld"] {
            buffer.append(delta);
            if let Some(snapshot) = buffer.snapshot_if_changed() {
                snapshots.push(snapshot);
            }
        }

        for pair in snapshots.windows(2) {
            assert!(pair[1].starts_with(&pair[0]));
            assert!(pair[1].len() > pair[0].len());
        }
    }

    #[test]
    fn test_take_final_returns_everything() {
        let buffer = ResponseBuffer::new();
        buffer.append("Hel");
        buffer.snapshot_if_changed();
        buffer.append("lo, world");

        assert_eq!(buffer.take_final(), "Hello, world");
        // Already flushed; a ticker firing late sees no change.
        assert!(buffer.snapshot_if_changed().is_none());
    }

    #[test]
    fn test_reset_clears_text_and_watermark() {
        let buffer = ResponseBuffer::new();
        buffer.append("attempt one");
        buffer.snapshot_if_changed();

        buffer.reset();
        assert!(buffer.is_empty());
        assert!(buffer.snapshot_if_changed().is_none());

        buffer.append("two");
        assert_eq!(buffer.snapshot_if_changed().as_deref(), Some("two"));
    }
}
