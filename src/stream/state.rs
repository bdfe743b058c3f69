//! Per-stream state component (spec §4.F "Per-stream state component").

#[derive(Debug, Clone, Default)]
pub struct StreamState {
    pub is_tool_call_in_progress: bool,
    pub has_emitted_content: bool,
    pub current_tool_name: Option<String>,
    pub chunk_count: u64,
    pub stream_ended: bool,
    pub done_sent: bool,
    /// §8 "Exactly-one finish": tracks whether a `finish_reason` has already
    /// been emitted on this stream so a second one is never written.
    pub finish_emitted: bool,
}

impl StreamState {
    pub fn new() -> Self {
        StreamState::default()
    }

    pub fn record_chunk(&mut self) {
        self.chunk_count += 1;
    }

    pub fn start_tool_call(&mut self, name: impl Into<String>) {
        self.is_tool_call_in_progress = true;
        self.current_tool_name = Some(name.into());
    }

    pub fn finish_tool_call(&mut self) {
        self.is_tool_call_in_progress = false;
        self.current_tool_name = None;
    }

    /// Idempotent: a second `end()` is a no-op rather than re-emitting a
    /// terminator.
    pub fn end(&mut self) -> bool {
        if self.stream_ended {
            return false;
        }
        self.stream_ended = true;
        true
    }

    pub fn mark_done_sent(&mut self) -> bool {
        if self.done_sent {
            return false;
        }
        self.done_sent = true;
        true
    }

    pub fn mark_finish_emitted(&mut self) -> bool {
        if self.finish_emitted {
            return false;
        }
        self.finish_emitted = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_is_idempotent() {
        let mut s = StreamState::new();
        assert!(s.end());
        assert!(!s.end());
    }

    #[test]
    fn done_sent_fires_once() {
        let mut s = StreamState::new();
        assert!(s.mark_done_sent());
        assert!(!s.mark_done_sent());
    }

    #[test]
    fn finish_emitted_fires_once() {
        let mut s = StreamState::new();
        assert!(s.mark_finish_emitted());
        assert!(!s.mark_finish_emitted());
    }

    #[test]
    fn tool_call_lifecycle() {
        let mut s = StreamState::new();
        s.start_tool_call("search");
        assert!(s.is_tool_call_in_progress);
        assert_eq!(s.current_tool_name.as_deref(), Some("search"));
        s.finish_tool_call();
        assert!(!s.is_tool_call_in_progress);
        assert!(s.current_tool_name.is_none());
    }
}
