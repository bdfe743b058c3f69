//! Shared buffer component (spec §4.F "Buffer component").

/// A character buffer with a configurable maximum. Overflow drops from the
/// head, retaining the most recent `max_size` bytes, and logs truncation.
#[derive(Debug, Clone)]
pub struct TextBuffer {
    content: String,
    max_size: usize,
    truncated_count: u64,
}

impl TextBuffer {
    pub fn new(max_size: usize) -> Self {
        TextBuffer { content: String::new(), max_size, truncated_count: 0 }
    }

    pub fn append(&mut self, chunk: &str) {
        self.content.push_str(chunk);
        if self.content.len() > self.max_size {
            let drop_to = self.content.len() - self.max_size;
            let boundary = (drop_to..self.content.len())
                .find(|&i| self.content.is_char_boundary(i))
                .unwrap_or(self.content.len());
            self.content.drain(..boundary);
            self.truncated_count += 1;
            tracing::warn!(max_size = self.max_size, "stream buffer exceeded limit, dropped oldest bytes");
        }
    }

    pub fn get_content(&self) -> &str {
        &self.content
    }

    pub fn clear(&mut self) {
        self.content.clear();
    }

    /// Return and clear the buffered content in one step.
    pub fn extract_and_clear(&mut self) -> String {
        std::mem::take(&mut self.content)
    }

    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            return 0.0;
        }
        self.content.len() as f64 / self.max_size as f64
    }

    pub fn truncated_count(&self) -> u64 {
        self.truncated_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_within_limit_keeps_everything() {
        let mut buf = TextBuffer::new(100);
        buf.append("hello");
        buf.append(" world");
        assert_eq!(buf.get_content(), "hello world");
    }

    #[test]
    fn append_over_limit_drops_from_head() {
        let mut buf = TextBuffer::new(5);
        buf.append("abcdefgh");
        assert_eq!(buf.get_content(), "defgh");
        assert_eq!(buf.truncated_count(), 1);
    }

    #[test]
    fn extract_and_clear_empties_buffer() {
        let mut buf = TextBuffer::new(100);
        buf.append("hi");
        let out = buf.extract_and_clear();
        assert_eq!(out, "hi");
        assert_eq!(buf.get_content(), "");
    }

    #[test]
    fn utilization_reflects_fill_ratio() {
        let mut buf = TextBuffer::new(10);
        buf.append("12345");
        assert!((buf.utilization() - 0.5).abs() < 1e-9);
    }
}
