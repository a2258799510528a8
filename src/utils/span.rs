//! Source location tracking

use serde::{Deserialize, Serialize};

/// A span represents a range in the source code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    /// Start byte offset
    #[serde(default)]
    pub start: usize,
    /// End byte offset (exclusive)
    #[serde(default)]
    pub end: usize,
    /// File ID
    #[serde(default)]
    pub file_id: usize,
}

impl Span {
    /// Create a new span
    pub fn new(start: usize, end: usize, file_id: usize) -> Self {
        Self { start, end, file_id }
    }

    /// Create a dummy span (for testing and synthesized nodes)
    pub fn dummy() -> Self {
        Self { start: 0, end: 0, file_id: 0 }
    }

    /// Merge two spans
    pub fn merge(&self, other: &Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            file_id: self.file_id,
        }
    }

    /// The zero-width span at the end of this one (scope exits land here)
    pub fn end_point(&self) -> Span {
        Span { start: self.end, end: self.end, file_id: self.file_id }
    }

    /// Get the length of the span
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Check if the span is empty
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl Default for Span {
    fn default() -> Self {
        Self::dummy()
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}..{}", self.file_id, self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_end_point() {
        let a = Span::new(4, 10, 0);
        let b = Span::new(8, 20, 0);
        let merged = a.merge(&b);
        assert_eq!(merged, Span::new(4, 20, 0));
        assert_eq!(merged.len(), 16);
        assert!(merged.end_point().is_empty());
        assert_eq!(merged.end_point().start, 20);
    }
}
