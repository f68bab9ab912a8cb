//! Source locations for fragments.

use serde::{Deserialize, Serialize};

/// Location of a fragment in a source file.
///
/// Lines are 1-indexed; offsets are byte offsets from file start, end
/// exclusive. Ordering is deterministic: (file, start_line, start_offset).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    /// File path (workspace-relative).
    pub file: String,
    /// First line covered (1-indexed).
    pub start_line: u32,
    /// Last line covered (1-indexed, inclusive).
    pub end_line: u32,
    /// Byte offset from file start.
    pub start_offset: u32,
    /// Byte offset end, exclusive.
    pub end_offset: u32,
}

impl Location {
    /// Create a location spanning the given lines and offsets.
    pub fn new(
        file: impl Into<String>,
        start_line: u32,
        end_line: u32,
        start_offset: u32,
        end_offset: u32,
    ) -> Self {
        Location {
            file: file.into(),
            start_line,
            end_line,
            start_offset,
            end_offset,
        }
    }

    /// Single-line location with synthetic offsets derived from the line.
    pub fn line(file: impl Into<String>, line: u32) -> Self {
        Location::new(file, line, line, line * 1000, line * 1000 + 999)
    }

    /// Whether this location fully contains `other`.
    ///
    /// Containment requires the same file and an offset range that covers
    /// the other range entirely.
    pub fn subsumes(&self, other: &Location) -> bool {
        self.file == other.file
            && self.start_offset <= other.start_offset
            && self.end_offset >= other.end_offset
    }

    fn sort_key(&self) -> (&str, u32, u32) {
        (&self.file, self.start_line, self.start_offset)
    }
}

impl PartialOrd for Location {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Location {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsumes_requires_same_file() {
        let outer = Location::new("a.src", 1, 10, 0, 500);
        let inner = Location::new("a.src", 3, 4, 100, 200);
        let elsewhere = Location::new("b.src", 3, 4, 100, 200);
        assert!(outer.subsumes(&inner));
        assert!(!outer.subsumes(&elsewhere));
        assert!(!inner.subsumes(&outer));
    }

    #[test]
    fn subsumes_is_reflexive() {
        let loc = Location::new("a.src", 2, 5, 40, 90);
        assert!(loc.subsumes(&loc));
    }

    #[test]
    fn ordering_is_by_file_then_line() {
        let first = Location::line("a.src", 1);
        let second = Location::line("a.src", 7);
        let other_file = Location::line("b.src", 1);
        assert!(first < second);
        assert!(second < other_file);
    }
}
