use serde::{Deserialize, Serialize};

/// A source location in the kernel author's file: file ID + byte offset range.
///
/// Spans are produced by the front end that builds the `KernelSpec`; nodes
/// synthesized by the lowering engine carry `Span::dummy()`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    #[serde(default)]
    pub file_id: u16,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(file_id: u16, start: u32, end: u32) -> Self {
        Self {
            file_id,
            start,
            end,
        }
    }

    pub fn dummy() -> Self {
        Self {
            file_id: 0,
            start: 0,
            end: 0,
        }
    }

    pub fn is_dummy(&self) -> bool {
        self.start == 0 && self.end == 0
    }

    /// This span, or `fallback` when this one is a dummy.
    pub fn or(self, fallback: Span) -> Span {
        if self.is_dummy() {
            fallback
        } else {
            self
        }
    }
}
