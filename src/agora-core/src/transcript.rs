//! Append-only debate transcript.
//!
//! The transcript is the only memory the participants share: it is rendered to
//! text and included in every prompt. Rendering for prompts can be bounded by a
//! character budget so long debates do not grow the context without limit.

use serde::{Deserialize, Serialize};

use crate::scoring::Side;

/// What a transcript entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Topic and stance declarations. Always kept in prompt context.
    Preamble,
    Argument { round: u32, side: Side },
    Score { round: u32, side: Side },
    Verdict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub kind: EntryKind,
    /// Rendered block, including its trailing newline(s).
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block. Returns the appended entry.
    pub fn append(&mut self, kind: EntryKind, text: impl Into<String>) -> &TranscriptEntry {
        self.entries.push(TranscriptEntry {
            kind,
            text: text.into(),
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The full transcript as plain text.
    pub fn render(&self) -> String {
        self.entries.iter().map(|e| e.text.as_str()).collect()
    }

    /// The transcript as prompt context, bounded by `budget` characters.
    ///
    /// Preamble entries are always kept. The remaining budget is filled with
    /// the newest entries; anything older is replaced by one omission marker.
    /// Entries are never cut mid-way, and relative order is preserved.
    pub fn render_context(&self, budget: Option<usize>) -> String {
        let Some(budget) = budget else {
            return self.render();
        };

        let char_len = |e: &TranscriptEntry| e.text.chars().count();
        let preamble_len: usize = self
            .entries
            .iter()
            .filter(|e| e.kind == EntryKind::Preamble)
            .map(char_len)
            .sum();

        let mut remaining = budget.saturating_sub(preamble_len);
        let mut keep: Vec<bool> = self
            .entries
            .iter()
            .map(|e| e.kind == EntryKind::Preamble)
            .collect();
        for (i, entry) in self.entries.iter().enumerate().rev() {
            if keep[i] {
                continue;
            }
            let len = char_len(entry);
            if len > remaining {
                break;
            }
            remaining -= len;
            keep[i] = true;
        }

        let mut out = String::new();
        let mut omitted = 0usize;
        let mut marker_written = false;
        for (entry, kept) in self.entries.iter().zip(&keep) {
            if *kept {
                if omitted > 0 && !marker_written {
                    out.push_str(&omission_marker(omitted));
                    marker_written = true;
                }
                out.push_str(&entry.text);
            } else {
                omitted += 1;
            }
        }
        if omitted > 0 && !marker_written {
            out.push_str(&omission_marker(omitted));
        }
        out
    }
}

fn omission_marker(count: usize) -> String {
    format!("[... {} earlier entries omitted ...]\n\n", count)
}
