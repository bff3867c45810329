//! Script mirror
//!
//! The recorded script shown to the operator. Lines generated while
//! recording carry the [`CompoundId`] of the history entry they describe, so
//! undoing that entry retracts exactly that line and redoing it puts the
//! line back where it was.

use crate::history::CompoundId;
use std::collections::HashMap;

/// One line of the script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLine {
    text: String,
    compound: Option<CompoundId>,
}

impl ScriptLine {
    #[inline]
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// History entry this line is paired with, if any
    #[inline]
    #[must_use]
    pub fn compound(&self) -> Option<CompoundId> {
        self.compound
    }
}

/// Textual log paired with edit history entries
#[derive(Debug, Default)]
pub struct ScriptMirror {
    lines: Vec<ScriptLine>,
    recording: bool,
    // Insertion point; `None` appends.
    cursor: Option<usize>,
    retracted: HashMap<CompoundId, (usize, ScriptLine)>,
}

impl ScriptMirror {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    /// Move the insertion point; `None` or a position past the end appends
    pub fn set_cursor(&mut self, cursor: Option<usize>) {
        self.cursor = cursor.filter(|&c| c < self.lines.len());
    }

    #[inline]
    #[must_use]
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Insert a generated line paired with `compound`, returning its index
    pub fn record(&mut self, compound: CompoundId, text: impl Into<String>) -> usize {
        self.insert_at_cursor(ScriptLine {
            text: text.into(),
            compound: Some(compound),
        })
    }

    /// Insert an operator-typed line that no history entry owns
    pub fn insert_text(&mut self, text: impl Into<String>) -> usize {
        self.insert_at_cursor(ScriptLine {
            text: text.into(),
            compound: None,
        })
    }

    fn insert_at_cursor(&mut self, line: ScriptLine) -> usize {
        match self.cursor {
            Some(index) => {
                self.lines.insert(index, line);
                self.cursor = Some(index + 1);
                index
            }
            None => {
                self.lines.push(line);
                self.lines.len() - 1
            }
        }
    }

    /// Remove the line paired with `compound`, remembering where it was
    ///
    /// Returns the index the line occupied, or `None` if no line is paired.
    pub fn retract(&mut self, compound: CompoundId) -> Option<usize> {
        let index = self.position(compound)?;
        let line = self.lines.remove(index);
        if let Some(cursor) = self.cursor {
            if cursor > index {
                self.cursor = Some(cursor - 1);
            }
        }
        self.retracted.insert(compound, (index, line));
        Some(index)
    }

    /// Put a retracted line back at its original index
    pub fn reinsert(&mut self, compound: CompoundId) -> Option<usize> {
        let (index, line) = self.retracted.remove(&compound)?;
        let index = index.min(self.lines.len());
        self.lines.insert(index, line);
        if let Some(cursor) = self.cursor {
            if cursor >= index {
                self.cursor = Some(cursor + 1);
            }
        }
        Some(index)
    }

    /// Drop retracted lines whose compounds left the redo stack
    pub fn forget(&mut self, compounds: &[CompoundId]) {
        for id in compounds {
            self.retracted.remove(id);
        }
    }

    /// Keep the lines of evicted compounds but stop pairing them
    pub fn unpair(&mut self, compounds: &[CompoundId]) {
        for line in &mut self.lines {
            if line.compound.is_some_and(|id| compounds.contains(&id)) {
                line.compound = None;
            }
        }
    }

    /// Index of the line paired with `compound`
    #[must_use]
    pub fn position(&self, compound: CompoundId) -> Option<usize> {
        self.lines.iter().position(|l| l.compound == Some(compound))
    }

    #[must_use]
    pub fn lines(&self) -> &[ScriptLine] {
        &self.lines
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Full script text, lines joined by `\n`
    #[must_use]
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(ScriptLine::text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Replace the content with unpaired lines from `text`
    ///
    /// The recording flag is left as it is.
    pub fn load_text(&mut self, text: &str) {
        self.clear();
        if text.is_empty() {
            return;
        }
        self.lines = text
            .split('\n')
            .map(|l| ScriptLine {
                text: l.to_string(),
                compound: None,
            })
            .collect();
    }

    /// Remove every line and forget retracted ones
    pub fn clear(&mut self) {
        self.lines.clear();
        self.retracted.clear();
        self.cursor = None;
    }
}
