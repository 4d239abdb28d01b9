//! Class code to glyph table for the character model.
//!
//! The table is loaded once at start-up and shared read-only. Every class the
//! OCR model can emit must have an entry; a code outside the table is a
//! configuration error, never silently dropped.

use anyhow::{bail, Context, Result};
use std::path::Path;
use thiserror::Error;

/// Persian plate alphabet in the OCR model's class order: digits first, then
/// the letters used on Iranian plates.
const PERSIAN_PLATE_GLYPHS: &[&str] = &[
    "0", "1", "2", "3", "4", "5", "6", "7", "8", "9", //
    "ا", "ب", "د", "س", "ش", "ف", "ق", "ک", "ل", "م", "ن", "و", "ه", "ی", "ع", "غ", //
    "ز", "ر", "ط", "ظ", "ت", "ث", "ح", "خ", "پ", "چ", "ژ", "ج", "ذ", "لا", "ص", "ض",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CharsetError {
    #[error("character model emitted class {code} but the glyph table has only {table_len} entries")]
    UnmappedCode { code: usize, table_len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterMap {
    glyphs: Vec<String>,
}

impl CharacterMap {
    pub fn new(glyphs: Vec<String>) -> Result<Self> {
        if glyphs.is_empty() {
            bail!("glyph table is empty");
        }
        if let Some(index) = glyphs.iter().position(|g| g.trim().is_empty()) {
            bail!("glyph table entry {} is blank", index);
        }
        Ok(Self { glyphs })
    }

    /// Built-in table matching the Persian plate OCR model
    pub fn persian() -> Self {
        Self {
            glyphs: PERSIAN_PLATE_GLYPHS.iter().map(|g| g.to_string()).collect(),
        }
    }

    /// One glyph per line; line N (from zero) is class N. Trailing blank
    /// lines are ignored, a blank line inside the table is an error.
    pub fn parse(text: &str) -> Result<Self> {
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        let used = lines
            .iter()
            .rposition(|line| !line.is_empty())
            .map_or(0, |last| last + 1);

        let glyphs = lines[..used]
            .iter()
            .enumerate()
            .map(|(class, line)| -> Result<String> {
                if line.is_empty() {
                    bail!("line {} (class {}) is blank", class + 1, class);
                }
                Ok(line.to_string())
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(glyphs)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read glyph table {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid glyph table {}", path.display()))
    }

    pub fn glyph(&self, code: usize) -> Result<&str, CharsetError> {
        self.glyphs
            .get(code)
            .map(String::as_str)
            .ok_or(CharsetError::UnmappedCode {
                code,
                table_len: self.glyphs.len(),
            })
    }

    /// Class code of a glyph; used to build fixtures and to validate tables
    pub fn code_of(&self, glyph: &str) -> Option<usize> {
        self.glyphs.iter().position(|g| g == glyph)
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }
}

impl Default for CharacterMap {
    fn default() -> Self {
        Self::persian()
    }
}
