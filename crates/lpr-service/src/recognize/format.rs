//! Display format of a plate: a template that reorders the spatially sorted
//! glyphs and inserts fixed text between them.
//!
//! `{i}` is replaced by glyph `i` (0-based, in left-to-right order); any other
//! text is copied verbatim. The default renders an Iranian plate as
//! region digits, the literal `ایران`, the three-digit serial, the letter and
//! the two leading digits.

use anyhow::{anyhow, bail, Result};
use std::fmt;

pub const DEFAULT_PLATE_TEMPLATE: &str = "{6}{7}ایران{3}{4}{5}{2}{0}{1}";

pub const DEFAULT_GLYPH_COUNT: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Glyph(usize),
    Literal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlateFormat {
    template: String,
    segments: Vec<Segment>,
    glyph_count: usize,
}

impl PlateFormat {
    pub fn parse(template: &str, glyph_count: usize) -> Result<Self> {
        if glyph_count == 0 {
            bail!("plate glyph count must be greater than 0");
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut index = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(d) => index.push(d),
                            None => bail!("unterminated '{{' in plate template '{}'", template),
                        }
                    }
                    let index: usize = index.trim().parse().map_err(|_| {
                        anyhow!("'{{{}}}' is not a glyph index in plate template", index)
                    })?;
                    if index >= glyph_count {
                        bail!(
                            "plate template references glyph {} but plates have {} glyphs",
                            index,
                            glyph_count
                        );
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Glyph(index));
                }
                '}' => bail!("unmatched '}}' in plate template '{}'", template),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        if !segments.iter().any(|s| matches!(s, Segment::Glyph(_))) {
            bail!("plate template '{}' does not reference any glyph", template);
        }

        Ok(Self {
            template: template.to_string(),
            segments,
            glyph_count,
        })
    }

    /// Number of glyphs a plate must have for this format to apply
    pub fn glyph_count(&self) -> usize {
        self.glyph_count
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Render sorted glyphs. Callers guarantee `glyphs.len() == glyph_count()`.
    pub fn format<S: AsRef<str>>(&self, glyphs: &[S]) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Glyph(i) => {
                    if let Some(glyph) = glyphs.get(*i) {
                        out.push_str(glyph.as_ref());
                    }
                }
                Segment::Literal(text) => out.push_str(text),
            }
        }
        out
    }
}

impl Default for PlateFormat {
    fn default() -> Self {
        Self {
            template: DEFAULT_PLATE_TEMPLATE.to_string(),
            segments: vec![
                Segment::Glyph(6),
                Segment::Glyph(7),
                Segment::Literal("ایران".to_string()),
                Segment::Glyph(3),
                Segment::Glyph(4),
                Segment::Glyph(5),
                Segment::Glyph(2),
                Segment::Glyph(0),
                Segment::Glyph(1),
            ],
            glyph_count: DEFAULT_GLYPH_COUNT,
        }
    }
}

impl fmt::Display for PlateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}
