use super::charset::{CharacterMap, CharsetError};
use super::format::PlateFormat;
use common::detections::Detection;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Canonical display string of a plate; the unit of dedup and persistence
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormattedPlate(String);

impl FormattedPlate {
    pub fn new(plate: impl Into<String>) -> Self {
        Self(plate.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for FormattedPlate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FormattedPlate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Result of reading one cropped plate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconstruction {
    Candidate(FormattedPlate),
    /// Under- or over-segmented; no partial plate is ever produced
    Rejected { found: usize, expected: usize },
}

impl Reconstruction {
    pub fn candidate(&self) -> Option<&FormattedPlate> {
        match self {
            Reconstruction::Candidate(plate) => Some(plate),
            Reconstruction::Rejected { .. } => None,
        }
    }
}

/// Turns the character model's unordered boxes into a formatted plate
#[derive(Debug, Clone)]
pub struct PlateReconstructor {
    charset: Arc<CharacterMap>,
    format: PlateFormat,
}

impl PlateReconstructor {
    pub fn new(charset: Arc<CharacterMap>, format: PlateFormat) -> Self {
        Self { charset, format }
    }

    pub fn charset(&self) -> &CharacterMap {
        &self.charset
    }

    pub fn format(&self) -> &PlateFormat {
        &self.format
    }

    pub fn reconstruct(&self, detections: &[Detection]) -> Result<Reconstruction, CharsetError> {
        let mut ordered: Vec<&Detection> = detections.iter().collect();
        ordered.sort_by(|a, b| reading_order(a, b));

        let glyphs = ordered
            .iter()
            .map(|d| self.charset.glyph(d.class_id))
            .collect::<Result<Vec<_>, _>>()?;

        let expected = self.format.glyph_count();
        if glyphs.len() != expected {
            return Ok(Reconstruction::Rejected {
                found: glyphs.len(),
                expected,
            });
        }

        Ok(Reconstruction::Candidate(FormattedPlate(
            self.format.format(&glyphs),
        )))
    }
}

/// Left edge ascending; ties broken on class and vertical position so the
/// order never depends on the order the model listed its boxes in.
fn reading_order(a: &Detection, b: &Detection) -> Ordering {
    a.bbox
        .x1
        .total_cmp(&b.bbox.x1)
        .then_with(|| a.class_id.cmp(&b.class_id))
        .then_with(|| a.bbox.y1.total_cmp(&b.bbox.y1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::detections::BoundingBox;

    fn reconstructor() -> PlateReconstructor {
        PlateReconstructor::new(Arc::new(CharacterMap::persian()), PlateFormat::default())
    }

    fn char_at(map: &CharacterMap, glyph: &str, x: f32) -> Detection {
        let code = map.code_of(glyph).unwrap();
        Detection::new(BoundingBox::new(x, 5.0, x + 8.0, 30.0), 0.9, code)
    }

    fn plate_chars() -> Vec<Detection> {
        let map = CharacterMap::persian();
        vec![
            char_at(&map, "ث", 50.0),
            char_at(&map, "1", 10.0),
            char_at(&map, "2", 30.0),
            char_at(&map, "3", 80.0),
            char_at(&map, "4", 100.0),
            char_at(&map, "5", 120.0),
            char_at(&map, "6", 150.0),
            char_at(&map, "7", 170.0),
        ]
    }

    #[test]
    fn test_sorts_left_to_right_then_formats() {
        let result = reconstructor().reconstruct(&plate_chars()).unwrap();
        assert_eq!(
            result,
            Reconstruction::Candidate(FormattedPlate::new("67ایران345ث12"))
        );
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let reconstructor = reconstructor();
        let expected = reconstructor.reconstruct(&plate_chars()).unwrap();

        let mut reversed = plate_chars();
        reversed.reverse();
        assert_eq!(reconstructor.reconstruct(&reversed).unwrap(), expected);

        let mut rotated = plate_chars();
        rotated.rotate_left(3);
        assert_eq!(reconstructor.reconstruct(&rotated).unwrap(), expected);
    }

    #[test]
    fn test_rejects_wrong_counts() {
        let reconstructor = reconstructor();
        let all = plate_chars();

        for count in [0, 1, 7] {
            assert_eq!(
                reconstructor.reconstruct(&all[..count]).unwrap(),
                Reconstruction::Rejected {
                    found: count,
                    expected: 8
                }
            );
        }

        let mut noisy = plate_chars();
        noisy.push(char_at(&CharacterMap::persian(), "9", 190.0));
        assert_eq!(
            reconstructor.reconstruct(&noisy).unwrap(),
            Reconstruction::Rejected {
                found: 9,
                expected: 8
            }
        );
    }

    #[test]
    fn test_unmapped_code_is_configuration_error() {
        let mut chars = plate_chars();
        chars[0].class_id = 99;
        assert!(matches!(
            reconstructor().reconstruct(&chars),
            Err(CharsetError::UnmappedCode { code: 99, .. })
        ));
    }
}
