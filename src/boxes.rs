//! Canonical box model and the adapters for the store's two box encodings.
//!
//! The hand detector stores its boxes as JSON text holding corner pairs
//! (`[[[x0, y0], [x1, y1]], ...]`). The object detector stores a flat list of
//! quoted number tokens, four per box, laid out as `[y0, x0, height, width]`
//! and written with single quotes (`"['12', '30', '40', '50']"`). Both decode
//! into [`CanonicalBox`], tagged with where the box came from.

use serde_json::Value;
use thiserror::Error;

/// Corner-pair form of a box: `[[x0, y0], [x1, y1]]`.
pub type CornerPair = [[f64; 2]; 2];

/// Origin of a box, which decides how it is drawn and whether it is submitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// Predicted by the hand detector.
    MachineHand,
    /// Predicted by the object detector.
    MachineObject,
    /// Drawn by the reviewer in this session.
    ReviewerHand,
}

/// Axis-aligned rectangle given by two corners in image pixels.
///
/// Corners keep the order they were decoded or drawn in; use [`min`] and
/// [`max`] when an ordered rectangle is needed.
///
/// [`min`]: CanonicalBox::min
/// [`max`]: CanonicalBox::max
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CanonicalBox {
    pub x0: f64,
    pub x1: f64,
    pub y0: f64,
    pub y1: f64,
    pub provenance: Provenance,
}

impl CanonicalBox {
    pub fn from_corners([[x0, y0], [x1, y1]]: CornerPair, provenance: Provenance) -> Self {
        Self {
            x0,
            x1,
            y0,
            y1,
            provenance,
        }
    }

    pub fn corners(&self) -> CornerPair {
        [[self.x0, self.y0], [self.x1, self.y1]]
    }

    pub fn min(&self) -> (f64, f64) {
        (self.x0.min(self.x1), self.y0.min(self.y1))
    }

    pub fn max(&self) -> (f64, f64) {
        (self.x0.max(self.x1), self.y0.max(self.y1))
    }
}

/// Why a serialized box field could not be decoded.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("hand boxes are not a list of corner pairs: {0}")]
    HandBoxes(#[source] serde_json::Error),

    #[error("object bounds are not a list: {0}")]
    ObjectBoundsSyntax(#[source] serde_json::Error),

    #[error("object bounds contain an unbalanced quote")]
    UnbalancedQuote,

    #[error("object bound token {index} is not a number: {token}")]
    NonNumeric { index: usize, token: String },

    #[error("object bounds hold {len} numbers, which is not a multiple of four")]
    IncompleteGroup { len: usize },
}

/// Decode hand-detector boxes from their embedded JSON text.
///
/// Absent, blank and `null` input all decode to no boxes.
pub fn decode_hand_boxes(raw: Option<&str>) -> Result<Vec<CanonicalBox>, DecodeError> {
    let Some(text) = non_blank(raw) else {
        return Ok(Vec::new());
    };
    let pairs: Option<Vec<CornerPair>> =
        serde_json::from_str(text).map_err(DecodeError::HandBoxes)?;

    Ok(pairs
        .unwrap_or_default()
        .into_iter()
        .map(|pair| CanonicalBox::from_corners(pair, Provenance::MachineHand))
        .collect())
}

/// Decode object-detector bounds from their single-quoted token list.
pub fn decode_object_bounds(raw: Option<&str>) -> Result<Vec<CanonicalBox>, DecodeError> {
    let Some(text) = non_blank(raw) else {
        return Ok(Vec::new());
    };
    let normalized = strip_single_quotes(text)?;
    let tokens: Option<Vec<Value>> =
        serde_json::from_str(&normalized).map_err(DecodeError::ObjectBoundsSyntax)?;

    let numbers = tokens
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(index, token)| {
            numeric_token(token).ok_or_else(|| DecodeError::NonNumeric {
                index,
                token: token.to_string(),
            })
        })
        .collect::<Result<Vec<f64>, _>>()?;

    if numbers.len() % 4 != 0 {
        return Err(DecodeError::IncompleteGroup { len: numbers.len() });
    }

    Ok(numbers
        .chunks_exact(4)
        .map(|group| {
            let (y0, x0, height, width) = (group[0], group[1], group[2], group[3]);
            CanonicalBox {
                x0,
                x1: x0 + width,
                y0,
                y1: y0 + height,
                provenance: Provenance::MachineObject,
            }
        })
        .collect())
}

/// Encode boxes into the corner-pair form the store accepts for `verified_hands`.
pub fn encode_hand_boxes<'a>(boxes: impl IntoIterator<Item = &'a CanonicalBox>) -> Vec<CornerPair> {
    boxes.into_iter().map(CanonicalBox::corners).collect()
}

fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|text| !text.is_empty())
}

/// The object detector quotes its tokens with `'`, which JSON rejects. The
/// tokens are numbers, so the quotes are dropped rather than converted.
fn strip_single_quotes(text: &str) -> Result<String, DecodeError> {
    if text.matches('\'').count() % 2 != 0 {
        return Err(DecodeError::UnbalancedQuote);
    }
    Ok(text.replace('\'', ""))
}

fn numeric_token(token: &Value) -> Option<f64> {
    match token {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hand_boxes_keep_corner_order() {
        let boxes = decode_hand_boxes(Some("[[[1,2],[3,4]], [[9, 8], [7, 6]]]")).unwrap();

        assert_eq!(
            boxes,
            vec![
                CanonicalBox {
                    x0: 1.0,
                    x1: 3.0,
                    y0: 2.0,
                    y1: 4.0,
                    provenance: Provenance::MachineHand,
                },
                CanonicalBox {
                    x0: 9.0,
                    x1: 7.0,
                    y0: 8.0,
                    y1: 6.0,
                    provenance: Provenance::MachineHand,
                },
            ]
        );
    }

    #[test]
    fn missing_hand_boxes_decode_to_nothing() {
        assert!(decode_hand_boxes(None).unwrap().is_empty());
        assert!(decode_hand_boxes(Some("")).unwrap().is_empty());
        assert!(decode_hand_boxes(Some("  ")).unwrap().is_empty());
        assert!(decode_hand_boxes(Some("null")).unwrap().is_empty());
        assert!(decode_hand_boxes(Some("[]")).unwrap().is_empty());
    }

    #[test]
    fn malformed_hand_boxes_are_rejected() {
        assert!(matches!(
            decode_hand_boxes(Some("[[1,2],[3,4]]")),
            Err(DecodeError::HandBoxes(_))
        ));
        assert!(matches!(
            decode_hand_boxes(Some("[[[1,2],[3,4]")),
            Err(DecodeError::HandBoxes(_))
        ));
    }

    #[test]
    fn object_bounds_use_top_left_height_width_layout() {
        let boxes = decode_object_bounds(Some("[0, 0, 10, 20]")).unwrap();

        assert_eq!(
            boxes,
            vec![CanonicalBox {
                x0: 0.0,
                x1: 20.0,
                y0: 0.0,
                y1: 10.0,
                provenance: Provenance::MachineObject,
            }]
        );
    }

    #[test]
    fn object_bounds_accept_single_quoted_tokens() {
        let boxes =
            decode_object_bounds(Some("['12', '30', '40', '50', '1.5', '2', '3', '4']")).unwrap();

        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].corners(), [[30.0, 12.0], [80.0, 52.0]]);
        assert_eq!(boxes[1].corners(), [[2.0, 1.5], [6.0, 4.5]]);
        assert!(boxes.iter().all(|b| b.provenance == Provenance::MachineObject));
    }

    #[test]
    fn object_bounds_accept_double_quoted_tokens() {
        let boxes = decode_object_bounds(Some(r#"["1", "2", "3", "4"]"#)).unwrap();
        assert_eq!(boxes[0].corners(), [[2.0, 1.0], [6.0, 4.0]]);
    }

    #[test]
    fn missing_object_bounds_decode_to_nothing() {
        assert!(decode_object_bounds(None).unwrap().is_empty());
        assert!(decode_object_bounds(Some("")).unwrap().is_empty());
        assert!(decode_object_bounds(Some("[]")).unwrap().is_empty());
    }

    #[test]
    fn partial_object_group_is_an_error() {
        let err = decode_object_bounds(Some("['1', '2', '3', '4', '5']")).unwrap_err();
        assert!(matches!(err, DecodeError::IncompleteGroup { len: 5 }));
    }

    #[test]
    fn non_numeric_object_token_is_an_error() {
        let err = decode_object_bounds(Some(r#"["1", "two", "3", "4"]"#)).unwrap_err();
        assert!(matches!(err, DecodeError::NonNumeric { index: 1, .. }));

        assert!(matches!(
            decode_object_bounds(Some("['a', 'b', 'c', 'd']")),
            Err(DecodeError::ObjectBoundsSyntax(_))
        ));
    }

    #[test]
    fn unbalanced_quote_is_an_error() {
        assert!(matches!(
            decode_object_bounds(Some("['1', '2', '3', 4']")),
            Err(DecodeError::UnbalancedQuote)
        ));
    }

    #[test]
    fn encoding_inverts_hand_box_decoding() {
        let raw = "[[[312.456789,2.5],[3.25,4.125]],[[10.5,20.75],[30.1,40.333333]]]";
        let original: Value = serde_json::from_str(raw).unwrap();

        let boxes = decode_hand_boxes(Some(raw)).unwrap();
        assert_eq!(serde_json::json!(encode_hand_boxes(&boxes)), original);
    }

    #[test]
    fn integer_corners_survive_encoding() {
        let boxes = decode_hand_boxes(Some("[[[1,2],[3,4]],[[1920,1080],[0,7]]]")).unwrap();
        assert_eq!(
            encode_hand_boxes(&boxes),
            vec![[[1.0, 2.0], [3.0, 4.0]], [[1920.0, 1080.0], [0.0, 7.0]]]
        );
    }

    #[test]
    fn min_and_max_order_corners() {
        let b = CanonicalBox::from_corners([[9.0, 2.0], [3.0, 8.0]], Provenance::ReviewerHand);
        assert_eq!(b.min(), (3.0, 2.0));
        assert_eq!(b.max(), (9.0, 8.0));
    }
}
