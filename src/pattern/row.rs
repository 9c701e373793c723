//! # Row Selection
//!
//! Picks the row the machine needs for its next pass. The controller reads
//! needles in the order the carriage travels, so when the carriage rests on
//! the left (next pass moves left to right) the row is reversed.

use crate::bitmap::Bitmap;
use crate::knitting::CarriageSide;

/// Extract row `row_number` (row 0 = bottom) ordered for a carriage resting
/// on `side`.
///
/// Returns `None` when `row_number` is outside the pattern; callers clamp
/// before asking. The returned row is always a fresh copy.
pub fn select_row(pattern: &Bitmap, row_number: usize, side: CarriageSide) -> Option<Vec<u8>> {
    let mut row = pattern.row(row_number)?.to_vec();
    if side == CarriageSide::Left {
        row.reverse();
    }
    Some(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern() -> Bitmap {
        Bitmap::from_rows(&[&[1, 1, 0, 0, 0], &[0, 0, 0, 1, 0]])
    }

    #[test]
    fn test_right_side_keeps_order() {
        assert_eq!(
            select_row(&pattern(), 0, CarriageSide::Right),
            Some(vec![1, 1, 0, 0, 0])
        );
    }

    #[test]
    fn test_left_side_reverses() {
        let p = pattern();
        for r in 0..p.height {
            let mut right = select_row(&p, r, CarriageSide::Right).unwrap();
            right.reverse();
            assert_eq!(select_row(&p, r, CarriageSide::Left), Some(right));
        }
    }

    #[test]
    fn test_out_of_range() {
        assert_eq!(select_row(&pattern(), 2, CarriageSide::Right), None);
        assert_eq!(select_row(&Bitmap::empty(), 0, CarriageSide::Left), None);
    }

    #[test]
    fn test_returned_row_does_not_alias() {
        let p = pattern();
        let mut row = select_row(&p, 1, CarriageSide::Right).unwrap();
        row[0] = 9;
        assert_eq!(p.row(1), Some(&[0u8, 0, 0, 1, 0][..]));
    }
}
