// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Mapping of a span of the logical file onto per-part plaintext ranges.

use crate::{
    part::{validate_parts, Part, ReadSpan},
    Error, Result,
};

/// Inclusive plaintext range `[start, end]` within a single part.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    /// Index of the part in the file's part list.
    pub part_no: usize,
    /// First byte, relative to the start of the part.
    pub start: u64,
    /// Last byte (inclusive), relative to the start of the part.
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// A range always covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Splits the inclusive span `[start, end]` of the logical file into one range per part it
/// touches, given the uniform decrypted size of a non-final part.
///
/// Returns an empty plan when `start > end` or `part_size == 0`.
pub fn plan_ranges(start: u64, end: u64, part_size: u64) -> Vec<ByteRange> {
    if start > end || part_size == 0 {
        return Vec::new();
    }

    let first_part = start / part_size;
    let last_part = end / part_size;

    (first_part..=last_part)
        .map(|part| {
            let part_base = part * part_size;
            ByteRange {
                part_no: part as usize,
                start: start.saturating_sub(part_base),
                end: (part_size - 1).min(end - part_base),
            }
        })
        .collect()
}

/// Plans `span` against the actual part list: validates the parts, checks the span lies inside
/// the file and clips each range to its part's real decrypted size.
pub fn plan_for_parts(span: &ReadSpan, parts: &[Part]) -> Result<Vec<ByteRange>> {
    let file_size = validate_parts(parts)?;
    if span.end() >= file_size {
        return Err(Error::InvalidSpan(format!(
            "span [{}, {}] is outside a file of {file_size} bytes",
            span.start(),
            span.end()
        )));
    }

    let stride = parts[0].decrypted_size;
    let mut ranges = plan_ranges(span.start(), span.end(), stride);
    for range in ranges.iter_mut() {
        let part = parts.get(range.part_no).ok_or_else(|| {
            Error::InvalidParts(format!("plan refers to missing part {}", range.part_no))
        })?;
        range.end = range.end.min(part.decrypted_size - 1);
    }
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cipher::encrypted_size, part::Salt};

    fn parts(sizes: &[u64]) -> Vec<Part> {
        sizes
            .iter()
            .enumerate()
            .map(|(part_no, &decrypted_size)| Part {
                part_no,
                id: part_no as i64,
                decrypted_size,
                size: encrypted_size(decrypted_size),
                salt: Salt::random(),
            })
            .collect()
    }

    #[test]
    fn span_within_a_single_part() {
        assert_eq!(
            plan_ranges(10, 20, 1000),
            vec![ByteRange {
                part_no: 0,
                start: 10,
                end: 20
            }]
        );
    }

    #[test]
    fn span_crossing_one_boundary() {
        assert_eq!(
            plan_ranges(95, 105, 100),
            vec![
                ByteRange {
                    part_no: 0,
                    start: 95,
                    end: 99
                },
                ByteRange {
                    part_no: 1,
                    start: 0,
                    end: 5
                },
            ]
        );
    }

    #[test]
    fn single_byte_spans() {
        for offset in [0, 99, 100, 101, 250] {
            let ranges = plan_ranges(offset, offset, 100);
            assert_eq!(ranges.len(), 1);
            assert_eq!(ranges[0].len(), 1);
            assert_eq!(ranges[0].part_no as u64, offset / 100);
        }
    }

    #[test]
    fn degenerate_inputs_give_empty_plans() {
        assert!(plan_ranges(5, 4, 100).is_empty());
        assert!(plan_ranges(0, 4, 0).is_empty());
    }

    // Every byte of [start, end] must be covered exactly once, in order.
    #[test]
    fn plans_cover_spans_without_gaps_or_overlaps() {
        for part_size in [1u64, 2, 3, 7, 16] {
            let file_size = part_size * 5 + 2;
            for start in 0..file_size {
                for end in start..file_size {
                    let ranges = plan_ranges(start, end, part_size);
                    let covered: Vec<u64> = ranges
                        .iter()
                        .flat_map(|r| {
                            assert!(r.start <= r.end && r.end < part_size);
                            let base = r.part_no as u64 * part_size;
                            (r.start..=r.end).map(move |offset| base + offset)
                        })
                        .collect();
                    let expected: Vec<u64> = (start..=end).collect();
                    assert_eq!(covered, expected, "size {part_size} span [{start}, {end}]");
                    assert!(ranges.windows(2).all(|w| w[1].part_no == w[0].part_no + 1));
                }
            }
        }
    }

    #[test]
    fn final_part_is_clipped_to_its_real_size() -> Result<()> {
        let parts = parts(&[100, 100, 30]);
        let ranges = plan_for_parts(&ReadSpan::new(150, 229)?, &parts)?;
        assert_eq!(
            ranges,
            vec![
                ByteRange {
                    part_no: 1,
                    start: 50,
                    end: 99
                },
                ByteRange {
                    part_no: 2,
                    start: 0,
                    end: 29
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn spans_past_the_end_of_file_are_rejected() -> Result<()> {
        let parts = parts(&[100, 30]);
        assert!(matches!(
            plan_for_parts(&ReadSpan::new(120, 130)?, &parts),
            Err(Error::InvalidSpan(_))
        ));
        assert_eq!(plan_for_parts(&ReadSpan::new(0, 129)?, &parts)?.len(), 2);
        Ok(())
    }
}
