//! Group address translation
//!
//! The controller stores each point's group address as a packed integer
//! whose decimal rendering encodes the three KNX segments: a 7-digit
//! zero-padded string split into 3/2/2-digit windows. Translation is
//! one-directional; the address is only ever read from the controller
//! side.

/// Convert a packed address into its hierarchical `main/middle/sub` form.
///
/// `1793` renders as `"0001793"`, splits into `"000"`, `"17"`, `"93"` and
/// becomes `"0/17/93"`.
pub fn to_hierarchical(raw: u32) -> String {
    let padded = format!("{:07}", raw);
    let main = strip_leading_zeros(&padded[0..3]);
    let middle = strip_leading_zeros(&padded[3..5]);
    let sub = strip_leading_zeros(&padded[5..7]);
    format!("{}/{}/{}", main, middle, sub)
}

/// Strip leading zeros from one segment; an all-zero segment stays `"0"`.
fn strip_leading_zeros(segment: &str) -> &str {
    let trimmed = segment.trim_start_matches('0');
    if trimmed.is_empty() {
        "0"
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_stripping() {
        assert_eq!(to_hierarchical(1793), "0/17/93");
        assert_eq!(to_hierarchical(0), "0/0/0");
    }

    #[test]
    fn test_full_width_segments() {
        assert_eq!(to_hierarchical(1234567), "123/45/67");
    }

    #[test]
    fn test_zero_segments_in_the_middle() {
        // "1000005" -> "100", "00", "05"
        assert_eq!(to_hierarchical(1000005), "100/0/5");
    }

    #[test]
    fn test_digits_beyond_seven_are_ignored() {
        // The windows are fixed; a raw value wider than 7 digits loses its
        // trailing digit, matching the controller's packing contract.
        assert_eq!(to_hierarchical(12345678), "123/45/67");
    }
}
