//! Access key validation: format, issuing region and Modulo-11 check digit.
//!
//! Every recognizer output goes through [`validate_key`] before it can become a
//! [`AccessKey`]. The three gates run in order and the first failure wins:
//!
//! 1. exactly 44 ASCII digits, else `malformed`
//! 2. two-digit prefix in the fixed region set, else `invalid region`
//! 3. Modulo-11 over digits 0..43 equals digit 43, else `checksum mismatch`
//!
//! Pure and allocation-free apart from the returned key.

use thiserror::Error;

use crate::models::access_key::{AccessKey, ACCESS_KEY_BODY_LEN, ACCESS_KEY_LEN};

/// Issuing region prefixes accepted on an access key.
pub const VALID_REGION_CODES: [&str; 27] = [
    "11", "12", "13", "14", "15", "16", "17", // North
    "21", "22", "23", "24", "25", "26", "27", "28", "29", // Northeast
    "31", "32", "33", "35", // Southeast
    "41", "42", "43", // South
    "50", "51", "52", "53", // Center-West
];

/// Why a candidate string is not an access key.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRejection {
    #[error("malformed: expected 44 digits, got {length} characters")]
    Malformed { length: usize },

    #[error("invalid region: prefix {code:?} is not an issuing region")]
    InvalidRegion { code: [u8; 2] },

    #[error("checksum mismatch: expected check digit {expected}, found {actual}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

impl KeyRejection {
    /// Stable short reason: "malformed", "invalid region" or "checksum mismatch".
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "malformed",
            Self::InvalidRegion { .. } => "invalid region",
            Self::ChecksumMismatch { .. } => "checksum mismatch",
        }
    }
}

/// Weight applied to body digit `position` (0..43).
///
/// Reading right to left the weights run 2..=9 and wrap, which left to right
/// yields the cycle `4,3,2,9,8,7,6,5` starting at position 0.
pub fn weight_at(position: usize) -> u32 {
    2 + ((ACCESS_KEY_BODY_LEN - 1 - position) % 8) as u32
}

/// Weighted digit sum of a 43-digit body, mod 11.
///
/// Returns `None` unless `body` is exactly 43 ASCII digits.
pub fn checksum_remainder(body: &str) -> Option<u32> {
    let bytes = body.as_bytes();
    if bytes.len() != ACCESS_KEY_BODY_LEN || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let sum: u32 = bytes
        .iter()
        .enumerate()
        .map(|(i, b)| u32::from(b - b'0') * weight_at(i))
        .sum();
    Some(sum % 11)
}

/// Modulo-11 check digit for a 43-digit body: 0 when the remainder is 0 or 1,
/// otherwise `11 - remainder`.
pub fn compute_check_digit(body: &str) -> Option<u8> {
    checksum_remainder(body).map(check_digit_from_remainder)
}

fn check_digit_from_remainder(remainder: u32) -> u8 {
    if remainder < 2 {
        0
    } else {
        (11 - remainder) as u8
    }
}

pub fn is_valid_region(code: &str) -> bool {
    VALID_REGION_CODES.contains(&code)
}

/// Validate a candidate and wrap it as an [`AccessKey`].
pub fn validate_key(candidate: &str) -> Result<AccessKey, KeyRejection> {
    let bytes = candidate.as_bytes();
    if bytes.len() != ACCESS_KEY_LEN || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(KeyRejection::Malformed {
            length: candidate.chars().count(),
        });
    }

    // All-ASCII from here on, so byte slicing is char slicing.
    let region = &candidate[..2];
    if !is_valid_region(region) {
        return Err(KeyRejection::InvalidRegion {
            code: [bytes[0], bytes[1]],
        });
    }

    let body = &candidate[..ACCESS_KEY_BODY_LEN];
    let expected = compute_check_digit(body).ok_or(KeyRejection::Malformed {
        length: candidate.len(),
    })?;
    let actual = bytes[ACCESS_KEY_BODY_LEN] - b'0';
    if expected != actual {
        return Err(KeyRejection::ChecksumMismatch { expected, actual });
    }

    Ok(AccessKey::from_validated(candidate))
}

/// Keep only ASCII digits. Recognizer output is normalised with this before
/// any key search.
pub fn strip_non_digits(text: &str) -> String {
    text.chars().filter(char::is_ascii_digit).collect()
}
