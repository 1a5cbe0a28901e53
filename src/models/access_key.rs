use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::pipeline::extraction::key_validator::{validate_key, KeyRejection};

/// Number of digits in a fiscal document access key.
pub const ACCESS_KEY_LEN: usize = 44;

/// Digits covered by the check digit.
pub const ACCESS_KEY_BODY_LEN: usize = ACCESS_KEY_LEN - 1;

/// Zero-based span of the document (invoice) number inside the key.
pub const DOCUMENT_NUMBER_SPAN: Range<usize> = 25..34;

/// A 44-digit access key that passed format, region and Modulo-11 checks.
///
/// Only obtainable through [`validate_key`] (or `str::parse`), so holding one
/// means the check digit matched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessKey(String);

impl AccessKey {
    /// Wrap digits the validator has already accepted.
    pub(crate) fn from_validated(digits: &str) -> Self {
        Self(digits.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-digit issuing region prefix.
    pub fn region_code(&self) -> &str {
        &self.0[..2]
    }

    /// The 43 digits the check digit is computed over.
    pub fn body(&self) -> &str {
        &self.0[..ACCESS_KEY_BODY_LEN]
    }

    pub fn check_digit(&self) -> u8 {
        self.0.as_bytes()[ACCESS_KEY_BODY_LEN] - b'0'
    }

    /// Nine-digit document number at offsets 25..34. Not validated on its own.
    pub fn document_number(&self) -> &str {
        &self.0[DOCUMENT_NUMBER_SPAN]
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccessKey {
    type Err = KeyRejection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_key(s)
    }
}

impl AsRef<str> for AccessKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for AccessKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}
