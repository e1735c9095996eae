use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Alphabet for generated codes. Omits `0/O` and `1/I/L` so codes survive
/// being read aloud or retyped from a screenshot.
pub const CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";

/// Shortest code length accepted by [`ReferralCode::parse`].
pub const MIN_CODE_LEN: usize = 6;
/// Longest code length accepted by [`ReferralCode::parse`].
pub const MAX_CODE_LEN: usize = 16;

/// A user's shareable referral identifier.
///
/// Codes are case-insensitive on input and always stored upper-case.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReferralCode(String);

impl ReferralCode {
    /// Draw a random code of `len` characters from [`CODE_ALPHABET`].
    pub fn generate(len: usize) -> Self {
        let len = len.clamp(MIN_CODE_LEN, MAX_CODE_LEN);
        let mut rng = rand::thread_rng();
        let code = (0..len)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Normalize and validate user input.
    pub fn parse(input: &str) -> Result<Self, TypeError> {
        let normalized = input.trim().to_ascii_uppercase();
        let invalid = |reason: &str| TypeError::InvalidReferralCode {
            code: input.to_string(),
            reason: reason.to_string(),
        };

        if normalized.len() < MIN_CODE_LEN || normalized.len() > MAX_CODE_LEN {
            return Err(invalid("length out of range"));
        }
        if !normalized.bytes().all(|b| CODE_ALPHABET.contains(&b)) {
            return Err(invalid("contains characters outside the code alphabet"));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ReferralCode {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ReferralCode> for String {
    fn from(value: ReferralCode) -> Self {
        value.0
    }
}

impl fmt::Debug for ReferralCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReferralCode({})", self.0)
    }
}

impl fmt::Display for ReferralCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn generated_codes_parse() {
        for _ in 0..100 {
            let code = ReferralCode::generate(8);
            assert_eq!(code.as_str().len(), 8);
            assert_eq!(ReferralCode::parse(code.as_str()).unwrap(), code);
        }
    }

    #[test]
    fn generate_clamps_length() {
        assert_eq!(ReferralCode::generate(1).as_str().len(), MIN_CODE_LEN);
        assert_eq!(ReferralCode::generate(99).as_str().len(), MAX_CODE_LEN);
    }

    #[test]
    fn parse_normalizes_case_and_whitespace() {
        let code = ReferralCode::parse("  abcd2345 ").unwrap();
        assert_eq!(code.as_str(), "ABCD2345");
    }

    #[test]
    fn parse_rejects_ambiguous_characters() {
        let err = ReferralCode::parse("ABCD0OIL").unwrap_err();
        assert!(matches!(err, TypeError::InvalidReferralCode { .. }));
    }

    #[test]
    fn parse_rejects_short_codes() {
        assert!(ReferralCode::parse("AB2").is_err());
    }

    proptest! {
        #[test]
        fn parse_never_panics(input in ".{0,32}") {
            let _ = ReferralCode::parse(&input);
        }

        #[test]
        fn parse_is_idempotent(len in MIN_CODE_LEN..=MAX_CODE_LEN) {
            let code = ReferralCode::generate(len);
            let reparsed = ReferralCode::parse(&code.as_str().to_ascii_lowercase()).unwrap();
            prop_assert_eq!(reparsed, code);
        }
    }
}
