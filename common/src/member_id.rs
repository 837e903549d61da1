use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Literal prefix every scannable member identifier starts with.
pub const MEMBER_ID_PREFIX: &str = "MEM-";
/// Number of uppercase hex characters following the prefix.
pub const MEMBER_ID_TOKEN_LEN: usize = 8;

/// A validated registry key of the form `MEM-` + 8 uppercase hex characters.
///
/// The format is case-sensitive on both the prefix and the token, so
/// `mem-ABCDEF12` and `MEM-abcdef12` are both rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemberId(String);

impl MemberId {
    pub fn parse(raw: &str) -> Result<Self, MemberIdError> {
        let token = raw
            .strip_prefix(MEMBER_ID_PREFIX)
            .ok_or(MemberIdError::MissingPrefix)?;
        if token.len() != MEMBER_ID_TOKEN_LEN {
            return Err(MemberIdError::TokenLength {
                got: token.chars().count(),
            });
        }
        if let Some(ch) = token
            .chars()
            .find(|c| !matches!(c, '0'..='9' | 'A'..='F'))
        {
            return Err(MemberIdError::InvalidCharacter(ch));
        }
        Ok(Self(raw.to_string()))
    }

    /// Mint a fresh identifier from a random UUID, as new members are issued.
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self(format!(
            "{MEMBER_ID_PREFIX}{}",
            hex[..MEMBER_ID_TOKEN_LEN].to_ascii_uppercase()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The opaque part after the prefix.
    pub fn token(&self) -> &str {
        &self.0[MEMBER_ID_PREFIX.len()..]
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MemberId {
    type Err = MemberIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MemberId {
    type Error = MemberIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MemberId> for String {
    fn from(id: MemberId) -> Self {
        id.0
    }
}

impl AsRef<str> for MemberId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemberIdError {
    #[error("member id must start with 'MEM-'")]
    MissingPrefix,
    #[error("member id token must be 8 characters, got {got}")]
    TokenLength { got: usize },
    #[error("member id token contains '{0}', expected uppercase hex")]
    InvalidCharacter(char),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_ids() {
        for raw in ["MEM-ABCDEF12", "MEM-12AB34CD", "MEM-00000000"] {
            let id = MemberId::parse(raw).unwrap();
            assert_eq!(id.as_str(), raw);
        }
        assert_eq!(MemberId::parse("MEM-12AB34CD").unwrap().token(), "12AB34CD");
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert_eq!(
            MemberId::parse("INVALID-CODE"),
            Err(MemberIdError::MissingPrefix)
        );
        assert_eq!(
            MemberId::parse("mem-ABCDEF12"),
            Err(MemberIdError::MissingPrefix)
        );
        assert_eq!(MemberId::parse(""), Err(MemberIdError::MissingPrefix));
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(
            MemberId::parse("MEM-ABC"),
            Err(MemberIdError::TokenLength { got: 3 })
        );
        assert_eq!(
            MemberId::parse("MEM-ABCDEF123"),
            Err(MemberIdError::TokenLength { got: 9 })
        );
    }

    #[test]
    fn rejects_lowercase_and_non_hex() {
        assert_eq!(
            MemberId::parse("MEM-abcdef12"),
            Err(MemberIdError::InvalidCharacter('a'))
        );
        assert_eq!(
            MemberId::parse("MEM-ABCDEFG1"),
            Err(MemberIdError::InvalidCharacter('G'))
        );
    }

    #[test]
    fn multibyte_token_is_rejected_without_panicking() {
        // 8 bytes, but only 4 chars
        assert!(MemberId::parse("MEM-éééé").is_err());
    }

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let a = MemberId::generate();
        let b = MemberId::generate();
        assert!(MemberId::parse(a.as_str()).is_ok());
        assert_ne!(a, b);
    }

    #[test]
    fn serde_validates_on_the_way_in() {
        let id: MemberId = serde_json::from_str("\"MEM-ABCDEF12\"").unwrap();
        assert_eq!(id.to_string(), "MEM-ABCDEF12");
        assert!(serde_json::from_str::<MemberId>("\"MEM-xyz\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"MEM-ABCDEF12\"");
    }
}
