/// Activation codes
///
/// Shareable tokens that unlock one protected playlist or slideshow. The
/// effective status of a code is derived from its stored fields on every
/// read and is never persisted.

pub mod registry;

pub use registry::{ActivationCodeRegistry, CodeUpdate, NewActivationCode, Redemption};

use crate::db::{parse_db_timestamp, parse_optional_timestamp};
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use rand::{distributions::Uniform, Rng};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};
use std::fmt;
use std::str::FromStr;

/// Protected content a code can unlock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Playlist,
    Slideshow,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Playlist => "playlist",
            ContentType::Slideshow => "slideshow",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s {
            "playlist" => Ok(ContentType::Playlist),
            "slideshow" => Ok(ContentType::Slideshow),
            _ => Err(EngineError::Validation(format!("Unknown content type: {}", s))),
        }
    }
}

/// Runtime state of a code, highest precedence first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeStatus {
    Disabled,
    Expired,
    Exhausted,
    Active,
}

impl CodeStatus {
    /// Derive the status from the four stored signals.
    pub fn derive(
        is_active: bool,
        expires_at: Option<DateTime<Utc>>,
        max_uses: Option<i64>,
        uses_count: i64,
        now: DateTime<Utc>,
    ) -> Self {
        if !is_active {
            CodeStatus::Disabled
        } else if expires_at.is_some_and(|at| now > at) {
            CodeStatus::Expired
        } else if max_uses.is_some_and(|max| uses_count >= max) {
            CodeStatus::Exhausted
        } else {
            CodeStatus::Active
        }
    }

    /// The redemption failure matching this status, if it is one.
    pub fn redemption_error(self) -> Option<EngineError> {
        match self {
            CodeStatus::Disabled => Some(EngineError::CodeDisabled),
            CodeStatus::Expired => Some(EngineError::CodeExpired),
            CodeStatus::Exhausted => Some(EngineError::CodeExhausted),
            CodeStatus::Active => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationCode {
    pub id: String,
    pub code: String,
    pub content_id: String,
    pub content_type: ContentType,
    pub max_uses: Option<i64>,
    pub uses_count: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl ActivationCode {
    pub(crate) fn from_row(row: &SqliteRow) -> EngineResult<Self> {
        let content_type: String = row.try_get("content_type")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(ActivationCode {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            content_id: row.try_get("content_id")?,
            content_type: content_type.parse()?,
            max_uses: row.try_get("max_uses")?,
            uses_count: row.try_get("uses_count")?,
            expires_at: parse_optional_timestamp(row.try_get("expires_at")?)?,
            is_active: row.try_get("is_active")?,
            created_by: row.try_get("created_by")?,
            created_at: parse_db_timestamp(&created_at)?,
        })
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> CodeStatus {
        CodeStatus::derive(self.is_active, self.expires_at, self.max_uses, self.uses_count, now)
    }

    pub fn remaining_uses(&self) -> Option<i64> {
        self.max_uses.map(|max| (max - self.uses_count).max(0))
    }

    pub fn view_at(self, now: DateTime<Utc>) -> ActivationCodeView {
        ActivationCodeView {
            status: self.status_at(now),
            remaining_uses: self.remaining_uses(),
            code: self,
        }
    }
}

/// A code together with its status at the time it was read
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationCodeView {
    #[serde(flatten)]
    pub code: ActivationCode,
    pub status: CodeStatus,
    pub remaining_uses: Option<i64>,
}

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Random short code. Ambiguous glyphs (0/O, 1/I) are left out so codes
/// survive being read aloud or retyped.
pub fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    let pick = Uniform::from(0..CODE_ALPHABET.len());
    (0..length)
        .map(|_| CODE_ALPHABET[rng.sample(pick)] as char)
        .collect()
}

/// Creator-supplied codes: 4 to 64 characters of `[A-Za-z0-9_-]`.
pub fn validate_code(code: &str) -> EngineResult<()> {
    if !(4..=64).contains(&code.len()) {
        return Err(EngineError::Validation(
            "Activation code must be 4-64 characters".to_string(),
        ));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(EngineError::Validation(
            "Activation code can only contain letters, numbers, '-' and '_'".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn code(is_active: bool, expires_at: Option<DateTime<Utc>>, max_uses: Option<i64>, uses: i64) -> ActivationCode {
        ActivationCode {
            id: "c1".to_string(),
            code: "ABC123".to_string(),
            content_id: "pl-1".to_string(),
            content_type: ContentType::Playlist,
            max_uses,
            uses_count: uses,
            expires_at,
            is_active,
            created_by: "owner".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_disabled_trumps_everything() {
        let now = Utc::now();
        let past = Some(now - Duration::days(1));
        assert_eq!(code(false, None, None, 0).status_at(now), CodeStatus::Disabled);
        assert_eq!(code(false, past, Some(1), 1).status_at(now), CodeStatus::Disabled);
    }

    #[test]
    fn test_expired_before_exhausted() {
        let now = Utc::now();
        let past = Some(now - Duration::seconds(1));
        assert_eq!(code(true, past, Some(3), 3).status_at(now), CodeStatus::Expired);
        assert_eq!(code(true, past, None, 0).status_at(now), CodeStatus::Expired);
    }

    #[test]
    fn test_expiry_instant_is_still_active() {
        let now = Utc::now();
        assert_eq!(code(true, Some(now), None, 0).status_at(now), CodeStatus::Active);
    }

    #[test]
    fn test_exhausted_and_active() {
        let now = Utc::now();
        let future = Some(now + Duration::days(1));
        assert_eq!(code(true, future, Some(3), 3).status_at(now), CodeStatus::Exhausted);
        assert_eq!(code(true, future, Some(3), 2).status_at(now), CodeStatus::Active);
        assert_eq!(code(true, None, None, 1_000).status_at(now), CodeStatus::Active);
    }

    #[test]
    fn test_reenabling_restores_underlying_status() {
        let now = Utc::now();
        let mut c = code(false, None, Some(2), 2);
        assert_eq!(c.status_at(now), CodeStatus::Disabled);
        c.is_active = true;
        assert_eq!(c.status_at(now), CodeStatus::Exhausted);
        c.max_uses = None;
        assert_eq!(c.status_at(now), CodeStatus::Active);
    }

    #[test]
    fn test_remaining_uses() {
        assert_eq!(code(true, None, Some(3), 1).remaining_uses(), Some(2));
        assert_eq!(code(true, None, None, 1).remaining_uses(), None);
    }

    #[test]
    fn test_generated_code_shape() {
        let c = generate_code(8);
        assert_eq!(c.len(), 8);
        assert!(c.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        assert!(validate_code(&c).is_ok());
    }

    #[test]
    fn test_validate_code_rejects_bad_input() {
        assert!(validate_code("abc").is_err());
        assert!(validate_code("has space").is_err());
        assert!(validate_code("ABC123").is_ok());
    }
}
