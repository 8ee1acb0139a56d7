//! Session name value object

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::ValidationError;

/// Maximum accepted name length in characters
pub const MAX_NAME_LEN: usize = 100;

/// Validated session name.
///
/// Accepts 1-100 characters drawn from letters, digits, space,
/// underscore, hyphen and dot. Anything else is stripped during
/// sanitization; a name that sanitizes to nothing is synthesized from
/// the start timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionName(String);

impl SessionName {
    /// Validate an already-sanitized name.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_session_name(&name)?;
        Ok(Self(name))
    }

    /// Sanitize free-form input, falling back to a synthesized
    /// `Session_{YYYY-MM-DD}_{HHMM}` name when nothing survives.
    pub fn sanitize_or_synthesize(raw: &str, now: DateTime<Utc>) -> Self {
        let cleaned = sanitize(raw);
        if cleaned.is_empty() {
            Self(format!("Session_{}", now.format("%Y-%m-%d_%H%M")))
        } else {
            Self(cleaned)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File stem for a segment of this session, e.g.
    /// `Goblin Ambush_2025-03-01_2130_part001`.
    pub fn segment_file_stem(&self, started_at: DateTime<Utc>, sequence_index: u32) -> String {
        format!(
            "{}_{}_part{:03}",
            self.0,
            started_at.format("%Y-%m-%d_%H%M"),
            sequence_index
        )
    }
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn allowed(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, ' ' | '_' | '-' | '.')
}

/// Strip disallowed characters, collapse surrounding whitespace and
/// clamp to the maximum length.
pub fn sanitize(raw: &str) -> String {
    let mut cleaned: String = raw.chars().filter(|c| allowed(*c)).collect();
    cleaned = cleaned.trim().to_string();
    if cleaned.chars().count() > MAX_NAME_LEN {
        cleaned = cleaned.chars().take(MAX_NAME_LEN).collect();
    }
    cleaned
}

/// Accepts iff `1 <= len <= 100` and every character is in
/// `[A-Za-z0-9 _\-.]`.
pub fn validate_session_name(name: &str) -> Result<(), ValidationError> {
    let len = name.chars().count();
    if len == 0 {
        return Err(ValidationError::SessionNameInvalid {
            reason: "name is empty".to_string(),
        });
    }
    if len > MAX_NAME_LEN {
        return Err(ValidationError::SessionNameInvalid {
            reason: format!("name exceeds {} characters", MAX_NAME_LEN),
        });
    }
    if let Some(bad) = name.chars().find(|c| !allowed(*c)) {
        return Err(ValidationError::SessionNameInvalid {
            reason: format!("character {:?} is not allowed", bad),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn accepts_simple_names() {
        assert!(validate_session_name("Goblin Ambush").is_ok());
        assert!(validate_session_name("session_3.final-take").is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert!(validate_session_name("").is_err());
    }

    #[test]
    fn rejects_over_100_chars() {
        let long = "a".repeat(101);
        assert!(validate_session_name(&long).is_err());
        let exactly = "a".repeat(100);
        assert!(validate_session_name(&exactly).is_ok());
    }

    #[test]
    fn rejects_special_characters() {
        assert!(validate_session_name("goblins/ambush").is_err());
        assert!(validate_session_name("name\0").is_err());
        assert!(validate_session_name("émigré").is_err());
    }

    #[test]
    fn sanitize_strips_disallowed() {
        assert_eq!(sanitize("Goblin/Ambush!"), "GoblinAmbush");
        assert_eq!(sanitize("  spaced out  "), "spaced out");
    }

    #[test]
    fn sanitize_clamps_length() {
        let long = "b".repeat(300);
        assert_eq!(sanitize(&long).len(), MAX_NAME_LEN);
    }

    #[test]
    fn empty_input_synthesizes_from_timestamp() {
        let name = SessionName::sanitize_or_synthesize("", at(2025, 3, 1, 21, 30));
        assert_eq!(name.as_str(), "Session_2025-03-01_2130");
        assert!(validate_session_name(name.as_str()).is_ok());
    }

    #[test]
    fn all_punctuation_synthesizes() {
        let name = SessionName::sanitize_or_synthesize("!!!???", at(2024, 12, 31, 0, 5));
        assert_eq!(name.as_str(), "Session_2024-12-31_0005");
    }

    #[test]
    fn segment_file_stem_format() {
        let name = SessionName::new("Campaign 5").unwrap();
        let stem = name.segment_file_stem(at(2025, 3, 1, 21, 30), 7);
        assert_eq!(stem, "Campaign 5_2025-03-01_2130_part007");
    }
}
