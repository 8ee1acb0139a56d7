//! Domain error types

use thiserror::Error;

/// Errors from validating user-supplied session input.
///
/// These are surfaced to the caller without side effects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid session name: {reason}")]
    SessionNameInvalid { reason: String },

    #[error("Note exceeds {max} characters (got {len})")]
    NoteTooLong { len: usize, max: usize },

    #[error("Invalid tag \"{tag}\": tags are 1-50 characters of [A-Za-z0-9_-]")]
    TagInvalid { tag: String },

    #[error("Session already has the maximum of {max} tags")]
    TooManyTags { max: usize },

    #[error("Tag \"{tag}\" is already present")]
    DuplicateTag { tag: String },
}

/// Errors from validating recording options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("Quality must be between {min} and {max} kbps in steps of {step} (got {value})")]
    QualityOutOfRange {
        value: u32,
        min: u32,
        max: u32,
        step: u32,
    },

    #[error("Split interval must be between {min} and {max} minutes (got {value})")]
    SplitIntervalOutOfRange { value: u32, min: u32, max: u32 },

    #[error("Split size must be at least {min} MB (got {value})")]
    SplitSizeTooSmall { value: u64, min: u64 },
}
