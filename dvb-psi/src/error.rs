//! Error types for the PSI codecs.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type PsiResult<T> = Result<T, PsiError>;

/// Errors raised while decoding or encoding packets, sections and descriptors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PsiError {
    /// Transport packet does not start with the sync byte.
    #[error("Invalid sync byte: expected 0x47, got 0x{found:02X}")]
    InvalidSync { found: u8 },

    /// A declared or required length exceeds the bytes that are available.
    #[error("{context}: short read, needed {needed} bytes, got {available}")]
    Truncated {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    /// Leading table id is not one the codec accepts.
    #[error("{context}: invalid marker 0x{found:02X}, expected one of {expected:02X?}")]
    WrongMarker {
        context: &'static str,
        found: u8,
        expected: Vec<u8>,
    },

    /// Growing an entry or descriptor list failed.
    #[error("{context}: out of memory")]
    AllocationFailure { context: &'static str },

    /// A descriptor nested inside a table entry failed to decode.
    #[error("Descriptor 0x{tag:02X} failed to decode: {source}")]
    Descriptor {
        tag: u8,
        #[source]
        source: Box<PsiError>,
    },

    /// A value does not fit the fixed-width field it is encoded into.
    #[error("Field {field} overflows: {value} > {max}")]
    FieldOverflow {
        field: &'static str,
        value: usize,
        max: usize,
    },

    /// Text holds a character the output charset can only store as a
    /// DVB control code.
    #[error("Character {character:?} cannot be stored in {charset}")]
    UnencodableText {
        character: char,
        charset: &'static str,
    },

    /// Text already contains the character used to delimit emphasis.
    #[error("Text contains the emphasis marker {marker:?}")]
    MarkerInText { marker: char },

    /// Charset label not known to the transcoder.
    #[error("Unknown charset: {0}")]
    UnknownCharset(String),

    /// Configuration document could not be parsed.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PsiError {
    /// Shorthand for [`PsiError::Truncated`].
    pub fn truncated(context: &'static str, needed: usize, available: usize) -> Self {
        PsiError::Truncated {
            context,
            needed,
            available,
        }
    }

    /// Returns true for the bounds-related failures.
    pub fn is_truncated(&self) -> bool {
        match self {
            PsiError::Truncated { .. } => true,
            PsiError::Descriptor { source, .. } => source.is_truncated(),
            _ => false,
        }
    }
}

impl From<std::collections::TryReserveError> for PsiError {
    fn from(_: std::collections::TryReserveError) -> Self {
        PsiError::AllocationFailure { context: "list" }
    }
}

impl From<toml::de::Error> for PsiError {
    fn from(err: toml::de::Error) -> Self {
        PsiError::Config(err.to_string())
    }
}
