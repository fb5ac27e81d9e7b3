//! Codec configuration.
//!
//! Every decode/encode call that touches text receives a [`CodecConfig`]
//! explicitly. A configuration can be built in code or loaded from TOML:
//!
//! ```toml
//! input_charset = "iso-8859-15"
//! output_charset = "utf-8"
//! emphasis_marker = "*"
//! ```

use serde::Deserialize;

use crate::error::{PsiError, PsiResult};
use crate::text::DvbText;

/// Charset used when none is configured.
pub const DEFAULT_CHARSET: &str = "iso-8859-1";

/// Delimiter used to mark emphasized text when none is configured.
pub const DEFAULT_EMPHASIS_MARKER: char = '*';

/// Text handling parameters shared by the SDT and descriptor codecs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Charset assumed for on-wire text without a charset selector byte.
    pub input_charset: String,
    /// Charset used to encode text fields on store.
    pub output_charset: String,
    /// Character delimiting emphasized substrings.
    pub emphasis_marker: char,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            input_charset: DEFAULT_CHARSET.to_string(),
            output_charset: DEFAULT_CHARSET.to_string(),
            emphasis_marker: DEFAULT_EMPHASIS_MARKER,
        }
    }
}

impl CodecConfig {
    /// Configuration with the same charset on both directions.
    pub fn with_charset(charset: &str) -> Self {
        Self {
            input_charset: charset.to_string(),
            output_charset: charset.to_string(),
            ..Default::default()
        }
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(contents: &str) -> PsiResult<Self> {
        let config: CodecConfig = toml::from_str(contents)?;
        // Fail early on labels the transcoder cannot resolve.
        config.text_codec()?;
        Ok(config)
    }

    /// Resolve the configured charsets into a transcoder.
    pub fn text_codec(&self) -> PsiResult<DvbText> {
        Ok(DvbText::new(
            resolve_charset(&self.input_charset)?,
            resolve_charset(&self.output_charset)?,
            self.emphasis_marker,
        ))
    }
}

/// Look up a charset label (WHATWG label set).
pub fn resolve_charset(label: &str) -> PsiResult<&'static encoding_rs::Encoding> {
    encoding_rs::Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| PsiError::UnknownCharset(label.to_string()))
}
