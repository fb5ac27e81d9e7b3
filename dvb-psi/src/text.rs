//! DVB text transcoding.
//!
//! Text fields in SI descriptors are raw byte strings in a broadcast charset,
//! optionally prefixed by a charset selector (EN 300 468 Annex A) and
//! optionally carrying emphasized runs. Decoding yields host `String`s plus
//! the emphasized substring; encoding goes the other way.

use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_16BE, UTF_8, WINDOWS_1252};
use log::{error, warn};

use crate::error::{PsiError, PsiResult};

/// DVB control code: emphasis on.
pub const EMPHASIS_ON: u8 = 0x86;
/// DVB control code: emphasis off.
pub const EMPHASIS_OFF: u8 = 0x87;
/// DVB control code: line break.
pub const CR_LF: u8 = 0x8A;

/// A decoded text field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedText {
    /// Text with emphasis delimiters removed.
    pub text: String,
    /// Emphasized runs, joined by a single space.
    pub emphasis: Option<String>,
}

/// Transcoder between on-wire text and host strings.
pub trait TextCodec {
    /// Decode raw on-wire bytes.
    fn decode(&self, raw: &[u8]) -> DecodedText;

    /// Encode a host string, marking `emphasis` if it occurs in `text`.
    fn encode(&self, text: &str, emphasis: Option<&str>) -> PsiResult<Vec<u8>>;
}

/// [`TextCodec`] backed by `encoding_rs`.
#[derive(Debug, Clone, Copy)]
pub struct DvbText {
    input: &'static Encoding,
    output: &'static Encoding,
    marker: char,
}

impl Default for DvbText {
    /// Latin-1 in and out, `*` marks emphasis.
    fn default() -> Self {
        Self::new(WINDOWS_1252, WINDOWS_1252, '*')
    }
}

impl DvbText {
    pub fn new(input: &'static Encoding, output: &'static Encoding, marker: char) -> Self {
        Self {
            input,
            output,
            marker,
        }
    }

    /// Charset used for text without a selector byte.
    pub fn input_charset(&self) -> &'static Encoding {
        self.input
    }

    /// Charset used to store text.
    pub fn output_charset(&self) -> &'static Encoding {
        self.output
    }

    /// Split off the charset selector and return the charset for the rest.
    fn select_charset<'a>(&self, raw: &'a [u8]) -> (&'static Encoding, &'a [u8]) {
        let first = raw[0];
        if first >= 0x20 {
            return (self.input, raw);
        }

        let selected = match first {
            // ISO/IEC 8859-5 .. 8859-15
            0x01..=0x0B => iso_8859(first as usize + 4).map(|e| (e, &raw[1..])),
            0x10 if raw.len() >= 3 => iso_8859(raw[2] as usize).map(|e| (e, &raw[3..])),
            0x11 => Some((UTF_16BE, &raw[1..])),
            0x15 => Some((UTF_8, &raw[1..])),
            _ => None,
        };

        selected.unwrap_or_else(|| {
            warn!(
                "text: unsupported charset selector 0x{:02X}, using {}",
                first,
                self.input.name()
            );
            let skip = if first == 0x10 { raw.len().min(3) } else { 1 };
            (self.input, &raw[skip..])
        })
    }

    /// First character the output charset stores as a byte in 0x80..=0x9F.
    fn control_range_char(&self, text: &str) -> Option<char> {
        let mut utf8 = [0u8; 4];
        text.chars().find(|c| {
            let (bytes, _, _) = self.output.encode(c.encode_utf8(&mut utf8));
            bytes.iter().any(|b| (0x80..=0x9F).contains(b))
        })
    }

    fn marker_byte(&self) -> Option<u8> {
        if self.marker.is_ascii() {
            Some(self.marker as u8)
        } else {
            None
        }
    }
}

fn iso_8859(part: usize) -> Option<&'static Encoding> {
    Encoding::for_label(format!("iso-8859-{}", part).as_bytes())
}

impl TextCodec for DvbText {
    fn decode(&self, raw: &[u8]) -> DecodedText {
        if raw.is_empty() {
            return DecodedText::default();
        }

        let (encoding, body) = self.select_charset(raw);

        if encoding.is_single_byte() {
            let marker = self.marker_byte();
            let mut runs = Splitter::<u8>::default();
            for &b in body {
                match b {
                    EMPHASIS_ON => runs.set_emphasis(true),
                    EMPHASIS_OFF => runs.set_emphasis(false),
                    CR_LF => runs.push(b'\n'),
                    0x80..=0x9F => {}
                    _ if Some(b) == marker => runs.toggle(),
                    _ => runs.push(b),
                }
            }
            let text = decode_bytes(encoding, &runs.text);
            let emphasis = runs.finish_with(b' ').map(|e| decode_bytes(encoding, &e));
            return DecodedText { text, emphasis };
        }

        let decoded = decode_bytes(encoding, body);
        let mut runs = Splitter::<char>::default();
        for c in decoded.chars() {
            match c {
                '\u{E086}' => runs.set_emphasis(true),
                '\u{E087}' => runs.set_emphasis(false),
                '\u{E08A}' => runs.push('\n'),
                _ if c == self.marker => runs.toggle(),
                _ => runs.push(c),
            }
        }
        let text: String = runs.text.iter().collect();
        let emphasis = runs.finish_with(' ').map(|e| e.into_iter().collect());
        DecodedText { text, emphasis }
    }

    fn encode(&self, text: &str, emphasis: Option<&str>) -> PsiResult<Vec<u8>> {
        if text.contains(self.marker) {
            error!(
                "text: {:?} contains the emphasis marker {:?}",
                text, self.marker
            );
            return Err(PsiError::MarkerInText {
                marker: self.marker,
            });
        }

        let marked: Cow<'_, str> = match emphasis {
            Some(e) if !e.is_empty() => match text.find(e) {
                Some(at) => Cow::Owned(format!(
                    "{}{m}{}{m}{}",
                    &text[..at],
                    e,
                    &text[at + e.len()..],
                    m = self.marker
                )),
                None => {
                    warn!("text: emphasis {:?} not found in {:?}, dropped", e, text);
                    Cow::Borrowed(text)
                }
            },
            _ => Cow::Borrowed(text),
        };

        let (bytes, used, had_errors) = self.output.encode(&marked);
        if had_errors {
            warn!(
                "text: {:?} has characters not representable in {}",
                text,
                used.name()
            );
        }
        if self.output.is_single_byte() {
            if let Some(character) = self.control_range_char(&marked) {
                error!(
                    "text: {:?} maps {:?} into the control code range of {}",
                    text,
                    character,
                    self.output.name()
                );
                return Err(PsiError::UnencodableText {
                    character,
                    charset: self.output.name(),
                });
            }
        }
        Ok(bytes.into_owned())
    }
}

fn decode_bytes(encoding: &'static Encoding, bytes: &[u8]) -> String {
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        warn!("text: malformed {} sequence replaced", encoding.name());
    }
    text.into_owned()
}

/// Splits a sequence into plain text and emphasized runs.
struct Splitter<T> {
    text: Vec<T>,
    emphasis: Vec<Vec<T>>,
    in_emphasis: bool,
}

impl<T> Default for Splitter<T> {
    fn default() -> Self {
        Self {
            text: Vec::new(),
            emphasis: Vec::new(),
            in_emphasis: false,
        }
    }
}

impl<T: Copy> Splitter<T> {
    fn set_emphasis(&mut self, on: bool) {
        if on && !self.in_emphasis {
            self.emphasis.push(Vec::new());
        }
        self.in_emphasis = on;
    }

    fn toggle(&mut self) {
        self.set_emphasis(!self.in_emphasis);
    }

    fn push(&mut self, item: T) {
        self.text.push(item);
        if self.in_emphasis {
            if let Some(run) = self.emphasis.last_mut() {
                run.push(item);
            }
        }
    }

    /// Joined emphasized runs, or `None` when nothing was emphasized.
    fn finish_with(&mut self, separator: T) -> Option<Vec<T>> {
        let mut joined = Vec::new();
        for run in self.emphasis.drain(..).filter(|r| !r.is_empty()) {
            if !joined.is_empty() {
                joined.push(separator);
            }
            joined.extend(run);
        }
        if joined.is_empty() {
            None
        } else {
            Some(joined)
        }
    }
}
