//! Service descriptor (0x48).

use bytes::{Buf, BufMut, BytesMut};
use log::{error, info};

use crate::error::{PsiError, PsiResult};
use crate::text::TextCodec;

/// Longest text field a one-byte length prefix can describe.
pub const MAX_TEXT_LENGTH: usize = 0xFF;

/// Service descriptor (0x48).
///
/// Empty text fields decode to `None`; `None` encodes as a zero-length field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Service type.
    pub service_type: u8,
    /// Service provider name.
    pub provider: Option<String>,
    /// Emphasized part of the provider name.
    pub provider_emphasis: Option<String>,
    /// Service name.
    pub name: Option<String>,
    /// Emphasized part of the service name.
    pub name_emphasis: Option<String>,
}

impl ServiceDescriptor {
    pub fn new(service_type: u8, provider: &str, name: &str) -> Self {
        ServiceDescriptor {
            service_type,
            provider: Some(provider.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    /// Decode a service descriptor payload (the bytes after tag and length).
    pub fn decode(payload: &[u8], text: &dyn TextCodec) -> PsiResult<Self> {
        let mut buf = payload;
        if !buf.has_remaining() {
            error!("service descriptor: short read 0/1 bytes");
            return Err(PsiError::truncated("service descriptor", 1, 0));
        }
        let service_type = buf.get_u8();

        let (provider, provider_emphasis) = read_text(&mut buf, text, "service provider name")?;
        let (name, name_emphasis) = read_text(&mut buf, text, "service name")?;

        Ok(ServiceDescriptor {
            service_type,
            provider,
            provider_emphasis,
            name,
            name_emphasis,
        })
    }

    /// Encode the descriptor payload (without tag and length).
    pub fn encode(&self, text: &dyn TextCodec, out: &mut BytesMut) -> PsiResult<()> {
        out.put_u8(self.service_type);
        write_text(
            out,
            text,
            "service_provider_name",
            self.provider.as_deref(),
            self.provider_emphasis.as_deref(),
        )?;
        write_text(
            out,
            text,
            "service_name",
            self.name.as_deref(),
            self.name_emphasis.as_deref(),
        )
    }

    /// Get human-readable service type name.
    pub fn service_type_name(&self) -> &'static str {
        match self.service_type {
            0x01 => "Digital television",
            0x02 => "Digital radio sound",
            0x03 => "Teletext",
            0x04 => "NVOD reference",
            0x05 => "NVOD time-shifted",
            0x06 => "Mosaic",
            0x07 => "FM radio",
            0x0A => "Advanced codec digital radio sound",
            0x0C => "Data broadcast",
            0x10 => "DVB MHP",
            0x11 => "MPEG-2 HD digital television",
            0x16 => "Advanced codec SD digital television",
            0x19 => "Advanced codec HD digital television",
            0x1F => "HEVC digital television",
            0x80..=0xFE => "User defined",
            _ => "Reserved",
        }
    }

    pub fn dump(&self) {
        info!(
            "|           service type  {} ({})",
            self.service_type,
            self.service_type_name()
        );
        info!("|           provider      {}", self.provider.as_deref().unwrap_or(""));
        if let Some(emphasis) = &self.provider_emphasis {
            info!("|           emphasis      {}", emphasis);
        }
        info!("|           name          {}", self.name.as_deref().unwrap_or(""));
        if let Some(emphasis) = &self.name_emphasis {
            info!("|           emphasis      {}", emphasis);
        }
    }
}

fn read_text(
    buf: &mut &[u8],
    text: &dyn TextCodec,
    field: &'static str,
) -> PsiResult<(Option<String>, Option<String>)> {
    if !buf.has_remaining() {
        error!("service descriptor: {} length missing", field);
        return Err(PsiError::truncated(field, 1, 0));
    }
    let len = buf.get_u8() as usize;
    if buf.remaining() < len {
        error!(
            "service descriptor: {} short read {}/{} bytes",
            field,
            buf.remaining(),
            len
        );
        return Err(PsiError::truncated(field, len, buf.remaining()));
    }

    let raw = &buf[..len];
    buf.advance(len);
    if raw.is_empty() {
        return Ok((None, None));
    }

    let decoded = text.decode(raw);
    Ok((Some(decoded.text), decoded.emphasis))
}

fn write_text(
    out: &mut BytesMut,
    text: &dyn TextCodec,
    field: &'static str,
    value: Option<&str>,
    emphasis: Option<&str>,
) -> PsiResult<()> {
    let Some(value) = value else {
        out.put_u8(0);
        return Ok(());
    };

    let raw = text.encode(value, emphasis)?;
    if raw.len() > MAX_TEXT_LENGTH {
        error!(
            "service descriptor: {} is {} bytes once encoded, limit is {}",
            field,
            raw.len(),
            MAX_TEXT_LENGTH
        );
        return Err(PsiError::FieldOverflow {
            field,
            value: raw.len(),
            max: MAX_TEXT_LENGTH,
        });
    }

    out.put_u8(raw.len() as u8);
    out.put_slice(&raw);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::DvbText;

    #[test]
    fn test_parse_service_descriptor() {
        let data = [
            0x01, // service_type
            0x03, b'A', b'B', b'C', // provider
            0x04, b'C', b'H', b'0', b'1', // name
        ];

        let desc = ServiceDescriptor::decode(&data, &DvbText::default()).unwrap();
        assert_eq!(desc.service_type, 0x01);
        assert_eq!(desc.provider.as_deref(), Some("ABC"));
        assert_eq!(desc.name.as_deref(), Some("CH01"));
        assert_eq!(desc.name_emphasis, None);
        assert_eq!(desc.service_type_name(), "Digital television");
    }

    #[test]
    fn test_emphasized_name() {
        let text = DvbText::default();
        let mut data = vec![0x19, 7];
        data.extend_from_slice(b"Example");
        data.push(12);
        data.extend_from_slice(b"Channel *HD*");

        let desc = ServiceDescriptor::decode(&data, &text).unwrap();
        assert_eq!(desc.provider.as_deref(), Some("Example"));
        assert_eq!(desc.provider_emphasis, None);
        assert_eq!(desc.name.as_deref(), Some("Channel HD"));
        assert_eq!(desc.name_emphasis.as_deref(), Some("HD"));

        let mut out = BytesMut::new();
        desc.encode(&text, &mut out).unwrap();
        assert_eq!(&out[..], &data[..]);
    }

    #[test]
    fn test_empty_fields() {
        let desc = ServiceDescriptor::decode(&[0x02, 0x00, 0x00], &DvbText::default()).unwrap();
        assert_eq!(desc.service_type, 0x02);
        assert_eq!(desc.provider, None);
        assert_eq!(desc.name, None);

        let mut out = BytesMut::new();
        ServiceDescriptor::default()
            .encode(&DvbText::default(), &mut out)
            .unwrap();
        assert_eq!(&out[..], &[0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_truncated_fields() {
        let text = DvbText::default();
        assert!(ServiceDescriptor::decode(&[], &text).unwrap_err().is_truncated());
        assert!(ServiceDescriptor::decode(&[0x01], &text).unwrap_err().is_truncated());
        assert!(ServiceDescriptor::decode(&[0x01, 0x05, b'A'], &text)
            .unwrap_err()
            .is_truncated());
        assert!(ServiceDescriptor::decode(&[0x01, 0x01, b'A'], &text)
            .unwrap_err()
            .is_truncated());
    }

    #[test]
    fn test_encode_overflow() {
        let desc = ServiceDescriptor::new(0x01, "P", &"x".repeat(256));
        let err = desc
            .encode(&DvbText::default(), &mut BytesMut::new())
            .unwrap_err();
        assert_eq!(
            err,
            PsiError::FieldOverflow {
                field: "service_name",
                value: 256,
                max: MAX_TEXT_LENGTH,
            }
        );
    }
}
