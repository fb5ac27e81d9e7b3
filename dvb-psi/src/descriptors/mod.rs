//! Descriptor loops for PSI/SI tables.
//!
//! A descriptor loop is a run of tag-length-value records. Known tags are
//! routed through a [`DescriptorRegistry`] to their decoder; anything else is
//! kept as raw bytes so it survives a decode/encode round trip.

use std::collections::HashMap;
use std::fmt;

use bytes::{BufMut, BytesMut};
use log::{error, info};

use crate::config::CodecConfig;
use crate::descriptor_tag;
use crate::error::{PsiError, PsiResult};
use crate::text::{DvbText, TextCodec};

mod service;

pub use service::{ServiceDescriptor, MAX_TEXT_LENGTH};

/// Size of the tag and length bytes in front of every descriptor.
pub const DESCRIPTOR_HEADER_SIZE: usize = 2;

/// Largest descriptor payload.
pub const MAX_DESCRIPTOR_LENGTH: usize = 0xFF;

/// Decoder for one descriptor payload (the bytes after tag and length).
pub type DescriptorDecoder = fn(&[u8], &dyn TextCodec) -> PsiResult<Descriptor>;

/// A decoded descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    Service(ServiceDescriptor),
    /// Descriptor without a registered decoder.
    Unknown { tag: u8, data: Vec<u8> },
}

impl Descriptor {
    pub fn tag(&self) -> u8 {
        match self {
            Descriptor::Service(_) => descriptor_tag::SERVICE,
            Descriptor::Unknown { tag, .. } => *tag,
        }
    }

    /// Encode tag, length and payload.
    pub fn encode(&self, text: &dyn TextCodec, out: &mut BytesMut) -> PsiResult<()> {
        let mut payload = BytesMut::new();
        match self {
            Descriptor::Service(service) => service.encode(text, &mut payload)?,
            Descriptor::Unknown { data, .. } => payload.put_slice(data),
        }

        if payload.len() > MAX_DESCRIPTOR_LENGTH {
            error!(
                "descriptor 0x{:02x}: payload of {} bytes does not fit",
                self.tag(),
                payload.len()
            );
            return Err(PsiError::FieldOverflow {
                field: "descriptor_length",
                value: payload.len(),
                max: MAX_DESCRIPTOR_LENGTH,
            });
        }

        out.put_u8(self.tag());
        out.put_u8(payload.len() as u8);
        out.put_slice(&payload);
        Ok(())
    }

    pub fn dump(&self) {
        match self {
            Descriptor::Service(service) => {
                info!("|        0x{:02x}: service_descriptor", descriptor_tag::SERVICE);
                service.dump();
            }
            Descriptor::Unknown { tag, data } => {
                info!("|        0x{:02x}: unknown descriptor ({} bytes)", tag, data.len());
                info!("|           {:02x?}", data);
            }
        }
    }
}

fn decode_service(payload: &[u8], text: &dyn TextCodec) -> PsiResult<Descriptor> {
    ServiceDescriptor::decode(payload, text).map(Descriptor::Service)
}

/// Routes descriptor tags to their decoders.
#[derive(Clone)]
pub struct DescriptorRegistry {
    decoders: HashMap<u8, DescriptorDecoder>,
}

impl Default for DescriptorRegistry {
    fn default() -> Self {
        let mut registry = DescriptorRegistry::empty();
        registry.register(descriptor_tag::SERVICE, decode_service);
        registry
    }
}

impl fmt::Debug for DescriptorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.decoders.keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("DescriptorRegistry")
            .field("tags", &tags)
            .finish()
    }
}

impl DescriptorRegistry {
    /// Registry without any decoder: every descriptor stays raw.
    pub fn empty() -> Self {
        DescriptorRegistry {
            decoders: HashMap::new(),
        }
    }

    /// Register (or replace) the decoder for `tag`.
    pub fn register(&mut self, tag: u8, decoder: DescriptorDecoder) {
        self.decoders.insert(tag, decoder);
    }

    pub fn is_registered(&self, tag: u8) -> bool {
        self.decoders.contains_key(&tag)
    }

    /// Decode a whole descriptor loop.
    pub fn decode_loop(&self, data: &[u8], text: &dyn TextCodec) -> PsiResult<Vec<Descriptor>> {
        let mut descriptors = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            let tag = data[offset];
            let available = data.len() - offset;
            if available < DESCRIPTOR_HEADER_SIZE {
                error!("descriptor 0x{:02x}: short read {}/2 bytes", tag, available);
                return Err(PsiError::Descriptor {
                    tag,
                    source: Box::new(PsiError::truncated(
                        "descriptor",
                        DESCRIPTOR_HEADER_SIZE,
                        available,
                    )),
                });
            }

            let length = data[offset + 1] as usize;
            let start = offset + DESCRIPTOR_HEADER_SIZE;
            if start + length > data.len() {
                error!(
                    "descriptor 0x{:02x}: short read {}/{} bytes",
                    tag,
                    data.len() - start,
                    length
                );
                return Err(PsiError::Descriptor {
                    tag,
                    source: Box::new(PsiError::truncated("descriptor", length, data.len() - start)),
                });
            }

            let payload = &data[start..start + length];
            let descriptor = match self.decoders.get(&tag) {
                Some(decode) => decode(payload, text).map_err(|e| PsiError::Descriptor {
                    tag,
                    source: Box::new(e),
                })?,
                None => Descriptor::Unknown {
                    tag,
                    data: payload.to_vec(),
                },
            };

            if let Err(e) = descriptors.try_reserve(1) {
                error!("descriptor 0x{:02x}: out of memory", tag);
                return Err(e.into());
            }
            descriptors.push(descriptor);
            offset = start + length;
        }

        Ok(descriptors)
    }
}

/// Encode a descriptor loop, returning the number of bytes written.
pub fn encode_loop(
    descriptors: &[Descriptor],
    text: &dyn TextCodec,
    out: &mut BytesMut,
) -> PsiResult<usize> {
    let start = out.len();
    for descriptor in descriptors {
        descriptor.encode(text, out)?;
    }
    Ok(out.len() - start)
}

/// Text codec and descriptor registry used by tables that carry descriptors.
pub struct SiContext {
    pub text: Box<dyn TextCodec + Send + Sync>,
    pub registry: DescriptorRegistry,
}

impl Default for SiContext {
    fn default() -> Self {
        SiContext {
            text: Box::new(DvbText::default()),
            registry: DescriptorRegistry::default(),
        }
    }
}

impl fmt::Debug for SiContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiContext")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl SiContext {
    /// Context with the charsets of `config` and the default registry.
    pub fn new(config: &CodecConfig) -> PsiResult<Self> {
        Ok(SiContext {
            text: Box::new(config.text_codec()?),
            registry: DescriptorRegistry::default(),
        })
    }

    pub fn decode_loop(&self, data: &[u8]) -> PsiResult<Vec<Descriptor>> {
        self.registry.decode_loop(data, self.text.as_ref())
    }

    pub fn encode_loop(&self, descriptors: &[Descriptor], out: &mut BytesMut) -> PsiResult<usize> {
        encode_loop(descriptors, self.text.as_ref(), out)
    }
}
