//! MPEG-TS packet codec.
//!
//! Decodes the fixed 4-byte header and the adaptation field prefix of a
//! 188-byte transport packet, and splits a payload into a run of packets.

use bytes::{Buf, BufMut, BytesMut};
use log::{error, info};

use crate::error::{PsiError, PsiResult};

/// TS packet size in bytes.
pub const TS_PACKET_SIZE: usize = 188;

/// TS sync byte (0x47).
pub const SYNC_BYTE: u8 = 0x47;

/// Fixed header size.
pub const TS_HEADER_SIZE: usize = 4;

/// Largest payload a single packet can carry.
pub const TS_MAX_PAYLOAD: usize = TS_PACKET_SIZE - TS_HEADER_SIZE;

/// Largest adaptation field stuffing accepted by [`packetize`].
pub const MAX_PADDING: usize = TS_MAX_PAYLOAD - 1;

/// Stuffing byte value.
pub const STUFFING_BYTE: u8 = 0xFF;

/// Parsed TS packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TsHeader {
    /// Transport error indicator.
    pub transport_error: bool,
    /// Payload unit start indicator.
    pub payload_unit_start: bool,
    /// Transport priority.
    pub transport_priority: bool,
    /// Packet Identifier (13 bits).
    pub pid: u16,
    /// Transport scrambling control (2 bits).
    pub scrambling_control: u8,
    /// Adaptation field control (2 bits).
    pub adaptation_field_control: u8,
    /// Continuity counter (4 bits).
    pub continuity_counter: u8,
}

impl TsHeader {
    /// Check if packet has adaptation field.
    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control & 0x02 != 0
    }

    /// Check if packet has payload.
    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 0x01 != 0
    }

    /// Check if packet is scrambled.
    pub fn is_scrambled(&self) -> bool {
        self.scrambling_control != 0
    }

    fn read(buf: &mut &[u8]) -> Self {
        let word = buf.get_u16();
        let flags = buf.get_u8();
        TsHeader {
            transport_error: word & 0x8000 != 0,
            payload_unit_start: word & 0x4000 != 0,
            transport_priority: word & 0x2000 != 0,
            pid: word & 0x1FFF,
            scrambling_control: (flags >> 6) & 0x03,
            adaptation_field_control: (flags >> 4) & 0x03,
            continuity_counter: flags & 0x0F,
        }
    }

    /// Write sync byte and header in wire order.
    pub fn write(&self, out: &mut BytesMut) {
        let word = (self.transport_error as u16) << 15
            | (self.payload_unit_start as u16) << 14
            | (self.transport_priority as u16) << 13
            | (self.pid & 0x1FFF);
        out.put_u8(SYNC_BYTE);
        out.put_u16(word);
        out.put_u8(
            (self.scrambling_control & 0x03) << 6
                | (self.adaptation_field_control & 0x03) << 4
                | (self.continuity_counter & 0x0F),
        );
    }
}

/// Adaptation field data.
///
/// Only the flags byte is decoded. Whatever follows it inside the declared
/// length (PCR, OPCR, splice countdown, private data, extension, stuffing)
/// is kept verbatim in `tail`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdaptationField {
    /// Adaptation field length.
    pub length: u8,
    /// Discontinuity indicator.
    pub discontinuity: bool,
    /// Random access indicator.
    pub random_access: bool,
    /// Elementary stream priority indicator.
    pub es_priority: bool,
    /// PCR flag.
    pub pcr_flag: bool,
    /// OPCR flag.
    pub opcr_flag: bool,
    /// Splicing point flag.
    pub splicing_point_flag: bool,
    /// Transport private data flag.
    pub transport_private_data_flag: bool,
    /// Adaptation field extension flag.
    pub adaptation_extension_flag: bool,
    /// Undecoded bytes after the flags byte.
    pub tail: Vec<u8>,
}

impl AdaptationField {
    fn from_body(length: u8, body: &[u8]) -> Self {
        let Some((&flags, tail)) = body.split_first() else {
            return AdaptationField {
                length,
                ..Default::default()
            };
        };

        AdaptationField {
            length,
            discontinuity: flags & 0x80 != 0,
            random_access: flags & 0x40 != 0,
            es_priority: flags & 0x20 != 0,
            pcr_flag: flags & 0x10 != 0,
            opcr_flag: flags & 0x08 != 0,
            splicing_point_flag: flags & 0x04 != 0,
            transport_private_data_flag: flags & 0x02 != 0,
            adaptation_extension_flag: flags & 0x01 != 0,
            tail: tail.to_vec(),
        }
    }

    /// Program clock reference in 27 MHz units, if present.
    pub fn pcr(&self) -> Option<u64> {
        if !self.pcr_flag {
            return None;
        }
        read_clock(self.tail.get(0..6)?)
    }

    /// Original program clock reference in 27 MHz units, if present.
    pub fn opcr(&self) -> Option<u64> {
        if !self.opcr_flag {
            return None;
        }
        let start = if self.pcr_flag { 6 } else { 0 };
        read_clock(self.tail.get(start..start + 6)?)
    }

    pub fn dump(&self) {
        info!("|- Adaptation Field");
        info!("|   length         {}", self.length);
        info!("|   discontinued   {}", self.discontinuity as u8);
        info!("|   random_access  {}", self.random_access as u8);
        info!("|   priority       {}", self.es_priority as u8);
        info!("|   PCR            {}", self.pcr_flag as u8);
        info!("|   OPCR           {}", self.opcr_flag as u8);
        info!("|   splicing_point {}", self.splicing_point_flag as u8);
        info!("|   private_data   {}", self.transport_private_data_flag as u8);
        info!("|   extension      {}", self.adaptation_extension_flag as u8);
    }
}

/// 33-bit base at 90 kHz, 6 reserved bits, 9-bit extension.
fn read_clock(data: &[u8]) -> Option<u64> {
    let mut buf = data;
    if buf.remaining() < 6 {
        return None;
    }
    let raw = buf.get_uint(6);
    let base = raw >> 15;
    let ext = raw & 0x1FF;
    Some(base * 300 + ext)
}

/// A decoded TS packet header with its adaptation field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsPacket {
    /// Packet header.
    pub header: TsHeader,
    /// Adaptation field (if present).
    pub adaptation_field: Option<AdaptationField>,
}

impl TsPacket {
    /// Decode a packet header and adaptation field.
    ///
    /// Returns the packet and the number of bytes consumed; the payload (if
    /// any) starts at that offset.
    pub fn decode(data: &[u8]) -> PsiResult<(Self, usize)> {
        let mut buf = data;

        match buf.first() {
            Some(&SYNC_BYTE) => {}
            Some(&found) => {
                error!("TS: invalid marker 0x{:02x}, should be 0x{:02x}", found, SYNC_BYTE);
                return Err(PsiError::InvalidSync { found });
            }
            None => {
                error!("TS: short read 0/{} bytes", TS_HEADER_SIZE);
                return Err(PsiError::truncated("TS packet", TS_HEADER_SIZE, 0));
            }
        }
        if buf.remaining() < TS_HEADER_SIZE {
            error!("TS: short read {}/{} bytes", buf.remaining(), TS_HEADER_SIZE);
            return Err(PsiError::truncated(
                "TS packet",
                TS_HEADER_SIZE,
                buf.remaining(),
            ));
        }

        buf.advance(1);
        let header = TsHeader::read(&mut buf);

        let adaptation_field = if header.has_adaptation_field() {
            if !buf.has_remaining() {
                error!("TS: adaptation field length missing");
                return Err(PsiError::truncated("adaptation field", 1, 0));
            }
            let length = buf.get_u8();
            if buf.remaining() < length as usize {
                error!(
                    "TS: adaptation field short read {}/{} bytes",
                    buf.remaining(),
                    length
                );
                return Err(PsiError::truncated(
                    "adaptation field",
                    length as usize,
                    buf.remaining(),
                ));
            }
            let field = AdaptationField::from_body(length, &buf[..length as usize]);
            buf.advance(length as usize);
            Some(field)
        } else {
            None
        };

        let consumed = data.len() - buf.remaining();
        Ok((
            TsPacket {
                header,
                adaptation_field,
            },
            consumed,
        ))
    }

    /// Decode a full 188-byte cell and return its payload slice.
    pub fn decode_cell(cell: &[u8]) -> PsiResult<(Self, &[u8])> {
        if cell.len() < TS_PACKET_SIZE {
            error!("TS: short read {}/{} bytes", cell.len(), TS_PACKET_SIZE);
            return Err(PsiError::truncated("TS packet", TS_PACKET_SIZE, cell.len()));
        }
        let (packet, consumed) = Self::decode(&cell[..TS_PACKET_SIZE])?;
        let payload = if packet.header.has_payload() {
            &cell[consumed..TS_PACKET_SIZE]
        } else {
            &[]
        };
        Ok((packet, payload))
    }

    pub fn dump(&self) {
        let h = &self.header;
        info!("MPEG TS");
        info!("| sync            0x{:02x}", SYNC_BYTE);
        info!("| tei                {}", h.transport_error as u8);
        info!("| payload_start      {}", h.payload_unit_start as u8);
        info!("| priority           {}", h.transport_priority as u8);
        info!("| pid           0x{:04x}", h.pid);
        info!("| scrambling         {}", h.scrambling_control);
        info!("| adaptation_field   {}", h.has_adaptation_field() as u8);
        info!("| payload            {}", h.has_payload() as u8);
        info!("| continuity_counter {}", h.continuity_counter);
        if let Some(af) = &self.adaptation_field {
            af.dump();
        }
    }
}

/// Get the section bytes from a PSI payload.
///
/// When `payload_unit_start` is set, the first byte is the pointer field.
pub fn psi_payload(payload: &[u8], payload_unit_start: bool) -> Option<&[u8]> {
    if payload.is_empty() {
        return None;
    }

    if payload_unit_start {
        let pointer = payload[0] as usize;
        if pointer + 1 < payload.len() {
            Some(&payload[pointer + 1..])
        } else {
            None
        }
    } else {
        Some(payload)
    }
}

/// Split `payload` into transport packets on `pid`.
///
/// The first packet carries `payload_unit_start` and, when `padding` is
/// given, an adaptation field of that declared length (clamped to
/// [`MAX_PADDING`]). A non-empty field starts with a zero flags byte followed
/// by [`STUFFING_BYTE`]s, so no adaptation flag is raised by the stuffing. The last packet is filled up with
/// [`STUFFING_BYTE`]. Continuity counters start at 0 and wrap at 16.
pub fn packetize(payload: &[u8], pid: u16, padding: Option<usize>) -> Vec<u8> {
    let padding = padding.map(|p| p.min(MAX_PADDING));
    let first_room = TS_MAX_PAYLOAD - padding.map_or(0, |p| p + 1);
    let rest_len = payload.len().saturating_sub(first_room);
    let packets = 1 + rest_len.div_ceil(TS_MAX_PAYLOAD);

    let mut out = BytesMut::with_capacity(packets * TS_PACKET_SIZE);
    let take = first_room.min(payload.len());

    let mut header = TsHeader {
        payload_unit_start: true,
        pid: pid & 0x1FFF,
        adaptation_field_control: match (padding.is_some(), first_room > 0) {
            (true, true) => 0b11,
            (true, false) => 0b10,
            _ => 0b01,
        },
        ..Default::default()
    };
    header.write(&mut out);

    if let Some(length) = padding {
        out.put_u8(length as u8);
        if length > 0 {
            // flags byte, then stuffing
            out.put_u8(0x00);
            out.put_bytes(STUFFING_BYTE, length - 1);
        }
    }
    out.put_slice(&payload[..take]);
    let mut rest = &payload[take..];

    header.payload_unit_start = false;
    header.adaptation_field_control = 0b01;
    while !rest.is_empty() {
        header.continuity_counter = (header.continuity_counter + 1) & 0x0F;
        header.write(&mut out);

        let take = TS_MAX_PAYLOAD.min(rest.len());
        out.put_slice(&rest[..take]);
        rest = &rest[take..];
    }

    let partial = out.len() % TS_PACKET_SIZE;
    if partial != 0 {
        out.put_bytes(STUFFING_BYTE, TS_PACKET_SIZE - partial);
    }

    out.to_vec()
}
