//! MPEG-TS / DVB PSI codec.
//!
//! Decodes and encodes transport stream packets and the PSI/SI sections
//! carried inside them.
//!
//! # Supported Tables
//! - PAT (Program Association Table) - PID 0x0000
//! - SDT (Service Description Table) - PID 0x0011
//!
//! # Usage
//! ```
//! use dvb_psi::{PatTable, TsPacket, packetize, pid, psi_payload};
//!
//! let mut pat = PatTable::new();
//! pat.add_program(0x0100, 1);
//! let section = pat.encode().unwrap();
//!
//! // pointer_field, then the section
//! let mut payload = vec![0x00];
//! payload.extend_from_slice(&section);
//! let cells = packetize(&payload, pid::PAT, None);
//!
//! let (packet, body) = TsPacket::decode_cell(&cells).unwrap();
//! let section = psi_payload(body, packet.header.payload_unit_start).unwrap();
//! let (decoded, _) = PatTable::decode(section).unwrap();
//! assert_eq!(decoded.pmt_pid(1), Some(0x0100));
//! ```

pub mod config;
pub mod descriptors;
pub mod error;
pub mod packet;
pub mod pat;
pub mod psi;
pub mod sdt;
pub mod text;

pub use config::CodecConfig;
pub use descriptors::{
    encode_loop, Descriptor, DescriptorDecoder, DescriptorRegistry, ServiceDescriptor, SiContext,
};
pub use error::{PsiError, PsiResult};
pub use packet::{
    packetize, psi_payload, AdaptationField, TsHeader, TsPacket, SYNC_BYTE, TS_PACKET_SIZE,
};
pub use pat::{PatProgram, PatTable};
pub use psi::{
    crc32, decode_section, encode_section, verify_crc, EntryStep, SectionHeader, SectionTable,
    CRC_SIZE, MAX_SECTION_SIZE, SECTION_HEADER_SIZE,
};
pub use sdt::{RunningStatus, SdtService, SdtTable};
pub use text::{DecodedText, DvbText, TextCodec};

/// Well-known PIDs in MPEG-TS.
pub mod pid {
    /// Program Association Table PID.
    pub const PAT: u16 = 0x0000;
    /// Network Information Table (actual) PID.
    pub const NIT: u16 = 0x0010;
    /// Service Description Table (actual) PID.
    pub const SDT: u16 = 0x0011;
    /// Null packet PID (stuffing).
    pub const NULL: u16 = 0x1FFF;
}

/// Table IDs for PSI/SI tables.
pub mod table_id {
    /// Program Association Section.
    pub const PAT: u8 = 0x00;
    /// Service Description Section - actual.
    pub const SDT_ACTUAL: u8 = 0x42;
    /// Service Description Section - other.
    pub const SDT_OTHER: u8 = 0x46;
}

/// Descriptor tags used in PSI/SI tables.
pub mod descriptor_tag {
    /// Service descriptor (0x48).
    pub const SERVICE: u8 = 0x48;
}
