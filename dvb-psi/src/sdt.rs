//! SDT (Service Description Table) codec.
//!
//! The SDT is transmitted on PID 0x0011 and contains information about
//! services (channels) in a transport stream. Each service owns a
//! descriptor loop, decoded through the [`SiContext`] registry.

use bytes::{Buf, BufMut, BytesMut};
use log::{error, info, warn};

use crate::descriptors::{Descriptor, ServiceDescriptor, SiContext};
use crate::error::{PsiError, PsiResult};
use crate::psi::{decode_section, encode_section, EntryStep, SectionHeader, SectionTable};
use crate::table_id;

/// Bytes following the common header: original_network_id and a reserved byte.
pub const SDT_EXTENSION_SIZE: usize = 3;

/// Fixed part of one service entry on the wire.
pub const SDT_SERVICE_SIZE: usize = 5;

/// Largest descriptor loop a service entry can declare.
pub const MAX_DESCRIPTORS_LENGTH: usize = 0x0FFF;

/// Running status of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunningStatus {
    #[default]
    Undefined,
    NotRunning,
    StartsSoon,
    Pausing,
    Running,
    /// Values 5..=7, kept as received.
    Reserved(u8),
}

impl RunningStatus {
    pub fn from_raw(value: u8) -> Self {
        match value & 0x07 {
            0 => RunningStatus::Undefined,
            1 => RunningStatus::NotRunning,
            2 => RunningStatus::StartsSoon,
            3 => RunningStatus::Pausing,
            4 => RunningStatus::Running,
            other => RunningStatus::Reserved(other),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            RunningStatus::Undefined => 0,
            RunningStatus::NotRunning => 1,
            RunningStatus::StartsSoon => 2,
            RunningStatus::Pausing => 3,
            RunningStatus::Running => 4,
            RunningStatus::Reserved(value) => value & 0x07,
        }
    }

    /// Get running status name.
    pub fn name(self) -> &'static str {
        match self {
            RunningStatus::Undefined => "Undefined",
            RunningStatus::NotRunning => "Not running",
            RunningStatus::StartsSoon => "Starts in a few seconds",
            RunningStatus::Pausing => "Pausing",
            RunningStatus::Running => "Running",
            RunningStatus::Reserved(_) => "Reserved",
        }
    }
}

/// Service entry in the SDT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdtService {
    /// Service ID (program number).
    pub service_id: u16,
    /// Six reserved bits before the EIT flags.
    pub reserved: u8,
    /// EIT schedule flag.
    pub eit_schedule: bool,
    /// EIT present/following flag.
    pub eit_present_following: bool,
    pub running_status: RunningStatus,
    /// Free CA mode.
    pub free_ca_mode: bool,
    /// Descriptor loop bytes consumed on decode. Recomputed on encode.
    pub descriptors_length: u16,
    pub descriptors: Vec<Descriptor>,
}

impl SdtService {
    pub fn new(service_id: u16) -> Self {
        SdtService {
            service_id,
            reserved: 0x3F,
            eit_schedule: false,
            eit_present_following: false,
            running_status: RunningStatus::Running,
            free_ca_mode: false,
            descriptors_length: 0,
            descriptors: Vec::new(),
        }
    }

    /// First service descriptor of the loop.
    pub fn service_descriptor(&self) -> Option<&ServiceDescriptor> {
        self.descriptors.iter().find_map(|d| match d {
            Descriptor::Service(service) => Some(service),
            _ => None,
        })
    }

    /// Get service name (from service descriptor).
    pub fn service_name(&self) -> Option<&str> {
        self.service_descriptor().and_then(|d| d.name.as_deref())
    }

    /// Get provider name (from service descriptor).
    pub fn provider_name(&self) -> Option<&str> {
        self.service_descriptor().and_then(|d| d.provider.as_deref())
    }

    fn dump(&self) {
        info!("|- service 0x{:04x}", self.service_id);
        info!("|   EIT schedule          {}", self.eit_schedule as u8);
        info!("|   EIT present following {}", self.eit_present_following as u8);
        info!("|   free CA mode          {}", self.free_ca_mode as u8);
        info!(
            "|   running status        {} ({})",
            self.running_status.raw(),
            self.running_status.name()
        );
        info!("|   descriptor length     {}", self.descriptors_length);
        for descriptor in &self.descriptors {
            descriptor.dump();
        }
    }
}

/// Service Description Table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdtTable {
    pub header: SectionHeader,
    pub original_network_id: u16,
    pub reserved: u8,
    pub services: Vec<SdtService>,
}

impl Default for SdtTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SdtTable {
    /// Empty SDT (actual) for original network 1.
    pub fn new() -> Self {
        SdtTable {
            header: SectionHeader::new(table_id::SDT_ACTUAL),
            original_network_id: 1,
            reserved: 0xFF,
            services: Vec::new(),
        }
    }

    /// Decode a SDT section into a fresh table.
    pub fn decode(data: &[u8], ctx: &SiContext) -> PsiResult<(Self, usize)> {
        let mut sdt = SdtTable::new();
        let consumed = sdt.decode_into(data, ctx)?;
        Ok((sdt, consumed))
    }

    /// Decode a SDT section, appending its services to this table.
    pub fn decode_into(&mut self, data: &[u8], ctx: &SiContext) -> PsiResult<usize> {
        decode_section(data, self, ctx)
    }

    /// Encode the table as one section, CRC included.
    pub fn encode(&self, ctx: &SiContext) -> PsiResult<Vec<u8>> {
        encode_section(self, ctx)
    }

    /// Append a running service without descriptors.
    pub fn add_service(&mut self, service_id: u16) -> &mut SdtService {
        self.services.push(SdtService::new(service_id));
        let last = self.services.len() - 1;
        &mut self.services[last]
    }

    pub fn services(&self) -> &[SdtService] {
        &self.services
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Transport stream ID.
    pub fn transport_stream_id(&self) -> u16 {
        self.header.table_id_extension
    }

    /// Check if this is SDT actual (for current TS).
    pub fn is_actual(&self) -> bool {
        self.header.table_id == table_id::SDT_ACTUAL
    }

    /// Find service by service ID.
    pub fn find_service(&self, service_id: u16) -> Option<&SdtService> {
        self.services.iter().find(|s| s.service_id == service_id)
    }

    /// Get service name by service ID.
    pub fn service_name(&self, service_id: u16) -> Option<&str> {
        self.find_service(service_id).and_then(|s| s.service_name())
    }

    pub fn dump(&self) {
        info!("SDT");
        self.header.dump();
        info!("|- network_id          {}", self.original_network_id);
        info!("|- reserved            {}", self.reserved);
        info!("|\\  {} service(s)", self.services.len());
        for service in &self.services {
            service.dump();
        }
    }
}

impl SectionTable for SdtTable {
    type Entry = SdtService;
    type Context = SiContext;

    const NAME: &'static str = "SDT";
    const TABLE_IDS: &'static [u8] = &[table_id::SDT_ACTUAL, table_id::SDT_OTHER];
    const EXTENSION_SIZE: usize = SDT_EXTENSION_SIZE;
    const ENTRY_SIZE: usize = SDT_SERVICE_SIZE;

    fn header(&self) -> &SectionHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut SectionHeader {
        &mut self.header
    }

    fn entries(&self) -> &[SdtService] {
        &self.services
    }

    fn entries_mut(&mut self) -> &mut Vec<SdtService> {
        &mut self.services
    }

    fn read_extension(&mut self, mut ext: &[u8]) {
        self.original_network_id = ext.get_u16();
        self.reserved = ext.get_u8();
    }

    fn write_extension(&self, out: &mut BytesMut) {
        out.put_u16(self.original_network_id);
        out.put_u8(self.reserved);
    }

    fn read_entry(
        mut prefix: &[u8],
        trailing: &[u8],
        ctx: &SiContext,
    ) -> PsiResult<EntryStep<SdtService>> {
        let service_id = prefix.get_u16();
        let flags = prefix.get_u8();
        let word = prefix.get_u16();

        let mut length = (word & 0x0FFF) as usize;
        if length > trailing.len() {
            warn!(
                "SDT: service 0x{:04x} descriptors_length {} exceeds section end by {} bytes, clamped",
                service_id,
                length,
                length - trailing.len()
            );
            length = trailing.len();
        }

        let descriptors = if length > 0 {
            ctx.decode_loop(&trailing[..length])?
        } else {
            Vec::new()
        };

        Ok(EntryStep::Entry {
            entry: SdtService {
                service_id,
                reserved: flags >> 2,
                eit_schedule: flags & 0x02 != 0,
                eit_present_following: flags & 0x01 != 0,
                running_status: RunningStatus::from_raw((word >> 13) as u8),
                free_ca_mode: word & 0x1000 != 0,
                descriptors_length: length as u16,
                descriptors,
            },
            trailing: length,
        })
    }

    fn write_entry(service: &SdtService, out: &mut BytesMut, ctx: &SiContext) -> PsiResult<()> {
        out.put_u16(service.service_id);
        out.put_u8(
            (service.reserved & 0x3F) << 2
                | (service.eit_schedule as u8) << 1
                | service.eit_present_following as u8,
        );

        // loop length is patched once the descriptors are written
        let at = out.len();
        out.put_u16(0);
        let length = ctx.encode_loop(&service.descriptors, out)?;
        if length > MAX_DESCRIPTORS_LENGTH {
            error!(
                "SDT: service 0x{:04x} descriptor loop of {} bytes does not fit",
                service.service_id, length
            );
            return Err(PsiError::FieldOverflow {
                field: "descriptors_loop_length",
                value: length,
                max: MAX_DESCRIPTORS_LENGTH,
            });
        }

        let word = (service.running_status.raw() as u16) << 13
            | (service.free_ca_mode as u16) << 12
            | length as u16;
        out[at..at + 2].copy_from_slice(&word.to_be_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::crc32;

    fn section(table_id: u8, body: &[u8]) -> Vec<u8> {
        let section_length = 5 + body.len() + 4;
        let mut data = vec![
            table_id,
            0xF0 | (section_length >> 8) as u8,
            section_length as u8,
            0x7F,
            0xE1, // TSID
            0xC3,
            0x00,
            0x00,
        ];
        data.extend_from_slice(body);
        let crc = crc32(&data);
        data.extend_from_slice(&crc.to_be_bytes());
        data
    }

    fn sample_body() -> Vec<u8> {
        vec![
            // Original network ID = 0x7FE0
            0x7F, 0xE0,
            // Reserved byte
            0xFF,
            // Service entry: service_id=0x0101
            0x01, 0x01,
            // flags (EIT schedule=0, EIT p/f=1)
            0xFD,
            // running_status=4 (running), free_ca=0, descriptors_length=12
            0x80, 0x0C,
            // Service descriptor: tag=0x48, length=10
            0x48, 0x0A,
            // service_type=0x01
            0x01,
            // provider_name_length=3, "ABC"
            0x03, b'A', b'B', b'C',
            // service_name_length=4, "CH01"
            0x04, b'C', b'H', b'0', b'1',
        ]
    }

    #[test]
    fn test_parse_sdt() {
        let data = section(table_id::SDT_ACTUAL, &sample_body());
        let (sdt, consumed) = SdtTable::decode(&data, &SiContext::default()).unwrap();

        assert_eq!(consumed, data.len() - 4);
        assert_eq!(sdt.transport_stream_id(), 0x7FE1);
        assert_eq!(sdt.original_network_id, 0x7FE0);
        assert_eq!(sdt.reserved, 0xFF);
        assert!(sdt.is_actual());
        assert_eq!(sdt.len(), 1);

        let service = &sdt.services[0];
        assert_eq!(service.service_id, 0x0101);
        assert_eq!(service.reserved, 0x3F);
        assert!(!service.eit_schedule);
        assert!(service.eit_present_following);
        assert_eq!(service.running_status, RunningStatus::Running);
        assert!(!service.free_ca_mode);
        assert_eq!(service.descriptors_length, 12);

        let desc = service.service_descriptor().unwrap();
        assert_eq!(desc.service_type, 0x01);
        assert_eq!(service.provider_name(), Some("ABC"));
        assert_eq!(service.service_name(), Some("CH01"));
    }

    #[test]
    fn test_sdt_round_trip_is_byte_exact() {
        let data = section(table_id::SDT_OTHER, &sample_body());
        let ctx = SiContext::default();
        let (sdt, _) = SdtTable::decode(&data, &ctx).unwrap();
        assert!(!sdt.is_actual());
        assert_eq!(sdt.encode(&ctx).unwrap(), data);
    }

    #[test]
    fn test_descriptor_loop_clamped() {
        let mut body = sample_body();
        // declare 0x20 descriptor bytes, only 12 follow
        body[7] = 0x20;
        let data = section(table_id::SDT_ACTUAL, &body);

        let (sdt, _) = SdtTable::decode(&data, &SiContext::default()).unwrap();
        assert_eq!(sdt.services[0].descriptors_length, 12);
        assert_eq!(sdt.service_name(0x0101), Some("CH01"));
    }

    #[test]
    fn test_nested_descriptor_failure() {
        let mut body = sample_body();
        // service name length overruns the descriptor
        body[15] = 0x09;
        let data = section(table_id::SDT_ACTUAL, &body);

        let mut sdt = SdtTable::new();
        let err = sdt.decode_into(&data, &SiContext::default()).unwrap_err();
        assert!(matches!(err, PsiError::Descriptor { tag: 0x48, .. }));
        assert!(sdt.is_empty());
    }

    #[test]
    fn test_encode_recomputes_loop_length() {
        let ctx = SiContext::default();
        let mut sdt = SdtTable::new();
        sdt.original_network_id = 0x2114;
        let service = sdt.add_service(0x0401);
        service.free_ca_mode = true;
        service.descriptors_length = 99;
        service
            .descriptors
            .push(Descriptor::Service(ServiceDescriptor::new(0x19, "Example", "News")));
        sdt.add_service(0x0402).running_status = RunningStatus::Reserved(6);

        let data = sdt.encode(&ctx).unwrap();
        // first service loop: 2 + 1 + 1 + 7 + 1 + 4
        assert_eq!(&data[14..16], &[0x90, 0x10]);

        let (decoded, _) = SdtTable::decode(&data, &ctx).unwrap();
        assert_eq!(decoded.original_network_id, 0x2114);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.services[0].descriptors_length, 16);
        assert_eq!(decoded.services[0].descriptors, sdt.services[0].descriptors);
        assert!(decoded.services[0].free_ca_mode);
        assert_eq!(decoded.services[1].running_status, RunningStatus::Reserved(6));
        assert_eq!(decoded.services[1].running_status.name(), "Reserved");
    }

    #[test]
    fn test_running_status_raw() {
        for raw in 0..8 {
            assert_eq!(RunningStatus::from_raw(raw).raw(), raw);
        }
        assert_eq!(RunningStatus::from_raw(2), RunningStatus::StartsSoon);
    }
}
