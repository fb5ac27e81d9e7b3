//! PAT (Program Association Table) codec.
//!
//! The PAT is transmitted on PID 0x0000 and maps program numbers to the PID
//! carrying each program's PMT (or the NIT for program number 0).

use bytes::{Buf, BufMut, BytesMut};
use log::info;

use crate::error::PsiResult;
use crate::psi::{decode_section, encode_section, EntryStep, SectionHeader, SectionTable};
use crate::{pid, table_id};

/// Size of one program entry on the wire.
pub const PAT_PROGRAM_SIZE: usize = 4;

/// A single PAT entry (program number and PMT PID).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatProgram {
    /// Program number (0 = NIT, others = service).
    pub program_number: u16,
    /// Three reserved bits before the PID.
    pub reserved: u8,
    /// PID of the PMT for this program (or NIT PID if program_number = 0).
    pub pid: u16,
}

/// Program Association Table.
///
/// Decoding appends to [`PatTable::programs`], so the sections of a
/// multi-section PAT can be merged by decoding them into the same table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatTable {
    pub header: SectionHeader,
    pub programs: Vec<PatProgram>,
}

impl Default for PatTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PatTable {
    /// Empty PAT with a current, version 0 header.
    pub fn new() -> Self {
        PatTable {
            header: SectionHeader::new(table_id::PAT),
            programs: Vec::new(),
        }
    }

    /// Decode a PAT section into a fresh table.
    pub fn decode(data: &[u8]) -> PsiResult<(Self, usize)> {
        let mut pat = PatTable::new();
        let consumed = pat.decode_into(data)?;
        Ok((pat, consumed))
    }

    /// Decode a PAT section, appending its programs to this table.
    pub fn decode_into(&mut self, data: &[u8]) -> PsiResult<usize> {
        decode_section(data, self, &())
    }

    /// Encode the table as one section, CRC included.
    pub fn encode(&self) -> PsiResult<Vec<u8>> {
        encode_section(self, &())
    }

    /// Append a program entry.
    pub fn add_program(&mut self, pid: u16, program_number: u16) -> &mut PatProgram {
        self.programs.push(PatProgram {
            program_number,
            reserved: 0x07,
            pid: pid & 0x1FFF,
        });
        let last = self.programs.len() - 1;
        &mut self.programs[last]
    }

    pub fn programs(&self) -> &[PatProgram] {
        &self.programs
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Transport stream ID.
    pub fn transport_stream_id(&self) -> u16 {
        self.header.table_id_extension
    }

    /// Get PMT PID for a specific program number.
    pub fn pmt_pid(&self, program_number: u16) -> Option<u16> {
        self.programs
            .iter()
            .find(|p| p.program_number == program_number && program_number != 0)
            .map(|p| p.pid)
    }

    /// NIT PID, if the table carries program number 0.
    pub fn nit_pid(&self) -> Option<u16> {
        self.programs
            .iter()
            .find(|p| p.program_number == 0)
            .map(|p| p.pid)
    }

    pub fn dump(&self) {
        info!("PAT");
        self.header.dump();
        info!("|\\  {} program(s)", self.programs.len());
        for program in &self.programs {
            info!(
                "|- program 0x{:04x}  ->  service 0x{:04x}",
                program.pid, program.program_number
            );
        }
    }
}

impl SectionTable for PatTable {
    type Entry = PatProgram;
    type Context = ();

    const NAME: &'static str = "PAT";
    const TABLE_IDS: &'static [u8] = &[table_id::PAT];
    const ENTRY_SIZE: usize = PAT_PROGRAM_SIZE;

    fn header(&self) -> &SectionHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut SectionHeader {
        &mut self.header
    }

    fn entries(&self) -> &[PatProgram] {
        &self.programs
    }

    fn entries_mut(&mut self) -> &mut Vec<PatProgram> {
        &mut self.programs
    }

    fn read_entry(
        mut prefix: &[u8],
        _trailing: &[u8],
        _ctx: &(),
    ) -> PsiResult<EntryStep<PatProgram>> {
        let program_number = prefix.get_u16();
        let word = prefix.get_u16();
        let pid = word & 0x1FFF;

        // null PID terminates the list
        if pid == pid::NULL {
            return Ok(EntryStep::Stop);
        }

        Ok(EntryStep::Entry {
            entry: PatProgram {
                program_number,
                reserved: (word >> 13) as u8,
                pid,
            },
            trailing: 0,
        })
    }

    fn write_entry(program: &PatProgram, out: &mut BytesMut, _ctx: &()) -> PsiResult<()> {
        out.put_u16(program.program_number);
        out.put_u16((program.reserved as u16 & 0x07) << 13 | (program.pid & 0x1FFF));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PsiError;
    use crate::psi::verify_crc;

    fn section(programs: &[u8]) -> Vec<u8> {
        let section_length = 5 + programs.len() + 4;
        let mut data = vec![
            table_id::PAT,
            0xB0 | (section_length >> 8) as u8,
            section_length as u8,
            0x12,
            0x34, // TSID
            0xC3, // version 1, current
            0x00,
            0x00,
        ];
        data.extend_from_slice(programs);
        let crc = crate::psi::crc32(&data);
        data.extend_from_slice(&crc.to_be_bytes());
        data
    }

    #[test]
    fn test_parse_pat() {
        let data = section(&[
            // Program 1: number=0x0101, PID=0x0100
            0x01, 0x01, 0xE1, 0x00,
            // Program 2: number=0x0102, PID=0x0200
            0x01, 0x02, 0xE2, 0x00,
        ]);

        let (pat, consumed) = PatTable::decode(&data).unwrap();

        assert_eq!(consumed, 16);
        assert_eq!(pat.transport_stream_id(), 0x1234);
        assert_eq!(pat.header.version_number, 1);
        assert_eq!(pat.len(), 2);
        assert_eq!(pat.programs[0].program_number, 0x0101);
        assert_eq!(pat.programs[0].pid, 0x0100);
        assert_eq!(pat.programs[0].reserved, 0x07);
        assert_eq!(pat.programs[1].program_number, 0x0102);
        assert_eq!(pat.programs[1].pid, 0x0200);
        assert_eq!(pat.pmt_pid(0x0102), Some(0x0200));
    }

    #[test]
    fn test_pat_with_nit() {
        let data = section(&[
            // NIT: number=0x0000, PID=0x0010
            0x00, 0x00, 0xE0, 0x10,
            // Program 1: number=0x0101, PID=0x0100
            0x01, 0x01, 0xE1, 0x00,
        ]);

        let (pat, _) = PatTable::decode(&data).unwrap();

        assert_eq!(pat.nit_pid(), Some(0x0010));
        assert_eq!(pat.pmt_pid(0), None);
        assert_eq!(pat.len(), 2);
    }

    #[test]
    fn test_null_pid_stops_decoding() {
        let data = section(&[
            0x00, 0x01, 0xE1, 0x00,
            0x00, 0x02, 0xFF, 0xFF, // null PID
            0x00, 0x03, 0xE3, 0x00,
        ]);

        let (pat, consumed) = PatTable::decode(&data).unwrap();
        assert_eq!(pat.len(), 1);
        assert_eq!(pat.programs[0].program_number, 1);
        assert_eq!(consumed, 8 + 8);
    }

    #[test]
    fn test_wrong_table_id() {
        let mut data = section(&[0x00, 0x01, 0xE1, 0x00]);
        data[0] = table_id::SDT_ACTUAL;
        let err = PatTable::decode(&data).unwrap_err();
        assert_eq!(
            err,
            PsiError::WrongMarker {
                context: "PAT",
                found: table_id::SDT_ACTUAL,
                expected: vec![table_id::PAT],
            }
        );
    }

    #[test]
    fn test_encode_round_trip() {
        let mut pat = PatTable::new();
        pat.header.table_id_extension = 0x7FE1;
        pat.header.version_number = 3;
        pat.add_program(0x0010, 0);
        pat.add_program(0x01F0, 0x0400);
        pat.add_program(0x1FC8, 0x0401);

        let data = pat.encode().unwrap();
        assert_eq!(data.len(), 8 + 3 * PAT_PROGRAM_SIZE + 4);
        assert_eq!(&data[..3], &[0x00, 0xB0, 0x15]);
        assert!(verify_crc(&data));

        let (decoded, _) = PatTable::decode(&data).unwrap();
        assert_eq!(decoded.programs, pat.programs);
        assert_eq!(decoded.header.version_number, 3);
        assert_eq!(decoded.header.section_length, 0x15);
    }

    #[test]
    fn test_add_program_masks_pid() {
        let mut pat = PatTable::new();
        let program = pat.add_program(0xFFFF, 7);
        assert_eq!(program.pid, 0x1FFF);
        program.pid = 0x0100;
        assert_eq!(pat.programs()[0].pid, 0x0100);
    }
}
