//! PSI (Program Specific Information) section framework.
//!
//! Every long-form section shares the same 8-byte header, a list of
//! fixed-prefix entries bounded by `section_length`, and a CRC-32 trailer.
//! Tables plug into [`decode_section`] / [`encode_section`] through the
//! [`SectionTable`] trait.

use bytes::{Buf, BufMut, BytesMut};
use crc::{Crc, CRC_32_MPEG_2};
use log::{debug, error, info, warn};

use crate::error::{PsiError, PsiResult};

/// Size of the common long-form section header.
pub const SECTION_HEADER_SIZE: usize = 8;

/// Size of the CRC-32 trailer.
pub const CRC_SIZE: usize = 4;

/// Bytes up to and including the `section_length` field.
pub const LENGTH_FIELD_END: usize = 3;

/// Largest section (header, body and CRC) the encoder produces.
pub const MAX_SECTION_SIZE: usize = 4096;

/// Largest `section_length` value the encoder produces.
pub const MAX_SECTION_LENGTH: usize = MAX_SECTION_SIZE - LENGTH_FIELD_END;

const MPEG_2: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// PSI section header (common to all long-form PSI tables).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectionHeader {
    /// Table ID.
    pub table_id: u8,
    /// Section syntax indicator.
    pub section_syntax_indicator: bool,
    /// Private indicator ('0' in PSI tables).
    pub private_indicator: bool,
    /// Two reserved bits before `section_length`.
    pub reserved: u8,
    /// Section length (12 bits).
    pub section_length: u16,
    /// Table ID extension (transport stream id for PAT and SDT).
    pub table_id_extension: u16,
    /// Two reserved bits before `version_number`.
    pub reserved2: u8,
    /// Version number (5 bits).
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// Section number.
    pub section_number: u8,
    /// Last section number.
    pub last_section_number: u8,
}

impl SectionHeader {
    /// Header for a fresh table: syntax set, reserved bits set, current.
    pub fn new(table_id: u8) -> Self {
        SectionHeader {
            table_id,
            section_syntax_indicator: true,
            private_indicator: false,
            reserved: 0x03,
            section_length: 0,
            table_id_extension: 1,
            reserved2: 0x03,
            version_number: 0,
            current_next_indicator: true,
            section_number: 0,
            last_section_number: 0,
        }
    }

    /// Read the header. The caller guarantees `SECTION_HEADER_SIZE` bytes.
    fn read(buf: &mut &[u8]) -> Self {
        let table_id = buf.get_u8();
        let word = buf.get_u16();
        let table_id_extension = buf.get_u16();
        let flags = buf.get_u8();
        let section_number = buf.get_u8();
        let last_section_number = buf.get_u8();

        SectionHeader {
            table_id,
            section_syntax_indicator: word & 0x8000 != 0,
            private_indicator: word & 0x4000 != 0,
            reserved: ((word >> 12) & 0x03) as u8,
            section_length: word & 0x0FFF,
            table_id_extension,
            reserved2: (flags >> 6) & 0x03,
            version_number: (flags >> 1) & 0x1F,
            current_next_indicator: flags & 0x01 != 0,
            section_number,
            last_section_number,
        }
    }

    fn length_word(&self, section_length: u16) -> u16 {
        (self.section_syntax_indicator as u16) << 15
            | (self.private_indicator as u16) << 14
            | (self.reserved as u16 & 0x03) << 12
            | (section_length & 0x0FFF)
    }

    fn write(&self, out: &mut BytesMut, section_length: u16) {
        out.put_u8(self.table_id);
        out.put_u16(self.length_word(section_length));
        out.put_u16(self.table_id_extension);
        out.put_u8(
            (self.reserved2 & 0x03) << 6
                | (self.version_number & 0x1F) << 1
                | self.current_next_indicator as u8,
        );
        out.put_u8(self.section_number);
        out.put_u8(self.last_section_number);
    }

    pub fn dump(&self) {
        info!("| table_id         0x{:02x}", self.table_id);
        info!("| section_length      {}", self.section_length);
        info!("| one                 {}", self.reserved);
        info!("| zero                {}", self.private_indicator as u8);
        info!("| syntax              {}", self.section_syntax_indicator as u8);
        info!("| transport_stream_id {}", self.table_id_extension);
        info!("| current_next        {}", self.current_next_indicator as u8);
        info!("| version             {}", self.version_number);
        info!("| one2                {}", self.reserved2);
        info!("| section_number      {}", self.section_number);
        info!("| last_section_number {}", self.last_section_number);
    }
}

/// Outcome of decoding one entry prefix.
#[derive(Debug)]
pub enum EntryStep<E> {
    /// A decoded entry and the number of trailing bytes it consumed.
    Entry { entry: E, trailing: usize },
    /// Entry list terminator; the prefix is consumed and decoding stops.
    Stop,
}

/// A table carried in long-form PSI sections.
pub trait SectionTable {
    /// Entry type of the table's main loop.
    type Entry;
    /// Extra state needed to decode and encode entries.
    type Context: ?Sized;

    /// Name used in diagnostics.
    const NAME: &'static str;
    /// Accepted table ids.
    const TABLE_IDS: &'static [u8];
    /// Table-specific fixed bytes following the common header.
    const EXTENSION_SIZE: usize = 0;
    /// Fixed prefix size of one entry.
    const ENTRY_SIZE: usize;

    fn header(&self) -> &SectionHeader;
    fn header_mut(&mut self) -> &mut SectionHeader;
    fn entries(&self) -> &[Self::Entry];
    fn entries_mut(&mut self) -> &mut Vec<Self::Entry>;

    /// Decode the table-specific fixed bytes (exactly `EXTENSION_SIZE`).
    fn read_extension(&mut self, _ext: &[u8]) {}

    /// Encode the table-specific fixed bytes.
    fn write_extension(&self, _out: &mut BytesMut) {}

    /// Decode one entry from its fixed `prefix`; `trailing` holds the rest of
    /// the section body.
    fn read_entry(
        prefix: &[u8],
        trailing: &[u8],
        ctx: &Self::Context,
    ) -> PsiResult<EntryStep<Self::Entry>>;

    /// Encode one entry.
    fn write_entry(entry: &Self::Entry, out: &mut BytesMut, ctx: &Self::Context)
        -> PsiResult<()>;
}

/// Decode one section into `table`, appending to its entry list.
///
/// Returns the number of bytes consumed (header plus entries, never the CRC
/// or anything beyond `section_length`).
pub fn decode_section<T: SectionTable>(
    data: &[u8],
    table: &mut T,
    ctx: &T::Context,
) -> PsiResult<usize> {
    let fixed = SECTION_HEADER_SIZE + T::EXTENSION_SIZE;
    if data.len() < fixed {
        error!("{}: short read {}/{} bytes", T::NAME, data.len(), fixed);
        return Err(PsiError::truncated(T::NAME, fixed, data.len()));
    }

    if !T::TABLE_IDS.contains(&data[0]) {
        error!(
            "{}: invalid marker 0x{:02x}, should be one of {:02x?}",
            T::NAME,
            data[0],
            T::TABLE_IDS
        );
        return Err(PsiError::WrongMarker {
            context: T::NAME,
            found: data[0],
            expected: T::TABLE_IDS.to_vec(),
        });
    }

    let mut buf = data;
    let header = SectionHeader::read(&mut buf);

    // plus header, minus CRC
    let section_end = (header.section_length as usize + LENGTH_FIELD_END).saturating_sub(CRC_SIZE);
    if section_end > data.len() {
        error!("{}: short read {}/{} bytes", T::NAME, data.len(), section_end);
        return Err(PsiError::truncated(T::NAME, section_end, data.len()));
    }
    if section_end < fixed {
        error!(
            "{}: section_length {} too small for a {} byte header",
            T::NAME,
            header.section_length,
            fixed
        );
        return Err(PsiError::truncated(T::NAME, fixed, section_end));
    }

    *table.header_mut() = header;
    table.read_extension(&data[SECTION_HEADER_SIZE..fixed]);

    let mut body = &data[fixed..section_end];
    let mut decoded = 0usize;
    while body.len() >= T::ENTRY_SIZE {
        let (prefix, trailing) = body.split_at(T::ENTRY_SIZE);
        match T::read_entry(prefix, trailing, ctx)? {
            EntryStep::Stop => {
                body = trailing;
                break;
            }
            EntryStep::Entry { entry, trailing: used } => {
                let entries = table.entries_mut();
                if entries.try_reserve(1).is_err() {
                    error!("{}: out of memory", T::NAME);
                    return Err(PsiError::AllocationFailure { context: T::NAME });
                }
                entries.push(entry);
                body = &trailing[used..];
                decoded += 1;
            }
        }
    }

    if !body.is_empty() {
        warn!("{}: {} spurious bytes at the end", T::NAME, body.len());
    }

    debug!(
        "{}: table 0x{:02x} section {}/{}: {} entries (total {})",
        T::NAME,
        header.table_id,
        header.section_number,
        header.last_section_number,
        decoded,
        table.entries().len()
    );

    Ok(section_end - body.len())
}

/// Encode `table` as one section with a freshly computed length and CRC.
pub fn encode_section<T: SectionTable>(table: &T, ctx: &T::Context) -> PsiResult<Vec<u8>> {
    let mut out = BytesMut::with_capacity(MAX_SECTION_SIZE);

    // length is patched once the body is known
    table.header().write(&mut out, 0);
    table.write_extension(&mut out);
    for entry in table.entries() {
        T::write_entry(entry, &mut out, ctx)?;
    }

    let section_length = out.len() + CRC_SIZE - LENGTH_FIELD_END;
    if section_length > MAX_SECTION_LENGTH {
        error!(
            "{}: section too large ({} bytes)",
            T::NAME,
            section_length + LENGTH_FIELD_END
        );
        return Err(PsiError::FieldOverflow {
            field: "section_length",
            value: section_length,
            max: MAX_SECTION_LENGTH,
        });
    }
    let word = table.header().length_word(section_length as u16);
    out[1..LENGTH_FIELD_END].copy_from_slice(&word.to_be_bytes());

    let crc = crc32(&out);
    out.put_u32(crc);

    Ok(out.to_vec())
}

/// CRC-32/MPEG-2 (polynomial 0x04C11DB7, init 0xFFFFFFFF, no reflection,
/// no final XOR).
pub fn crc32(data: &[u8]) -> u32 {
    MPEG_2.checksum(data)
}

/// Check the CRC trailer of a complete section starting at `table_id`.
pub fn verify_crc(section: &[u8]) -> bool {
    if section.len() < LENGTH_FIELD_END {
        return false;
    }
    let section_length = ((section[1] as usize & 0x0F) << 8) | section[2] as usize;
    let total = LENGTH_FIELD_END + section_length;
    if section_length < CRC_SIZE || section.len() < total {
        return false;
    }

    let mut trailer = &section[total - CRC_SIZE..total];
    crc32(&section[..total - CRC_SIZE]) == trailer.get_u32()
}
