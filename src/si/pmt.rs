//! Program Map Table (table id 0x02) decoder.
//!
//! Program-level and stream-level descriptors are skipped verbatim; the
//! decoder returns the raw elementary-stream list and leaves audio/video
//! classification to the caller.

use crate::constants::TABLE_ID_PMT;
use crate::cursor::ByteCursor;
use crate::si::SiError;

/// Max elementary-stream entries kept from one PMT section.
pub const MAX_STREAMS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtHeader {
    pub table_id: u8,
    pub section_syntax_indicator: bool,
    pub section_length: u16,
    pub program_number: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    pub pcr_pid: u16,
    pub program_info_length: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EsEntry {
    pub stream_type: u8,
    pub elementary_pid: u16,
    pub es_info_length: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtTable {
    pub header: PmtHeader,
    pub streams: Vec<EsEntry>,
    /// Set when the section declared more streams than [`MAX_STREAMS`].
    pub capacity_exceeded: bool,
}

fn decode_header(cur: &ByteCursor<'_>) -> Result<PmtHeader, SiError> {
    let table_id = cur.read_u8_at(0)?;
    if table_id != TABLE_ID_PMT {
        return Err(SiError::WrongTableId {
            expected: TABLE_ID_PMT,
            found: table_id,
        });
    }
    Ok(PmtHeader {
        table_id,
        section_syntax_indicator: cur.read_bits(8, 1)? == 1,
        section_length: cur.read_bits(12, 12)? as u16,
        program_number: cur.read_u16_at(3)?,
        version_number: cur.read_bits(42, 5)? as u8,
        current_next_indicator: cur.read_bits(47, 1)? == 1,
        section_number: cur.read_u8_at(6)?,
        last_section_number: cur.read_u8_at(7)?,
        pcr_pid: cur.read_u16_at(8)? & 0x1FFF,
        program_info_length: cur.read_u16_at(10)? & 0x0FFF,
    })
}

pub fn decode(section: &[u8]) -> Result<PmtTable, SiError> {
    let cur = ByteCursor::new(section);
    let header = decode_header(&cur)?;

    // 12 fixed header bytes + skipped program descriptors + 4 CRC bytes,
    // minus the 3 bytes section_length does not count.
    let mut parsed = 13u32 + u32::from(header.program_info_length);
    let mut offset = 12usize + header.program_info_length as usize;
    let mut streams = Vec::new();
    let mut capacity_exceeded = false;

    while parsed < u32::from(header.section_length) {
        if streams.len() == MAX_STREAMS {
            capacity_exceeded = true;
            break;
        }
        let stream_type = cur.read_u8_at(offset)?;
        let elementary_pid = cur.read_u16_at(offset + 1)? & 0x1FFF;
        let es_info_length = cur.read_u16_at(offset + 3)? & 0x0FFF;
        streams.push(EsEntry {
            stream_type,
            elementary_pid,
            es_info_length,
        });
        // stream-level descriptors skipped without decoding
        offset += 5 + es_info_length as usize;
        parsed += 5 + u32::from(es_info_length);
    }

    Ok(PmtTable {
        header,
        streams,
        capacity_exceeded,
    })
}
