//! Program Association Table (table id 0x00) decoder.

use crate::constants::TABLE_ID_PAT;
use crate::cursor::ByteCursor;
use crate::si::SiError;

/// Max program entries kept from one PAT section.
pub const MAX_SERVICES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatHeader {
    pub table_id: u8,
    pub section_syntax_indicator: bool,
    pub section_length: u16,
    pub transport_stream_id: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub section_number: u8,
    pub last_section_number: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    /// 0 marks the network (NIT) entry.
    pub program_number: u16,
    pub pid: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatTable {
    pub header: PatHeader,
    pub entries: Vec<PatEntry>,
    /// Set when the section declared more entries than [`MAX_SERVICES`];
    /// `entries` then holds the first `MAX_SERVICES` of them.
    pub capacity_exceeded: bool,
}

fn decode_header(cur: &ByteCursor<'_>) -> Result<PatHeader, SiError> {
    let table_id = cur.read_u8_at(0)?;
    if table_id != TABLE_ID_PAT {
        return Err(SiError::WrongTableId {
            expected: TABLE_ID_PAT,
            found: table_id,
        });
    }
    Ok(PatHeader {
        table_id,
        section_syntax_indicator: cur.read_bits(8, 1)? == 1,
        section_length: cur.read_bits(12, 12)? as u16,
        transport_stream_id: cur.read_u16_at(3)?,
        version_number: cur.read_bits(42, 5)? as u8,
        current_next_indicator: cur.read_bits(47, 1)? == 1,
        section_number: cur.read_u8_at(6)?,
        last_section_number: cur.read_u8_at(7)?,
    })
}

pub fn decode(section: &[u8]) -> Result<PatTable, SiError> {
    let cur = ByteCursor::new(section);
    let header = decode_header(&cur)?;

    // 8 fixed header bytes + 4 CRC bytes, minus the 3 bytes section_length
    // does not count.
    let mut parsed = 9u32;
    let mut offset = 8usize;
    let mut entries = Vec::new();
    let mut capacity_exceeded = false;

    while parsed < u32::from(header.section_length) {
        if entries.len() == MAX_SERVICES {
            capacity_exceeded = true;
            break;
        }
        let program_number = cur.read_u16_at(offset)?;
        let pid = cur.read_u16_at(offset + 2)? & 0x1FFF;
        entries.push(PatEntry {
            program_number,
            pid,
        });
        offset += 4;
        parsed += 4;
    }

    Ok(PatTable {
        header,
        entries,
        capacity_exceeded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn pat_section(entries: &[(u16, u16)]) -> Vec<u8> {
        let section_length = 9 + 4 * entries.len();
        let mut buf = vec![
            0x00,
            0xB0 | ((section_length >> 8) as u8 & 0x0F),
            section_length as u8,
            0x00,
            0x01, // transport_stream_id
            0xC0 | (5 << 1) | 0x01, // version 5, current_next 1
            0x00,
            0x00,
        ];
        for &(pn, pid) in entries {
            buf.extend_from_slice(&pn.to_be_bytes());
            buf.extend_from_slice(&(0xE000 | pid).to_be_bytes());
        }
        buf.extend_from_slice(&[0; 4]); // CRC, not inspected by the decoder
        buf
    }

    #[test]
    fn decodes_header_and_entries() {
        let buf = pat_section(&[(0, 0x0010), (1, 0x0064), (2, 0x00C8)]);
        let pat = decode(&buf).unwrap();

        assert_eq!(pat.header.table_id, 0x00);
        assert!(pat.header.section_syntax_indicator);
        assert_eq!(pat.header.section_length, 21);
        assert_eq!(pat.header.transport_stream_id, 1);
        assert_eq!(pat.header.version_number, 5);
        assert!(pat.header.current_next_indicator);
        assert_eq!(pat.header.section_number, 0);
        assert_eq!(pat.header.last_section_number, 0);

        assert_eq!(pat.entries.len(), 3);
        assert_eq!(pat.entries[1].program_number, 1);
        assert_eq!(pat.entries[1].pid, 0x0064);
        assert_eq!(pat.entries[2].pid, 0x00C8);
        assert!(!pat.capacity_exceeded);
    }

    #[test]
    fn pid_is_masked_to_13_bits() {
        let buf = pat_section(&[(7, 0x1FFF)]);
        let pat = decode(&buf).unwrap();
        assert_eq!(pat.entries[0].pid, 0x1FFF);
    }

    #[test]
    fn rejects_wrong_table_id() {
        let mut buf = pat_section(&[(1, 0x0064)]);
        buf[0] = 0x02;
        assert_matches!(
            decode(&buf),
            Err(SiError::WrongTableId { expected: 0x00, found: 0x02 })
        );
    }

    #[test]
    fn truncated_section_fails() {
        let mut buf = pat_section(&[(1, 0x0064), (2, 0x00C8)]);
        buf.truncate(10); // mid-entry
        assert_matches!(decode(&buf), Err(SiError::Truncated(_)));
    }

    #[test]
    fn overlong_entry_list_is_cut_at_capacity() {
        let entries: Vec<(u16, u16)> = (0..25).map(|i| (i as u16, 0x100 + i as u16)).collect();
        let buf = pat_section(&entries);
        let pat = decode(&buf).unwrap();
        assert_eq!(pat.entries.len(), MAX_SERVICES);
        assert!(pat.capacity_exceeded);
        assert_eq!(pat.entries[19].program_number, 19);
    }
}
