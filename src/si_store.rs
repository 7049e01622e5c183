//! Ownership of the most recently decoded SI tables.
//!
//! The coordinator worker is the sole writer; the section callback never
//! touches this.

use crate::constants::RUNNING_STATUS_RUNNING;
use crate::si::{EitEvent, EitTable, PatEntry, PatTable, PmtTable, Table};

#[derive(Default)]
pub struct SiStore {
    pat: Option<PatTable>,
    pmt: Option<PmtTable>,
    eit: Option<EitTable>,
}

impl SiStore {
    pub fn absorb(&mut self, table: Table) {
        match table {
            Table::Pat(t) => self.pat = Some(t),
            Table::Pmt(t) => self.pmt = Some(t),
            Table::Eit(t) => self.eit = Some(t),
        }
    }

    /// Drops the per-channel tables ahead of a re-acquisition; the PAT stays
    /// valid until the fresh one arrives.
    pub fn invalidate_channel_tables(&mut self) {
        self.pmt = None;
        self.eit = None;
    }

    pub fn pat(&self) -> Option<&PatTable> {
        self.pat.as_ref()
    }

    pub fn pmt(&self) -> Option<&PmtTable> {
        self.pmt.as_ref()
    }

    /// Total PAT entries, the reserved network entry included.
    pub fn service_count(&self) -> usize {
        self.pat.as_ref().map_or(0, |p| p.entries.len())
    }

    /// PAT entry for a channel index. Entry 0 carries the NIT pid, so
    /// channel `n` maps to entry `n + 1`.
    pub fn entry_for_channel(&self, channel: u16) -> Option<PatEntry> {
        self.pat
            .as_ref()
            .and_then(|p| p.entries.get(channel as usize + 1))
            .copied()
    }

    /// First event of the stored EIT, if it belongs to `service_id` and is
    /// running right now.
    pub fn running_event(&self, service_id: u16) -> Option<&EitEvent> {
        let eit = self.eit.as_ref()?;
        if eit.header.service_id != service_id {
            return None;
        }
        eit.events
            .first()
            .filter(|ev| ev.running_status == RUNNING_STATUS_RUNNING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::si::{EitHeader, PatHeader};

    fn pat(entries: &[(u16, u16)]) -> PatTable {
        PatTable {
            header: PatHeader {
                table_id: 0x00,
                section_syntax_indicator: true,
                section_length: 0,
                transport_stream_id: 1,
                version_number: 0,
                current_next_indicator: true,
                section_number: 0,
                last_section_number: 0,
            },
            entries: entries
                .iter()
                .map(|&(program_number, pid)| PatEntry {
                    program_number,
                    pid,
                })
                .collect(),
            capacity_exceeded: false,
        }
    }

    fn eit(service_id: u16, running_status: u8) -> EitTable {
        EitTable {
            header: EitHeader {
                table_id: 0x4E,
                section_syntax_indicator: true,
                section_length: 0,
                service_id,
                version_number: 0,
                current_next_indicator: true,
                section_number: 0,
                last_section_number: 0,
                transport_stream_id: 1,
                original_network_id: 1,
                segment_last_section_number: 0,
                last_table_id: 0x4E,
            },
            events: vec![EitEvent {
                event_id: 1,
                start_time: 0x1230,
                running_status,
                scrambled: false,
                descriptors_loop_length: 0,
                name: Some("News".into()),
            }],
            capacity_exceeded: false,
        }
    }

    #[test]
    fn channel_index_skips_the_network_entry() {
        let mut store = SiStore::default();
        store.absorb(Table::Pat(pat(&[(0, 0x10), (1, 100), (2, 200)])));

        assert_eq!(store.service_count(), 3);
        let entry = store.entry_for_channel(0).unwrap();
        assert_eq!((entry.program_number, entry.pid), (1, 100));
        let entry = store.entry_for_channel(1).unwrap();
        assert_eq!((entry.program_number, entry.pid), (2, 200));
        assert!(store.entry_for_channel(2).is_none());
    }

    #[test]
    fn running_event_requires_matching_service_and_status() {
        let mut store = SiStore::default();
        store.absorb(Table::Eit(eit(7, RUNNING_STATUS_RUNNING)));
        assert!(store.running_event(7).is_some());
        assert!(store.running_event(8).is_none());

        store.absorb(Table::Eit(eit(7, 0x01)));
        assert!(store.running_event(7).is_none());
    }

    #[test]
    fn invalidation_keeps_the_pat() {
        let mut store = SiStore::default();
        store.absorb(Table::Pat(pat(&[(0, 0x10), (1, 100)])));
        store.absorb(Table::Eit(eit(1, RUNNING_STATUS_RUNNING)));
        store.invalidate_channel_tables();
        assert!(store.pat().is_some());
        assert!(store.running_event(1).is_none());
    }
}
