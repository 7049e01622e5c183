//! SI section decoders for the acquisition protocol (PAT / PMT / EIT p/f).

pub mod eit;
pub mod pat;
pub mod pmt;

pub use eit::{EitEvent, EitHeader, EitTable};
pub use pat::{PatEntry, PatHeader, PatTable};
pub use pmt::{EsEntry, PmtHeader, PmtTable};

use thiserror::Error;

use crate::constants::{TABLE_ID_EIT_PF, TABLE_ID_PAT, TABLE_ID_PMT};
use crate::cursor::CursorError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SiError {
    #[error("wrong table id: expected {expected:#04x}, found {found:#04x}")]
    WrongTableId { expected: u8, found: u8 },
    #[error("section truncated: {0}")]
    Truncated(#[from] CursorError),
    #[error("no decoder for table id {0:#04x}")]
    Unsupported(u8),
    #[error("empty section buffer")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Pat,
    Pmt,
    Eit,
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableKind::Pat => f.write_str("PAT"),
            TableKind::Pmt => f.write_str("PMT"),
            TableKind::Eit => f.write_str("EIT"),
        }
    }
}

/// One decoded SI table, as handed from the section callback to the
/// coordinator.
#[derive(Debug, Clone)]
pub enum Table {
    Pat(PatTable),
    Pmt(PmtTable),
    Eit(EitTable),
}

impl Table {
    pub fn kind(&self) -> TableKind {
        match self {
            Table::Pat(_) => TableKind::Pat,
            Table::Pmt(_) => TableKind::Pmt,
            Table::Eit(_) => TableKind::Eit,
        }
    }

    pub fn capacity_exceeded(&self) -> bool {
        match self {
            Table::Pat(t) => t.capacity_exceeded,
            Table::Pmt(t) => t.capacity_exceeded,
            Table::Eit(t) => t.capacity_exceeded,
        }
    }
}

/// Dispatches a raw section (byte 0 = table id) to the matching decoder.
pub fn decode_section(buf: &[u8]) -> Result<Table, SiError> {
    match buf.first().copied() {
        Some(TABLE_ID_PAT) => pat::decode(buf).map(Table::Pat),
        Some(TABLE_ID_PMT) => pmt::decode(buf).map(Table::Pmt),
        Some(TABLE_ID_EIT_PF) => eit::decode(buf).map(Table::Eit),
        Some(other) => Err(SiError::Unsupported(other)),
        None => Err(SiError::Empty),
    }
}
