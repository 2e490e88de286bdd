//! Values exchanged between the editor and whoever performs its I/O.
//!
//! The editor never calls the backend itself. It hands out [`Request`]s and
//! is told how they went through [`Response`]s carrying the same ticket.

use std::fmt;

use pricebook_core::{CustomRowId, FieldMap, NaturalKey, RowKey};
use pricebook_storage::{ServerSnapshot, StorageError, WriteOutcome};

/// Identifies one outstanding request. The epoch changes on teardown, so a
/// response to a request issued before teardown can never match.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub(crate) seq: u64,
    pub(crate) epoch: u64,
}

impl Ticket {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ticket({}@{})", self.seq, self.epoch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CheckVersion {
        ticket: Ticket,
        row: RowKey,
    },
    Write {
        ticket: Ticket,
        row: RowKey,
        fields: FieldMap,
        captured_version: u64,
    },
    Revert {
        ticket: Ticket,
        key: NaturalKey,
    },
    DeleteCustom {
        ticket: Ticket,
        id: CustomRowId,
    },
}

impl Request {
    pub fn ticket(&self) -> Ticket {
        match self {
            Self::CheckVersion { ticket, .. }
            | Self::Write { ticket, .. }
            | Self::Revert { ticket, .. }
            | Self::DeleteCustom { ticket, .. } => *ticket,
        }
    }

    pub fn row(&self) -> RowKey {
        match self {
            Self::CheckVersion { row, .. } | Self::Write { row, .. } => row.clone(),
            Self::Revert { key, .. } => RowKey::Base(key.clone()),
            Self::DeleteCustom { id, .. } => RowKey::Custom(*id),
        }
    }
}

#[derive(Debug)]
pub enum Response {
    VersionChecked {
        ticket: Ticket,
        result: Result<Option<ServerSnapshot>, StorageError>,
    },
    Written {
        ticket: Ticket,
        result: Result<WriteOutcome, StorageError>,
    },
    Reverted {
        ticket: Ticket,
        result: Result<u64, StorageError>,
    },
    CustomDeleted {
        ticket: Ticket,
        result: Result<(), StorageError>,
    },
}

impl Response {
    pub fn ticket(&self) -> Ticket {
        match self {
            Self::VersionChecked { ticket, .. }
            | Self::Written { ticket, .. }
            | Self::Reverted { ticket, .. }
            | Self::CustomDeleted { ticket, .. } => *ticket,
        }
    }
}

/// What a completed request did to editor state.
#[derive(Debug)]
pub enum Outcome {
    Committed { row: RowKey, version: u64 },
    Conflicted { row: RowKey, server_version: u64 },
    /// The write failed; the batch is parked for retry or abandon.
    Failed { row: RowKey, error: StorageError },
    /// `version` is the tombstone version the row now sits at.
    Reverted { key: NaturalKey, version: u64 },
    CustomDeleted { id: CustomRowId },
    /// A revert or delete failed. Local state is unchanged.
    RemovalFailed { row: RowKey, error: StorageError },
    /// The response was stale or arrived after teardown and was ignored.
    Dropped,
}

impl Outcome {
    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped)
    }
}

#[derive(Debug)]
pub struct Completion {
    /// `None` when the response only advanced a commit to its next step.
    pub outcome: Option<Outcome>,
    /// Follow-up requests to perform.
    pub requests: Vec<Request>,
}

impl Completion {
    pub(crate) fn done(outcome: Outcome) -> Self {
        Self {
            outcome: Some(outcome),
            requests: Vec::new(),
        }
    }

    pub(crate) fn next(request: Request) -> Self {
        Self {
            outcome: None,
            requests: vec![request],
        }
    }

    pub(crate) fn dropped() -> Self {
        Self::done(Outcome::Dropped)
    }
}
