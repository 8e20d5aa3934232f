//! Operation identity, kind and phase.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, FromRepr};

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transfer operation.
///
/// Ids are allocated from a process-wide counter and never reused while the
/// process lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub u64);

impl OperationId {
    /// Allocate the next id.
    pub fn next() -> Self {
        Self(NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id value.
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

impl std::str::FromStr for OperationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("op-").unwrap_or(s).parse().map(Self)
    }
}

/// What an operation does.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "lowercase")]
pub enum OperationKind {
    Copy,
    Move,
    Delete,
}

impl OperationKind {
    /// Present-participle verb used in log lines and progress output.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Copy => "Copying",
            Self::Move => "Moving",
            Self::Delete => "Deleting",
        }
    }
}

/// Stage an operation is in. Phases only move forward.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    FromRepr,
)]
#[repr(u8)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    /// Walking sources and counting work.
    #[default]
    Scanning = 0,
    /// Moving bytes or entries.
    Transferring = 1,
    /// Promoting staged items, removing emptied directories.
    Finalizing = 2,
}

impl Phase {
    /// Encode for storage in an atomic.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode from an atomic, falling back to `Scanning` for unknown values.
    #[inline]
    pub fn from_u8(value: u8) -> Self {
        Self::from_repr(value).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_ids_are_unique() {
        let a = OperationId::next();
        let b = OperationId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_operation_id_display_and_parse() {
        let id = OperationId(42);
        assert_eq!(id.to_string(), "op-42");
        assert_eq!("op-42".parse::<OperationId>().unwrap(), id);
        assert_eq!("42".parse::<OperationId>().unwrap(), id);
        assert!("op-x".parse::<OperationId>().is_err());
    }

    #[test]
    fn test_phase_ordering_and_repr() {
        assert!(Phase::Scanning < Phase::Transferring);
        assert!(Phase::Transferring < Phase::Finalizing);
        assert_eq!(Phase::from_u8(Phase::Finalizing.as_u8()), Phase::Finalizing);
        assert_eq!(Phase::from_u8(200), Phase::Scanning);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("move".parse::<OperationKind>().unwrap(), OperationKind::Move);
        assert_eq!(OperationKind::Delete.to_string(), "delete");
    }
}
