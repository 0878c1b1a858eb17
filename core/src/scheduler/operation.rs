//! Operation handles attached to queued work for introspection

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// What kind of operation a handle stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// The root future of a routine
    Routine,
    /// A child future spawned onto a scheduling context
    Task,
    Activity,
    Timer,
    Signal,
    /// Anything else the host wants to track
    External,
}

/// Identity of an in-flight operation
///
/// Cheap to clone. Ids are unique within the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OperationHandle {
    id: u64,
    kind: OperationKind,
    label: Option<Arc<str>>,
}

impl OperationHandle {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            id: NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            label: None,
        }
    }

    pub fn with_label(kind: OperationKind, label: impl Into<Arc<str>>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::new(kind)
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{:?}#{}({})", self.kind, self.id, label),
            None => write!(f, "{:?}#{}", self.kind, self.id),
        }
    }
}
