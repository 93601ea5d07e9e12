//! Error and diagnostic types for the reconciliation core.

use std::sync::Arc;

use thiserror::Error;

use crate::schedule::{DirtyRoot, Priority};
use crate::state::InstanceId;
use crate::store::NodeId;

/// Failure raised by component render logic. Carried to the nearest error
/// boundary, or escalated to abort the in-flight generation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RenderError {
    message: String,
}

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Context handed to an error boundary's fallback function.
#[derive(Debug, Clone)]
pub struct RenderFailure {
    /// Component tag whose render failed.
    pub tag: Arc<str>,
    /// The render error itself.
    pub error: RenderError,
    /// Committed node at the failing subtree root, when one exists.
    pub node: Option<NodeId>,
}

/// Failure during a tree-builder pass.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    /// A component render failed and no boundary on the path recovered it.
    #[error("render of `{}` failed: {}", .0.tag, .0.error)]
    Render(RenderFailure),
    /// A hook asked for a different type than the cell holds. This is a
    /// programming error in the component: hook order must be stable.
    #[error("hook {index} of `{tag}` holds a different type than requested")]
    HookTypeMismatch { tag: Arc<str>, index: usize },
}

/// Arena lookup failure.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("node {0:?} is missing")]
    MissingNode(NodeId),
    #[error("instance {0:?} is missing")]
    MissingInstance(InstanceId),
}

/// Failure reported by the native bridge while applying an effect batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("bridge rejected effect {index} (node {node:?}): {message}")]
pub struct BridgeError {
    /// Index of the failing effect within the batch.
    pub index: usize,
    /// Node the failing effect addressed, when known.
    pub node: Option<NodeId>,
    pub message: String,
}

impl BridgeError {
    pub fn new(index: usize, node: Option<NodeId>, message: impl Into<String>) -> Self {
        Self {
            index,
            node,
            message: message.into(),
        }
    }
}

/// Umbrella error surfaced by the runtime API.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A commit batch kept failing past the retry ceiling. The committed
    /// tree remains the source of truth; the subtree is in an error state.
    #[error("commit for {root:?} failed after {attempts} attempts: {source}")]
    CommitFailed {
        root: DirtyRoot,
        attempts: u32,
        source: BridgeError,
    },
    #[error("diff worker pool disconnected")]
    PoolDisconnected,
}

/// Non-fatal condition recorded during reconciliation. Diagnostics never
/// abort a pass; they are surfaced through the runtime and the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Two siblings carried the same key. The first occurrence won the
    /// match; the rest were treated as unmatched.
    DuplicateKey { parent_tag: Arc<str>, key: Arc<str> },
    /// The request queue exceeded its bound and this request was dropped.
    RequestDropped { root: DirtyRoot, priority: Priority },
    /// A commit batch was rejected by the bridge and will be retried.
    CommitRetry { root: DirtyRoot, attempt: u32 },
}
