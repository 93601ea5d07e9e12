//! Core reconciliation runtime for Weft.
//!
//! Weft renders a declarative element tree onto externally-owned native
//! views. On every state change the runtime rebuilds the dirty subtree,
//! diffs it against the committed tree, and emits the minimal ordered
//! mutation stream to the native bridge. Diffing of large subtrees is
//! partitioned across worker threads without giving up deterministic
//! output, and all work is scheduled in interruptible, prioritized slices.

pub mod builder;
pub mod commit;
pub mod element;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod schedule;
pub mod state;
pub mod store;

mod diff;
mod worker;

pub use builder::RenderScope;
pub use commit::{CommitBatch, NativeBridge};
pub use diff::Effect;
pub use element::{prop_delta, CallbackId, Element, ElementBuilder, PropValue, Props};
pub use error::{
    BridgeError, BuildError, CoreError, Diagnostic, RenderError, RenderFailure, StoreError,
};
pub use registry::{ComponentDef, FallbackFn, Registry, RegistryBuilder, RenderFn};
pub use runtime::{
    Runtime, RuntimeConfig, RuntimeHandle, SliceOutcome, SnapshotHandle, UpdateCtx,
};
pub use schedule::{DirtyRoot, Priority, RenderRequest, WorkPhase};
pub use state::{InstanceId, StateHandle};
pub use store::{CommittedTree, NodeId, NodeRecord, NodeStore, NodeView};
