//! Drive-to-idle harness and bridge fixtures.

use weft_bridge::RecordingBridge;
use weft_core::{
    BridgeError, CommitBatch, Effect, Element, NativeBridge, Priority, Registry, Runtime,
    RuntimeConfig,
};

/// Deterministic config for tests: a single worker thread and a slice
/// budget large enough that pauses only happen when a test forces them.
pub fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        workers: 1,
        ..RuntimeConfig::default()
    }
}

/// Owns a runtime over a [`RecordingBridge`] and drives it to quiescence,
/// returning the effects each step produced.
pub struct TestHarness {
    runtime: Runtime<RecordingBridge>,
    seen_batches: usize,
}

impl TestHarness {
    pub fn new(registry: Registry) -> Self {
        Self::with_config(registry, test_config())
    }

    pub fn with_config(registry: Registry, config: RuntimeConfig) -> Self {
        Self {
            runtime: Runtime::with_config(registry, RecordingBridge::new(), config),
            seen_batches: 0,
        }
    }

    pub fn runtime(&mut self) -> &mut Runtime<RecordingBridge> {
        &mut self.runtime
    }

    /// Mounts the element and returns the initial commit's effects.
    pub fn mount(&mut self, element: Element) -> Vec<Effect> {
        self.runtime.mount(element);
        self.drive()
    }

    /// Replaces the root element and returns the resulting effects.
    pub fn set_root(&mut self, element: Element) -> Vec<Effect> {
        self.runtime.update_root(element, Priority::DataUpdate);
        self.drive()
    }

    /// Runs until idle and returns effects committed since the last call.
    pub fn drive(&mut self) -> Vec<Effect> {
        self.runtime
            .run_until_idle()
            .expect("runtime drive failed");
        let batches = self.runtime.bridge().batches();
        let fresh: Vec<Effect> = batches[self.seen_batches..]
            .iter()
            .flat_map(|batch| batch.effects.iter().cloned())
            .collect();
        self.seen_batches = batches.len();
        fresh
    }

    /// Every batch the bridge has received so far.
    pub fn batches(&self) -> Vec<CommitBatch> {
        self.runtime.bridge().batches().to_vec()
    }
}

/// Compact op names for asserting effect shapes.
pub fn ops(effects: &[Effect]) -> Vec<&'static str> {
    effects
        .iter()
        .map(|effect| match effect {
            Effect::Create { .. } => "create",
            Effect::Update { .. } => "update",
            Effect::Delete { .. } => "delete",
            Effect::Move { .. } => "move",
        })
        .collect()
}

/// Bridge that rejects the first `n` batches before behaving like a
/// [`RecordingBridge`]. Exercises the commit retry path.
#[derive(Debug, Default)]
pub struct FlakyBridge {
    inner: RecordingBridge,
    fail_remaining: u32,
}

impl FlakyBridge {
    pub fn failing(times: u32) -> Self {
        Self {
            inner: RecordingBridge::new(),
            fail_remaining: times,
        }
    }

    pub fn inner(&self) -> &RecordingBridge {
        &self.inner
    }
}

impl NativeBridge for FlakyBridge {
    fn apply(&mut self, batch: &CommitBatch) -> Result<(), BridgeError> {
        if self.fail_remaining > 0 {
            self.fail_remaining -= 1;
            let node = batch.effects.first().map(Effect::node);
            return Err(BridgeError::new(0, node, "injected bridge failure"));
        }
        self.inner.apply(batch)
    }
}
