//! Payload module contract.
//!
//! The payload is the opaque heavy computation the scheduler drives. It is
//! acquired through a [`PayloadLoader`], owned through a [`PayloadHandle`] and
//! called with a [`TickContext`] describing the current tick.

use crate::error::{LoadError, PayloadFault};
use crate::host::{HostRuntime, SegmentId, TickBudget};
use crate::store::ScratchStore;

/// Result of a single call into the payload.
pub type PayloadResult = Result<(), PayloadFault>;

/// Entry points exposed by a payload module.
///
/// Only `initialize` and `tick` are mandatory; the operator-facing entry points
/// default to [`PayloadFault::Unsupported`].
pub trait Payload {
    /// One-time initialization after load.
    ///
    /// # Errors
    ///
    /// Returns a fault if initialization fails.
    fn initialize(&mut self, ctx: &mut TickContext<'_>) -> PayloadResult;

    /// Per-tick entry point.
    ///
    /// # Errors
    ///
    /// Returns a fault if the tick fails.
    fn tick(&mut self, ctx: &mut TickContext<'_>) -> PayloadResult;

    /// Re-initialize the payload's persisted state.
    ///
    /// # Errors
    ///
    /// Returns a fault if the reset fails or is unsupported.
    fn reset_state(&mut self, _ctx: &mut TickContext<'_>) -> PayloadResult {
        Err(PayloadFault::Unsupported("reset_state"))
    }

    /// Toggle a named debug flag.
    ///
    /// # Errors
    ///
    /// Returns a fault if the toggle fails or is unsupported.
    fn toggle_flag(&mut self, _ctx: &mut TickContext<'_>, _name: &str) -> PayloadResult {
        Err(PayloadFault::Unsupported("toggle_flag"))
    }

    /// Wipe the payload's internal memory.
    ///
    /// # Errors
    ///
    /// Returns a fault if the wipe fails or is unsupported.
    fn wipe_memory(&mut self, _ctx: &mut TickContext<'_>) -> PayloadResult {
        Err(PayloadFault::Unsupported("wipe_memory"))
    }

    /// Rescan the payload's logistics network.
    ///
    /// # Errors
    ///
    /// Returns a fault if the rescan fails or is unsupported.
    fn rescan_network(&mut self, _ctx: &mut TickContext<'_>) -> PayloadResult {
        Err(PayloadFault::Unsupported("rescan_network"))
    }

    /// Irreversibly tear down everything the payload controls.
    ///
    /// # Errors
    ///
    /// Returns a fault if the teardown fails or is unsupported.
    fn self_destruct(&mut self, _ctx: &mut TickContext<'_>) -> PayloadResult {
        Err(PayloadFault::Unsupported("self_destruct"))
    }
}

/// What the payload sees of the host during one call.
pub struct TickContext<'a> {
    host: &'a mut dyn HostRuntime,
    scratch: &'a mut ScratchStore,
    segment: SegmentId,
}

impl std::fmt::Debug for TickContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickContext")
            .field("time", &self.host.time())
            .field("segment", &self.segment)
            .finish_non_exhaustive()
    }
}

impl<'a> TickContext<'a> {
    /// Create a context over a host and the tick's scratch store.
    pub fn new(
        host: &'a mut dyn HostRuntime,
        scratch: &'a mut ScratchStore,
        segment: SegmentId,
    ) -> Self {
        Self {
            host,
            scratch,
            segment,
        }
    }

    /// Current tick number.
    #[must_use]
    pub fn time(&self) -> u32 {
        self.host.time()
    }

    /// Live budget snapshot.
    #[must_use]
    pub fn budget(&self) -> TickBudget {
        self.host.budget()
    }

    /// Report CPU spent.
    pub fn consume_cpu(&mut self, cpu: f64) {
        self.host.consume_cpu(cpu);
    }

    /// Ephemeral store for this tick.
    pub fn scratch(&mut self) -> &mut ScratchStore {
        &mut *self.scratch
    }

    /// Persisted segment owned by the payload.
    #[must_use]
    pub fn persisted(&self) -> Option<&[u8]> {
        self.host.segment(self.segment)
    }

    /// Explicitly write the persisted segment.
    pub fn flush_segment(&mut self, data: Vec<u8>) {
        self.host.set_segment(self.segment, data);
    }
}

/// Exclusive ownership of a loaded payload.
pub struct PayloadHandle {
    name: String,
    payload: Box<dyn Payload>,
}

impl std::fmt::Debug for PayloadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl PayloadHandle {
    /// Wrap a payload.
    pub fn new(name: impl Into<String>, payload: Box<dyn Payload>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Name the payload was loaded under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mutable access to the payload entry points.
    pub fn payload_mut(&mut self) -> &mut dyn Payload {
        self.payload.as_mut()
    }
}

/// Capability to acquire a payload.
pub trait PayloadLoader {
    /// Produce a fresh, uninitialized payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be acquired.
    fn load(&mut self) -> Result<PayloadHandle, LoadError>;
}

/// Loader for payloads compiled into the host binary.
pub struct FnLoader<F> {
    name: String,
    factory: F,
}

impl<F> std::fmt::Debug for FnLoader<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnLoader")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<F> FnLoader<F>
where
    F: FnMut() -> Result<Box<dyn Payload>, LoadError>,
{
    /// Create a loader from a factory closure.
    pub fn new(name: impl Into<String>, factory: F) -> Self {
        Self {
            name: name.into(),
            factory,
        }
    }
}

impl<F> PayloadLoader for FnLoader<F>
where
    F: FnMut() -> Result<Box<dyn Payload>, LoadError>,
{
    fn load(&mut self) -> Result<PayloadHandle, LoadError> {
        let payload = (self.factory)()?;
        Ok(PayloadHandle::new(self.name.clone(), payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Minimal;

    impl Payload for Minimal {
        fn initialize(&mut self, _ctx: &mut TickContext<'_>) -> PayloadResult {
            Ok(())
        }

        fn tick(&mut self, ctx: &mut TickContext<'_>) -> PayloadResult {
            ctx.consume_cpu(1.0);
            Ok(())
        }
    }

    #[test]
    fn test_fn_loader_names_handle() {
        let mut loader = FnLoader::new("minimal", || Ok(Box::new(Minimal) as Box<dyn Payload>));
        let handle = loader.load().unwrap();
        assert_eq!(handle.name(), "minimal");
    }

    #[test]
    fn test_fn_loader_propagates_error() {
        let mut loader = FnLoader::new("broken", || {
            Err::<Box<dyn Payload>, _>(LoadError::Rejected("no".into()))
        });
        assert!(matches!(loader.load(), Err(LoadError::Rejected(_))));
    }

    #[test]
    fn test_optional_entry_points_unsupported() {
        let mut host = crate::sim::SimHost::default();
        let mut scratch = ScratchStore::new();
        let mut ctx = TickContext::new(&mut host, &mut scratch, 0);
        let mut payload = Minimal;
        assert!(matches!(
            payload.rescan_network(&mut ctx),
            Err(PayloadFault::Unsupported("rescan_network"))
        ));
        assert!(matches!(
            payload.toggle_flag(&mut ctx, "creepsay"),
            Err(PayloadFault::Unsupported("toggle_flag"))
        ));
    }
}
