//! Host runtime contract.
//!
//! The host invokes the scheduler once per tick, owns CPU accounting and the
//! persisted store, and can halt the whole execution environment.

use serde::{Deserialize, Serialize};

/// Identifier of a persisted storage segment.
pub type SegmentId = u8;

/// CPU allowance for the current tick, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TickBudget {
    /// CPU used so far this tick.
    pub used: f64,
    /// Hard CPU limit for this tick; the host kills the tick past this point.
    pub limit: f64,
    /// Accumulated CPU reserve.
    pub bucket: u32,
}

impl TickBudget {
    /// CPU still available before the hard limit.
    #[must_use]
    pub fn headroom(&self) -> f64 {
        (self.limit - self.used).max(0.0)
    }
}

/// The platform that drives the scheduler.
pub trait HostRuntime {
    /// Current tick number.
    fn time(&self) -> u32;

    /// Budget snapshot for the current tick.
    fn budget(&self) -> TickBudget;

    /// Account CPU spent by the payload.
    ///
    /// Hosts that meter CPU on their own ignore this.
    fn consume_cpu(&mut self, _cpu: f64) {}

    /// Destroy the execution environment. A fresh one is created before the
    /// next tick; only persisted segments survive.
    fn halt(&mut self);

    /// Contents of a persisted segment.
    fn segment(&self, id: SegmentId) -> Option<&[u8]>;

    /// Replace the contents of a persisted segment.
    fn set_segment(&mut self, id: SegmentId, data: Vec<u8>);

    /// Remove a persisted segment.
    fn clear_segment(&mut self, id: SegmentId);

    /// Push a message to the operator's notification channel.
    fn notify(&mut self, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headroom_never_negative() {
        let budget = TickBudget {
            used: 30.0,
            limit: 20.0,
            bucket: 0,
        };
        assert!(budget.headroom().abs() < f64::EPSILON);
    }

    #[test]
    fn test_headroom() {
        let budget = TickBudget {
            used: 5.0,
            limit: 20.0,
            bucket: 100,
        };
        assert!((budget.headroom() - 15.0).abs() < f64::EPSILON);
    }
}
