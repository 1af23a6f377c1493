//! Meridian simulation harness
//!
//! Runs whole stations inside one process over the memory hub and
//! drives them the way a real controller would:
//! - [`sim`]: station builder, test controller, observation helpers
//! - [`lifecycle`]: device trees walked through the claim ladder
//! - [`distribution`]: directory, collector, and producer scenarios

pub mod distribution;
pub mod lifecycle;
pub mod sim;

pub use distribution::{DistributionRig, ValueFeed};
pub use lifecycle::DeviceTreeRig;
pub use sim::{Controller, ControllerHandle, Observed, StationSim};
