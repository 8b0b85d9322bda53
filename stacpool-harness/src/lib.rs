//! stacpool-harness - concurrency-exhaustion load harness
//!
//! Fires bursts of GET requests at a STAC API deployment and records every
//! non-200 response. Used to drive the service's connection pool into
//! exhaustion and observe how it fails.
//!
//! ## Architecture
//!
//! ```text
//! LoadArgs → target::base_url + ENDPOINTS → Harness<Probe> → ObservationLog → Report
//!                                              ↓
//!                               Strategy::Sequential | WorkerPool { workers }
//! ```

pub mod args;
pub mod error;
pub mod harness;
pub mod observation;
pub mod probe;
pub mod target;

pub use args::{run_load, LoadArgs, Mode};
pub use error::HarnessError;
pub use harness::{ExitPolicy, Harness, HarnessConfig, Strategy};
pub use observation::{Observation, ObservationLog, Report};
pub use probe::{HttpProbe, MockProbe, Probe, ProbeError};
pub use target::{ReleaseLevel, ENDPOINTS};
