//! Convergence harness: probes and the polling engine

pub mod polling;
pub mod probe;

pub use polling::{consistently, eventually, Observation, PollError};
pub use probe::{
    probe_fn, CookieProbe, FnProbe, Probe, ProbeError, ProbeSettings, RouteProbe, Sighting,
    Sightings,
};
