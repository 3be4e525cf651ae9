//! Runtime glue that wires configuration, the record protocol, telemetry, and
//! runner orchestration.

pub mod config;
#[cfg(test)]
pub(crate) mod event_capture;
pub mod protocol;
pub mod runner;
pub mod telemetry;
