//! View and session registry: connection records, heartbeat-driven liveness,
//! store-and-forward delivery, session snapshots, and the device-facing
//! command surface. Transport and identity concerns stay behind the traits in
//! [`traits`]; the runtime wires in bus-backed implementations.

pub mod commands;
pub mod registry;
pub mod sessions;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;
