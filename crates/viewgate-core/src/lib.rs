//! viewgate-core: pure state machines and data model for the session &
//! presence gateway. No IO, no async — the runtime layer drives everything
//! through explicit transition and decision functions.

pub mod connection;
pub mod error;
pub mod outcome;
pub mod protocol;
pub mod session;
