//! Backend command routing: session-wide fan-out, content package
//! resolution, and the SMS side channel.

pub mod content;
pub mod router;
pub mod sms;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;
