//! Correlation Module
//!
//! Binds requests to their replies regardless of how many hops a command
//! takes. Replies travel as `ReplyEnvelope`s addressed by `RequestId`; the
//! waiting side holds a `PendingReplies` handle and stops waiting at its deadline.

pub mod table;
pub mod types;

#[cfg(test)]
mod tests;
