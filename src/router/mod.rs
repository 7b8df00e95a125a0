//! Request Router Module
//!
//! Location-transparent delivery of dataset commands:
//!
//! - **`RequestRouter`**: resolves the owner under the current view, delivers
//!   locally or forwards, and retries `Moved` rejections with backoff.
//! - **`ReplyDispatcher`**: sends entity replies to the node holding the request.
//! - **Transports**: HTTP between deployed nodes, in-memory for single-process clusters.

pub mod handlers;
pub mod protocol;
pub mod router;
pub mod transport;
