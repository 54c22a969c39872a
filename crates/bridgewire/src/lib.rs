//! # bridgewire
//!
//! The message format spoken between two bridge peers.
//!
//! ## Architecture
//!
//! There are exactly two frame kinds, `Call` and `Reply`, correlated by a
//! random `CallId`. A reply carries an `Outcome` of `{result, error}`.
//! Frames are JSON; live objects that must keep their identity are never
//! copied into a frame, they travel as `{"$handle": "<id>"}` markers.

pub mod codec;
pub mod error;
pub mod frame;

pub use codec::HANDLE_KEY;
pub use codec::as_handle_marker;
pub use codec::handle_marker;
pub use error::Result;
pub use error::WireError;
pub use frame::CallFrame;
pub use frame::CallId;
pub use frame::ErrorDescriptor;
pub use frame::Frame;
pub use frame::Outcome;
pub use frame::ReplyFrame;
