//! # bridgerun
//!
//! Lets two runtimes share live objects over a message channel.
//!
//! Each side runs a `Bridge`. A bridge serves its own `Registry` to the
//! peer through a table of named operations, and calls into the peer
//! through a `Tracker` that pairs every outbound call with exactly one
//! reply. On top of that sit `RemoteObject`, a proxy for an object in the
//! peer's registry, and `Scope`, a named namespace the peer executes code in.
//!
//! ## Example
//!
//! ```no_run
//! use bridgerun::Bridge;
//! use bridgerun::ChannelTransport;
//! use bridgerun::RemoteObject;
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let (a, b) = ChannelTransport::pair();
//! let server = Bridge::builder().name("server").build(a)?;
//! let client = Bridge::builder().name("client").build(b)?;
//!
//! let point = RemoteObject::create(client.tracker(), json!({"x": 1})).await?;
//! let x = point.get_attr("x").await?;
//! assert_eq!(x.value().await?, json!(1));
//! # drop(server);
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod dispatch;
pub mod handle;
pub mod marshal;
pub mod operations;
pub mod proxy;
pub mod registry;
pub mod scope;
pub mod teardown;
pub mod tracker;
pub mod transport;

pub use bridge::Bridge;
pub use bridge::BridgeBuilder;
pub use bridge::BridgeConfig;
pub use dispatch::Args;
pub use dispatch::Completion;
pub use dispatch::DispatchTable;
pub use dispatch::ErrorReporting;
pub use handle::Handle;
pub use proxy::RemoteObject;
pub use registry::Registry;
pub use scope::Lifecycle;
pub use scope::Scope;
pub use teardown::Teardown;
pub use tracker::RemoteError;
pub use tracker::Tracker;
pub use transport::ChannelTransport;
pub use transport::Transport;

#[cfg(test)]
mod mock_peer;
