//! Passage Core - transport-agnostic messaging for presence and media signaling
//!
//! This crate provides the pieces every Passage client shares, with no
//! dependency on a particular media stack.
//!
//! # Architecture
//!
//! ```text
//! Channel (WebSocket | Paired | Heartbeat)
//!   ↓ on_message              ↑ send
//! JsonRpc ── call/notify ──→ peer
//!   ├─ RpcHandler (incoming calls, e.g. DirectoryHandler)
//!   └─ on_notify  (incoming notifications, e.g. relay offers)
//! ```
//!
//! Alongside the messaging path:
//! - [`status::ConnectionStatus`] tracks a connection's lifecycle and
//!   broadcasts every change
//! - [`sequence::SequenceManager`] runs ordered startup steps with timeouts
//! - [`directory`] keeps the participant roster
//! - [`events::EventBus`] carries typed process-wide signals
//!
//! # Example
//!
//! ```no_run
//! use passage_core::channel::PairedChannel;
//! use passage_core::rpc::{EmptyHandler, JsonRpc};
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> passage_core::Result<()> {
//! let (local, remote) = PairedChannel::pair();
//! let client = JsonRpc::new(local, Arc::new(EmptyHandler));
//! let _server = JsonRpc::new(remote, Arc::new(EmptyHandler));
//!
//! let response = client.call("ping", json!([])).wait(Duration::from_secs(5)).await?;
//! assert!(response.is_error());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod delegate;
pub mod directory;
pub mod error;
pub mod events;
pub mod logging;
pub mod rpc;
pub mod sequence;
pub mod status;

pub use channel::Channel;
pub use config::PassageConfig;
pub use delegate::{Delegate, DelegateHandle};
pub use error::{Error, Result};
pub use rpc::{JsonRpc, RpcHandler, RpcResponse};
pub use status::{ConnectionState, ConnectionStatus};
