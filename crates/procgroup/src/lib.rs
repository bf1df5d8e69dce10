//! Client library for the procgroup closed-process-group daemon.
//!
//! Processes join named groups, multicast payloads to all current members,
//! and receive membership-change notifications as processes and nodes come
//! and go. All cluster logic lives in the daemon; this crate is the
//! client-side plumbing: handle management, two framed Unix-socket
//! connections per session, and the dispatch loop that turns inbound frames
//! into [`GroupEvents`] callbacks.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use procgroup::{DispatchMode, GroupClient, GroupEvents, GroupName, Guarantee};
//!
//! struct Printer;
//!
//! impl GroupEvents for Printer {
//!     fn deliver(
//!         &self,
//!         _handle: procgroup::Handle,
//!         group: &GroupName,
//!         node_id: u32,
//!         process_id: u32,
//!         payload: &bytes::Bytes,
//!     ) {
//!         println!("[{group}] {node_id}/{process_id}: {} bytes", payload.len());
//!     }
//! }
//!
//! # async fn run() -> procgroup::Result<()> {
//! let client = GroupClient::new();
//! let handle = client.initialize(Arc::new(Printer)).await?;
//!
//! let group = GroupName::try_from("chatter")?;
//! client.join(handle, &group).await?;
//! client.mcast(handle, Guarantee::Agreed, &[b"hello".as_slice()]).await?;
//! client.dispatch(handle, DispatchMode::All).await?;
//!
//! client.finalize(handle).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod handle;
pub mod membership;
pub mod protocol;
pub mod session;

pub use config::{ClientConfig, DEFAULT_SOCKET_PATH, SOCKET_PATH_ENV, default_socket_path};
pub use dispatch::DispatchMode;
pub use error::{Error, Result};
pub use events::GroupEvents;
pub use handle::Handle;
pub use membership::{
    ChangeReason, FlowControlState, MAX_GROUP_MEMBERS, MemberAddress, MembershipChange,
};
pub use protocol::messages::{
    DaemonStatus, GROUP_NAME_MAX, GroupName, Guarantee, InvalidGroupName, MAX_MESSAGE_SIZE,
};
pub use session::GroupClient;
