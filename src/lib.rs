//! FreeSWITCH Event Socket session client
//!
//! This crate provides an async session layer over the FreeSWITCH Event
//! Socket protocol. It hides connection lifecycle and command sequencing:
//! operations issued before the connection is ready are buffered and
//! replayed in submission order exactly once when it comes up, and execute
//! immediately afterwards. Callers never track readiness themselves.
//!
//! # Architecture
//!
//! - [`EslSession`] (cheap Clone) — connect/disconnect, event subscription,
//!   and the command facade; owns the deferred-operation queue
//! - [`Transport`]/[`Connector`] — the wire seam; [`TcpConnector`] is the
//!   production implementation with a background reader task
//!
//! # Examples
//!
//! ## Connect and query
//!
//! ```rust,no_run
//! use esl_session::{EslSession, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), esl_session::EslError> {
//!     let session = EslSession::new(SessionConfig::new("localhost"));
//!
//!     session.connect().await?;
//!
//!     let status = session.status().await?;
//!     println!("{}", status);
//!
//!     for channel in session.get_channels().await? {
//!         println!("{} {} -> {}", channel.uuid, channel.cid_num, channel.dest);
//!     }
//!
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Deferred operations
//!
//! Operations may be issued before `connect()`; they complete once the
//! connection is up, in the order issued:
//!
//! ```rust,no_run
//! use esl_session::{EslSession, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), esl_session::EslError> {
//!     let session = EslSession::new(SessionConfig::new("localhost"));
//!
//!     let lookup = {
//!         let session = session.clone();
//!         tokio::spawn(async move { session.get_channels().await })
//!     };
//!
//!     session.connect().await?; // the buffered lookup drains here
//!     let channels = lookup.await.expect("task")?;
//!     println!("{} channel(s)", channels.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Events
//!
//! Registering a handler also subscribes to the event name, so no separate
//! `subscribe` call is needed:
//!
//! ```rust,no_run
//! use esl_session::{EslSession, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), esl_session::EslError> {
//!     let session = EslSession::new(SessionConfig::new("localhost"));
//!
//!     session
//!         .on("CHANNEL_CREATE", |event| {
//!             println!("new channel: {:?}", event.header("Channel-Name"));
//!         })
//!         .await?;
//!
//!     session.connect().await?;
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod commands;
pub mod error;
pub mod event;
pub mod listing;
pub mod session;
pub mod table;
pub mod transport;

pub(crate) mod buffer;
pub mod constants;
pub(crate) mod protocol;
pub(crate) mod queue;
pub(crate) mod subscriptions;

pub use command::{EslResponse, ReplyStatus};
pub use commands::{
    Endpoint, HoldAction, Originate, ShowTable, SofiaRegistrations, SofiaStatus, UuidHold,
    UuidKill,
};
pub use constants::DEFAULT_ESL_PORT;
pub use error::{EslError, EslResult};
pub use event::{EslEvent, EventFormat};
pub use listing::{Call, Channel, Profile, Registration, UserListing};
pub use session::{EslSession, OriginateOptions, SessionConfig};
pub use table::{parse_table, TableOptions};
pub use transport::{Connector, TcpConnector, TcpTransport, Transport};
