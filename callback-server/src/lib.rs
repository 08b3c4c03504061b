//! UPnP callback endpoint for GENA event notifications.
//!
//! This crate provides a lightweight HTTP server that accepts `NOTIFY`
//! requests from UPnP devices. It knows nothing about media devices or
//! services; it validates the eventing headers, looks the `SID` up in a
//! router and forwards the raw body to a channel.
//!
//! # Overview
//!
//! - [`CallbackServer`]: binds a port from a range, advertises a callback URL
//!   and serves `NOTIFY` on any path.
//! - [`EventRouter`]: set of accepted subscription IDs; unknown IDs are
//!   answered with `412` so the device drops the subscription.
//! - [`NotificationPayload`]: subscription ID, event sequence number and the
//!   raw `propertyset` XML.
//!
//! # Example
//!
//! ```no_run
//! use callback_server::{CallbackServer, NotificationPayload};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), callback_server::CallbackServerError> {
//!     let (tx, mut rx) = mpsc::unbounded_channel::<NotificationPayload>();
//!     let server = CallbackServer::new((51234, 51334), tx).await?;
//!
//!     println!("Callback URL: {}", server.callback_url());
//!     server.router().register("uuid:subscription-123".to_string()).await;
//!
//!     while let Some(notification) = rx.recv().await {
//!         println!("{} -> {} bytes", notification.subscription_id, notification.event_xml.len());
//!     }
//!
//!     server.shutdown().await
//! }
//! ```

pub mod error;
pub mod router;
pub mod server;

pub use error::CallbackServerError;
pub use router::{EventRouter, NotificationPayload};
pub use server::CallbackServer;
