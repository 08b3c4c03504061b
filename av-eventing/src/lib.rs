//! GENA notification backend for UPnP AV control points.
//!
//! The backend runs a [`callback_server::CallbackServer`], holds one
//! subscription lease per [`ServiceRef`] and renews all leases at half the
//! lease duration. Incoming `NOTIFY` bodies are flattened into
//! [`ServiceNotification`]s and sent to the sink given at subscribe time.
//!
//! The remote half of the protocol sits behind [`EventSubscriber`], which is
//! implemented for [`soap_client::SoapClient`].

mod backend;
pub mod config;
mod error;
pub mod propertyset;
pub mod service;
pub mod subscriber;

pub use backend::{NotificationBackend, NotificationLease};
pub use config::EventingConfig;
pub use error::{EventingError, Result};
pub use propertyset::parse_propertyset;
pub use service::{ServiceNotification, ServiceRef};
pub use subscriber::EventSubscriber;
