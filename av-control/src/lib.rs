//! # UPnP AV control point
//!
//! Discovers media servers and media renderers on the local network, keeps a
//! registry of them and plays queued items from servers on renderers.
//!
//! ```rust,no_run
//! use av_control::{ControlPoint, ControlPointConfig, PlaybackItem};
//!
//! # async fn example() -> av_control::Result<()> {
//! let control_point = ControlPoint::with_network(ControlPointConfig::default())?;
//! control_point.start().await?;
//!
//! let renderer_udn = "13bf6358-00b8-101b-8000-74dfbfed7306";
//! let controller = control_point.get_controller_for_renderer(renderer_udn)?;
//! controller.append([PlaybackItem::new(
//!     "f5b1b596-c1d2-11e9-af8b-705681aa5dfd",
//!     "64$0$1",
//!     "Blue in Green",
//! )]);
//! controller.play().await?;
//!
//! control_point.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! The pieces can be used on their own as well: [`Registry`] consumes any
//! stream of discovery events, and a [`PlaybackController`] drives anything
//! implementing [`Player`].

pub mod config;
pub mod control_point;
pub mod controller;
pub mod devices;
pub mod didl;
mod error;
pub mod invoker;
pub mod logging;
pub mod player;
pub mod protocol_info;
pub mod queue;
pub mod registry;

pub use config::{ControlPointConfig, ControllerConfig};
pub use control_point::{Collaborators, ControlPoint};
pub use controller::PlaybackController;
pub use devices::{MediaDevice, MediaRenderer, MediaServer, PlaybackInfo, TransportState};
pub use didl::{DidlLite, DidlObject, DidlResource};
pub use error::{ControlError, Result};
pub use invoker::ActionInvoker;
pub use logging::{init_logging, init_logging_from_env, LoggingMode};
pub use player::{Player, RendererPlayer, ServerLookup};
pub use queue::{PlaybackItem, PlaybackQueue};
pub use registry::{DeviceEntry, DeviceEvent, Registry};

pub use observable::{CallbackResult, Observable, Subscription};
