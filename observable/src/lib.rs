//! Async broadcast primitive
//!
//! A generic multi-subscriber notifier used to fan out device state to many
//! listeners. Subscribers are async callbacks; a callback that fails (returns
//! an error or panics) is removed after the notify round that triggered it.
//!
//! # Features
//!
//! - **Concurrent delivery**: `notify` runs every subscriber callback concurrently
//! - **Self-healing**: failing subscribers are unsubscribed automatically
//! - **Replay**: optionally hand the last value to late subscribers
//! - **Subscription hook**: observe subscriber count changes, reported in order
//! - **Predicate waits**: run an action and wait until a matching value arrives
//!
//! # Quick Start
//!
//! ```rust
//! use observable::Observable;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let temperatures = Observable::<i32>::with_replay();
//!
//! let mut subscription = temperatures
//!     .subscribe(|value| async move {
//!         println!("temperature is now {value}");
//!         Ok(())
//!     })
//!     .await;
//!
//! temperatures.notify(21).await;
//! subscription.unsubscribe().await;
//! assert_eq!(temperatures.subscriber_count(), 0);
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Observable<T>  (cheap Clone handle)
//!     │
//!     └── Arc<Shared<T>>
//!             ├── state: Mutex<{ subscribers, next_id, last_value }>   (never held across .await)
//!             ├── membership: async Mutex<()>                        (serializes count changes + hook)
//!             └── hook: RwLock<Option<SubscriptionHook>>
//!
//! Subscription ── Weak<dyn Detach> ──> Shared<T>
//! ```

pub mod error;
mod observable;
mod subscription;
mod wait;

pub use error::{CallbackError, WaitError};
pub use observable::{CallbackResult, Observable, SubscriptionHook};
pub use subscription::Subscription;
