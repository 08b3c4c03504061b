//! The `Observable` broadcast type

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::CallbackError;
use crate::subscription::{Detach, Subscription};

/// Result every subscriber callback returns
pub type CallbackResult = Result<(), CallbackError>;

/// Hook invoked with the new subscriber count whenever it changes
pub type SubscriptionHook = Arc<dyn Fn(usize) -> BoxFuture<'static, ()> + Send + Sync>;

pub(crate) type Callback<T> = Arc<dyn Fn(T) -> BoxFuture<'static, CallbackResult> + Send + Sync>;

/// Multi-subscriber async notifier.
///
/// Cloning an `Observable` yields another handle to the same subscriber set.
pub struct Observable<T> {
    shared: Arc<Shared<T>>,
}

pub(crate) struct Shared<T> {
    state: Mutex<State<T>>,
    /// Held while the subscriber set changes and the hook runs, so hook calls
    /// observe counts in the order they happened.
    membership: tokio::sync::Mutex<()>,
    hook: RwLock<Option<SubscriptionHook>>,
    replay: bool,
}

struct State<T> {
    subscribers: BTreeMap<u64, Callback<T>>,
    next_id: u64,
    last_value: Option<T>,
    /// Number of `notify` rounds started so far
    rounds: u64,
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an observable without replay
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Create an observable that hands the most recent value to late subscribers
    pub fn with_replay() -> Self {
        Self::build(true)
    }

    fn build(replay: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    subscribers: BTreeMap::new(),
                    next_id: 0,
                    last_value: None,
                    rounds: 0,
                }),
                membership: tokio::sync::Mutex::new(()),
                hook: RwLock::new(None),
                replay,
            }),
        }
    }

    /// Install the subscription-count hook, replacing any previous one.
    ///
    /// The hook runs after every subscribe and unsubscribe with the new count.
    /// While it runs no other membership change can happen, so the count it
    /// sees stays valid until it returns.
    pub fn set_on_subscription_change<F, Fut>(&self, hook: F)
    where
        F: Fn(usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: SubscriptionHook = Arc::new(move |count| hook(count).boxed());
        *self.shared.hook.write() = Some(hook);
    }

    pub fn clear_on_subscription_change(&self) {
        *self.shared.hook.write() = None;
    }

    pub fn is_replaying(&self) -> bool {
        self.shared.replay
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subscribers.len()
    }

    /// Most recently notified value, if any
    pub fn last_value(&self) -> Option<T> {
        self.shared.state.lock().last_value.clone()
    }

    /// Register an async callback.
    ///
    /// With replay enabled and a value already notified, the callback receives
    /// that value right after the subscription hook has run, unless a notify
    /// round has already reached it by then.
    pub async fn subscribe<F, Fut>(&self, callback: F) -> Subscription
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        let callback: Callback<T> = Arc::new(move |value| callback(value).boxed());

        let (id, joined_at) = {
            let _membership = self.shared.membership.lock().await;
            let (id, count, joined_at) = {
                let mut state = self.shared.state.lock();
                let id = state.next_id;
                state.next_id += 1;
                state.subscribers.insert(id, callback.clone());
                (id, state.subscribers.len(), state.rounds)
            };
            self.shared.run_hook(count).await;
            (id, joined_at)
        };

        let weak: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        let source: Weak<dyn Detach> = weak;
        let mut subscription = Subscription::new(id, source);

        if self.shared.replay {
            let last_value = {
                let state = self.shared.state.lock();
                // any later round already delivered a newer value
                if state.rounds == joined_at {
                    state.last_value.clone()
                } else {
                    None
                }
            };
            if let Some(value) = last_value {
                if let Err(error) = invoke(&callback, value).await {
                    warn!(subscriber = id, %error, "Replay delivery failed, removing subscriber");
                    subscription.unsubscribe().await;
                }
            }
        }

        subscription
    }

    /// Remove a subscription; a no-op for handles that are already detached.
    pub async fn unsubscribe(&self, subscription: &mut Subscription) {
        subscription.unsubscribe().await;
    }

    /// Deliver `value` to every current subscriber concurrently.
    ///
    /// The subscriber set is snapshotted under the lock; callbacks run without
    /// it. Subscribers whose callback fails are removed after the round.
    pub async fn notify(&self, value: T) {
        let snapshot: Vec<(u64, Callback<T>)> = {
            let mut state = self.shared.state.lock();
            state.last_value = Some(value.clone());
            state.rounds += 1;
            state
                .subscribers
                .iter()
                .map(|(id, callback)| (*id, callback.clone()))
                .collect()
        };

        if snapshot.is_empty() {
            return;
        }

        let deliveries = snapshot.iter().map(|(id, callback)| {
            let value = value.clone();
            async move { (*id, invoke(callback, value).await) }
        });

        for (id, result) in join_all(deliveries).await {
            if let Err(error) = result {
                warn!(subscriber = id, %error, "Subscriber failed during notify, removing it");
                self.shared.detach(id).await;
            }
        }
    }
}

impl<T> Shared<T> {
    async fn run_hook(&self, count: usize) {
        let hook = self.hook.read().clone();
        if let Some(hook) = hook {
            debug!(count, "Subscriber count changed");
            hook(count).await;
        }
    }
}

#[async_trait]
impl<T> Detach for Shared<T>
where
    T: Send + Sync + 'static,
{
    async fn detach(&self, id: u64) {
        let _membership = self.membership.lock().await;
        let count = {
            let mut state = self.state.lock();
            if state.subscribers.remove(&id).is_none() {
                return;
            }
            state.subscribers.len()
        };
        self.run_hook(count).await;
    }

    fn contains(&self, id: u64) -> bool {
        self.state.lock().subscribers.contains_key(&id)
    }
}

async fn invoke<T>(callback: &Callback<T>, value: T) -> CallbackResult
where
    T: Send + 'static,
{
    let callback = callback.clone();
    let delivery = async move { callback(value).await };
    match AssertUnwindSafe(delivery).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(CallbackError::new("subscriber panicked")),
    }
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Default for Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("subscribers", &self.shared.state.lock().subscribers.len())
            .field("replay", &self.shared.replay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (
        Arc<Mutex<Vec<i32>>>,
        impl Fn(i32) -> BoxFuture<'static, CallbackResult> + Send + Sync + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback = move |value: i32| {
            let sink = sink.clone();
            async move {
                sink.lock().push(value);
                Ok(())
            }
            .boxed()
        };
        (seen, callback)
    }

    #[tokio::test]
    async fn test_notify_reaches_all_subscribers() {
        let observable = Observable::<i32>::new();
        let (first, callback1) = recorder();
        let (second, callback2) = recorder();

        let mut subscription1 = observable.subscribe(callback1).await;
        let mut subscription2 = observable.subscribe(callback2).await;

        observable.notify(42).await;
        assert_eq!(*first.lock(), vec![42]);
        assert_eq!(*second.lock(), vec![42]);

        subscription1.unsubscribe().await;
        observable.notify(21).await;
        assert_eq!(*first.lock(), vec![42]);
        assert_eq!(*second.lock(), vec![42, 21]);

        // unsubscribing twice is fine
        subscription1.unsubscribe().await;
        subscription2.unsubscribe().await;
        assert_eq!(observable.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_subscriber_is_removed() {
        let observable = Observable::<i32>::new();
        let failures = Arc::new(AtomicUsize::new(0));
        let (healthy, callback) = recorder();

        let counter = failures.clone();
        let failing = observable
            .subscribe(move |_value| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CallbackError::new("something went wrong"))
                }
            })
            .await;
        let _healthy = observable.subscribe(callback).await;

        observable.notify(42).await;
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert!(!failing.is_active());

        observable.notify(21).await;
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(*healthy.lock(), vec![42, 21]);
        assert_eq!(observable.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_panicking_subscriber_is_removed() {
        let observable = Observable::<i32>::new();
        let (healthy, callback) = recorder();

        let _panicking = observable
            .subscribe(|value: i32| async move {
                if value > 0 {
                    panic!("subscriber bug");
                }
                Ok(())
            })
            .await;
        let _healthy = observable.subscribe(callback).await;

        observable.notify(1).await;
        observable.notify(2).await;

        assert_eq!(*healthy.lock(), vec![1, 2]);
        assert_eq!(observable.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_subscription_hook_reports_counts_in_order() {
        let observable = Observable::<i32>::new();
        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = counts.clone();
        observable.set_on_subscription_change(move |count| {
            let sink = sink.clone();
            async move {
                sink.lock().push(count);
            }
        });

        let (_, callback1) = recorder();
        let (_, callback2) = recorder();
        let mut subscription1 = observable.subscribe(callback1).await;
        assert_eq!(*counts.lock(), vec![1]);
        let mut subscription2 = observable.subscribe(callback2).await;
        assert_eq!(*counts.lock(), vec![1, 2]);

        subscription1.unsubscribe().await;
        assert_eq!(*counts.lock(), vec![1, 2, 1]);

        // second unsubscribe does not fire the hook
        subscription1.unsubscribe().await;
        assert_eq!(*counts.lock(), vec![1, 2, 1]);

        subscription2.unsubscribe().await;
        assert_eq!(*counts.lock(), vec![1, 2, 1, 0]);
    }

    #[tokio::test]
    async fn test_hook_fires_when_failing_subscriber_is_removed() {
        let observable = Observable::<i32>::new();
        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = counts.clone();
        observable.set_on_subscription_change(move |count| {
            let sink = sink.clone();
            async move {
                sink.lock().push(count);
            }
        });

        let _failing = observable
            .subscribe(|_value: i32| async { Err(CallbackError::new("nope")) })
            .await;
        observable.notify(7).await;

        assert_eq!(*counts.lock(), vec![1, 0]);
    }

    #[tokio::test]
    async fn test_replay_delivers_last_value_to_late_subscriber() {
        let observable = Observable::<i32>::with_replay();
        observable.notify(5).await;
        observable.notify(6).await;

        let (seen, callback) = recorder();
        let _subscription = observable.subscribe(callback).await;

        assert_eq!(*seen.lock(), vec![6]);
    }

    #[tokio::test]
    async fn test_value_notified_by_hook_is_not_replayed() {
        let observable = Observable::<i32>::with_replay();
        observable.notify(5).await;

        let source = observable.clone();
        observable.set_on_subscription_change(move |count| {
            let source = source.clone();
            async move {
                if count == 1 {
                    source.notify(7).await;
                }
            }
        });

        let (seen, callback) = recorder();
        let _subscription = observable.subscribe(callback).await;

        assert_eq!(*seen.lock(), vec![7]);
        observable.clear_on_subscription_change();
    }

    #[tokio::test]
    async fn test_replay_runs_after_hook() {
        let observable = Observable::<i32>::with_replay();
        observable.notify(5).await;

        let events = Arc::new(Mutex::new(Vec::new()));
        let hook_events = events.clone();
        observable.set_on_subscription_change(move |count| {
            let hook_events = hook_events.clone();
            async move {
                hook_events.lock().push(format!("hook:{count}"));
            }
        });

        let callback_events = events.clone();
        let _subscription = observable
            .subscribe(move |value: i32| {
                let callback_events = callback_events.clone();
                async move {
                    callback_events.lock().push(format!("value:{value}"));
                    Ok(())
                }
            })
            .await;

        assert_eq!(*events.lock(), vec!["hook:1".to_string(), "value:5".to_string()]);
    }

    #[tokio::test]
    async fn test_no_replay_without_opt_in() {
        let observable = Observable::<i32>::new();
        observable.notify(5).await;

        let (seen, callback) = recorder();
        let _subscription = observable.subscribe(callback).await;
        assert!(seen.lock().is_empty());

        observable.notify(8).await;
        assert_eq!(*seen.lock(), vec![8]);
        assert_eq!(observable.last_value(), Some(8));
    }

    #[tokio::test]
    async fn test_handle_outliving_observable_is_inert() {
        let observable = Observable::<i32>::new();
        let (_, callback) = recorder();
        let mut subscription = observable.subscribe(callback).await;
        assert!(subscription.is_active());

        drop(observable);
        assert!(!subscription.is_active());
        subscription.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_clones_share_subscribers() {
        let observable = Observable::<i32>::new();
        let other = observable.clone();
        let (seen, callback) = recorder();
        let _subscription = other.subscribe(callback).await;

        observable.notify(3).await;
        assert_eq!(*seen.lock(), vec![3]);
        assert_eq!(observable.subscriber_count(), 1);
    }
}
