//! Scoped "wait until a value matches" helper

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{CallbackError, WaitError};
use crate::observable::Observable;
use crate::subscription::Subscription;

enum Signal {
    Matched,
    PredicateFailed,
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Subscribe, run `action`, then wait until a value notified after the
    /// action started satisfies `predicate`.
    ///
    /// The timeout starts once the action has completed. The temporary
    /// subscription is released on every exit path: success, timeout, a
    /// failing action or predicate, and cancellation of the returned future.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use observable::Observable;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let state = Observable::<&'static str>::new();
    /// let notifier = state.clone();
    ///
    /// let result = state
    ///     .wait_for_value_if(
    ///         |value| *value == "PLAYING",
    ///         Duration::from_secs(1),
    ///         || async move {
    ///             notifier.notify("TRANSITIONING").await;
    ///             notifier.notify("PLAYING").await;
    ///             Ok::<_, std::io::Error>(())
    ///         },
    ///     )
    ///     .await;
    ///
    /// assert!(result.is_ok());
    /// assert_eq!(state.subscriber_count(), 0);
    /// # }
    /// ```
    pub async fn wait_for_value_if<P, A, Fut, R, E>(
        &self,
        predicate: P,
        timeout: Duration,
        action: A,
    ) -> Result<R, WaitError<E>>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
        A: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<Signal>();
        let armed = Arc::new(AtomicBool::new(false));
        let predicate = Arc::new(predicate);

        let watcher = {
            let armed = armed.clone();
            move |value: T| {
                let armed = armed.clone();
                let predicate = predicate.clone();
                let signal_tx = signal_tx.clone();
                async move {
                    // replayed or earlier values do not count
                    if !armed.load(Ordering::Acquire) {
                        return Ok(());
                    }
                    match std::panic::catch_unwind(AssertUnwindSafe(|| (*predicate)(&value))) {
                        Ok(true) => {
                            let _ = signal_tx.send(Signal::Matched);
                            Ok(())
                        }
                        Ok(false) => Ok(()),
                        Err(_) => {
                            let _ = signal_tx.send(Signal::PredicateFailed);
                            Err(CallbackError::new("wait predicate panicked"))
                        }
                    }
                }
            }
        };

        let mut scope = ScopedSubscription(Some(self.subscribe(watcher).await));
        armed.store(true, Ordering::Release);

        let outcome = run_and_wait(action, timeout, &mut signal_rx).await;
        scope.release().await;
        outcome
    }
}

async fn run_and_wait<A, Fut, R, E>(
    action: A,
    timeout: Duration,
    signals: &mut mpsc::UnboundedReceiver<Signal>,
) -> Result<R, WaitError<E>>
where
    A: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let result = action().await.map_err(WaitError::Action)?;

    match tokio::time::timeout(timeout, signals.recv()).await {
        Ok(Some(Signal::Matched)) => Ok(result),
        Ok(Some(Signal::PredicateFailed)) => Err(WaitError::PredicateFailed),
        Ok(None) => Err(WaitError::Closed),
        Err(_) => {
            debug!(?timeout, "Timed out waiting for matching value");
            Err(WaitError::Timeout(timeout))
        }
    }
}

/// Releases the wrapped subscription on drop if the owner never got to it.
struct ScopedSubscription(Option<Subscription>);

impl ScopedSubscription {
    async fn release(&mut self) {
        if let Some(mut subscription) = self.0.take() {
            subscription.unsubscribe().await;
        }
    }
}

impl Drop for ScopedSubscription {
    fn drop(&mut self) {
        if let Some(mut subscription) = self.0.take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    subscription.unsubscribe().await;
                });
            }
        }
    }
}
