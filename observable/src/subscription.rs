//! Subscription handles

use std::fmt;
use std::sync::Weak;

use async_trait::async_trait;

/// Type-erased view of an observable that a handle can detach itself from.
#[async_trait]
pub(crate) trait Detach: Send + Sync {
    async fn detach(&self, id: u64);

    fn contains(&self, id: u64) -> bool;
}

/// Handle for one registered callback on one observable.
///
/// Dropping the handle does *not* unsubscribe; call [`Subscription::unsubscribe`].
/// Unsubscribing is idempotent, a second call does nothing. The handle only
/// holds a weak reference, so it never keeps the observable alive.
pub struct Subscription {
    id: u64,
    source: Option<Weak<dyn Detach>>,
}

impl Subscription {
    pub(crate) fn new(id: u64, source: Weak<dyn Detach>) -> Self {
        Self {
            id,
            source: Some(source),
        }
    }

    /// Identifier of the callback within its observable
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the callback is still registered.
    ///
    /// Returns `false` after [`unsubscribe`](Self::unsubscribe), after the
    /// observable removed a failing callback, or once the observable is gone.
    pub fn is_active(&self) -> bool {
        self.source
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|source| source.contains(self.id))
            .unwrap_or(false)
    }

    /// Remove the callback from its observable.
    pub async fn unsubscribe(&mut self) {
        let Some(source) = self.source.take() else {
            return;
        };
        if let Some(source) = source.upgrade() {
            source.detach(self.id).await;
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("detached", &self.source.is_none())
            .finish()
    }
}
