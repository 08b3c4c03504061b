//! Per-renderer playback state machine.
//!
//! A [`PlaybackController`] walks its [`PlaybackQueue`] on a [`Player`]. It is
//! either stopped or playing; every transition between the two waits for the
//! player to report the matching transport state. While playing, the
//! controller listens to the player's states and moves on to the next item
//! when the current one ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use observable::Subscription;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::devices::TransportState;
use crate::error::{ControlError, Result};
use crate::player::{Player, StateCallback};
use crate::queue::{PlaybackItem, PlaybackQueue};

/// Player-state subscription slot, locked for the duration of a transition
type Transition = Arc<tokio::sync::Mutex<Option<Subscription>>>;

/// Drives playback of a queue on one player.
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct PlaybackController {
    inner: Arc<Inner>,
}

struct Inner {
    player: Arc<dyn Player>,
    config: ControllerConfig,
    transition: Transition,
    queue: Mutex<PlaybackQueue>,
    playing: AtomicBool,
}

impl PlaybackController {
    pub fn new(player: Arc<dyn Player>, config: ControllerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                player,
                config,
                transition: Arc::new(tokio::sync::Mutex::new(None)),
                queue: Mutex::new(PlaybackQueue::new()),
                playing: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.inner.playing.load(Ordering::SeqCst)
    }

    /// Whether the controller currently listens to its player
    pub async fn has_player_subscription(&self) -> bool {
        self.inner.transition.lock().await.is_some()
    }

    /// Snapshot of the queue
    pub fn queue(&self) -> PlaybackQueue {
        self.inner.queue.lock().clone()
    }

    pub fn append(&self, items: impl IntoIterator<Item = PlaybackItem>) {
        self.inner.queue.lock().append(items);
    }

    /// Replace the queued items; the item playing now keeps playing
    pub fn replace(&self, items: impl IntoIterator<Item = PlaybackItem>) {
        self.inner.queue.lock().replace(items);
    }

    pub fn clear(&self) {
        self.inner.queue.lock().clear();
    }

    /// Start playback.
    ///
    /// Resumes the item under the cursor, or takes the next one. Does nothing
    /// when already playing or when the queue has nothing left to play.
    pub async fn play(&self) -> Result<()> {
        let mut slot = self.inner.transition.lock().await;
        if self.is_playing() {
            debug!("Already playing");
            return Ok(());
        }

        let item = {
            let mut queue = self.inner.queue.lock();
            match queue.current_item() {
                Some(item) => Some(item.clone()),
                None => queue.next_item(),
            }
        };
        let Some(item) = item else {
            debug!("Queue has nothing to play");
            return Ok(());
        };

        self.inner.play_item(&mut slot, item).await
    }

    /// Stop playback and release the player subscription.
    ///
    /// The controller ends up stopped even when the player fails to confirm.
    pub async fn stop(&self) -> Result<()> {
        let mut slot = self.inner.transition.lock().await;
        if !self.is_playing() {
            debug!("Already stopped");
            return Ok(());
        }

        let result = self.inner.stop_player().await;
        self.inner.playing.store(false, Ordering::SeqCst);
        Inner::release(&mut slot).await;
        result
    }

    /// Move the cursor to `index`.
    ///
    /// While playing, the current item is stopped and the item at `index`
    /// started; while stopped only the cursor moves.
    pub async fn set_current_item(&self, index: usize) -> Result<()> {
        let mut slot = self.inner.transition.lock().await;
        if !self.is_playing() {
            return self.inner.queue.lock().set_current_index(index);
        }

        let len = self.inner.queue.lock().len();
        if index >= len {
            return Err(ControlError::IndexOutOfRange { index, len });
        }

        if let Err(error) = self.inner.stop_player().await {
            warn!(%error, "Stopping the current item failed, starting the new one anyway");
        }

        let item = {
            let mut queue = self.inner.queue.lock();
            queue.set_current_index(index)?;
            queue.current_item().cloned()
        };
        match item {
            Some(item) => self.inner.play_item(&mut slot, item).await,
            None => Ok(()),
        }
    }

    /// Forget playback without talking to the player, e.g. once its device is
    /// gone
    pub async fn release(&self) {
        let mut slot = self.inner.transition.lock().await;
        self.inner.playing.store(false, Ordering::SeqCst);
        Inner::release(&mut slot).await;
    }
}

impl Inner {
    /// Play `item` and wait for the player to report `PLAYING`.
    ///
    /// On failure the controller is stopped and its subscription released.
    async fn play_item(self: &Arc<Self>, slot: &mut Option<Subscription>, item: PlaybackItem) -> Result<()> {
        self.ensure_subscription(slot).await;

        info!(object_id = %item.object_id, title = %item.title, "Starting item");
        let player = self.player.clone();
        let result = self
            .player
            .transport_states()
            .wait_for_value_if(
                |state| *state == TransportState::Playing,
                self.config.transition_timeout,
                || async move { player.play(&item).await },
            )
            .await;

        match result {
            Ok(()) => {
                self.playing.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(error) => {
                let error = ControlError::from_wait(error, TransportState::Playing);
                warn!(%error, "Playback failed to start");
                self.playing.store(false, Ordering::SeqCst);
                Self::release(slot).await;
                Err(error)
            }
        }
    }

    async fn stop_player(&self) -> Result<()> {
        let player = self.player.clone();
        self.player
            .transport_states()
            .wait_for_value_if(
                |state| *state == TransportState::Stopped,
                self.config.transition_timeout,
                || async move { player.stop().await },
            )
            .await
            .map_err(|error| ControlError::from_wait(error, TransportState::Stopped))
    }

    async fn ensure_subscription(self: &Arc<Self>, slot: &mut Option<Subscription>) {
        if slot.as_ref().is_some_and(Subscription::is_active) {
            return;
        }

        let weak: Weak<Inner> = Arc::downgrade(self);
        let callback: StateCallback = Arc::new(move |state| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.on_transport_state(state);
                }
                Ok(())
            })
        });
        *slot = Some(self.player.subscribe(callback).await);
        debug!("Subscribed to player states");
    }

    async fn release(slot: &mut Option<Subscription>) {
        if let Some(mut subscription) = slot.take() {
            subscription.unsubscribe().await;
            debug!("Released player subscription");
        }
    }

    /// Runs on the player's delivery path, so it only schedules work
    fn on_transport_state(self: Arc<Self>, state: TransportState) {
        if !state.is_idle() || !self.playing.load(Ordering::SeqCst) {
            return;
        }
        let Ok(slot) = self.transition.clone().try_lock_owned() else {
            debug!(%state, "Transition in progress, ignoring state");
            return;
        };
        tokio::spawn(self.advance(slot));
    }

    /// The current item ended: play the next one or stop
    async fn advance(self: Arc<Self>, mut slot: OwnedMutexGuard<Option<Subscription>>) {
        if !self.playing.load(Ordering::SeqCst) {
            return;
        }

        let next = self.queue.lock().next_item();
        match next {
            Some(item) => {
                if let Err(error) = self.play_item(&mut slot, item).await {
                    warn!(%error, "Advancing to the next item failed");
                }
            }
            None => {
                info!("Queue finished");
                self.playing.store(false, Ordering::SeqCst);
                Self::release(&mut slot).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use observable::Observable;
    use std::time::Duration;

    /// Reports PLAYING on play and STOPPED on stop
    struct EchoPlayer {
        states: Observable<TransportState>,
        played: Mutex<Vec<String>>,
        stops: Mutex<usize>,
    }

    impl EchoPlayer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                states: Observable::new(),
                played: Mutex::new(Vec::new()),
                stops: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl Player for EchoPlayer {
        async fn play(&self, item: &PlaybackItem) -> Result<()> {
            self.played.lock().push(item.object_id.clone());
            self.states.notify(TransportState::Playing).await;
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            *self.stops.lock() += 1;
            self.states.notify(TransportState::Stopped).await;
            Ok(())
        }

        fn transport_states(&self) -> Observable<TransportState> {
            self.states.clone()
        }
    }

    /// Never confirms anything
    struct SilentPlayer {
        states: Observable<TransportState>,
    }

    #[async_trait]
    impl Player for SilentPlayer {
        async fn play(&self, _: &PlaybackItem) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }

        fn transport_states(&self) -> Observable<TransportState> {
            self.states.clone()
        }
    }

    fn items(ids: &[&str]) -> Vec<PlaybackItem> {
        ids.iter()
            .map(|id| PlaybackItem::new("f5b1b596-c1d2-11e9-af8b-705681aa5dfd", *id, *id))
            .collect()
    }

    #[tokio::test]
    async fn test_play_on_empty_queue_is_noop() {
        let player = EchoPlayer::new();
        let controller = PlaybackController::new(player.clone(), ControllerConfig::new());

        controller.play().await.unwrap();
        assert!(!controller.is_playing());
        assert!(player.played.lock().is_empty());
        assert_eq!(player.states.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_play_and_stop() {
        let player = EchoPlayer::new();
        let controller = PlaybackController::new(player.clone(), ControllerConfig::new());
        controller.append(items(&["a", "b"]));

        controller.play().await.unwrap();
        assert!(controller.is_playing());
        assert!(controller.has_player_subscription().await);
        assert_eq!(controller.queue().current_item_index(), Some(0));

        // second play is a no-op
        controller.play().await.unwrap();
        assert_eq!(*player.played.lock(), vec!["a"]);

        controller.stop().await.unwrap();
        assert!(!controller.is_playing());
        assert!(!controller.has_player_subscription().await);
        assert_eq!(*player.stops.lock(), 1);
        assert_eq!(player.states.subscriber_count(), 0);

        // stopping again does not reach the player
        controller.stop().await.unwrap();
        assert_eq!(*player.stops.lock(), 1);

        // resumes the item under the cursor
        controller.play().await.unwrap();
        assert_eq!(*player.played.lock(), vec!["a", "a"]);
    }

    #[tokio::test]
    async fn test_set_current_item_while_stopped_only_moves_cursor() {
        let player = EchoPlayer::new();
        let controller = PlaybackController::new(player.clone(), ControllerConfig::new());
        controller.append(items(&["a", "b", "c"]));

        controller.set_current_item(2).await.unwrap();
        assert!(!controller.is_playing());
        assert_eq!(controller.queue().current_item_index(), Some(2));
        assert!(player.played.lock().is_empty());

        controller.play().await.unwrap();
        assert_eq!(*player.played.lock(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_set_current_item_while_playing_switches_item() {
        let player = EchoPlayer::new();
        let controller = PlaybackController::new(player.clone(), ControllerConfig::new());
        controller.append(items(&["a", "b", "c"]));
        controller.play().await.unwrap();

        controller.set_current_item(2).await.unwrap();
        assert!(controller.is_playing());
        assert_eq!(*player.played.lock(), vec!["a", "c"]);
        assert_eq!(*player.stops.lock(), 1);
        assert_eq!(controller.queue().current_item_index(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_play_times_out_and_stops() {
        let player = Arc::new(SilentPlayer {
            states: Observable::new(),
        });
        let controller = PlaybackController::new(
            player.clone(),
            ControllerConfig::new().with_transition_timeout(Duration::from_secs(3)),
        );
        controller.append(items(&["a"]));

        let result = controller.play().await;
        assert!(matches!(
            result,
            Err(ControlError::TransitionTimeout {
                expected: TransportState::Playing,
                ..
            })
        ));
        assert!(!controller.is_playing());
        assert!(!controller.has_player_subscription().await);
        assert_eq!(player.states.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_release_forgets_playback() {
        let player = EchoPlayer::new();
        let controller = PlaybackController::new(player.clone(), ControllerConfig::new());
        controller.append(items(&["a"]));
        controller.play().await.unwrap();

        controller.release().await;
        assert!(!controller.is_playing());
        assert_eq!(player.states.subscriber_count(), 0);
        assert_eq!(*player.stops.lock(), 0);
    }
}
