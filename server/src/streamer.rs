//! Periodic fan-out of pool-shared state to subscribed connections.
//!
//! The streamer keeps one broadcast group per shared-state source. Every
//! tick it asks each source whether it changed, serializes it once and hands
//! the same snapshot to every subscriber of that group. Subscribers that
//! cannot take the snapshot are pruned on the spot.
//!
//! A single background loop serves all groups. It is started by the first
//! subscription and stopped when the last group disappears, so an idle
//! server carries no timer work. The loop state is tracked explicitly and
//! guarded by the same lock as the groups, which keeps start/stop decisions
//! consistent with subscription changes.

use crate::error::{DeliveryError, StreamerError};
use crate::game::SharedState;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A sink for serialized broadcast snapshots.
///
/// Delivery must not block: a subscriber that cannot accept the payload right
/// away reports an error and gets dropped from its group.
pub trait Subscriber: Send + Sync {
    fn deliver(&self, payload: Arc<[u8]>) -> Result<(), DeliveryError>;
}

impl Subscriber for mpsc::Sender<Arc<[u8]>> {
    fn deliver(&self, payload: Arc<[u8]>) -> Result<(), DeliveryError> {
        self.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Whether the background loop is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamerState {
    Idle,
    Running,
}

fn same_source(a: &Arc<dyn SharedState>, b: &Arc<dyn SharedState>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

fn same_subscriber(a: &Arc<dyn Subscriber>, b: &Arc<dyn Subscriber>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

struct Group {
    source: Arc<dyn SharedState>,
    subscribers: Vec<Arc<dyn Subscriber>>,
    /// A change was reported but not broadcast yet
    pending: bool,
}

impl Group {
    fn has_subscriber(&self, sink: &Arc<dyn Subscriber>) -> bool {
        self.subscribers.iter().any(|s| same_subscriber(s, sink))
    }

    /// Sends the current snapshot to every subscriber if the source changed,
    /// dropping subscribers whose delivery fails.
    ///
    /// `updated()` consumes the change, so a change whose serialization failed
    /// stays pending and is retried on the next tick.
    fn push(&mut self) {
        if self.source.updated() {
            self.pending = true;
        }
        if !self.pending {
            return;
        }

        let payload: Arc<[u8]> = match self.source.serialize() {
            Ok(data) => data.into(),
            Err(e) => {
                warn!("Cannot serialize shared state, retrying next tick: {}", e);
                return;
            }
        };
        self.pending = false;

        self.subscribers.retain(|subscriber| {
            match subscriber.deliver(Arc::clone(&payload)) {
                Ok(()) => true,
                Err(e) => {
                    debug!("Pruning subscriber from stream: {}", e);
                    false
                }
            }
        });
    }
}

enum LoopState {
    Idle,
    Running {
        generation: u64,
        token: CancellationToken,
    },
}

struct Inner {
    /// One group per source, only while it has subscribers
    groups: Vec<Group>,
    state: LoopState,
    /// Bumped on every start, identifies the current loop
    generation: u64,
}

impl Inner {
    fn is_running(&self) -> bool {
        matches!(self.state, LoopState::Running { .. })
    }

    fn is_generation(&self, generation: u64) -> bool {
        matches!(self.state, LoopState::Running { generation: g, .. } if g == generation)
    }

    fn stop(&mut self) {
        if let LoopState::Running { token, .. } = &self.state {
            token.cancel();
            info!("Stopping streamer");
        }
        self.state = LoopState::Idle;
    }
}

/// Broadcast scheduler shared by every pool on the server.
pub struct Streamer {
    /// Interval between broadcast ticks
    delay: Duration,
    /// Scope each background loop is a child of
    parent: CancellationToken,
    /// Groups and loop state, shared with the running loop
    inner: Arc<Mutex<Inner>>,
}

impl Streamer {
    /// Creates an idle streamer ticking every `delay` once started.
    ///
    /// The background loop is bound to a child of `parent`, so cancelling the
    /// parent stops broadcasting for good.
    pub fn new(parent: CancellationToken, delay: Duration) -> Result<Self, StreamerError> {
        if parent.is_cancelled() {
            return Err(StreamerError::ParentCancelled);
        }
        if delay.is_zero() {
            return Err(StreamerError::InvalidDelay);
        }

        Ok(Self {
            delay,
            parent,
            inner: Arc::new(Mutex::new(Inner {
                groups: Vec::new(),
                state: LoopState::Idle,
                generation: 0,
            })),
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Adds `sink` to the group of `source`, creating the group if needed,
    /// and starts the background loop if it is not running.
    ///
    /// Subscribing the same sink twice is a no-op.
    pub async fn subscribe(&self, source: Arc<dyn SharedState>, sink: Arc<dyn Subscriber>) {
        let mut inner = self.inner.lock().await;

        match inner
            .groups
            .iter_mut()
            .find(|g| same_source(&g.source, &source))
        {
            Some(group) => {
                if !group.has_subscriber(&sink) {
                    debug!("Creating new subscriber to stream");
                    group.subscribers.push(sink);
                }
            }
            None => {
                debug!("Creating new subscriber to new stream");
                inner.groups.push(Group {
                    source,
                    subscribers: vec![sink],
                    pending: false,
                });
            }
        }

        if !inner.is_running() {
            self.start(&mut inner);
        }
    }

    /// Removes `sink` from the group of `source`. Empty groups are dropped and
    /// the loop stops once no group is left.
    pub async fn unsubscribe(&self, source: &Arc<dyn SharedState>, sink: &Arc<dyn Subscriber>) {
        let mut inner = self.inner.lock().await;

        let Some(index) = inner
            .groups
            .iter()
            .position(|g| same_source(&g.source, source))
        else {
            return;
        };

        let group = &mut inner.groups[index];
        let before = group.subscribers.len();
        group.subscribers.retain(|s| !same_subscriber(s, sink));
        if group.subscribers.len() == before {
            return;
        }
        debug!("Removed subscriber from stream");

        if group.subscribers.is_empty() {
            debug!("Stream has no subscribers, removing stream");
            inner.groups.remove(index);
        }

        if inner.groups.is_empty() && inner.is_running() {
            inner.stop();
        }
    }

    pub async fn state(&self) -> StreamerState {
        if self.inner.lock().await.is_running() {
            StreamerState::Running
        } else {
            StreamerState::Idle
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state().await == StreamerState::Running
    }

    pub async fn group_count(&self) -> usize {
        self.inner.lock().await.groups.len()
    }

    /// Number of subscribers of the group for `source`, zero if there is none.
    pub async fn subscriber_count(&self, source: &Arc<dyn SharedState>) -> usize {
        self.inner
            .lock()
            .await
            .groups
            .iter()
            .find(|g| same_source(&g.source, source))
            .map_or(0, |g| g.subscribers.len())
    }

    fn start(&self, inner: &mut Inner) {
        if inner.is_running() || inner.groups.is_empty() {
            return;
        }
        if self.parent.is_cancelled() {
            warn!("Cannot start streamer: parent scope was cancelled");
            return;
        }

        inner.generation += 1;
        let generation = inner.generation;
        let token = self.parent.child_token();
        inner.state = LoopState::Running {
            generation,
            token: token.clone(),
        };

        info!("Starting streamer");
        tokio::spawn(run_loop(Arc::clone(&self.inner), generation, token, self.delay));
    }
}

async fn run_loop(
    inner: Arc<Mutex<Inner>>,
    generation: u64,
    token: CancellationToken,
    delay: Duration,
) {
    let mut ticker = interval(delay);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Skip the first tick since it fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let mut inner = inner.lock().await;
        if !inner.is_generation(generation) {
            // Stopped while we were waiting for the lock
            return;
        }

        for group in inner.groups.iter_mut() {
            group.push();
        }
        inner.groups.retain(|g| !g.subscribers.is_empty());

        if inner.groups.is_empty() {
            debug!("Stopping streamer: there are no streams");
            inner.stop();
            return;
        }
    }

    // Parent scope cancelled, leave the state consistent for observers
    let mut inner = inner.lock().await;
    if inner.is_generation(generation) {
        debug!("Stopping streamer: scope was cancelled");
        inner.state = LoopState::Idle;
    }
}
