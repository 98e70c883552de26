//! Fan-out point for everything the authority says.
//!
//! A message is encoded once and the text shared with every observer
//! through a [`broadcast`] channel, so a slow or dead observer only ever
//! affects its own receiver. The hub keeps a [`Mirror`] of the stream so a
//! newly connected observer can be brought up to date before it starts
//! receiving live traffic.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dispatch_proto::{Message, Mirror, StalePolicy, encode_text};
use dispatch_types::{Command, HistoryItem, InfoMessage, Snapshot};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// One encoded message, shared by every observer.
pub type Frame = Arc<str>;

/// Greeting sent to every new observer.
pub const GREETING: &str = "connected to bridge";

/// Broadcast hub plus the bridge's own mirror of the stream.
#[derive(Debug)]
pub struct Hub {
    tx: broadcast::Sender<Frame>,
    mirror: Mutex<Mirror>,
}

impl Hub {
    /// A hub buffering `capacity` frames per observer and keeping
    /// `history_capacity` history entries. Every snapshot replaces the last.
    pub fn new(capacity: usize, history_capacity: usize) -> Self {
        Self::with_policy(capacity, history_capacity, StalePolicy::Overwrite)
    }

    /// Like [`Hub::new`] with an explicit stale-snapshot policy.
    pub fn with_policy(capacity: usize, history_capacity: usize, policy: StalePolicy) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            mirror: Mutex::new(Mirror::new(history_capacity, policy)),
        }
    }

    fn mirror(&self) -> MutexGuard<'_, Mirror> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send `message` to every connected observer.
    ///
    /// Returns how many observers it was queued for. Having none is normal.
    pub fn publish(&self, message: &Message) -> usize {
        let text = match encode_text(message) {
            Ok(text) => text,
            Err(err) => {
                warn!(kind = message.kind(), error = %err, "Message not published");
                return 0;
            }
        };
        // Held across the send so `connect` never sees a frame twice or not at all.
        let mut mirror = self.mirror();
        mirror.apply(message);
        let receivers = self.tx.send(Frame::from(text)).unwrap_or(0);
        drop(mirror);
        debug!(kind = message.kind(), receivers, "Published");
        receivers
    }

    /// Append one entry to the bridge history and broadcast it.
    pub fn record(&self, msg: impl Into<String>) -> usize {
        let item = HistoryItem::new(self.current_t(), msg);
        self.publish(&Message::history(vec![item]))
    }

    /// Note a command on its way upstream. It stays pending until the next
    /// snapshot arrives.
    pub fn stage(&self, command: Command) {
        self.mirror().stage(command);
    }

    /// Commands forwarded since the last snapshot.
    pub fn pending(&self) -> Vec<Command> {
        self.mirror().pending().to_vec()
    }

    /// Subscribe a new observer.
    ///
    /// Returns the frames that bring it up to date (greeting, history,
    /// latest state) and a receiver for everything published afterwards.
    pub fn connect(&self) -> (Vec<Frame>, broadcast::Receiver<Frame>) {
        let mirror = self.mirror();
        let mut replay = vec![Message::Info(InfoMessage::info(GREETING))];
        if !mirror.history().is_empty() {
            replay.push(Message::history(mirror.history().to_vec()));
        }
        if let Some(snapshot) = mirror.snapshot() {
            replay.push(Message::state(snapshot.clone()));
        }
        let rx = self.tx.subscribe();
        drop(mirror);

        let frames = replay
            .iter()
            .filter_map(|message| encode_text(message).ok())
            .map(Frame::from)
            .collect();
        (frames, rx)
    }

    /// Latest mirrored snapshot.
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.mirror().snapshot().cloned()
    }

    /// Bridge history, oldest first.
    pub fn history(&self) -> Vec<HistoryItem> {
        self.mirror().history().to_vec()
    }

    /// Most entries the bridge history keeps.
    pub fn history_capacity(&self) -> usize {
        self.mirror().history().capacity()
    }

    /// Simulated time of the latest snapshot, 0 before the first one.
    pub fn current_t(&self) -> u64 {
        self.mirror().snapshot().map_or(0, |snapshot| snapshot.t)
    }

    /// Observers currently subscribed.
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
