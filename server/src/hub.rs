//! Connection registry and broadcast coordinator.
//!
//! The hub is a single tokio task that owns the client registry outright. All
//! mutations arrive as [`HubCommand`]s over one ordered channel and are applied
//! one at a time, so registration, unregistration, and broadcast never observe
//! the registry concurrently and no lock guards it.
//!
//! # Architecture
//!
//! - [`Hub`] - Cloneable handle held by the admission handler and every pump
//! - [`Client`] - Registry entry: identity, connection id, outbound queue sender
//! - [`Coordinator`] - The event loop state; the sole writer of the registry
//!
//! Each client's outbound queue is a bounded `mpsc` channel. The registry holds
//! the only sender, so removing an entry closes the queue exactly once and the
//! client's writer observes the end of its stream.
//!
//! # Backpressure
//!
//! Broadcast uses `try_send` for every client. A client whose queue is full is
//! evicted in the same pass; delivery to the remaining clients never waits on
//! a slow consumer.
//!
//! # Example
//!
//! ```rust
//! use chorus_server::hub::{Client, Hub};
//! use chorus_server::types::Frame;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (hub, _task) = Hub::spawn();
//!
//! let (alice, mut alice_rx) = Client::new("alice", 16);
//! hub.register(alice).await.unwrap();
//!
//! hub.broadcast(Frame::from("hello")).await.unwrap();
//! assert_eq!(alice_rx.recv().await, Some(Frame::from("hello")));
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::HubError;
use crate::types::Frame;

/// Capacity of the coordinator's command channel.
pub const DEFAULT_COMMAND_CAPACITY: usize = 1024;

/// Identifies one admitted connection.
///
/// The identity may be reused by a later connection; the connection id never is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    /// User identity taken from the validated token.
    pub identity: String,
    /// Unique id of this particular connection.
    pub connection_id: Uuid,
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.identity, self.connection_id)
    }
}

/// A registered client as seen by the hub.
#[derive(Debug)]
pub struct Client {
    key: ClientKey,
    outbound: mpsc::Sender<Frame>,
}

impl Client {
    /// Creates a client and its outbound queue.
    ///
    /// The returned receiver belongs to the client's writer. The queue closes
    /// when the hub drops the client.
    ///
    /// # Panics
    ///
    /// Panics if `queue_capacity` is 0.
    #[must_use]
    pub fn new(identity: impl Into<String>, queue_capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound, rx) = mpsc::channel(queue_capacity);
        let key = ClientKey {
            identity: identity.into(),
            connection_id: Uuid::new_v4(),
        };
        (Self { key, outbound }, rx)
    }

    /// The key identifying this client's connection.
    pub fn key(&self) -> &ClientKey {
        &self.key
    }

    /// The client's identity.
    pub fn identity(&self) -> &str {
        &self.key.identity
    }
}

/// Events processed by the coordinator, in the order received.
#[derive(Debug)]
pub enum HubCommand {
    /// Insert a client, replacing any entry with the same identity.
    Register(Client),
    /// Remove the client with this key, if it is still registered.
    Unregister(ClientKey),
    /// Deliver a frame to every registered client.
    Broadcast(Frame),
    /// Report the identities currently registered.
    Snapshot(oneshot::Sender<Vec<String>>),
}

/// Result of one broadcast pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients the frame was queued for.
    pub delivered: usize,
    /// Clients removed because their queue was full or closed.
    pub evicted: Vec<ClientKey>,
}

/// Registry state owned by the hub task.
///
/// Every method takes `&mut self`; the single owner is the only writer.
#[derive(Debug, Default)]
pub struct Coordinator {
    clients: HashMap<String, Client>,
}

impl Coordinator {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one command.
    pub fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(client) => self.register(client),
            HubCommand::Unregister(key) => {
                self.unregister(&key);
            }
            HubCommand::Broadcast(frame) => {
                self.broadcast(&frame);
            }
            HubCommand::Snapshot(reply) => {
                // The asker may have given up; nothing to do then.
                let _ = reply.send(self.identities());
            }
        }
    }

    /// Inserts `client`, evicting a previous entry for the same identity.
    pub fn register(&mut self, client: Client) {
        let key = client.key.clone();
        if let Some(previous) = self.clients.insert(key.identity.clone(), client) {
            info!(
                client = %previous.key,
                replaced_by = %key.connection_id,
                "Replacing existing client with same identity"
            );
        }
        info!(client = %key, total = self.clients.len(), "Client registered");
    }

    /// Removes the client with `key` if it is the current entry.
    ///
    /// Returns `true` if an entry was removed. Unknown or stale keys are a no-op.
    pub fn unregister(&mut self, key: &ClientKey) -> bool {
        let is_current = self
            .clients
            .get(&key.identity)
            .is_some_and(|client| client.key.connection_id == key.connection_id);

        if !is_current {
            debug!(client = %key, "Unregister for client not in registry");
            return false;
        }

        self.clients.remove(&key.identity);
        info!(client = %key, total = self.clients.len(), "Client unregistered");
        true
    }

    /// Queues `frame` for every client, evicting those that cannot accept it.
    pub fn broadcast(&mut self, frame: &Frame) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        self.clients.retain(|_, client| match client.outbound.try_send(frame.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(client = %client.key, "Outbound queue full, evicting slow client");
                report.evicted.push(client.key.clone());
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(client = %client.key, "Outbound queue closed, evicting client");
                report.evicted.push(client.key.clone());
                false
            }
        });

        trace!(
            frame_len = frame.payload_len(),
            delivered = report.delivered,
            evicted = report.evicted.len(),
            "Broadcast pass complete"
        );
        report
    }

    /// Identities currently registered, in no particular order.
    pub fn identities(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` if no clients are registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Runs the event loop until every [`Hub`] handle has been dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<HubCommand>) {
        debug!("Hub coordinator started");
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        debug!(remaining = self.clients.len(), "Hub coordinator stopped");
    }
}

/// Handle to the hub coordinator.
///
/// Cheap to clone. Operations are enqueued in call order; each returns
/// [`HubError::Closed`] once the coordinator has stopped.
#[derive(Debug, Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Spawns a coordinator with the default command capacity.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn() -> (Self, JoinHandle<()>) {
        Self::spawn_with_capacity(DEFAULT_COMMAND_CAPACITY)
    }

    /// Spawns a coordinator whose command channel holds `capacity` events.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn spawn_with_capacity(capacity: usize) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(capacity);
        let task = tokio::spawn(Coordinator::new().run(rx));
        (Self { commands }, task)
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }

    /// Registers `client`. The latest registration for an identity wins.
    pub async fn register(&self, client: Client) -> Result<(), HubError> {
        self.send(HubCommand::Register(client)).await
    }

    /// Unregisters the connection identified by `key`. Idempotent.
    pub async fn unregister(&self, key: ClientKey) -> Result<(), HubError> {
        self.send(HubCommand::Unregister(key)).await
    }

    /// Fans `frame` out to every registered client, the sender included.
    pub async fn broadcast(&self, frame: Frame) -> Result<(), HubError> {
        self.send(HubCommand::Broadcast(frame)).await
    }

    /// Identities registered once all previously enqueued events have run.
    pub async fn identities(&self) -> Result<Vec<String>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Snapshot(reply)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Number of registered clients.
    pub async fn client_count(&self) -> Result<usize, HubError> {
        Ok(self.identities().await?.len())
    }

    /// Returns `true` if `identity` is registered.
    pub async fn contains(&self, identity: &str) -> Result<bool, HubError> {
        Ok(self.identities().await?.iter().any(|id| id == identity))
    }
}
