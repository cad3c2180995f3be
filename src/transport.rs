use crate::error::{Result, SyncError};
use ahash::{AHashMap, AHashSet};
use bytes::Bytes;
use log::debug;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

pub type StoreId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: String,
    pub connection_id: String,
    pub display_name: Option<String>,
}

impl UserInfo {
    pub fn new(user_id: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            connection_id: connection_id.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn is_same_connection(&self, other: &UserInfo) -> bool {
        self.connection_id == other.connection_id
    }
}

/// Lifetime of a store's contents, passed through to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Persistence {
    /// Values are not kept for participants who join later.
    Ephemeral,
    /// Store is removed when its owner leaves.
    Owner,
    /// Store lives as long as the session.
    Session,
    /// Store outlives the session.
    Persist,
}

impl Default for Persistence {
    fn default() -> Self {
        Persistence::Session
    }
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub network_id: String,
    pub persistence: Persistence,
    pub owned_by_creator: bool,
}

impl StoreOptions {
    pub fn new(network_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            persistence: Persistence::default(),
            owned_by_creator: false,
        }
    }

    pub fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_ownership(mut self, owned: bool) -> Self {
        self.owned_by_creator = owned;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateInfo {
    /// Server time at which the value was written, in seconds.
    pub timestamp: f64,
    pub sender: Option<UserInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Created { creator: UserInfo },
    Updated { key: String, value: Bytes, info: UpdateInfo },
    OwnershipChanged { owner: Option<UserInfo> },
    OwnershipRequestFailed { message: String },
    KeyRemoved { key: String },
    Deleted,
}

pub trait SessionTransport {
    fn local_user(&self) -> UserInfo;
    fn server_time(&self) -> f64;
    fn is_connected(&self) -> bool;

    /// Creates a store, or returns the existing one for the same network id.
    /// Completion is reported with [`StoreEvent::Created`].
    fn create_store(&mut self, options: StoreOptions) -> Result<StoreId>;
    fn delete_store(&mut self, store: StoreId) -> Result<()>;
    fn find_store(&self, network_id: &str) -> Option<StoreId>;

    /// Starts queueing events of `store` for this participant. Creating a
    /// store subscribes its creator.
    fn subscribe(&mut self, store: StoreId) -> Result<()>;
    /// Stops queueing events of `store` and drops those not yet drained.
    fn unsubscribe(&mut self, store: StoreId);

    fn set_value(&mut self, store: StoreId, key: &str, value: Bytes, timestamp: f64) -> Result<()>;
    fn get_value(&self, store: StoreId, key: &str) -> Option<Bytes>;
    fn keys(&self, store: StoreId) -> Vec<String>;

    fn has_key(&self, store: StoreId, key: &str) -> bool {
        self.get_value(store, key).is_some()
    }

    fn store_owner(&self, store: StoreId) -> Option<UserInfo>;

    /// Outcome arrives as [`StoreEvent::OwnershipChanged`] or
    /// [`StoreEvent::OwnershipRequestFailed`].
    fn request_ownership(&mut self, store: StoreId) -> Result<()>;
    fn clear_ownership(&mut self, store: StoreId) -> Result<()>;

    /// Takes every event queued for `store` since the last call.
    fn drain_events(&mut self, store: StoreId) -> Vec<StoreEvent>;
}

pub type SharedTransport = Rc<RefCell<dyn SessionTransport>>;

struct StoreRecord {
    network_id: String,
    persistence: Persistence,
    owner: Option<UserInfo>,
    values: AHashMap<String, Bytes>,
}

#[derive(Default)]
struct ClientQueue {
    connected: bool,
    subscribed: AHashSet<StoreId>,
    events: AHashMap<StoreId, VecDeque<StoreEvent>>,
}

impl ClientQueue {
    fn push(&mut self, store: StoreId, event: StoreEvent) {
        if self.connected && self.subscribed.contains(&store) {
            self.events.entry(store).or_default().push_back(event);
        }
    }
}

struct ServerState {
    time: f64,
    next_store_id: StoreId,
    next_connection: u64,
    stores: AHashMap<StoreId, StoreRecord>,
    clients: AHashMap<String, ClientQueue>,
}

impl ServerState {
    fn broadcast(&mut self, store: StoreId, event: StoreEvent) {
        for client in self.clients.values_mut() {
            client.push(store, event.clone());
        }
    }

    fn send_to(&mut self, connection_id: &str, store: StoreId, event: StoreEvent) {
        if let Some(client) = self.clients.get_mut(connection_id) {
            client.push(store, event);
        }
    }

    fn subscribe(&mut self, connection_id: &str, store: StoreId) {
        if let Some(client) = self.clients.get_mut(connection_id) {
            client.subscribed.insert(store);
        }
    }

    fn store_mut(&mut self, store: StoreId) -> Result<&mut StoreRecord> {
        self.stores.get_mut(&store).ok_or(SyncError::StoreNotFound(store))
    }

    fn remove_store(&mut self, store: StoreId) {
        if self.stores.remove(&store).is_some() {
            self.broadcast(store, StoreEvent::Deleted);
        }
    }
}

/// Shared in-process session host. Clone handles refer to the same session.
#[derive(Clone)]
pub struct MemoryServer {
    state: Rc<RefCell<ServerState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(ServerState {
                time: 0.0,
                next_store_id: 1,
                next_connection: 1,
                stores: AHashMap::new(),
                clients: AHashMap::new(),
            })),
        }
    }

    pub fn connect(&self, user_id: impl Into<String>) -> MemorySession {
        let mut state = self.state.borrow_mut();
        let connection_id = format!("conn-{}", state.next_connection);
        state.next_connection += 1;
        state.clients.insert(
            connection_id.clone(),
            ClientQueue {
                connected: true,
                ..ClientQueue::default()
            },
        );

        MemorySession {
            server: self.clone(),
            user: UserInfo::new(user_id, connection_id),
        }
    }

    pub fn connect_shared(&self, user_id: impl Into<String>) -> SharedTransport {
        Rc::new(RefCell::new(self.connect(user_id)))
    }

    pub fn advance_time(&self, seconds: f64) {
        self.state.borrow_mut().time += seconds;
    }

    pub fn set_time(&self, seconds: f64) {
        self.state.borrow_mut().time = seconds;
    }

    pub fn time(&self) -> f64 {
        self.state.borrow().time
    }

    pub fn store_count(&self) -> usize {
        self.state.borrow().stores.len()
    }

    /// Removes a key from a store, notifying every participant.
    pub fn remove_key(&self, store: StoreId, key: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let removed = state.store_mut(store)?.values.remove(key).is_some();
        if removed {
            state.broadcast(store, StoreEvent::KeyRemoved { key: key.to_string() });
        }
        Ok(())
    }

    pub fn has_store(&self, network_id: &str) -> bool {
        self.state
            .borrow()
            .stores
            .values()
            .any(|s| s.network_id == network_id)
    }
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MemorySession {
    server: MemoryServer,
    user: UserInfo,
}

impl MemorySession {
    pub fn server(&self) -> &MemoryServer {
        &self.server
    }

    /// Leaves the session. Stores this participant owned with
    /// [`Persistence::Owner`] are removed, other owned stores become unowned.
    pub fn disconnect(&mut self) {
        let mut state = self.server.state.borrow_mut();
        if let Some(client) = state.clients.get_mut(&self.user.connection_id) {
            client.connected = false;
            client.subscribed.clear();
            client.events.clear();
        }

        let owned: Vec<(StoreId, Persistence)> = state
            .stores
            .iter()
            .filter(|(_, s)| s.owner.as_ref().is_some_and(|o| o.is_same_connection(&self.user)))
            .map(|(id, s)| (*id, s.persistence))
            .collect();

        for (store, persistence) in owned {
            if persistence == Persistence::Owner {
                state.remove_store(store);
            } else if let Some(record) = state.stores.get_mut(&store) {
                record.owner = None;
                state.broadcast(store, StoreEvent::OwnershipChanged { owner: None });
            }
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SyncError::Transport("session is disconnected".to_string()))
        }
    }

    fn owned_by_other(&self, owner: &Option<UserInfo>) -> bool {
        owner.as_ref().is_some_and(|o| !o.is_same_connection(&self.user))
    }
}

impl SessionTransport for MemorySession {
    fn local_user(&self) -> UserInfo {
        self.user.clone()
    }

    fn server_time(&self) -> f64 {
        self.server.time()
    }

    fn is_connected(&self) -> bool {
        self.server
            .state
            .borrow()
            .clients
            .get(&self.user.connection_id)
            .is_some_and(|c| c.connected)
    }

    fn create_store(&mut self, options: StoreOptions) -> Result<StoreId> {
        self.ensure_connected()?;
        let mut state = self.server.state.borrow_mut();

        let existing = state
            .stores
            .iter()
            .find(|(_, s)| s.network_id == options.network_id)
            .map(|(id, _)| *id);
        if let Some(store) = existing {
            debug!("Store '{}' already exists as {}", options.network_id, store);
            let creator = self.user.clone();
            state.subscribe(&self.user.connection_id, store);
            state.send_to(&self.user.connection_id, store, StoreEvent::Created { creator });
            return Ok(store);
        }

        let store = state.next_store_id;
        state.next_store_id += 1;
        state.stores.insert(
            store,
            StoreRecord {
                network_id: options.network_id,
                persistence: options.persistence,
                owner: options.owned_by_creator.then(|| self.user.clone()),
                values: AHashMap::new(),
            },
        );
        state.subscribe(&self.user.connection_id, store);
        state.broadcast(
            store,
            StoreEvent::Created {
                creator: self.user.clone(),
            },
        );
        Ok(store)
    }

    fn delete_store(&mut self, store: StoreId) -> Result<()> {
        self.ensure_connected()?;
        let mut state = self.server.state.borrow_mut();
        let owner = state.store_mut(store)?.owner.clone();
        if self.owned_by_other(&owner) {
            return Err(SyncError::NotOwner(store));
        }
        state.remove_store(store);
        Ok(())
    }

    fn find_store(&self, network_id: &str) -> Option<StoreId> {
        self.server
            .state
            .borrow()
            .stores
            .iter()
            .find(|(_, s)| s.network_id == network_id)
            .map(|(id, _)| *id)
    }

    fn subscribe(&mut self, store: StoreId) -> Result<()> {
        self.ensure_connected()?;
        let mut state = self.server.state.borrow_mut();
        state.store_mut(store)?;
        state.subscribe(&self.user.connection_id, store);
        Ok(())
    }

    fn unsubscribe(&mut self, store: StoreId) {
        let mut state = self.server.state.borrow_mut();
        if let Some(client) = state.clients.get_mut(&self.user.connection_id) {
            client.subscribed.remove(&store);
            client.events.remove(&store);
        }
    }

    fn set_value(&mut self, store: StoreId, key: &str, value: Bytes, timestamp: f64) -> Result<()> {
        self.ensure_connected()?;
        let mut state = self.server.state.borrow_mut();
        let record = state.store_mut(store)?;
        if self.owned_by_other(&record.owner) {
            return Err(SyncError::NotOwner(store));
        }
        if record.persistence != Persistence::Ephemeral {
            record.values.insert(key.to_string(), value.clone());
        }

        state.broadcast(
            store,
            StoreEvent::Updated {
                key: key.to_string(),
                value,
                info: UpdateInfo {
                    timestamp,
                    sender: Some(self.user.clone()),
                },
            },
        );
        Ok(())
    }

    fn get_value(&self, store: StoreId, key: &str) -> Option<Bytes> {
        self.server
            .state
            .borrow()
            .stores
            .get(&store)
            .and_then(|s| s.values.get(key).cloned())
    }

    fn keys(&self, store: StoreId) -> Vec<String> {
        let state = self.server.state.borrow();
        let mut keys: Vec<String> = state
            .stores
            .get(&store)
            .map(|s| s.values.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn store_owner(&self, store: StoreId) -> Option<UserInfo> {
        self.server
            .state
            .borrow()
            .stores
            .get(&store)
            .and_then(|s| s.owner.clone())
    }

    fn request_ownership(&mut self, store: StoreId) -> Result<()> {
        self.ensure_connected()?;
        let mut state = self.server.state.borrow_mut();
        let record = state.store_mut(store)?;

        if self.owned_by_other(&record.owner) {
            let message = format!("store {} is already owned", store);
            state.send_to(
                &self.user.connection_id,
                store,
                StoreEvent::OwnershipRequestFailed { message },
            );
            return Ok(());
        }

        record.owner = Some(self.user.clone());
        state.broadcast(
            store,
            StoreEvent::OwnershipChanged {
                owner: Some(self.user.clone()),
            },
        );
        Ok(())
    }

    fn clear_ownership(&mut self, store: StoreId) -> Result<()> {
        self.ensure_connected()?;
        let mut state = self.server.state.borrow_mut();
        let record = state.store_mut(store)?;
        if record.owner.is_none() {
            return Ok(());
        }
        if self.owned_by_other(&record.owner) {
            return Err(SyncError::NotOwner(store));
        }

        record.owner = None;
        state.broadcast(store, StoreEvent::OwnershipChanged { owner: None });
        Ok(())
    }

    fn drain_events(&mut self, store: StoreId) -> Vec<StoreEvent> {
        let mut state = self.server.state.borrow_mut();
        state
            .clients
            .get_mut(&self.user.connection_id)
            .and_then(|c| c.events.remove(&store))
            .map(Vec::from)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_value_broadcasts_to_every_subscriber() {
        let server = MemoryServer::new();
        let mut alice = server.connect("alice");
        let mut bob = server.connect("bob");

        let store = alice.create_store(StoreOptions::new("ball")).unwrap();
        bob.subscribe(store).unwrap();
        server.set_time(1.5);
        alice.set_value(store, "x", Bytes::from_static(b"1"), 1.5).unwrap();

        let events = bob.drain_events(store);
        assert_eq!(events.len(), 1);
        match &events[0] {
            StoreEvent::Updated { key, info, .. } => {
                assert_eq!(key, "x");
                assert_eq!(info.timestamp, 1.5);
                assert!(info.sender.as_ref().unwrap().is_same_connection(&alice.local_user()));
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert_eq!(alice.drain_events(store).len(), 2);
        assert!(bob.drain_events(store).is_empty());
        assert_eq!(bob.get_value(store, "x"), Some(Bytes::from_static(b"1")));
    }

    #[test]
    fn test_create_store_joins_existing_network_id() {
        let server = MemoryServer::new();
        let mut alice = server.connect("alice");
        let mut bob = server.connect("bob");

        let first = alice.create_store(StoreOptions::new("shared")).unwrap();
        let second = bob.create_store(StoreOptions::new("shared")).unwrap();

        assert_eq!(first, second);
        assert_eq!(server.store_count(), 1);
        assert_eq!(bob.find_store("shared"), Some(first));
    }

    #[test]
    fn test_owned_store_rejects_foreign_writes() {
        let server = MemoryServer::new();
        let mut alice = server.connect("alice");
        let mut bob = server.connect("bob");

        let store = alice
            .create_store(StoreOptions::new("owned").with_ownership(true))
            .unwrap();

        let err = bob.set_value(store, "x", Bytes::new(), 0.0).unwrap_err();
        assert!(matches!(err, SyncError::NotOwner(_)));
        assert!(bob.delete_store(store).is_err());
    }

    #[test]
    fn test_ownership_request_conflict() {
        let server = MemoryServer::new();
        let mut alice = server.connect("alice");
        let mut bob = server.connect("bob");

        let store = alice.create_store(StoreOptions::new("door")).unwrap();
        bob.subscribe(store).unwrap();
        alice.request_ownership(store).unwrap();
        bob.drain_events(store);

        bob.request_ownership(store).unwrap();
        let events = bob.drain_events(store);
        assert!(matches!(events[0], StoreEvent::OwnershipRequestFailed { .. }));
        assert!(alice.store_owner(store).unwrap().is_same_connection(&alice.local_user()));

        alice.clear_ownership(store).unwrap();
        assert!(bob.store_owner(store).is_none());
    }

    #[test]
    fn test_disconnect_removes_owner_persistent_stores() {
        let server = MemoryServer::new();
        let mut alice = server.connect("alice");
        let mut bob = server.connect("bob");

        let temporary = alice
            .create_store(
                StoreOptions::new("cursor")
                    .with_ownership(true)
                    .with_persistence(Persistence::Owner),
            )
            .unwrap();
        let lasting = alice
            .create_store(StoreOptions::new("score").with_ownership(true))
            .unwrap();
        bob.subscribe(temporary).unwrap();
        bob.subscribe(lasting).unwrap();

        alice.disconnect();

        assert!(!alice.is_connected());
        assert_eq!(bob.drain_events(temporary), vec![StoreEvent::Deleted]);
        assert_eq!(
            bob.drain_events(lasting),
            vec![StoreEvent::OwnershipChanged { owner: None }]
        );
        assert!(alice.set_value(lasting, "x", Bytes::new(), 0.0).is_err());
    }

    #[test]
    fn test_events_only_reach_subscribers() {
        let server = MemoryServer::new();
        let mut alice = server.connect("alice");
        let mut bob = server.connect("bob");

        let store = alice.create_store(StoreOptions::new("crate")).unwrap();
        alice.set_value(store, "x", Bytes::from_static(b"1"), 0.0).unwrap();
        assert!(bob.drain_events(store).is_empty());

        bob.subscribe(store).unwrap();
        alice.set_value(store, "x", Bytes::from_static(b"2"), 0.0).unwrap();
        bob.unsubscribe(store);
        for _ in 0..100 {
            alice.set_value(store, "x", Bytes::from_static(b"3"), 0.0).unwrap();
        }

        assert!(bob.drain_events(store).is_empty());
        assert!(matches!(bob.subscribe(99), Err(SyncError::StoreNotFound(99))));
    }

    #[test]
    fn test_ephemeral_values_are_not_retained() {
        let server = MemoryServer::new();
        let mut alice = server.connect("alice");

        let store = alice
            .create_store(StoreOptions::new("ping").with_persistence(Persistence::Ephemeral))
            .unwrap();
        alice.set_value(store, "x", Bytes::from_static(b"1"), 0.0).unwrap();

        assert!(!alice.has_key(store, "x"));
        assert!(alice.keys(store).is_empty());
    }

    #[test]
    fn test_remove_key() {
        let server = MemoryServer::new();
        let mut alice = server.connect("alice");
        let store = alice.create_store(StoreOptions::new("board")).unwrap();
        alice.set_value(store, "cell", Bytes::from_static(b"x"), 0.0).unwrap();
        alice.drain_events(store);

        server.remove_key(store, "cell").unwrap();

        assert_eq!(
            alice.drain_events(store),
            vec![StoreEvent::KeyRemoved { key: "cell".to_string() }]
        );
        assert!(!alice.has_key(store, "cell"));
    }
}
