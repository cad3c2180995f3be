use crate::config::SyncConfig;
use crate::debug;
use crate::error::{Result, SyncError};
use crate::event::{EventWrapper, ListenerId};
use crate::property::{StorageProperty, ValueChange};
use crate::property_set::{self, StoragePropertySet};
use crate::scheduler::{HookId, UpdateScheduler};
use crate::serialization::ValueCodec;
use crate::transport::{Persistence, SharedTransport, StoreEvent, StoreId, StoreOptions, UpdateInfo, UserInfo};
use crate::value::StorageValue;
use bytes::Bytes;
use log::{debug, warn};
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkIdOptions {
    Custom(String),
    ObjectPath(String),
}

impl NetworkIdOptions {
    pub fn custom(id: impl Into<String>) -> Self {
        NetworkIdOptions::Custom(id.into())
    }

    pub fn object_path(path: impl Into<String>) -> Self {
        NetworkIdOptions::ObjectPath(path.into())
    }

    pub fn resolve(&self) -> Result<String> {
        let (raw, id) = match self {
            NetworkIdOptions::Custom(id) => (id, id.clone()),
            NetworkIdOptions::ObjectPath(path) => (path, format!("path:{}", path)),
        };
        if raw.trim().is_empty() {
            return Err(SyncError::InvalidConfig("network id must not be empty".to_string()));
        }
        Ok(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Initializing,
    Ready,
    Destroyed,
}

#[derive(Clone)]
pub struct SyncContext {
    pub transport: SharedTransport,
    pub scheduler: UpdateScheduler,
    pub config: SyncConfig,
}

impl SyncContext {
    pub fn new(transport: SharedTransport, scheduler: UpdateScheduler) -> Self {
        Self {
            transport,
            scheduler,
            config: SyncConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }
}

fn apply_config(config: &SyncConfig, property: &mut StorageProperty) {
    property.apply_default_send_limit(config.default_send_limit);
    if let Some(options) = &config.default_smoothing {
        property.apply_default_smoothing(options);
    }
}

type Callback = Box<dyn FnOnce()>;
type ErrorCallback = Box<dyn FnOnce(&SyncError)>;

struct EntityInner {
    network_id: String,
    store: StoreId,
    transport: SharedTransport,
    scheduler: UpdateScheduler,
    config: SyncConfig,
    codec: ValueCodec,
    properties: StoragePropertySet,
    state: EntityState,
    joined_existing: bool,
    wants_ownership: bool,
    local_user: UserInfo,
    owner: Option<UserInfo>,
    hook: Option<HookId>,
    ready_callbacks: Vec<Callback>,
    ownership_requests: Vec<(Callback, ErrorCallback)>,
    revoke_requests: Vec<(Callback, ErrorCallback)>,
    deferred: Vec<Callback>,
    on_ownership_updated: EventWrapper<Option<UserInfo>>,
    on_destroyed: EventWrapper<()>,
}

impl EntityInner {
    fn server_time(&self) -> f64 {
        self.transport.borrow().server_time()
    }

    fn do_i_own_store(&self) -> bool {
        self.owner
            .as_ref()
            .is_some_and(|owner| owner.is_same_connection(&self.local_user))
    }

    /// Unowned stores are open to everyone, last write wins.
    fn may_write(&self) -> bool {
        self.owner.is_none() || self.do_i_own_store()
    }

    fn can_i_modify_store(&self) -> bool {
        self.state == EntityState::Ready && self.may_write()
    }

    fn process_events(&mut self) {
        if self.state == EntityState::Destroyed {
            return;
        }

        let events = self.transport.borrow_mut().drain_events(self.store);
        for event in events {
            self.handle_event(event);
            if self.state == EntityState::Destroyed {
                return;
            }
        }

        if self.state == EntityState::Initializing && self.joined_existing {
            self.hydrate();
        }
    }

    fn handle_event(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::Created { creator } => {
                let created_here = !self.joined_existing && creator.is_same_connection(&self.local_user);
                if self.state == EntityState::Initializing && created_here {
                    self.finish_creation();
                }
            }
            StoreEvent::Updated { key, value, info } => self.handle_update(key, value, info),
            StoreEvent::OwnershipChanged { owner } => self.handle_ownership_changed(owner),
            StoreEvent::OwnershipRequestFailed { message } => {
                warn!("Ownership request for '{}' failed: {}", self.network_id, message);
                for (_, on_error) in std::mem::take(&mut self.ownership_requests) {
                    let error = SyncError::Transport(message.clone());
                    self.deferred.push(Box::new(move || on_error(&error)));
                }
            }
            StoreEvent::KeyRemoved { key } => {
                debug!("Key '{}' removed from store of '{}'", key, self.network_id);
            }
            StoreEvent::Deleted => {
                debug!("Store of '{}' was deleted", self.network_id);
                self.teardown(false);
            }
        }
    }

    fn finish_creation(&mut self) {
        self.owner = self.transport.borrow().store_owner(self.store);
        if self.may_write() {
            let now = self.server_time();
            let mut transport = self.transport.borrow_mut();
            self.properties
                .force_write_state(&mut *transport, self.store, &self.codec, now);
        }
        self.finish_setup();
    }

    fn hydrate(&mut self) {
        let now = self.server_time();
        self.owner = self.transport.borrow().store_owner(self.store);

        {
            let transport = self.transport.borrow();
            let loaded = self
                .properties
                .initialize_from_store(&*transport, self.store, &self.codec, true, now);
            debug!(
                "Joined '{}' with {} of {} properties loaded",
                self.network_id,
                loaded,
                self.properties.len()
            );
        }

        if self.may_write() {
            let mut transport = self.transport.borrow_mut();
            self.properties
                .write_missing_keys(&mut *transport, self.store, &self.codec, now);
        }

        if self.wants_ownership && self.owner.is_none() {
            if let Err(e) = self.transport.borrow_mut().request_ownership(self.store) {
                warn!("Could not claim '{}': {}", self.network_id, e);
            }
        }

        self.finish_setup();
    }

    fn finish_setup(&mut self) {
        self.state = EntityState::Ready;
        debug!("Sync entity '{}' ready on store {}", self.network_id, self.store);
        let callbacks = std::mem::take(&mut self.ready_callbacks);
        self.deferred.extend(callbacks);
    }

    fn handle_update(&mut self, key: String, value: Bytes, info: UpdateInfo) {
        if self.state != EntityState::Ready {
            return;
        }
        let echo = info
            .sender
            .as_ref()
            .is_some_and(|sender| sender.is_same_connection(&self.local_user));
        if echo {
            return;
        }

        debug::trace_receive(&self.network_id, &key, value.len(), info.timestamp);
        if self.do_i_own_store() {
            debug!("Ignoring remote write to '{}' on locally owned '{}'", key, self.network_id);
            return;
        }

        let now = self.server_time();
        let Some(property) = self.properties.get_property_mut(&key) else {
            debug!("No property '{}' on '{}'", key, self.network_id);
            return;
        };

        match self.codec.decode_as(&key, property.property_type(), &value) {
            Ok(decoded) => property.apply_remote_value(decoded, false, Some(&info), false, now),
            Err(e) => warn!("Dropping update for '{}' on '{}': {}", key, self.network_id, e),
        }
    }

    fn handle_ownership_changed(&mut self, owner: Option<UserInfo>) {
        let was_mine = self.do_i_own_store();
        self.owner = owner;
        let is_mine = self.do_i_own_store();
        debug::trace_ownership(
            &self.network_id,
            self.owner.as_ref().map(|o| o.user_id.as_str()),
            is_mine,
        );

        if self.state == EntityState::Ready {
            let now = self.server_time();
            if is_mine && !was_mine {
                let mut transport = self.transport.borrow_mut();
                self.properties
                    .force_write_state(&mut *transport, self.store, &self.codec, now);
            } else if was_mine && !is_mine {
                self.properties.reset_smoothing(now);
            }
        }

        if is_mine {
            for (on_success, _) in std::mem::take(&mut self.ownership_requests) {
                self.deferred.push(on_success);
            }
        } else if self.owner.is_some() {
            let store = self.store;
            for (_, on_error) in std::mem::take(&mut self.ownership_requests) {
                self.deferred.push(Box::new(move || on_error(&SyncError::NotOwner(store))));
            }
        }

        if self.owner.is_none() {
            for (on_success, _) in std::mem::take(&mut self.revoke_requests) {
                self.deferred.push(on_success);
            }
        }

        let event = self.on_ownership_updated.clone();
        let owner = self.owner.clone();
        self.deferred.push(Box::new(move || event.trigger(&owner)));
    }

    fn send_changes(&mut self) -> bool {
        if !self.can_i_modify_store() {
            return false;
        }

        let now = self.server_time();
        let mut transport = self.transport.borrow_mut();
        self.properties
            .send_changes(&mut *transport, self.store, &self.codec, now)
    }

    fn receive_changes(&mut self) {
        if self.state != EntityState::Ready {
            return;
        }

        if !self.can_i_modify_store() {
            self.properties.discard_pending_values();
        }

        let now = self.server_time();
        let owned = self.do_i_own_store();
        self.properties.receive_changes(now, owned);
    }

    fn begin_ownership_request(&mut self) -> Result<bool> {
        if self.state == EntityState::Destroyed {
            return Err(SyncError::EntityDestroyed(self.network_id.clone()));
        }
        if self.do_i_own_store() {
            return Ok(true);
        }

        if let Err(e) = self.transport.borrow_mut().request_ownership(self.store) {
            warn!("Ownership request for '{}' failed: {}", self.network_id, e);
            return Err(e);
        }
        Ok(false)
    }

    fn begin_revoke(&mut self) -> Result<()> {
        if self.state == EntityState::Destroyed {
            return Err(SyncError::EntityDestroyed(self.network_id.clone()));
        }
        if !self.do_i_own_store() {
            return Err(SyncError::NotOwner(self.store));
        }

        if let Err(e) = self.transport.borrow_mut().clear_ownership(self.store) {
            warn!("Could not release '{}': {}", self.network_id, e);
            return Err(e);
        }
        Ok(())
    }

    fn add_property(&mut self, mut property: StorageProperty) -> Result<String> {
        if self.state == EntityState::Destroyed {
            return Err(SyncError::EntityDestroyed(self.network_id.clone()));
        }

        apply_config(&self.config, &mut property);
        let ready = self.state == EntityState::Ready;
        let may_write = self.may_write();
        let now = self.server_time();

        let property = self.properties.add_property(property)?;
        let key = property.key().to_string();
        if !ready {
            return Ok(key);
        }

        let loaded = {
            let transport = self.transport.borrow();
            property_set::initialize_property(property, &*transport, self.store, &self.codec, true, now)
        };
        if !loaded && may_write {
            let mut transport = self.transport.borrow_mut();
            if let Err(e) = property.put_current_value(&mut *transport, self.store, &self.codec, now) {
                warn!("Failed to write '{}': {}", key, e);
            }
        }
        Ok(key)
    }

    fn teardown(&mut self, delete_store: bool) {
        if self.state == EntityState::Destroyed {
            return;
        }

        if let Some(hook) = self.hook.take() {
            self.scheduler.remove(hook);
        }

        match self.transport.try_borrow_mut() {
            Ok(mut transport) => {
                if delete_store && self.do_i_own_store() {
                    if let Err(e) = transport.delete_store(self.store) {
                        warn!("Could not delete store of '{}': {}", self.network_id, e);
                    }
                }
                transport.unsubscribe(self.store);
            }
            Err(_) => warn!("Transport busy, store of '{}' was not released", self.network_id),
        }

        self.state = EntityState::Destroyed;
        self.ready_callbacks.clear();

        let pending: Vec<_> = self
            .ownership_requests
            .drain(..)
            .chain(self.revoke_requests.drain(..))
            .collect();
        for (_, on_error) in pending {
            let error = SyncError::EntityDestroyed(self.network_id.clone());
            self.deferred.push(Box::new(move || on_error(&error)));
        }

        let event = self.on_destroyed.clone();
        self.deferred.push(Box::new(move || event.trigger(&())));
        debug!("Sync entity '{}' destroyed", self.network_id);
    }

    fn take_deferred(&mut self) -> Vec<Callback> {
        let mut deferred = std::mem::take(&mut self.deferred);
        for change in self.properties.take_notifications() {
            deferred.push(Box::new(move || change.dispatch()));
        }
        deferred
    }
}

impl Drop for EntityInner {
    fn drop(&mut self) {
        self.teardown(true);
        for callback in self.take_deferred() {
            callback();
        }
    }
}

/// A property set bound to one store. Clones share the entity; dropping the last handle destroys it.
#[derive(Clone)]
pub struct SyncEntity {
    inner: Rc<RefCell<EntityInner>>,
}

impl SyncEntity {
    pub fn new(
        ctx: &SyncContext,
        mut properties: StoragePropertySet,
        is_owned_locally: bool,
        persistence: Option<Persistence>,
        network_id: NetworkIdOptions,
    ) -> Result<Self> {
        let network_id = network_id.resolve()?;
        let persistence = persistence.unwrap_or(ctx.config.default_persistence);

        properties.bind_network_id(&network_id);
        for property in properties.iter_mut() {
            apply_config(&ctx.config, property);
        }

        let (store, joined_existing, local_user) = {
            let mut transport = ctx.transport.borrow_mut();
            let local_user = transport.local_user();
            match transport.find_store(&network_id) {
                Some(store) => {
                    debug!("Joining existing store {} for '{}'", store, network_id);
                    transport.subscribe(store)?;
                    (store, true, local_user)
                }
                None => {
                    let options = StoreOptions::new(network_id.clone())
                        .with_persistence(persistence)
                        .with_ownership(is_owned_locally);
                    (transport.create_store(options)?, false, local_user)
                }
            }
        };

        let inner = Rc::new(RefCell::new(EntityInner {
            network_id,
            store,
            transport: Rc::clone(&ctx.transport),
            scheduler: ctx.scheduler.clone(),
            config: ctx.config.clone(),
            codec: ctx.config.codec(),
            properties,
            state: EntityState::Initializing,
            joined_existing,
            wants_ownership: is_owned_locally,
            local_user,
            owner: None,
            hook: None,
            ready_callbacks: Vec::new(),
            ownership_requests: Vec::new(),
            revoke_requests: Vec::new(),
            deferred: Vec::new(),
            on_ownership_updated: EventWrapper::new(),
            on_destroyed: EventWrapper::new(),
        }));

        let weak = Rc::downgrade(&inner);
        let hook = ctx.scheduler.add(move |_| {
            if let Some(inner) = weak.upgrade() {
                SyncEntity { inner }.update();
            }
        });
        inner.borrow_mut().hook = Some(hook);

        Ok(Self { inner })
    }

    fn run<R>(&self, f: impl FnOnce(&mut EntityInner) -> R) -> R {
        let (result, deferred) = {
            let mut inner = self.inner.borrow_mut();
            let result = f(&mut inner);
            (result, inner.take_deferred())
        };

        for callback in deferred {
            callback();
        }
        result
    }

    pub fn update(&self) {
        self.run(|inner| {
            inner.process_events();
            inner.send_changes();
            inner.receive_changes();
        });
    }

    pub fn send_changes(&self) -> bool {
        self.run(|inner| {
            inner.process_events();
            inner.send_changes()
        })
    }

    pub fn receive_changes(&self) {
        self.run(|inner| {
            inner.process_events();
            inner.receive_changes();
        })
    }

    pub fn send_and_receive_changes(&self) -> bool {
        self.run(|inner| {
            inner.process_events();
            let sent = inner.send_changes();
            inner.receive_changes();
            sent
        })
    }

    pub fn notify_on_ready(&self, callback: impl FnOnce() + 'static) {
        let mut inner = self.inner.borrow_mut();
        let state = inner.state;
        match state {
            EntityState::Ready => {
                drop(inner);
                callback();
            }
            EntityState::Initializing => inner.ready_callbacks.push(Box::new(callback)),
            EntityState::Destroyed => {
                debug!("Ready callback on destroyed entity '{}' dropped", inner.network_id);
            }
        }
    }

    /// Asks the session for ownership. Exactly one of the callbacks runs,
    /// either now or on a later tick.
    pub fn request_ownership<S, E>(&self, on_success: S, on_error: E)
    where
        S: FnOnce() + 'static,
        E: FnOnce(&SyncError) + 'static,
    {
        let outcome = self.inner.borrow_mut().begin_ownership_request();
        match outcome {
            Ok(true) => on_success(),
            Ok(false) => self
                .inner
                .borrow_mut()
                .ownership_requests
                .push((Box::new(on_success), Box::new(on_error))),
            Err(e) => on_error(&e),
        }
    }

    pub fn try_revoke_ownership<S, E>(&self, on_success: S, on_error: E)
    where
        S: FnOnce() + 'static,
        E: FnOnce(&SyncError) + 'static,
    {
        let outcome = self.inner.borrow_mut().begin_revoke();
        match outcome {
            Ok(()) => self
                .inner
                .borrow_mut()
                .revoke_requests
                .push((Box::new(on_success), Box::new(on_error))),
            Err(e) => on_error(&e),
        }
    }

    pub fn add_storage_property(&self, property: StorageProperty) -> Result<String> {
        self.run(|inner| inner.add_property(property))
    }

    pub fn properties(&self) -> Ref<'_, StoragePropertySet> {
        Ref::map(self.inner.borrow(), |inner| &inner.properties)
    }

    pub fn properties_mut(&self) -> RefMut<'_, StoragePropertySet> {
        RefMut::map(self.inner.borrow_mut(), |inner| &mut inner.properties)
    }

    pub fn property_value(&self, key: &str) -> Option<StorageValue> {
        self.properties()
            .get_property(key)
            .map(|p| p.current_or_pending_value().clone())
    }

    pub fn set_property_value(&self, key: &str, value: impl Into<StorageValue>) -> Result<()> {
        self.properties_mut()
            .get_property_mut(key)
            .ok_or_else(|| SyncError::UnknownProperty(key.to_string()))?
            .set_pending_value(value)
    }

    pub fn on_property_change<F>(&self, key: &str, listener: F) -> Result<ListenerId>
    where
        F: Fn(&ValueChange) + 'static,
    {
        let properties = self.properties();
        let property = properties
            .get_property(key)
            .ok_or_else(|| SyncError::UnknownProperty(key.to_string()))?;
        Ok(property.on_any_change().add(listener))
    }

    pub fn on_ownership_updated(&self) -> EventWrapper<Option<UserInfo>> {
        self.inner.borrow().on_ownership_updated.clone()
    }

    pub fn on_destroyed(&self) -> EventWrapper<()> {
        self.inner.borrow().on_destroyed.clone()
    }

    pub fn network_id(&self) -> String {
        self.inner.borrow().network_id.clone()
    }

    pub fn store_id(&self) -> StoreId {
        self.inner.borrow().store
    }

    pub fn state(&self) -> EntityState {
        self.inner.borrow().state
    }

    pub fn is_setup_finished(&self) -> bool {
        self.state() == EntityState::Ready
    }

    pub fn do_i_own_store(&self) -> bool {
        self.inner.borrow().do_i_own_store()
    }

    pub fn is_store_owned(&self) -> bool {
        self.inner.borrow().owner.is_some()
    }

    pub fn can_i_modify_store(&self) -> bool {
        self.inner.borrow().can_i_modify_store()
    }

    pub fn owner_info(&self) -> Option<UserInfo> {
        self.inner.borrow().owner.clone()
    }

    pub fn local_user(&self) -> UserInfo {
        self.inner.borrow().local_user.clone()
    }

    /// Stops syncing. Deletes the store if it is owned locally.
    pub fn destroy(&self) {
        self.run(|inner| inner.teardown(true));
    }
}

impl std::fmt::Debug for SyncEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("SyncEntity")
                .field("network_id", &inner.network_id)
                .field("store", &inner.store)
                .field("state", &inner.state)
                .field("owner", &inner.owner)
                .finish(),
            Err(_) => f.debug_struct("SyncEntity").finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryServer;
    use crate::value::PropertyType;
    use std::cell::Cell;

    fn context(server: &MemoryServer, user: &str) -> SyncContext {
        SyncContext::new(server.connect_shared(user), UpdateScheduler::new())
    }

    fn score_set(value: i64) -> StoragePropertySet {
        StoragePropertySet::from_properties([StorageProperty::manual("score", PropertyType::int(), value).unwrap()])
            .unwrap()
    }

    #[test]
    fn test_network_id_resolution() {
        assert_eq!(NetworkIdOptions::custom("ball").resolve().unwrap(), "ball");
        assert_eq!(
            NetworkIdOptions::object_path("Scene/Ball").resolve().unwrap(),
            "path:Scene/Ball"
        );
        assert!(NetworkIdOptions::custom("  ").resolve().is_err());
    }

    #[test]
    fn test_creator_becomes_ready_and_publishes() {
        let server = MemoryServer::new();
        let ctx = context(&server, "alice");
        let entity = SyncEntity::new(&ctx, score_set(3), true, None, NetworkIdOptions::custom("board")).unwrap();

        let ready = Rc::new(Cell::new(false));
        {
            let ready = Rc::clone(&ready);
            entity.notify_on_ready(move || ready.set(true));
        }
        assert_eq!(entity.state(), EntityState::Initializing);

        ctx.scheduler.tick(0.016);
        assert!(ready.get());
        assert!(entity.is_setup_finished());
        assert!(entity.do_i_own_store());

        let transport = ctx.transport.borrow();
        assert!(transport.has_key(entity.store_id(), "score"));
    }

    #[test]
    fn test_notify_on_ready_when_already_ready() {
        let server = MemoryServer::new();
        let ctx = context(&server, "alice");
        let entity = SyncEntity::new(&ctx, score_set(0), false, None, NetworkIdOptions::custom("x")).unwrap();
        ctx.scheduler.tick(0.016);

        let calls = Rc::new(Cell::new(0));
        {
            let calls = Rc::clone(&calls);
            entity.notify_on_ready(move || calls.set(calls.get() + 1));
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_joiner_hydrates_without_events() {
        let server = MemoryServer::new();
        let alice = context(&server, "alice");
        let bob = context(&server, "bob");

        let owner = SyncEntity::new(&alice, score_set(42), true, None, NetworkIdOptions::custom("game")).unwrap();
        alice.scheduler.tick(0.016);

        let joiner = SyncEntity::new(&bob, score_set(0), false, None, NetworkIdOptions::custom("game")).unwrap();
        let changes = Rc::new(Cell::new(0));
        {
            let changes = Rc::clone(&changes);
            joiner
                .on_property_change("score", move |_| changes.set(changes.get() + 1))
                .unwrap();
        }
        bob.scheduler.tick(0.016);

        assert_eq!(joiner.store_id(), owner.store_id());
        assert_eq!(joiner.property_value("score"), Some(StorageValue::Int(42)));
        assert_eq!(changes.get(), 0);
        assert!(!joiner.can_i_modify_store());
    }

    #[test]
    fn test_unknown_property() {
        let server = MemoryServer::new();
        let ctx = context(&server, "alice");
        let entity = SyncEntity::new(&ctx, score_set(0), false, None, NetworkIdOptions::custom("x")).unwrap();

        let err = entity.set_property_value("lives", 3i64).unwrap_err();
        assert!(matches!(err, SyncError::UnknownProperty(_)));
    }

    #[test]
    fn test_revoke_requires_ownership() {
        let server = MemoryServer::new();
        let ctx = context(&server, "alice");
        let entity = SyncEntity::new(&ctx, score_set(0), false, None, NetworkIdOptions::custom("x")).unwrap();
        ctx.scheduler.tick(0.016);

        let failed = Rc::new(Cell::new(false));
        {
            let failed = Rc::clone(&failed);
            entity.try_revoke_ownership(|| {}, move |e| failed.set(matches!(e, SyncError::NotOwner(_))));
        }
        assert!(failed.get());
    }

    #[test]
    fn test_drop_detaches_hook_and_deletes_owned_store() {
        let server = MemoryServer::new();
        let ctx = context(&server, "alice");
        let entity = SyncEntity::new(&ctx, score_set(0), true, None, NetworkIdOptions::custom("temp")).unwrap();
        ctx.scheduler.tick(0.016);
        assert_eq!(ctx.scheduler.len(), 1);

        let destroyed = Rc::new(Cell::new(0));
        {
            let destroyed = Rc::clone(&destroyed);
            entity.on_destroyed().add(move |_| destroyed.set(destroyed.get() + 1));
        }

        drop(entity);

        assert!(ctx.scheduler.is_empty());
        assert!(!server.has_store("temp"));
        assert_eq!(destroyed.get(), 1);
    }

    #[test]
    fn test_drop_fails_pending_ownership_request() {
        let server = MemoryServer::new();
        let ctx = context(&server, "alice");
        let entity = SyncEntity::new(&ctx, score_set(0), false, None, NetworkIdOptions::custom("lamp")).unwrap();
        ctx.scheduler.tick(0.016);

        let failure = Rc::new(Cell::new(false));
        {
            let failure = Rc::clone(&failure);
            entity.request_ownership(
                || panic!("entity was dropped before the grant arrived"),
                move |e| failure.set(matches!(e, SyncError::EntityDestroyed(_))),
            );
        }
        assert!(!failure.get());

        drop(entity);
        assert!(failure.get());
    }

    #[test]
    fn test_destroy_releases_event_queue() {
        let server = MemoryServer::new();
        let alice = context(&server, "alice");
        let bob = context(&server, "bob");

        let owner = SyncEntity::new(&alice, score_set(0), true, None, NetworkIdOptions::custom("feed")).unwrap();
        alice.scheduler.tick(0.016);
        let viewer = SyncEntity::new(&bob, score_set(0), false, None, NetworkIdOptions::custom("feed")).unwrap();
        bob.scheduler.tick(0.016);
        let store = viewer.store_id();

        viewer.destroy();
        for i in 1..=1000i64 {
            owner.set_property_value("score", i).unwrap();
            alice.scheduler.tick(0.016);
        }

        assert!(bob.transport.borrow_mut().drain_events(store).is_empty());
    }

    #[test]
    fn test_properties_are_tagged_with_network_id() {
        let server = MemoryServer::new();
        let ctx = context(&server, "alice");
        let entity = SyncEntity::new(&ctx, score_set(0), true, None, NetworkIdOptions::custom("tagged")).unwrap();
        ctx.scheduler.tick(0.016);
        entity
            .add_storage_property(StorageProperty::manual("lives", PropertyType::int(), 3i64).unwrap())
            .unwrap();

        let properties = entity.properties();
        assert_eq!(properties.get_property("score").unwrap().network_id(), Some("tagged"));
        assert_eq!(properties.get_property("lives").unwrap().network_id(), Some("tagged"));
    }

    #[test]
    fn test_default_send_limit_from_config() {
        let server = MemoryServer::new();
        let ctx = context(&server, "alice").with_config(SyncConfig::new().with_send_limit(Some(4.0)));
        let entity = SyncEntity::new(&ctx, score_set(0), true, None, NetworkIdOptions::custom("x")).unwrap();

        let properties = entity.properties();
        assert_eq!(properties.get_property("score").unwrap().sends_per_second(), Some(4.0));
    }
}
