use crate::debug;
use crate::error::{Result, SyncError};
use crate::event::EventWrapper;
use crate::rate_limit::{SendLimitStats, SendRateLimiter};
use crate::serialization::ValueCodec;
use crate::snapshot::{SmoothingOptions, SnapshotBuffer};
use crate::storage_types::{self, EqualsFn};
use crate::transport::{SessionTransport, StoreId, UpdateInfo};
use crate::value::{FromStorageValue, PropertyType, StorageValue};
use log::warn;

/// Reads and writes the host-side value a property mirrors.
pub trait ValueBinding {
    fn read(&self) -> StorageValue;
    fn write(&mut self, value: &StorageValue);
}

pub struct FnBinding<G, S> {
    getter: G,
    setter: S,
}

impl<G, S> FnBinding<G, S>
where
    G: Fn() -> StorageValue,
    S: FnMut(&StorageValue),
{
    pub fn new(getter: G, setter: S) -> Self {
        Self { getter, setter }
    }
}

impl<G, S> ValueBinding for FnBinding<G, S>
where
    G: Fn() -> StorageValue,
    S: FnMut(&StorageValue),
{
    fn read(&self) -> StorageValue {
        (self.getter)()
    }

    fn write(&mut self, value: &StorageValue) {
        (self.setter)(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    pub new_value: StorageValue,
    pub old_value: StorageValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    Local,
    Remote,
}

/// Queued change, delivered after the entity borrow is released.
pub struct PropertyChange {
    key: String,
    source: ChangeSource,
    change: ValueChange,
    specific: EventWrapper<ValueChange>,
    any: EventWrapper<ValueChange>,
}

impl PropertyChange {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn source(&self) -> ChangeSource {
        self.source
    }

    pub fn change(&self) -> &ValueChange {
        &self.change
    }

    pub fn dispatch(self) {
        self.specific.trigger(&self.change);
        self.any.trigger(&self.change);
    }
}

impl std::fmt::Debug for PropertyChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyChange")
            .field("key", &self.key)
            .field("source", &self.source)
            .field("change", &self.change)
            .finish()
    }
}

pub struct StorageProperty {
    key: String,
    network_id: Option<String>,
    property_type: PropertyType,
    equals: EqualsFn,
    current_value: StorageValue,
    pending_value: Option<StorageValue>,
    incoming: Option<StorageValue>,
    binding: Option<Box<dyn ValueBinding>>,
    limiter: SendRateLimiter,
    has_explicit_limit: bool,
    smoothing: Option<SnapshotBuffer>,
    last_remote_update: Option<UpdateInfo>,
    on_any_change: EventWrapper<ValueChange>,
    on_local_change: EventWrapper<ValueChange>,
    on_remote_change: EventWrapper<ValueChange>,
    notifications: Vec<PropertyChange>,
}

impl StorageProperty {
    pub fn manual(
        key: impl Into<String>,
        property_type: PropertyType,
        initial: impl Into<StorageValue>,
    ) -> Result<Self> {
        let key = key.into();
        let initial = initial.into();
        check_type(&key, &property_type, &initial)?;
        Ok(Self::with_value(key, property_type, initial, None))
    }

    pub fn auto<G, S>(key: impl Into<String>, property_type: PropertyType, getter: G, setter: S) -> Result<Self>
    where
        G: Fn() -> StorageValue + 'static,
        S: FnMut(&StorageValue) + 'static,
    {
        Self::bound(key, property_type, Box::new(FnBinding::new(getter, setter)))
    }

    pub fn bound(key: impl Into<String>, property_type: PropertyType, binding: Box<dyn ValueBinding>) -> Result<Self> {
        let key = key.into();
        let initial = binding.read();
        check_type(&key, &property_type, &initial)?;
        Ok(Self::with_value(key, property_type, initial, Some(binding)))
    }

    fn with_value(
        key: String,
        property_type: PropertyType,
        initial: StorageValue,
        binding: Option<Box<dyn ValueBinding>>,
    ) -> Self {
        Self {
            key,
            network_id: None,
            equals: storage_types::equals_for(&property_type),
            property_type,
            current_value: initial,
            pending_value: None,
            incoming: None,
            binding,
            limiter: SendRateLimiter::unlimited(),
            has_explicit_limit: false,
            smoothing: None,
            last_remote_update: None,
            on_any_change: EventWrapper::new(),
            on_local_change: EventWrapper::new(),
            on_remote_change: EventWrapper::new(),
            notifications: Vec::new(),
        }
    }

    pub fn with_send_limit(mut self, sends_per_second: Option<f64>) -> Self {
        self.set_send_limit(sends_per_second);
        self
    }

    /// Smooths remote values through a snapshot buffer. Fails for types
    /// that cannot be interpolated.
    pub fn with_smoothing(mut self, options: SmoothingOptions) -> Result<Self> {
        let mut buffer = SnapshotBuffer::new(self.property_type, options)?;
        buffer.set_current_value(0.0, self.current_value.clone());
        self.smoothing = Some(buffer);
        Ok(self)
    }

    pub fn set_send_limit(&mut self, sends_per_second: Option<f64>) {
        self.limiter.set_limit(sends_per_second);
        self.has_explicit_limit = true;
    }

    pub(crate) fn apply_default_send_limit(&mut self, sends_per_second: Option<f64>) {
        if !self.has_explicit_limit {
            self.limiter.set_limit(sends_per_second);
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn apply_default_smoothing(&mut self, options: &SmoothingOptions) {
        if self.smoothing.is_some() || self.property_type.base.is_discrete() {
            return;
        }
        match SnapshotBuffer::new(self.property_type, options.clone()) {
            Ok(mut buffer) => {
                buffer.set_current_value(0.0, self.current_value.clone());
                self.smoothing = Some(buffer);
            }
            Err(e) => warn!("Default smoothing not applied to '{}': {}", self.key, e),
        }
    }

    pub(crate) fn set_key(&mut self, key: String) {
        self.key = key;
    }

    pub fn property_type(&self) -> &PropertyType {
        &self.property_type
    }

    pub fn network_id(&self) -> Option<&str> {
        self.network_id.as_deref()
    }

    pub(crate) fn set_network_id(&mut self, network_id: &str) {
        self.network_id = Some(network_id.to_string());
    }

    pub fn current_value(&self) -> &StorageValue {
        &self.current_value
    }

    pub fn pending_value(&self) -> Option<&StorageValue> {
        self.pending_value.as_ref()
    }

    pub fn current_or_pending_value(&self) -> &StorageValue {
        self.pending_value.as_ref().unwrap_or(&self.current_value)
    }

    pub fn get<T: FromStorageValue>(&self) -> Option<T> {
        T::from_storage_value(self.current_or_pending_value())
    }

    pub fn has_binding(&self) -> bool {
        self.binding.is_some()
    }

    pub fn set_pending_value(&mut self, value: impl Into<StorageValue>) -> Result<()> {
        let value = value.into();
        check_type(&self.key, &self.property_type, &value)?;

        if let Some(binding) = self.binding.as_mut() {
            binding.write(&value);
        }
        self.pending_value = if (self.equals)(&value, &self.current_value) {
            None
        } else {
            Some(value)
        };
        Ok(())
    }

    pub fn check_local_value_changed(&mut self) -> bool {
        if let Some(binding) = self.binding.as_ref() {
            let live = binding.read();
            if !live.matches_type(&self.property_type) {
                warn!(
                    "Ignoring local value for '{}': expected {}, got {}",
                    self.key,
                    self.property_type,
                    live.type_name()
                );
                return false;
            }

            self.pending_value = if (self.equals)(&live, &self.current_value) {
                None
            } else {
                Some(live)
            };
        }

        self.pending_value.is_some()
    }

    pub fn check_within_send_limit(&mut self, server_time: f64) -> bool {
        if self.limiter.check(server_time) {
            return true;
        }

        self.limiter.record_deferral();
        debug::trace_rate_limit(
            &self.key,
            self.limiter.sends_per_second(),
            self.limiter.last_send_time(),
            server_time,
        );
        false
    }

    /// Writes the current or pending value to the store. Returns whether a
    /// pending value was committed as the new current value.
    pub fn put_current_value(
        &mut self,
        transport: &mut dyn SessionTransport,
        store: StoreId,
        codec: &ValueCodec,
        server_time: f64,
    ) -> Result<bool> {
        let bytes = codec.encode(self.current_or_pending_value())?;
        let size = bytes.len();
        transport.set_value(store, &self.key, bytes, server_time)?;

        self.limiter.record_send(server_time);
        self.incoming = None;
        debug::log_value("wrote", &self.key, self.current_or_pending_value());
        match &self.network_id {
            Some(network_id) => debug::trace_send(network_id, &self.key, size, server_time),
            None => debug::trace_send(&store.to_string(), &self.key, size, server_time),
        }

        if let Some(value) = self.pending_value.take() {
            let old_value = std::mem::replace(&mut self.current_value, value);
            if let Some(buffer) = self.smoothing.as_mut() {
                buffer.set_current_value(server_time, self.current_value.clone());
            }
            self.queue_change(ChangeSource::Local, old_value);
            return Ok(true);
        }
        Ok(false)
    }

    /// Initial values apply at once; later ones go through the snapshot buffer or wait in `incoming`.
    pub fn apply_remote_value(
        &mut self,
        value: StorageValue,
        suppress_events: bool,
        update_info: Option<&UpdateInfo>,
        is_initial: bool,
        server_time: f64,
    ) {
        if !value.matches_type(&self.property_type) {
            warn!(
                "Ignoring remote value for '{}': expected {}, got {}",
                self.key,
                self.property_type,
                value.type_name()
            );
            return;
        }

        let timestamp = update_info.map_or(server_time, |info| info.timestamp);
        self.last_remote_update = update_info.cloned();
        debug::log_value("received", &self.key, &value);

        if is_initial {
            if let Some(buffer) = self.smoothing.as_mut() {
                buffer.set_current_value(timestamp, value.clone());
            }
            self.apply_value(value, suppress_events);
            return;
        }

        match self.smoothing.as_mut() {
            Some(buffer) => {
                let accepted = buffer.save_snapshot(timestamp, value);
                debug::trace_snapshot(&self.key, timestamp, accepted, buffer.len());
            }
            None => self.incoming = Some(value),
        }
    }

    pub fn apply_incoming_value(&mut self) -> bool {
        match self.incoming.take() {
            Some(value) => {
                self.apply_value(value, false);
                true
            }
            None => false,
        }
    }

    pub fn discard_incoming_value(&mut self) {
        self.incoming = None;
    }

    pub fn discard_pending_value(&mut self) -> bool {
        self.pending_value.take().is_some()
    }

    pub fn apply_snapshot_smoothing(&mut self, server_time: f64) -> bool {
        let Some(buffer) = self.smoothing.as_mut() else {
            return false;
        };

        let target = server_time + buffer.interpolation_target();
        let next = match buffer.get_lerped_value(target) {
            Some(value) if !(self.equals)(value, &self.current_value) => value.clone(),
            _ => return false,
        };

        self.apply_value(next, false);
        true
    }

    pub fn reset_smoothing(&mut self, server_time: f64) {
        if let Some(buffer) = self.smoothing.as_mut() {
            buffer.set_current_value(server_time, self.current_value.clone());
        }
    }

    pub fn is_smoothed(&self) -> bool {
        self.smoothing.is_some()
    }

    pub fn snapshot_buffer(&self) -> Option<&SnapshotBuffer> {
        self.smoothing.as_ref()
    }

    pub fn snapshot_buffer_mut(&mut self) -> Option<&mut SnapshotBuffer> {
        self.smoothing.as_mut()
    }

    pub fn get_rate_of_change(&self, server_time: f64) -> Result<StorageValue> {
        let buffer = self
            .smoothing
            .as_ref()
            .ok_or_else(|| SyncError::unsupported("rate of change without smoothing", self.property_type))?;
        buffer
            .get_rate_of_change(server_time + buffer.interpolation_target())
            .ok_or_else(|| SyncError::unsupported("rate of change", self.property_type))
    }

    pub fn last_update_info(&self) -> Option<&UpdateInfo> {
        self.last_remote_update.as_ref()
    }

    pub fn send_limit_stats(&self) -> SendLimitStats {
        self.limiter.get_stats()
    }

    pub fn sends_per_second(&self) -> Option<f64> {
        self.limiter.sends_per_second()
    }

    pub fn on_any_change(&self) -> &EventWrapper<ValueChange> {
        &self.on_any_change
    }

    pub fn on_local_change(&self) -> &EventWrapper<ValueChange> {
        &self.on_local_change
    }

    pub fn on_remote_change(&self) -> &EventWrapper<ValueChange> {
        &self.on_remote_change
    }

    pub fn take_notifications(&mut self) -> Vec<PropertyChange> {
        std::mem::take(&mut self.notifications)
    }

    fn apply_value(&mut self, value: StorageValue, suppress_events: bool) {
        let old_value = std::mem::replace(&mut self.current_value, value);
        self.pending_value = None;
        if let Some(binding) = self.binding.as_mut() {
            binding.write(&self.current_value);
        }

        if !suppress_events && !(self.equals)(&old_value, &self.current_value) {
            self.queue_change(ChangeSource::Remote, old_value);
        }
    }

    fn queue_change(&mut self, source: ChangeSource, old_value: StorageValue) {
        let specific = match source {
            ChangeSource::Local => self.on_local_change.clone(),
            ChangeSource::Remote => self.on_remote_change.clone(),
        };
        self.notifications.push(PropertyChange {
            key: self.key.clone(),
            source,
            change: ValueChange {
                new_value: self.current_value.clone(),
                old_value,
            },
            specific,
            any: self.on_any_change.clone(),
        });
    }
}

impl std::fmt::Debug for StorageProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageProperty")
            .field("key", &self.key)
            .field("property_type", &self.property_type)
            .field("current_value", &self.current_value)
            .field("pending_value", &self.pending_value)
            .field("smoothed", &self.smoothing.is_some())
            .finish()
    }
}

fn check_type(key: &str, property_type: &PropertyType, value: &StorageValue) -> Result<()> {
    if value.matches_type(property_type) {
        Ok(())
    } else {
        Err(SyncError::TypeMismatch {
            key: key.to_string(),
            expected: property_type.to_string(),
            actual: value.type_name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryServer, StoreOptions};
    use glam::Vec3;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn info(timestamp: f64) -> UpdateInfo {
        UpdateInfo {
            timestamp,
            sender: None,
        }
    }

    #[test]
    fn test_manual_rejects_wrong_type() {
        let err = StorageProperty::manual("score", PropertyType::int(), 1.5f32).unwrap_err();
        assert!(matches!(err, SyncError::TypeMismatch { .. }));
    }

    #[test]
    fn test_pending_value_lifecycle() {
        let server = MemoryServer::new();
        let mut session = server.connect("alice");
        let store = session.create_store(StoreOptions::new("p")).unwrap();
        let codec = ValueCodec::default();

        let mut prop = StorageProperty::manual("score", PropertyType::int(), 0i64).unwrap();
        assert!(!prop.check_local_value_changed());

        prop.set_pending_value(5i64).unwrap();
        assert_eq!(prop.current_value(), &StorageValue::Int(0));
        assert_eq!(prop.get::<i64>(), Some(5));
        assert!(prop.check_local_value_changed());

        assert!(prop.put_current_value(&mut session, store, &codec, 0.0).unwrap());
        assert_eq!(prop.current_value(), &StorageValue::Int(5));
        assert!(prop.pending_value().is_none());
        assert!(!prop.check_local_value_changed());

        let stored = session.get_value(store, "score").unwrap();
        assert_eq!(codec.decode(&stored).unwrap(), StorageValue::Int(5));
    }

    #[test]
    fn test_setting_current_value_clears_pending() {
        let mut prop = StorageProperty::manual("score", PropertyType::int(), 3i64).unwrap();
        prop.set_pending_value(4i64).unwrap();
        prop.set_pending_value(3i64).unwrap();
        assert!(prop.pending_value().is_none());
    }

    #[test]
    fn test_auto_property_polls_getter() {
        let host = Rc::new(Cell::new(1.0f32));
        let mut prop = {
            let read = Rc::clone(&host);
            let write = Rc::clone(&host);
            StorageProperty::auto(
                "speed",
                PropertyType::float(),
                move || StorageValue::Float(read.get()),
                move |v| write.set(v.as_f32().unwrap_or_default()),
            )
            .unwrap()
        };

        assert!(!prop.check_local_value_changed());
        host.set(2.0);
        assert!(prop.check_local_value_changed());
        assert_eq!(prop.pending_value(), Some(&StorageValue::Float(2.0)));

        prop.apply_remote_value(StorageValue::Float(7.0), false, Some(&info(1.0)), false, 1.0);
        assert!(prop.apply_incoming_value());
        assert_eq!(host.get(), 7.0);
        assert!(prop.pending_value().is_none());
    }

    #[test]
    fn test_remote_change_queues_notification() {
        let mut prop = StorageProperty::manual("score", PropertyType::int(), 1i64).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = Rc::clone(&seen);
            prop.on_any_change().add(move |change: &ValueChange| {
                seen.borrow_mut().push((change.new_value.clone(), change.old_value.clone()));
            });
        }

        prop.apply_remote_value(StorageValue::Int(2), false, Some(&info(0.5)), false, 0.5);
        assert!(seen.borrow().is_empty());
        prop.apply_incoming_value();

        let notifications = prop.take_notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].source(), ChangeSource::Remote);
        for n in notifications {
            n.dispatch();
        }

        assert_eq!(*seen.borrow(), vec![(StorageValue::Int(2), StorageValue::Int(1))]);
    }

    #[test]
    fn test_suppressed_initial_value() {
        let mut prop = StorageProperty::manual("score", PropertyType::int(), 1i64).unwrap();
        prop.apply_remote_value(StorageValue::Int(9), true, None, true, 0.0);

        assert_eq!(prop.current_value(), &StorageValue::Int(9));
        assert!(prop.take_notifications().is_empty());
    }

    #[test]
    fn test_local_write_supersedes_incoming_value() {
        let server = MemoryServer::new();
        let mut session = server.connect("alice");
        let store = session.create_store(StoreOptions::new("p")).unwrap();

        let mut prop = StorageProperty::manual("score", PropertyType::int(), 0i64).unwrap();
        prop.apply_remote_value(StorageValue::Int(8), false, Some(&info(1.5)), false, 2.0);

        prop.set_pending_value(1i64).unwrap();
        prop.put_current_value(&mut session, store, &ValueCodec::default(), 2.0).unwrap();
        assert!(!prop.apply_incoming_value());
        assert_eq!(prop.current_value(), &StorageValue::Int(1));
    }

    #[test]
    fn test_send_limit_defers() {
        let mut prop = StorageProperty::manual("score", PropertyType::int(), 0i64)
            .unwrap()
            .with_send_limit(Some(2.0));
        let server = MemoryServer::new();
        let mut session = server.connect("alice");
        let store = session.create_store(StoreOptions::new("p")).unwrap();

        assert!(prop.check_within_send_limit(0.0));
        prop.put_current_value(&mut session, store, &ValueCodec::default(), 0.0).unwrap();
        assert!(!prop.check_within_send_limit(0.2));
        assert!(prop.check_within_send_limit(0.5));
        assert_eq!(prop.send_limit_stats().total_deferred, 1);
    }

    #[test]
    fn test_smoothing_moves_toward_samples() {
        let mut prop = StorageProperty::manual("pos", PropertyType::vec3(), Vec3::ZERO)
            .unwrap()
            .with_smoothing(SmoothingOptions::new().with_interpolation_target(0.0))
            .unwrap();

        prop.apply_remote_value(StorageValue::Vec3(Vec3::ZERO), false, Some(&info(1.0)), false, 1.0);
        prop.apply_remote_value(StorageValue::Vec3(Vec3::X * 10.0), false, Some(&info(2.0)), false, 2.0);

        assert!(prop.apply_snapshot_smoothing(1.5));
        let pos = prop.current_value().as_vec3().unwrap();
        assert!((pos.x - 5.0).abs() < 1e-4);

        let rate = prop.get_rate_of_change(1.5).unwrap();
        assert!((rate.as_vec3().unwrap().x - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_smoothing_rejects_discrete_types() {
        let result = StorageProperty::manual("name", PropertyType::string(), "bob")
            .unwrap()
            .with_smoothing(SmoothingOptions::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_reset_smoothing() {
        let mut prop = StorageProperty::manual("speed", PropertyType::double(), 0.0)
            .unwrap()
            .with_smoothing(SmoothingOptions::new())
            .unwrap();

        prop.apply_remote_value(StorageValue::Double(4.0), false, Some(&info(1.0)), false, 1.0);
        prop.apply_remote_value(StorageValue::Double(8.0), false, Some(&info(2.0)), false, 2.0);
        prop.reset_smoothing(3.0);

        let buffer = prop.snapshot_buffer().unwrap();
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.latest().unwrap().value, StorageValue::Double(0.0));
    }
}
