use crate::error::{Result, SyncError};
use crate::property::{PropertyChange, StorageProperty};
use crate::serialization::ValueCodec;
use crate::transport::{SessionTransport, StoreId};
use ahash::AHashMap;
use log::warn;

const MAX_RENAME_ATTEMPTS: usize = 1024;

#[derive(Debug, Default)]
pub struct StoragePropertySet {
    properties: Vec<StorageProperty>,
    index: AHashMap<String, usize>,
    network_id: Option<String>,
}

impl StoragePropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_properties(properties: impl IntoIterator<Item = StorageProperty>) -> Result<Self> {
        let mut set = Self::new();
        for property in properties {
            set.add_property(property)?;
        }
        Ok(set)
    }

    /// Adds a property. A key already in use gets the first free `_N` suffix.
    pub fn add_property(&mut self, mut property: StorageProperty) -> Result<&mut StorageProperty> {
        if self.index.contains_key(property.key()) {
            let original = property.key().to_string();
            let renamed = (1..=MAX_RENAME_ATTEMPTS)
                .map(|n| format!("{}_{}", original, n))
                .find(|candidate| !self.index.contains_key(candidate))
                .ok_or_else(|| SyncError::DuplicateKey(original.clone()))?;

            warn!("Duplicate storage property key '{}', renamed to '{}'", original, renamed);
            property.set_key(renamed);
        }

        if let Some(network_id) = &self.network_id {
            property.set_network_id(network_id);
        }

        let position = self.properties.len();
        self.index.insert(property.key().to_string(), position);
        self.properties.push(property);
        Ok(&mut self.properties[position])
    }

    pub(crate) fn bind_network_id(&mut self, network_id: &str) {
        for property in &mut self.properties {
            property.set_network_id(network_id);
        }
        self.network_id = Some(network_id.to_string());
    }

    pub fn get_property(&self, key: &str) -> Option<&StorageProperty> {
        self.index.get(key).map(|&i| &self.properties[i])
    }

    pub fn get_property_mut(&mut self, key: &str) -> Option<&mut StorageProperty> {
        match self.index.get(key) {
            Some(&i) => Some(&mut self.properties[i]),
            None => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|p| p.key())
    }

    pub fn iter(&self) -> impl Iterator<Item = &StorageProperty> {
        self.properties.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut StorageProperty> {
        self.properties.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn initialize_from_store(
        &mut self,
        transport: &dyn SessionTransport,
        store: StoreId,
        codec: &ValueCodec,
        suppress_events: bool,
        server_time: f64,
    ) -> usize {
        let mut loaded = 0;
        for property in &mut self.properties {
            if initialize_property(property, transport, store, codec, suppress_events, server_time) {
                loaded += 1;
            }
        }
        loaded
    }

    pub fn send_changes(
        &mut self,
        transport: &mut dyn SessionTransport,
        store: StoreId,
        codec: &ValueCodec,
        server_time: f64,
    ) -> bool {
        let mut sent = false;
        for property in &mut self.properties {
            if !property.check_local_value_changed() {
                continue;
            }
            if !property.check_within_send_limit(server_time) {
                continue;
            }

            match property.put_current_value(transport, store, codec, server_time) {
                Ok(_) => sent = true,
                Err(e) => warn!("Failed to send '{}': {}", property.key(), e),
            }
        }
        sent
    }

    /// Applies received values to every property not waiting on a local send.
    /// When `owned_locally` is set remote values are discarded instead.
    pub fn receive_changes(&mut self, server_time: f64, owned_locally: bool) {
        for property in &mut self.properties {
            if owned_locally {
                property.discard_incoming_value();
                continue;
            }

            property.apply_incoming_value();
            if property.pending_value().is_none() {
                property.apply_snapshot_smoothing(server_time);
            }
        }
    }

    pub fn discard_pending_values(&mut self) -> usize {
        self.properties
            .iter_mut()
            .filter_map(|p| p.discard_pending_value().then_some(()))
            .count()
    }

    pub fn send_and_receive_changes(
        &mut self,
        transport: &mut dyn SessionTransport,
        store: StoreId,
        codec: &ValueCodec,
        server_time: f64,
        can_send: bool,
        owned_locally: bool,
    ) -> bool {
        let sent = can_send && self.send_changes(transport, store, codec, server_time);
        self.receive_changes(server_time, owned_locally);
        sent
    }

    pub fn force_write_state(
        &mut self,
        transport: &mut dyn SessionTransport,
        store: StoreId,
        codec: &ValueCodec,
        server_time: f64,
    ) -> usize {
        let mut written = 0;
        for property in &mut self.properties {
            property.check_local_value_changed();
            match property.put_current_value(transport, store, codec, server_time) {
                Ok(_) => written += 1,
                Err(e) => warn!("Failed to write '{}': {}", property.key(), e),
            }
        }
        written
    }

    pub fn write_missing_keys(
        &mut self,
        transport: &mut dyn SessionTransport,
        store: StoreId,
        codec: &ValueCodec,
        server_time: f64,
    ) -> usize {
        let mut written = 0;
        for property in &mut self.properties {
            if transport.has_key(store, property.key()) {
                continue;
            }
            match property.put_current_value(transport, store, codec, server_time) {
                Ok(_) => written += 1,
                Err(e) => warn!("Failed to write '{}': {}", property.key(), e),
            }
        }
        written
    }

    pub fn reset_smoothing(&mut self, server_time: f64) {
        for property in &mut self.properties {
            property.reset_smoothing(server_time);
        }
    }

    pub fn take_notifications(&mut self) -> Vec<PropertyChange> {
        self.properties
            .iter_mut()
            .flat_map(|p| p.take_notifications())
            .collect()
    }

    pub fn dispatch_notifications(&mut self) {
        for change in self.take_notifications() {
            change.dispatch();
        }
    }
}

pub(crate) fn initialize_property(
    property: &mut StorageProperty,
    transport: &dyn SessionTransport,
    store: StoreId,
    codec: &ValueCodec,
    suppress_events: bool,
    server_time: f64,
) -> bool {
    let Some(bytes) = transport.get_value(store, property.key()) else {
        return false;
    };

    match codec.decode_as(property.key(), property.property_type(), &bytes) {
        Ok(value) => {
            property.apply_remote_value(value, suppress_events, None, true, server_time);
            true
        }
        Err(e) => {
            warn!("Could not load '{}' from store {}: {}", property.key(), store, e);
            false
        }
    }
}
