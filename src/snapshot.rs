use crate::error::{Result, SyncError};
use crate::storage_types::{self, CubicFn, LerpFn, TangentFn};
use crate::value::{PropertyType, StorageValue};
use log::warn;
use std::collections::VecDeque;

pub const DEFAULT_SNAPSHOT_BUFFER_SIZE: usize = 20;
pub const DEFAULT_INTERPOLATION_TARGET: f64 = -0.25;
pub const DEFAULT_MAX_EXTRAPOLATION: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationMode {
    Linear,
    Cubic,
}

#[derive(Debug, Clone)]
pub struct SmoothingOptions {
    pub size: usize,
    pub interpolation_target: f64,
    pub allow_extrapolation: bool,
    pub max_extrapolation: f64,
    pub mode: InterpolationMode,
    pub lerp_override: Option<LerpFn>,
}

impl Default for SmoothingOptions {
    fn default() -> Self {
        Self {
            size: DEFAULT_SNAPSHOT_BUFFER_SIZE,
            interpolation_target: DEFAULT_INTERPOLATION_TARGET,
            allow_extrapolation: false,
            max_extrapolation: DEFAULT_MAX_EXTRAPOLATION,
            mode: InterpolationMode::Linear,
            lerp_override: None,
        }
    }
}

impl SmoothingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_interpolation_target(mut self, seconds: f64) -> Self {
        self.interpolation_target = seconds;
        self
    }

    pub fn with_extrapolation(mut self, enabled: bool) -> Self {
        self.allow_extrapolation = enabled;
        self
    }

    pub fn with_max_extrapolation(mut self, seconds: f64) -> Self {
        self.max_extrapolation = seconds;
        self
    }

    pub fn with_mode(mut self, mode: InterpolationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_lerp(mut self, lerp: LerpFn) -> Self {
        self.lerp_override = Some(lerp);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    pub timestamp: f64,
    pub value: StorageValue,
}

impl SyncSnapshot {
    pub fn new(timestamp: f64, value: StorageValue) -> Self {
        Self { timestamp, value }
    }
}

pub struct SnapshotBuffer {
    property_type: PropertyType,
    snapshots: VecDeque<SyncSnapshot>,
    size: usize,
    interpolation_target: f64,
    allow_extrapolation: bool,
    max_extrapolation: f64,
    mode: InterpolationMode,
    lerp: LerpFn,
    element_wise: bool,
    cubic: Option<CubicFn>,
    tangent: Option<TangentFn>,
    most_recent_value: Option<StorageValue>,
    rejected: u64,
}

impl SnapshotBuffer {
    pub fn new(property_type: PropertyType, options: SmoothingOptions) -> Result<Self> {
        if options.size == 0 {
            return Err(SyncError::InvalidConfig(
                "snapshot buffer size must be at least 1".to_string(),
            ));
        }

        let element_wise = property_type.is_array && options.lerp_override.is_none();
        let lerp = match options.lerp_override {
            Some(lerp) => lerp,
            None => storage_types::lerp_for(&property_type)?,
        };

        let cubic = match options.mode {
            InterpolationMode::Cubic if options.lerp_override.is_none() => {
                Some(storage_types::cubic_for(&property_type)?)
            }
            _ => None,
        };

        Ok(Self {
            property_type,
            snapshots: VecDeque::with_capacity(options.size),
            size: options.size,
            interpolation_target: options.interpolation_target,
            allow_extrapolation: options.allow_extrapolation,
            max_extrapolation: options.max_extrapolation.max(0.0),
            mode: options.mode,
            lerp,
            element_wise,
            cubic,
            tangent: storage_types::tangent_for(&property_type).ok(),
            most_recent_value: None,
            rejected: 0,
        })
    }

    /// Appends a sample. Samples not strictly newer than the last one are
    /// dropped with a warning.
    pub fn save_snapshot(&mut self, timestamp: f64, value: StorageValue) -> bool {
        if !timestamp.is_finite() {
            warn!("Rejected snapshot with non-finite timestamp {}", timestamp);
            self.rejected += 1;
            return false;
        }
        if let Some(last) = self.snapshots.back() {
            if timestamp <= last.timestamp {
                warn!(
                    "Rejected out-of-order snapshot at {:.3} (last stored {:.3})",
                    timestamp, last.timestamp
                );
                self.rejected += 1;
                return false;
            }
        }

        self.snapshots.push_back(SyncSnapshot::new(timestamp, value));
        while self.snapshots.len() > self.size {
            self.snapshots.pop_front();
        }
        true
    }

    /// Drops the history and seeds it with a single sample.
    pub fn set_current_value(&mut self, timestamp: f64, value: StorageValue) {
        self.snapshots.clear();
        self.most_recent_value = Some(value.clone());
        self.snapshots.push_back(SyncSnapshot::new(timestamp, value));
    }

    /// Resolves the value at `timestamp`, caching it as the most recent value.
    ///
    /// Returns `None` only when no sample has been stored yet.
    pub fn get_lerped_value(&mut self, timestamp: f64) -> Option<&StorageValue> {
        let count = self.snapshots.len();
        if count == 0 {
            return None;
        }

        let before = (0..count)
            .rev()
            .find(|&i| self.snapshots[i].timestamp <= timestamp);

        match before {
            None => {
                let oldest = self.snapshots[0].value.clone();
                self.most_recent_value = Some(oldest);
            }
            Some(index) if index + 1 < count => {
                let (from, to) = (&self.snapshots[index], &self.snapshots[index + 1]);
                let t = (timestamp - from.timestamp) / (to.timestamp - from.timestamp);

                let cubic = self
                    .cubic
                    .filter(|_| self.mode == InterpolationMode::Cubic && index >= 1 && index + 2 < count);

                match cubic {
                    Some(cubic) => {
                        let value = cubic(
                            &self.snapshots[index - 1].value,
                            &from.value,
                            &to.value,
                            &self.snapshots[index + 2].value,
                            t,
                        );
                        self.most_recent_value = Some(value);
                    }
                    None => self.blend(index, index + 1, t),
                }
            }
            Some(_) => {
                let last = count - 1;
                if self.allow_extrapolation && count >= 2 {
                    let (prev, newest) = (&self.snapshots[last - 1], &self.snapshots[last]);
                    let ahead = (timestamp - newest.timestamp).min(self.max_extrapolation);
                    let t = (newest.timestamp + ahead - prev.timestamp)
                        / (newest.timestamp - prev.timestamp);
                    self.blend(last - 1, last, t);
                } else {
                    let newest = self.snapshots[last].value.clone();
                    self.most_recent_value = Some(newest);
                }
            }
        }

        self.most_recent_value.as_ref()
    }

    fn blend(&mut self, from: usize, to: usize, t: f64) {
        let from = &self.snapshots[from].value;
        let to = &self.snapshots[to].value;

        if self.element_wise {
            if let (StorageValue::Array(a), StorageValue::Array(b)) = (from, to) {
                let scratch = self
                    .most_recent_value
                    .get_or_insert_with(|| StorageValue::Array(Vec::with_capacity(b.len())));
                if !matches!(scratch, StorageValue::Array(_)) {
                    *scratch = StorageValue::Array(Vec::with_capacity(b.len()));
                }
                if let StorageValue::Array(out) = scratch {
                    storage_types::lerp_array_into(a, b, t, out);
                }
                return;
            }
        }

        self.most_recent_value = Some((self.lerp)(from, to, t));
    }

    /// Rate of change per second around `timestamp`, from the bracketing
    /// samples or the two newest ones.
    pub fn get_rate_of_change(&self, timestamp: f64) -> Option<StorageValue> {
        let tangent = self.tangent?;
        let count = self.snapshots.len();
        if count < 2 {
            return None;
        }

        let from = (0..count - 1)
            .rev()
            .find(|&i| self.snapshots[i].timestamp <= timestamp)
            .unwrap_or(0);
        let (a, b) = (&self.snapshots[from], &self.snapshots[from + 1]);
        Some(tangent(&a.value, &b.value, b.timestamp - a.timestamp))
    }

    pub fn latest(&self) -> Option<&SyncSnapshot> {
        self.snapshots.back()
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &SyncSnapshot> {
        self.snapshots.iter()
    }

    pub fn most_recent_value(&self) -> Option<&StorageValue> {
        self.most_recent_value.as_ref()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.size
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.most_recent_value = None;
    }

    pub fn interpolation_target(&self) -> f64 {
        self.interpolation_target
    }

    pub fn set_interpolation_target(&mut self, seconds: f64) {
        self.interpolation_target = seconds;
    }

    pub fn property_type(&self) -> &PropertyType {
        &self.property_type
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }
}
