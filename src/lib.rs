pub mod value;
pub mod storage_types;
pub mod serialization;
pub mod snapshot;
pub mod rate_limit;
pub mod event;
pub mod property;
pub mod property_set;
pub mod transport;
pub mod scheduler;
pub mod entity;
pub mod config;
pub mod error;
pub mod debug;

pub use value::{
    StorageType, PropertyType, StorageValue, PackedTransform,
    FromStorageValue,
};

pub use storage_types::{
    TypeOps, EqualsFn, LerpFn, CubicFn, TangentFn,
    ops_for, equals_for, lerp_for, cubic_for, tangent_for,
    FLOAT_EPSILON,
};

pub use serialization::{
    ValueCodec, BinaryFormat,
};

pub use snapshot::{
    SnapshotBuffer, SyncSnapshot, SmoothingOptions, InterpolationMode,
    DEFAULT_SNAPSHOT_BUFFER_SIZE, DEFAULT_INTERPOLATION_TARGET, DEFAULT_MAX_EXTRAPOLATION,
};

pub use rate_limit::{
    SendRateLimiter, SendLimitStats,
};

pub use event::{
    EventWrapper, ListenerId,
};

pub use property::{
    StorageProperty, ValueBinding, FnBinding,
    ValueChange, ChangeSource, PropertyChange,
};

pub use property_set::StoragePropertySet;

pub use transport::{
    SessionTransport, SharedTransport, StoreId, UserInfo, StoreOptions,
    Persistence, StoreEvent, UpdateInfo,
    MemoryServer, MemorySession,
};

pub use scheduler::{
    UpdateScheduler, HookId,
};

pub use entity::{
    SyncEntity, SyncContext, NetworkIdOptions, EntityState,
};

pub use config::SyncConfig;

pub use error::{
    SyncError, Result,
};

pub use debug::{
    init_debug_mode, is_debug_enabled, is_trace_enabled,
    format_bytes,
};
