use glam::{Mat2, Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StorageType {
    Bool = 0,
    Int = 1,
    Float = 2,
    Double = 3,
    String = 4,
    Vec2 = 5,
    Vec3 = 6,
    Vec4 = 7,
    Quat = 8,
    Mat2 = 9,
    Mat3 = 10,
    Mat4 = 11,
    PackedTransform = 12,
}

impl StorageType {
    pub const ALL: [StorageType; 13] = [
        StorageType::Bool,
        StorageType::Int,
        StorageType::Float,
        StorageType::Double,
        StorageType::String,
        StorageType::Vec2,
        StorageType::Vec3,
        StorageType::Vec4,
        StorageType::Quat,
        StorageType::Mat2,
        StorageType::Mat3,
        StorageType::Mat4,
        StorageType::PackedTransform,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StorageType::Bool => "bool",
            StorageType::Int => "int",
            StorageType::Float => "float",
            StorageType::Double => "double",
            StorageType::String => "string",
            StorageType::Vec2 => "vec2",
            StorageType::Vec3 => "vec3",
            StorageType::Vec4 => "vec4",
            StorageType::Quat => "quat",
            StorageType::Mat2 => "mat2",
            StorageType::Mat3 => "mat3",
            StorageType::Mat4 => "mat4",
            StorageType::PackedTransform => "packedTransform",
        }
    }

    /// Discrete types never blend between samples.
    pub fn is_discrete(&self) -> bool {
        matches!(self, StorageType::Bool | StorageType::Int | StorageType::String)
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A base storage type plus whether the property holds a homogeneous array of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyType {
    pub base: StorageType,
    pub is_array: bool,
}

impl PropertyType {
    pub const fn scalar(base: StorageType) -> Self {
        Self { base, is_array: false }
    }

    pub const fn array(base: StorageType) -> Self {
        Self { base, is_array: true }
    }

    pub const fn bool() -> Self {
        Self::scalar(StorageType::Bool)
    }

    pub const fn int() -> Self {
        Self::scalar(StorageType::Int)
    }

    pub const fn float() -> Self {
        Self::scalar(StorageType::Float)
    }

    pub const fn double() -> Self {
        Self::scalar(StorageType::Double)
    }

    pub const fn string() -> Self {
        Self::scalar(StorageType::String)
    }

    pub const fn vec2() -> Self {
        Self::scalar(StorageType::Vec2)
    }

    pub const fn vec3() -> Self {
        Self::scalar(StorageType::Vec3)
    }

    pub const fn vec4() -> Self {
        Self::scalar(StorageType::Vec4)
    }

    pub const fn quat() -> Self {
        Self::scalar(StorageType::Quat)
    }

    pub const fn mat2() -> Self {
        Self::scalar(StorageType::Mat2)
    }

    pub const fn mat3() -> Self {
        Self::scalar(StorageType::Mat3)
    }

    pub const fn mat4() -> Self {
        Self::scalar(StorageType::Mat4)
    }

    pub const fn packed_transform() -> Self {
        Self::scalar(StorageType::PackedTransform)
    }

    pub const fn float_array() -> Self {
        Self::array(StorageType::Float)
    }

    pub const fn vec3_array() -> Self {
        Self::array(StorageType::Vec3)
    }

    pub const fn quat_array() -> Self {
        Self::array(StorageType::Quat)
    }

    pub const fn string_array() -> Self {
        Self::array(StorageType::String)
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_array {
            write!(f, "{}Array", self.base.name())
        } else {
            f.write_str(self.base.name())
        }
    }
}

impl From<StorageType> for PropertyType {
    fn from(base: StorageType) -> Self {
        PropertyType::scalar(base)
    }
}

/// Position, rotation and scale replicated as one value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PackedTransform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl PackedTransform {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
        }
    }
}

impl Default for PackedTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StorageValue {
    Bool(bool),
    Int(i64),
    Float(f32),
    Double(f64),
    String(String),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Quat(Quat),
    Mat2(Mat2),
    Mat3(Mat3),
    Mat4(Mat4),
    PackedTransform(PackedTransform),
    Array(Vec<StorageValue>),
}

impl StorageValue {
    /// Zero-like starting value for a property type.
    pub fn default_for(property_type: &PropertyType) -> Self {
        if property_type.is_array {
            return StorageValue::Array(Vec::new());
        }

        match property_type.base {
            StorageType::Bool => StorageValue::Bool(false),
            StorageType::Int => StorageValue::Int(0),
            StorageType::Float => StorageValue::Float(0.0),
            StorageType::Double => StorageValue::Double(0.0),
            StorageType::String => StorageValue::String(String::new()),
            StorageType::Vec2 => StorageValue::Vec2(Vec2::ZERO),
            StorageType::Vec3 => StorageValue::Vec3(Vec3::ZERO),
            StorageType::Vec4 => StorageValue::Vec4(Vec4::ZERO),
            StorageType::Quat => StorageValue::Quat(Quat::IDENTITY),
            StorageType::Mat2 => StorageValue::Mat2(Mat2::IDENTITY),
            StorageType::Mat3 => StorageValue::Mat3(Mat3::IDENTITY),
            StorageType::Mat4 => StorageValue::Mat4(Mat4::IDENTITY),
            StorageType::PackedTransform => StorageValue::PackedTransform(PackedTransform::IDENTITY),
        }
    }

    /// Base type of a scalar value, `None` for arrays.
    pub fn storage_type(&self) -> Option<StorageType> {
        let storage_type = match self {
            StorageValue::Bool(_) => StorageType::Bool,
            StorageValue::Int(_) => StorageType::Int,
            StorageValue::Float(_) => StorageType::Float,
            StorageValue::Double(_) => StorageType::Double,
            StorageValue::String(_) => StorageType::String,
            StorageValue::Vec2(_) => StorageType::Vec2,
            StorageValue::Vec3(_) => StorageType::Vec3,
            StorageValue::Vec4(_) => StorageType::Vec4,
            StorageValue::Quat(_) => StorageType::Quat,
            StorageValue::Mat2(_) => StorageType::Mat2,
            StorageValue::Mat3(_) => StorageType::Mat3,
            StorageValue::Mat4(_) => StorageType::Mat4,
            StorageValue::PackedTransform(_) => StorageType::PackedTransform,
            StorageValue::Array(_) => return None,
        };
        Some(storage_type)
    }

    pub fn matches_type(&self, property_type: &PropertyType) -> bool {
        match self {
            StorageValue::Array(items) => {
                property_type.is_array
                    && items
                        .iter()
                        .all(|item| item.storage_type() == Some(property_type.base))
            }
            scalar => !property_type.is_array && scalar.storage_type() == Some(property_type.base),
        }
    }

    /// Human readable type description used in diagnostics.
    pub fn type_name(&self) -> String {
        match self {
            StorageValue::Array(items) => match items.first().and_then(|i| i.storage_type()) {
                Some(base) => PropertyType::array(base).to_string(),
                None => "array".to_string(),
            },
            scalar => scalar
                .storage_type()
                .map(|t| t.name().to_string())
                .unwrap_or_default(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StorageValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            StorageValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            StorageValue::Float(v) => Some(*v),
            StorageValue::Double(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StorageValue::Float(v) => Some(*v as f64),
            StorageValue::Double(v) => Some(*v),
            StorageValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StorageValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            StorageValue::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_quat(&self) -> Option<Quat> {
        match self {
            StorageValue::Quat(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[StorageValue]> {
        match self {
            StorageValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<StorageValue>> {
        match self {
            StorageValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// Typed extraction used by [`crate::property::StorageProperty::get`].
pub trait FromStorageValue: Sized {
    fn from_storage_value(value: &StorageValue) -> Option<Self>;
}

impl FromStorageValue for StorageValue {
    fn from_storage_value(value: &StorageValue) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromStorageValue for bool {
    fn from_storage_value(value: &StorageValue) -> Option<Self> {
        value.as_bool()
    }
}

impl FromStorageValue for i64 {
    fn from_storage_value(value: &StorageValue) -> Option<Self> {
        value.as_int()
    }
}

impl FromStorageValue for f32 {
    fn from_storage_value(value: &StorageValue) -> Option<Self> {
        value.as_f32()
    }
}

impl FromStorageValue for f64 {
    fn from_storage_value(value: &StorageValue) -> Option<Self> {
        value.as_f64()
    }
}

impl FromStorageValue for String {
    fn from_storage_value(value: &StorageValue) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromStorageValue for Vec2 {
    fn from_storage_value(value: &StorageValue) -> Option<Self> {
        match value {
            StorageValue::Vec2(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromStorageValue for Vec3 {
    fn from_storage_value(value: &StorageValue) -> Option<Self> {
        value.as_vec3()
    }
}

impl FromStorageValue for Vec4 {
    fn from_storage_value(value: &StorageValue) -> Option<Self> {
        match value {
            StorageValue::Vec4(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromStorageValue for Quat {
    fn from_storage_value(value: &StorageValue) -> Option<Self> {
        value.as_quat()
    }
}

impl FromStorageValue for PackedTransform {
    fn from_storage_value(value: &StorageValue) -> Option<Self> {
        match value {
            StorageValue::PackedTransform(v) => Some(*v),
            _ => None,
        }
    }
}

impl<T: FromStorageValue> FromStorageValue for Vec<T> {
    fn from_storage_value(value: &StorageValue) -> Option<Self> {
        value
            .as_array()?
            .iter()
            .map(T::from_storage_value)
            .collect()
    }
}

impl From<bool> for StorageValue {
    fn from(v: bool) -> Self {
        StorageValue::Bool(v)
    }
}

impl From<i64> for StorageValue {
    fn from(v: i64) -> Self {
        StorageValue::Int(v)
    }
}

impl From<i32> for StorageValue {
    fn from(v: i32) -> Self {
        StorageValue::Int(v as i64)
    }
}

impl From<f32> for StorageValue {
    fn from(v: f32) -> Self {
        StorageValue::Float(v)
    }
}

impl From<f64> for StorageValue {
    fn from(v: f64) -> Self {
        StorageValue::Double(v)
    }
}

impl From<String> for StorageValue {
    fn from(v: String) -> Self {
        StorageValue::String(v)
    }
}

impl From<&str> for StorageValue {
    fn from(v: &str) -> Self {
        StorageValue::String(v.to_string())
    }
}

impl From<Vec2> for StorageValue {
    fn from(v: Vec2) -> Self {
        StorageValue::Vec2(v)
    }
}

impl From<Vec3> for StorageValue {
    fn from(v: Vec3) -> Self {
        StorageValue::Vec3(v)
    }
}

impl From<Vec4> for StorageValue {
    fn from(v: Vec4) -> Self {
        StorageValue::Vec4(v)
    }
}

impl From<Quat> for StorageValue {
    fn from(v: Quat) -> Self {
        StorageValue::Quat(v)
    }
}

impl From<Mat2> for StorageValue {
    fn from(v: Mat2) -> Self {
        StorageValue::Mat2(v)
    }
}

impl From<Mat3> for StorageValue {
    fn from(v: Mat3) -> Self {
        StorageValue::Mat3(v)
    }
}

impl From<Mat4> for StorageValue {
    fn from(v: Mat4) -> Self {
        StorageValue::Mat4(v)
    }
}

impl From<PackedTransform> for StorageValue {
    fn from(v: PackedTransform) -> Self {
        StorageValue::PackedTransform(v)
    }
}

impl<T: Into<StorageValue>> From<Vec<T>> for StorageValue {
    fn from(items: Vec<T>) -> Self {
        StorageValue::Array(items.into_iter().map(Into::into).collect())
    }
}
