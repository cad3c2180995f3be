use crate::error::{Result, SyncError};
use crate::value::{PackedTransform, PropertyType, StorageType, StorageValue};
use glam::Quat;

/// Tolerance used when comparing floating point values that went through a
/// serialization round trip.
pub const FLOAT_EPSILON: f64 = 1e-6;

pub type EqualsFn = fn(&StorageValue, &StorageValue) -> bool;
pub type LerpFn = fn(&StorageValue, &StorageValue, f64) -> StorageValue;
pub type CubicFn = fn(&StorageValue, &StorageValue, &StorageValue, &StorageValue, f64) -> StorageValue;
pub type TangentFn = fn(&StorageValue, &StorageValue, f64) -> StorageValue;

pub struct TypeOps {
    pub storage_type: StorageType,
    pub equals: EqualsFn,
    pub lerp: Option<LerpFn>,
    pub cubic: Option<CubicFn>,
    pub tangent: Option<TangentFn>,
}

static TYPE_OPS: [TypeOps; 13] = [
    TypeOps {
        storage_type: StorageType::Bool,
        equals: equals_exact,
        lerp: None,
        cubic: None,
        tangent: None,
    },
    TypeOps {
        storage_type: StorageType::Int,
        equals: equals_exact,
        lerp: Some(lerp_int),
        cubic: Some(cubic_int),
        tangent: Some(tangent_int),
    },
    TypeOps {
        storage_type: StorageType::Float,
        equals: equals_float,
        lerp: Some(lerp_float),
        cubic: Some(cubic_linear),
        tangent: Some(tangent_linear),
    },
    TypeOps {
        storage_type: StorageType::Double,
        equals: equals_float,
        lerp: Some(lerp_float),
        cubic: Some(cubic_linear),
        tangent: Some(tangent_linear),
    },
    TypeOps {
        storage_type: StorageType::String,
        equals: equals_exact,
        lerp: None,
        cubic: None,
        tangent: None,
    },
    TypeOps {
        storage_type: StorageType::Vec2,
        equals: equals_vector,
        lerp: Some(lerp_vector),
        cubic: Some(cubic_linear),
        tangent: Some(tangent_linear),
    },
    TypeOps {
        storage_type: StorageType::Vec3,
        equals: equals_vector,
        lerp: Some(lerp_vector),
        cubic: Some(cubic_linear),
        tangent: Some(tangent_linear),
    },
    TypeOps {
        storage_type: StorageType::Vec4,
        equals: equals_vector,
        lerp: Some(lerp_vector),
        cubic: Some(cubic_linear),
        tangent: Some(tangent_linear),
    },
    TypeOps {
        storage_type: StorageType::Quat,
        equals: equals_quat,
        lerp: Some(slerp_quat),
        cubic: Some(cubic_quat),
        tangent: Some(tangent_quat),
    },
    TypeOps {
        storage_type: StorageType::Mat2,
        equals: equals_matrix,
        lerp: Some(lerp_matrix),
        cubic: Some(cubic_linear),
        tangent: Some(tangent_linear),
    },
    TypeOps {
        storage_type: StorageType::Mat3,
        equals: equals_matrix,
        lerp: Some(lerp_matrix),
        cubic: Some(cubic_linear),
        tangent: Some(tangent_linear),
    },
    TypeOps {
        storage_type: StorageType::Mat4,
        equals: equals_matrix,
        lerp: Some(lerp_matrix),
        cubic: Some(cubic_linear),
        tangent: Some(tangent_linear),
    },
    TypeOps {
        storage_type: StorageType::PackedTransform,
        equals: equals_transform,
        lerp: Some(lerp_transform),
        cubic: None,
        tangent: None,
    },
];

pub fn ops_for(storage_type: StorageType) -> &'static TypeOps {
    &TYPE_OPS[storage_type as usize]
}

pub fn equals_for(property_type: &PropertyType) -> EqualsFn {
    if property_type.is_array {
        array_equals
    } else {
        ops_for(property_type.base).equals
    }
}

pub fn lerp_for(property_type: &PropertyType) -> Result<LerpFn> {
    let lerp = ops_for(property_type.base)
        .lerp
        .ok_or_else(|| SyncError::unsupported("lerp", property_type))?;
    Ok(if property_type.is_array { lerp_array } else { lerp })
}

pub fn cubic_for(property_type: &PropertyType) -> Result<CubicFn> {
    let cubic = ops_for(property_type.base)
        .cubic
        .ok_or_else(|| SyncError::unsupported("cubic interpolation", property_type))?;
    Ok(if property_type.is_array { cubic_array } else { cubic })
}

pub fn tangent_for(property_type: &PropertyType) -> Result<TangentFn> {
    let tangent = ops_for(property_type.base)
        .tangent
        .ok_or_else(|| SyncError::unsupported("tangent", property_type))?;
    Ok(if property_type.is_array { tangent_array } else { tangent })
}

/// Equality for any pair of values, dispatched on the left value's type.
pub fn values_equal(a: &StorageValue, b: &StorageValue) -> bool {
    match a.storage_type() {
        Some(storage_type) => (ops_for(storage_type).equals)(a, b),
        None => array_equals(a, b),
    }
}

pub fn array_equals(a: &StorageValue, b: &StorageValue) -> bool {
    match (a, b) {
        (StorageValue::Array(a), StorageValue::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        _ => false,
    }
}

/// Element-wise lerp writing into `out`, reusing its allocation.
///
/// Elements past the shorter input are copied from `b`.
pub fn lerp_array_into(a: &[StorageValue], b: &[StorageValue], t: f64, out: &mut Vec<StorageValue>) {
    out.truncate(b.len());
    for (i, target) in b.iter().enumerate() {
        let value = match (a.get(i), element_lerp(target)) {
            (Some(from), Some(lerp)) => lerp(from, target, t),
            _ => target.clone(),
        };
        if i < out.len() {
            out[i] = value;
        } else {
            out.push(value);
        }
    }
}

fn element_lerp(value: &StorageValue) -> Option<LerpFn> {
    value.storage_type().and_then(|t| ops_for(t).lerp)
}

fn lerp_array(a: &StorageValue, b: &StorageValue, t: f64) -> StorageValue {
    match (a, b) {
        (StorageValue::Array(a), StorageValue::Array(b)) => {
            let mut out = Vec::with_capacity(b.len());
            lerp_array_into(a, b, t, &mut out);
            StorageValue::Array(out)
        }
        _ => b.clone(),
    }
}

fn cubic_array(
    p0: &StorageValue,
    p1: &StorageValue,
    p2: &StorageValue,
    p3: &StorageValue,
    t: f64,
) -> StorageValue {
    match (p0, p1, p2, p3) {
        (
            StorageValue::Array(p0),
            StorageValue::Array(p1),
            StorageValue::Array(p2),
            StorageValue::Array(p3),
        ) => {
            let items = p2
                .iter()
                .enumerate()
                .map(|(i, target)| {
                    let cubic = target.storage_type().and_then(|s| ops_for(s).cubic);
                    match (p0.get(i), p1.get(i), p3.get(i), cubic) {
                        (Some(a), Some(b), Some(d), Some(cubic)) => cubic(a, b, target, d, t),
                        _ => target.clone(),
                    }
                })
                .collect();
            StorageValue::Array(items)
        }
        _ => lerp_array(p1, p2, t),
    }
}

fn tangent_array(a: &StorageValue, b: &StorageValue, dt: f64) -> StorageValue {
    match (a, b) {
        (StorageValue::Array(a), StorageValue::Array(b)) => {
            let items = b
                .iter()
                .zip(a)
                .map(|(to, from)| {
                    match to.storage_type().and_then(|s| ops_for(s).tangent) {
                        Some(tangent) => tangent(from, to, dt),
                        None => to.clone(),
                    }
                })
                .collect();
            StorageValue::Array(items)
        }
        _ => b.clone(),
    }
}

fn scalar_close(a: f64, b: f64) -> bool {
    let scale = 1.0f64.max(a.abs()).max(b.abs());
    (a - b).abs() <= FLOAT_EPSILON * scale
}

fn equals_exact(a: &StorageValue, b: &StorageValue) -> bool {
    a == b
}

fn equals_float(a: &StorageValue, b: &StorageValue) -> bool {
    match (a, b) {
        (StorageValue::Float(a), StorageValue::Float(b)) => scalar_close(*a as f64, *b as f64),
        (StorageValue::Double(a), StorageValue::Double(b)) => scalar_close(*a, *b),
        _ => false,
    }
}

fn equals_vector(a: &StorageValue, b: &StorageValue) -> bool {
    let eps = FLOAT_EPSILON as f32;
    match (a, b) {
        (StorageValue::Vec2(a), StorageValue::Vec2(b)) => a.abs_diff_eq(*b, eps),
        (StorageValue::Vec3(a), StorageValue::Vec3(b)) => a.abs_diff_eq(*b, eps),
        (StorageValue::Vec4(a), StorageValue::Vec4(b)) => a.abs_diff_eq(*b, eps),
        _ => false,
    }
}

// q and -q describe the same rotation.
fn quats_close(a: Quat, b: Quat) -> bool {
    a.dot(b).abs() >= 1.0 - FLOAT_EPSILON as f32
}

fn equals_quat(a: &StorageValue, b: &StorageValue) -> bool {
    match (a, b) {
        (StorageValue::Quat(a), StorageValue::Quat(b)) => quats_close(*a, *b),
        _ => false,
    }
}

fn equals_matrix(a: &StorageValue, b: &StorageValue) -> bool {
    let eps = FLOAT_EPSILON as f32;
    match (a, b) {
        (StorageValue::Mat2(a), StorageValue::Mat2(b)) => a.abs_diff_eq(*b, eps),
        (StorageValue::Mat3(a), StorageValue::Mat3(b)) => a.abs_diff_eq(*b, eps),
        (StorageValue::Mat4(a), StorageValue::Mat4(b)) => a.abs_diff_eq(*b, eps),
        _ => false,
    }
}

fn equals_transform(a: &StorageValue, b: &StorageValue) -> bool {
    let eps = FLOAT_EPSILON as f32;
    match (a, b) {
        (StorageValue::PackedTransform(a), StorageValue::PackedTransform(b)) => {
            a.position.abs_diff_eq(b.position, eps)
                && quats_close(a.rotation, b.rotation)
                && a.scale.abs_diff_eq(b.scale, eps)
        }
        _ => false,
    }
}

// Mismatched variants cannot be blended; the newer value wins.

fn lerp_int(a: &StorageValue, b: &StorageValue, t: f64) -> StorageValue {
    match (a, b) {
        (StorageValue::Int(a), StorageValue::Int(b)) => {
            let value = *a as f64 + (*b as f64 - *a as f64) * t;
            StorageValue::Int(value.round() as i64)
        }
        _ => b.clone(),
    }
}

fn lerp_float(a: &StorageValue, b: &StorageValue, t: f64) -> StorageValue {
    match (a, b) {
        (StorageValue::Float(a), StorageValue::Float(b)) => {
            StorageValue::Float(a + (b - a) * t as f32)
        }
        (StorageValue::Double(a), StorageValue::Double(b)) => StorageValue::Double(a + (b - a) * t),
        _ => b.clone(),
    }
}

fn lerp_vector(a: &StorageValue, b: &StorageValue, t: f64) -> StorageValue {
    let t = t as f32;
    match (a, b) {
        (StorageValue::Vec2(a), StorageValue::Vec2(b)) => StorageValue::Vec2(a.lerp(*b, t)),
        (StorageValue::Vec3(a), StorageValue::Vec3(b)) => StorageValue::Vec3(a.lerp(*b, t)),
        (StorageValue::Vec4(a), StorageValue::Vec4(b)) => StorageValue::Vec4(a.lerp(*b, t)),
        _ => b.clone(),
    }
}

fn slerp_quat(a: &StorageValue, b: &StorageValue, t: f64) -> StorageValue {
    match (a, b) {
        (StorageValue::Quat(a), StorageValue::Quat(b)) => StorageValue::Quat(a.slerp(*b, t as f32)),
        _ => b.clone(),
    }
}

fn lerp_matrix(a: &StorageValue, b: &StorageValue, t: f64) -> StorageValue {
    let t = t as f32;
    match (a, b) {
        (StorageValue::Mat2(a), StorageValue::Mat2(b)) => StorageValue::Mat2(*a * (1.0 - t) + *b * t),
        (StorageValue::Mat3(a), StorageValue::Mat3(b)) => StorageValue::Mat3(*a * (1.0 - t) + *b * t),
        (StorageValue::Mat4(a), StorageValue::Mat4(b)) => StorageValue::Mat4(*a * (1.0 - t) + *b * t),
        _ => b.clone(),
    }
}

fn lerp_transform(a: &StorageValue, b: &StorageValue, t: f64) -> StorageValue {
    let t = t as f32;
    match (a, b) {
        (StorageValue::PackedTransform(a), StorageValue::PackedTransform(b)) => {
            StorageValue::PackedTransform(PackedTransform {
                position: a.position.lerp(b.position, t),
                rotation: a.rotation.slerp(b.rotation, t),
                scale: a.scale.lerp(b.scale, t),
            })
        }
        _ => b.clone(),
    }
}

/// Uniform Catmull-Rom between `p1` and `p2`, evaluated as a Barry-Goldman
/// pyramid of the supplied lerp so that any blendable type gets a spline.
pub fn catmull_rom_with(
    lerp: LerpFn,
    p0: &StorageValue,
    p1: &StorageValue,
    p2: &StorageValue,
    p3: &StorageValue,
    t: f64,
) -> StorageValue {
    let a1 = lerp(p0, p1, 1.0 + t);
    let a2 = lerp(p1, p2, t);
    let a3 = lerp(p2, p3, t - 1.0);
    let b1 = lerp(&a1, &a2, (1.0 + t) / 2.0);
    let b2 = lerp(&a2, &a3, t / 2.0);
    lerp(&b1, &b2, t)
}

fn cubic_linear(
    p0: &StorageValue,
    p1: &StorageValue,
    p2: &StorageValue,
    p3: &StorageValue,
    t: f64,
) -> StorageValue {
    let lerp = match p2.storage_type() {
        Some(StorageType::Float) | Some(StorageType::Double) => lerp_float,
        Some(StorageType::Mat2) | Some(StorageType::Mat3) | Some(StorageType::Mat4) => lerp_matrix,
        _ => lerp_vector,
    };
    catmull_rom_with(lerp, p0, p1, p2, p3, t)
}

fn cubic_quat(
    p0: &StorageValue,
    p1: &StorageValue,
    p2: &StorageValue,
    p3: &StorageValue,
    t: f64,
) -> StorageValue {
    catmull_rom_with(slerp_quat, p0, p1, p2, p3, t)
}

fn cubic_int(
    p0: &StorageValue,
    p1: &StorageValue,
    p2: &StorageValue,
    p3: &StorageValue,
    t: f64,
) -> StorageValue {
    let as_double = |v: &StorageValue| StorageValue::Double(v.as_f64().unwrap_or_default());
    let value = catmull_rom_with(
        lerp_float,
        &as_double(p0),
        &as_double(p1),
        &as_double(p2),
        &as_double(p3),
        t,
    );
    StorageValue::Int(value.as_f64().unwrap_or_default().round() as i64)
}

fn tangent_int(a: &StorageValue, b: &StorageValue, dt: f64) -> StorageValue {
    match (a, b) {
        (StorageValue::Int(a), StorageValue::Int(b)) if dt > 0.0 => {
            StorageValue::Int(((*b as f64 - *a as f64) / dt).round() as i64)
        }
        _ => StorageValue::Int(0),
    }
}

/// Rate of change per second between two samples `dt` seconds apart.
fn tangent_linear(a: &StorageValue, b: &StorageValue, dt: f64) -> StorageValue {
    let inv = if dt > 0.0 { (1.0 / dt) as f32 } else { 0.0 };
    match (a, b) {
        (StorageValue::Float(a), StorageValue::Float(b)) => StorageValue::Float((b - a) * inv),
        (StorageValue::Double(a), StorageValue::Double(b)) => {
            StorageValue::Double(if dt > 0.0 { (b - a) / dt } else { 0.0 })
        }
        (StorageValue::Vec2(a), StorageValue::Vec2(b)) => StorageValue::Vec2((*b - *a) * inv),
        (StorageValue::Vec3(a), StorageValue::Vec3(b)) => StorageValue::Vec3((*b - *a) * inv),
        (StorageValue::Vec4(a), StorageValue::Vec4(b)) => StorageValue::Vec4((*b - *a) * inv),
        (StorageValue::Mat2(a), StorageValue::Mat2(b)) => StorageValue::Mat2((*b - *a) * inv),
        (StorageValue::Mat3(a), StorageValue::Mat3(b)) => StorageValue::Mat3((*b - *a) * inv),
        (StorageValue::Mat4(a), StorageValue::Mat4(b)) => StorageValue::Mat4((*b - *a) * inv),
        _ => b.clone(),
    }
}

/// Angular velocity as a rotation per second.
fn tangent_quat(a: &StorageValue, b: &StorageValue, dt: f64) -> StorageValue {
    match (a, b) {
        (StorageValue::Quat(a), StorageValue::Quat(b)) if dt > 0.0 => {
            let mut delta = *b * a.inverse();
            if delta.w < 0.0 {
                delta = -delta;
            }
            let per_second = delta.to_scaled_axis() / dt as f32;
            StorageValue::Quat(Quat::from_scaled_axis(per_second))
        }
        _ => StorageValue::Quat(Quat::IDENTITY),
    }
}
