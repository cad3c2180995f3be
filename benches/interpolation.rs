use criterion::{black_box, criterion_group, criterion_main, Criterion, BenchmarkId, Throughput};
use glam::{Quat, Vec3};
use realtime_sync_kit::{
    BinaryFormat, InterpolationMode, PackedTransform, PropertyType, SmoothingOptions,
    SnapshotBuffer, StorageValue, ValueCodec,
};

fn filled_buffer(property_type: PropertyType, mode: InterpolationMode, sample: impl Fn(usize) -> StorageValue) -> SnapshotBuffer {
    let options = SmoothingOptions::new().with_mode(mode).with_size(20);
    let mut buffer = SnapshotBuffer::new(property_type, options).unwrap();
    for i in 0..20 {
        buffer.save_snapshot(i as f64 * 0.1, sample(i));
    }
    buffer
}

fn benchmark_lerped_value(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_lerped_value");

    for mode in [InterpolationMode::Linear, InterpolationMode::Cubic] {
        let mode_name = match mode {
            InterpolationMode::Linear => "linear",
            InterpolationMode::Cubic => "cubic",
        };

        let mut vec3 = filled_buffer(PropertyType::vec3(), mode, |i| {
            StorageValue::Vec3(Vec3::new(i as f32, (i * 2) as f32, 0.5))
        });
        group.bench_function(BenchmarkId::new("vec3", mode_name), |b| {
            b.iter(|| {
                black_box(vec3.get_lerped_value(black_box(1.05)));
            });
        });

        let mut quat = filled_buffer(PropertyType::quat(), mode, |i| {
            StorageValue::Quat(Quat::from_rotation_y(i as f32 * 0.2))
        });
        group.bench_function(BenchmarkId::new("quat", mode_name), |b| {
            b.iter(|| {
                black_box(quat.get_lerped_value(black_box(1.05)));
            });
        });
    }

    let mut transform = filled_buffer(PropertyType::packed_transform(), InterpolationMode::Linear, |i| {
        StorageValue::PackedTransform(PackedTransform::new(
            Vec3::splat(i as f32),
            Quat::from_rotation_z(i as f32 * 0.1),
            Vec3::ONE,
        ))
    });
    group.bench_function("packed_transform", |b| {
        b.iter(|| {
            black_box(transform.get_lerped_value(black_box(1.05)));
        });
    });

    group.finish();
}

fn benchmark_array_lerp(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_lerp");

    for len in [8usize, 64, 512] {
        let mut buffer = filled_buffer(PropertyType::vec3_array(), InterpolationMode::Linear, |i| {
            StorageValue::from(vec![Vec3::splat(i as f32); len])
        });

        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| {
                black_box(buffer.get_lerped_value(black_box(0.95)));
            });
        });
    }

    group.finish();
}

fn benchmark_codec_formats(c: &mut Criterion) {
    let value = StorageValue::from(vec![
        PackedTransform::new(Vec3::ONE, Quat::from_rotation_x(0.3), Vec3::splat(2.0));
        16
    ]);

    let mut group = c.benchmark_group("codec_formats");

    for format in [BinaryFormat::Json, BinaryFormat::MessagePack, BinaryFormat::Bincode] {
        let format_name = match format {
            BinaryFormat::Json => "JSON",
            BinaryFormat::MessagePack => "MessagePack",
            BinaryFormat::Bincode => "Bincode",
        };
        let codec = ValueCodec::new(format);
        let encoded = codec.encode(&value).unwrap();
        println!("{} payload: {} bytes", format_name, encoded.len());

        group.bench_with_input(BenchmarkId::new("encode", format_name), &codec, |b, codec| {
            b.iter(|| {
                black_box(codec.encode(&value).unwrap());
            });
        });

        group.bench_with_input(BenchmarkId::new("decode", format_name), &codec, |b, codec| {
            b.iter(|| {
                black_box(codec.decode(&encoded).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_lerped_value,
    benchmark_array_lerp,
    benchmark_codec_formats,
);

criterion_main!(benches);
