use criterion::{criterion_group, criterion_main, Criterion};
use nalgebra::Vector3;
use std::hint::black_box;
use volmatch::{
    refine_pose, CorrelationEngine, EngineConfig, Orientation, PointGroup, Pose, RefineConfig,
    SamplingConfig, Template, Volume,
};
use volmatch::search::scan::scan_orientations;

fn make_volume(dims: [usize; 3]) -> Volume {
    Volume::from_fn(dims, |x, y, z| (((x * 13) ^ (y * 7) ^ (z * 5) ^ (x * y)) & 0xFF) as f32)
        .unwrap()
}

fn make_template() -> Template {
    let density = Volume::from_fn([16, 16, 16], |x, y, z| {
        let (x, y, z) = (x as f32 - 8.0, y as f32 - 8.0, z as f32 - 8.0);
        let a = (x - 2.0).powi(2) + y.powi(2) + z.powi(2);
        let b = (x + 2.0).powi(2) + (y - 1.0).powi(2) + 0.5 * z.powi(2);
        (-a / 4.0).exp() + 0.5 * (-b / 6.0).exp()
    })
    .unwrap();
    Template::new(density).unwrap()
}

fn bench_engine(c: &mut Criterion) {
    let target = make_volume([64, 64, 64]);
    let template = make_template();
    let engine = CorrelationEngine::new(&target, &template, &EngineConfig::default()).unwrap();
    let orientation = Orientation::new(Vector3::new(0.2, 0.4, 1.0), 0.7);

    c.bench_function("correlate_one_orientation_64", |b| {
        b.iter(|| black_box(engine.correlate(&orientation).unwrap()));
    });

    let orientations: Vec<Orientation> = SamplingConfig {
        view_step: 60f64.to_radians(),
        angle_step: 90f64.to_radians(),
        ..SamplingConfig::default()
    }
    .asymmetric_unit(&PointGroup::C1)
    .unwrap()
    .into_iter()
    .take(8)
    .collect();

    c.bench_function("scan_8_orientations_64", |b| {
        b.iter(|| black_box(scan_orientations(&engine, &orientations, true).unwrap()));
    });

    let scorer = engine.real_space();
    let start = Pose::new(Vector3::new(31.5, 32.0, 30.5), orientation);
    let cfg = RefineConfig::default();
    c.bench_function("refine_one_particle_grid", |b| {
        b.iter(|| black_box(refine_pose(&scorer, &start, f32::NAN, &cfg).unwrap()));
    });
}

criterion_group!(benches, bench_engine);
criterion_main!(benches);
