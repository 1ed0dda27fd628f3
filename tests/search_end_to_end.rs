use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use volmatch::template::rotate::rotate_trilinear;
use volmatch::{
    ExtractConfig, Finder, GridConfig, HillClimbConfig, Orientation, Particle, ParticleList,
    PointGroup, RefineConfig, RefineStrategy, Region, SamplingConfig, SearchConfig, Template,
    Volume,
};

const STEP_DEG: f64 = 45.0;

/// Two overlapping Gaussian lobes; no rotational symmetry.
fn density() -> Volume {
    Volume::from_fn([11, 11, 11], |x, y, z| {
        let (x, y, z) = (x as f32 - 5.0, y as f32 - 5.0, z as f32 - 5.0);
        let a = (x - 1.0).powi(2) + y.powi(2) + (z + 0.5).powi(2);
        let b = (x + 1.0).powi(2) + 0.5 * (y - 1.5).powi(2) + (z - 1.0).powi(2);
        (-a / 2.0).exp() + 0.6 * (-b / 3.0).exp()
    })
    .unwrap()
    .with_label("reference")
}

/// Faint uniform noise so that empty regions are not exactly constant.
fn noisy_target(dims: [usize; 3], amplitude: f32, seed: u64) -> Volume {
    let mut rng = StdRng::seed_from_u64(seed);
    Volume::from_fn(dims, |_, _, _| rng.random_range(-amplitude..amplitude))
        .unwrap()
        .with_label("tomogram")
}

/// Adds the reference, rotated by `orientation`, centered at `at`.
fn insert(target: &mut Volume, orientation: &Orientation, at: [usize; 3], gain: f32) {
    let rotated = rotate_trilinear(&density(), &orientation.rotation(), 0.0);
    let [nx, ny, nz] = rotated.dims();
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let (tx, ty, tz) = (at[0] + x - nx / 2, at[1] + y - ny / 2, at[2] + z - nz / 2);
                let cur = target.get(tx, ty, tz).unwrap();
                target.set(tx, ty, tz, cur + gain * rotated.get(x, y, z).unwrap());
            }
        }
    }
}

fn sampling() -> SamplingConfig {
    SamplingConfig {
        view_step: STEP_DEG.to_radians(),
        angle_step: STEP_DEG.to_radians(),
        ..SamplingConfig::default()
    }
}

fn search_config() -> SearchConfig {
    SearchConfig {
        sampling: sampling(),
        extract: ExtractConfig {
            threshold: 0.5,
            min_distance: 10.0,
            ..ExtractConfig::default()
        },
        ..SearchConfig::default()
    }
}

/// A tilted, spun orientation taken from the search grid itself.
fn grid_orientation() -> Orientation {
    let all = sampling().asymmetric_unit(&PointGroup::C1).unwrap();
    all.into_iter()
        .find(|o| (0.3..0.9).contains(&o.direction().z) && o.angle().abs() > 0.5)
        .unwrap()
}

#[test]
fn single_copy_is_found_once_at_its_pose() {
    let truth = grid_orientation();
    let mut target = noisy_target([26, 26, 26], 5e-4, 1);
    insert(&mut target, &truth, [13, 12, 14], 1.0);

    let template = Template::new(density()).unwrap();
    let outcome = Finder::new(template)
        .with_config(search_config())
        .search(&target, &PointGroup::C1)
        .unwrap();

    assert!(!outcome.threshold_lowered);
    assert_eq!(outcome.found, 1);
    let p = &outcome.particles.as_slice()[0];
    assert_eq!(p.id, 1);
    assert_eq!(p.volume_id, "tomogram");
    assert!((p.location - Vector3::new(13.0, 12.0, 14.0)).norm() <= 1.0, "{:?}", p.location);
    assert!(p.orientation.angle_to(&truth) <= STEP_DEG.to_radians() + 1e-9);
    assert!(p.score() > 0.9, "fom {}", p.score());
}

#[test]
fn close_copies_yield_only_the_better_one() {
    let truth = grid_orientation();
    let mut target = noisy_target([30, 24, 24], 5e-4, 2);
    insert(&mut target, &truth, [10, 12, 12], 1.0);
    insert(&mut target, &truth, [15, 12, 12], 0.8);

    let template = Template::new(density()).unwrap();
    let outcome = Finder::new(template)
        .with_config(search_config())
        .search(&target, &PointGroup::C1)
        .unwrap();

    assert_eq!(outcome.found, 1);
    let (_, best) = outcome.scores.to_volume().unwrap().argmax();
    let p = &outcome.particles.as_slice()[0];
    assert_eq!(p.score(), best);
    let near_a = (p.location - Vector3::new(10.0, 12.0, 12.0)).norm() <= 1.0;
    let near_b = (p.location - Vector3::new(15.0, 12.0, 12.0)).norm() <= 1.0;
    assert!(near_a || near_b, "{:?}", p.location);
}

#[test]
fn refinement_never_lowers_the_fom() {
    let truth = Orientation::new(Vector3::new(0.3, -0.2, 1.0), 0.4);
    let mut target = noisy_target([24, 24, 24], 0.03, 3);
    insert(&mut target, &truth, [12, 12, 12], 1.0);
    let finder = Finder::new(Template::new(density()).unwrap());

    let start = Orientation::new(Vector3::new(0.35, -0.2, 1.0), 0.45);
    let strategies = [
        RefineStrategy::Grid(GridConfig::default()),
        RefineStrategy::HillClimb(HillClimbConfig {
            seed: 17,
            max_iterations: 300,
            ..HillClimbConfig::default()
        }),
    ];
    for strategy in strategies {
        let mut list = ParticleList::new("tomogram");
        list.push(Particle::new(1, Vector3::new(13.0, 11.0, 12.0), start, f32::NAN));
        list.push(Particle::new(2, Vector3::new(12.0, 12.0, 12.0), truth, f32::NAN));
        let cfg = RefineConfig {
            strategy,
            ..RefineConfig::default()
        };

        let mut rescored = list.clone();
        let zero_budget = RefineConfig {
            strategy: RefineStrategy::HillClimb(HillClimbConfig {
                max_iterations: 0,
                ..HillClimbConfig::default()
            }),
            ..RefineConfig::default()
        };
        finder.refine(&target, &mut rescored, &zero_budget).unwrap();

        let summary = finder.refine(&target, &mut list, &cfg).unwrap();
        assert_eq!(summary.refined, 2);
        for (before, after) in rescored.iter().zip(list.iter()) {
            assert!(after.score() >= before.score(), "{strategy:?}: {} < {}", after.score(), before.score());
        }
        let moved = &list.as_slice()[0];
        assert!(moved.score() > rescored.as_slice()[0].score());
        assert!((moved.location - Vector3::new(12.0, 12.0, 12.0)).norm() < 1.0);
    }
}

#[test]
fn region_limits_extraction_to_its_sphere() {
    let truth = grid_orientation();
    let mut target = noisy_target([40, 24, 24], 5e-4, 4);
    insert(&mut target, &truth, [10, 12, 12], 1.0);
    insert(&mut target, &truth, [30, 12, 12], 0.9);
    let finder = |region| {
        Finder::new(Template::new(density()).unwrap()).with_config(SearchConfig {
            region,
            ..search_config()
        })
    };

    let everywhere = finder(None).search(&target, &PointGroup::C1).unwrap();
    assert_eq!(everywhere.found, 2);

    let region = Region {
        center: Vector3::new(30.0, 12.0, 12.0),
        radius: 5.0,
    };
    let local = finder(Some(region)).search(&target, &PointGroup::C1).unwrap();
    assert_eq!(local.found, 1);
    let p = &local.particles.as_slice()[0];
    assert!((p.location - region.center).norm() <= 1.0, "{:?}", p.location);
    assert_eq!(local.scores.to_volume().unwrap().get(10, 12, 12), Some(0.0));

    let bad = Region { radius: 0.0, ..region };
    assert!(finder(Some(bad)).search(&target, &PointGroup::C1).is_err());
}

#[test]
fn unset_min_distance_follows_template_extent() {
    let truth = grid_orientation();
    let mut target = noisy_target([30, 24, 24], 5e-4, 2);
    insert(&mut target, &truth, [10, 12, 12], 1.0);
    insert(&mut target, &truth, [15, 12, 12], 0.8);

    let cfg = SearchConfig {
        extract: ExtractConfig {
            min_distance: 0.0,
            ..search_config().extract
        },
        ..search_config()
    };
    let outcome = Finder::new(Template::new(density()).unwrap())
        .with_config(cfg)
        .search(&target, &PointGroup::C1)
        .unwrap();

    assert_eq!(outcome.min_distance, 11.0);
    assert_eq!(outcome.found, 1);
}

#[test]
fn refined_particles_stay_separated() {
    let truth = grid_orientation();
    let mut target = noisy_target([26, 26, 26], 5e-4, 5);
    insert(&mut target, &truth, [13, 12, 14], 1.0);

    let cfg = SearchConfig {
        extract: ExtractConfig {
            threshold: 0.05,
            min_distance: 2.0,
            max_hits: 10,
            ..ExtractConfig::default()
        },
        refine: Some(RefineConfig::default()),
        ..search_config()
    };
    let outcome = Finder::new(Template::new(density()).unwrap())
        .with_config(cfg)
        .search(&target, &PointGroup::C1)
        .unwrap();

    assert!(outcome.found > 1, "found {}", outcome.found);
    assert_eq!(outcome.found, outcome.particles.len() + outcome.collapsed);
    let kept = outcome.particles.as_slice();
    for (i, a) in kept.iter().enumerate() {
        assert_eq!(a.id, i + 1);
        assert!(a.selected);
        for b in &kept[i + 1..] {
            assert!(a.score() >= b.score());
            let d = (a.location - b.location).norm();
            assert!(d >= 2.0, "particles {} and {} are {d} apart", a.id, b.id);
        }
    }
    let best = &kept[0];
    assert!((best.location - Vector3::new(13.0, 12.0, 14.0)).norm() <= 1.0, "{:?}", best.location);
}
