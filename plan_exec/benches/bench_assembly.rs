//! # Planning Cycle Benchmark

use std::sync::Arc;

use comms_if::msg::planning::{PlanningRequest, PredictedObstacle, TrajectoryPoint};
use criterion::{criterion_group, criterion_main, Criterion};
use nalgebra::Point2;
use plan_lib::{
    engine::{EngineParams, SimWorld},
    frame::{FrameConverter, FrameOffsets},
    map::LaneMap,
    policy::{RuleBasedParams, RuleBasedPolicy},
    world::{PlanningWorld, WorldAssembler},
};

fn planning_benchmark(c: &mut Criterion) {
    // ---- Build a busy request ----

    let offsets = FrameOffsets {
        x_m: 652000.0,
        y_m: 5339000.0,
    };

    // Three parallel lanes, 1 km long
    let map = LaneMap::from_lanes(
        (0..3)
            .map(|i| {
                let y = 3.5 * i as f64;
                (i, vec![Point2::new(0.0, y), Point2::new(500.0, y), Point2::new(1000.0, y)])
            })
            .collect(),
    )
    .unwrap();

    // 40 obstacles with 30 predicted points each
    let obstacles = (0..40)
        .map(|i| PredictedObstacle {
            id: i,
            prediction: (0..30)
                .map(|k| TrajectoryPoint {
                    relative_time: 0.1 * k as f64,
                    x: offsets.x_m + 20.0 + 15.0 * i as f64 + 0.8 * k as f64,
                    y: offsets.y_m + 3.5 * (i % 3) as f64,
                    theta: 0.0,
                    v: 8.0,
                })
                .collect(),
            box_length: 4.5,
            box_width: 1.8,
        })
        .collect();

    let request = PlanningRequest {
        planning_init_point: TrajectoryPoint {
            relative_time: 0.0,
            x: offsets.x_m + 5.0,
            y: offsets.y_m,
            theta: 0.0,
            v: 10.0,
        },
        velocity_desired: 12.0,
        obstacles,
        ..Default::default()
    };

    let assembler = WorldAssembler::new(FrameConverter::new(offsets));
    let mut world = SimWorld::new(
        EngineParams::default(),
        Arc::new(map),
        Box::new(RuleBasedPolicy::new(RuleBasedParams::default())),
    );

    // ---- Benchmarks ----

    c.bench_function("WorldAssembler::assemble", |b| {
        b.iter(|| assembler.assemble(&mut world, &request).unwrap())
    });

    c.bench_function("SimWorld::generate_trajectory", |b| {
        b.iter(|| {
            assembler.assemble(&mut world, &request).unwrap();
            world.generate_trajectory(0.2, 10).unwrap()
        })
    });
}

criterion_group!(benches, planning_benchmark);
criterion_main!(benches);
