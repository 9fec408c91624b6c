// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nalgebra::DMatrix;

use rgbd_odometry_rs::core::camera::Intrinsics;
use rgbd_odometry_rs::core::track::norm::RobustNorm;
use rgbd_odometry_rs::core::track::reducer::{reduce, Accumulator};
use rgbd_odometry_rs::core::track::residual::EvalContext;
use rgbd_odometry_rs::misc::type_aliases::{Grid, Iso3};

// VGA-sized synthetic frame, the typical RGB-D sensor resolution.

fn gen_frame() -> (Grid, Grid, Grid) {
    let reference = DMatrix::from_fn(480, 640, |v, u| {
        0.5 + 0.25 * ((u as f32) * 0.2).sin() * ((v as f32) * 0.15).cos()
    });
    let live = DMatrix::from_fn(480, 640, |v, u| {
        0.5 + 0.25 * ((u as f32 + 0.8) * 0.2).sin() * ((v as f32) * 0.15).cos()
    });
    let depth = DMatrix::from_fn(480, 640, |v, u| 1.5 + 0.001 * ((u + v) as f32));
    (live, reference, depth)
}

fn criterion_benchmark(c: &mut Criterion) {
    let (live, reference, depth) = gen_frame();
    let intrinsics = Intrinsics::new(525.0, 525.0, 319.5, 239.5);
    let identity = Iso3::identity().to_homogeneous();
    let klg_tlr = intrinsics.matrix() * identity.fixed_view::<3, 4>(0, 0).into_owned();
    let context = EvalContext {
        live_grey: &live,
        ref_grey: &reference,
        ref_depth: &depth,
        klg: intrinsics,
        krg: intrinsics,
        krd: intrinsics,
        tgd: identity,
        tlr: identity,
        klg_tlr,
        norm: RobustNorm::Tukey,
        norm_scale: 0.04,
        discard_saturated: true,
        min_depth: 0.01,
        max_depth: 100.0,
    };

    let mut group = c.benchmark_group("reduction");
    group.bench_function("parallel", |b| b.iter(|| black_box(reduce(&context))));
    group.bench_function("sequential", |b| {
        b.iter(|| {
            let mut acc = Accumulator::new();
            context.accumulate_range(0..480 * 640, &mut acc);
            black_box(acc)
        })
    });
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
