use criterion::{criterion_group, criterion_main, Criterion};
use earthwork::{clip, reproject, Analysis, Polygon, ReferenceMode, Resampling};
use elevation::{Crs, ElevationGrid, GeoTransform};
use geo::{geometry::Coord, polygon};

/// 1000 x 1000 grid of 1 m cells sloping west to east.
fn slope() -> ElevationGrid {
    let samples = (0..1_000_000).map(|i| f64::from(i % 1000) * 0.01).collect();
    let gt = GeoTransform::north_up(
        Coord {
            x: 448_000.0,
            y: 5_412_000.0,
        },
        1.0,
        1.0,
    );
    ElevationGrid::new(1000, 1000, samples, gt, Crs::utm(31, true), Some(-9999.0)).unwrap()
}

fn pads() -> Vec<Polygon> {
    (0..64)
        .map(|i| {
            let x = 448_000.0 + f64::from(i % 8) * 120.0 + 10.0;
            let y = 5_411_000.0 + f64::from(i / 8) * 120.0 + 10.0;
            let geometry = polygon![
                (x: x, y: y),
                (x: x + 100.0, y: y + 20.0),
                (x: x + 80.0, y: y + 100.0),
                (x: x - 5.0, y: y + 70.0),
                (x: x, y: y),
            ];
            Polygon::new(i.to_string(), geometry, Crs::utm(31, true))
        })
        .collect()
}

fn clipping(c: &mut Criterion) {
    let mut group = c.benchmark_group("Clip");
    let grid = slope();
    let pad = pads().swap_remove(27);
    group.bench_with_input("pad", &(grid, pad), |b, (g, p)| {
        b.iter(|| clip(g, &p.geometry).unwrap())
    });
}

fn analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("Analysis");
    group.sample_size(20);
    let grid = slope();
    let polygons = pads();

    for (name, parallel) in [("sequential", false), ("parallel", true)] {
        let analysis = Analysis::builder()
            .surface(&grid)
            .mode(ReferenceMode::BoundaryAverageAltitude)
            .parallel(parallel)
            .build()
            .unwrap();
        group.bench_with_input(name, &polygons, |b, p| b.iter(|| analysis.run(p).unwrap()));
    }
}

fn reprojection(c: &mut Criterion) {
    let mut group = c.benchmark_group("Reproject");
    group.sample_size(10);
    let gt = GeoTransform::north_up(Coord { x: 2.3, y: 48.9 }, 0.0001, 0.0001);
    let grid = ElevationGrid::constant(500, 500, 35.0, gt, Crs::WGS84, None).unwrap();

    for resampling in [Resampling::Nearest, Resampling::Bilinear] {
        group.bench_with_input(resampling.to_string(), &grid, |b, g| {
            b.iter(|| reproject(g, None, resampling).unwrap())
        });
    }
}

criterion_group!(benches, clipping, analysis, reprojection);
criterion_main!(benches);
