//! Cross-module properties of the BVH, polar maps, direct lighting and
//! probe harmonics

use glam::{IVec2, Vec2, Vec3};
use linelight::bvh::{raycast_brute_force, LineBvh};
use linelight::config::{BvhConfig, DirectConfig, DistanceFieldConfig, PolarConfig, ProbeConfig};
use linelight::direct::DirectLighting;
use linelight::distance_field::DistanceField;
use linelight::format::{quantize_r11g11b10, small_float_ulp};
use linelight::geometry::{polar_angle, segment_intersection, Domain, Line};
use linelight::harmonics::{HarmonicTextures, IndirectSampler};
use linelight::polar::{column_angle, PolarShadowMaps};
use linelight::probes::{ProbeGrid, RadianceScene};
use linelight::util::Rng;
use linelight::{PointLight, Scene};

fn random_lines(rng: &mut Rng, n: usize) -> Vec<Line> {
    (0..n)
        .map(|_| {
            let a = Vec2::new(rng.next_f32(), rng.next_f32());
            let dir = Vec2::new(rng.range_f32(-0.3, 0.3), rng.range_f32(-0.3, 0.3));
            Line::new(a, a + dir + Vec2::splat(1e-3))
        })
        .collect()
}

/// Separated segments: no two share an endpoint or cross
fn separated_lines() -> Vec<Line> {
    [
        [0.1, 0.8, 0.4, 0.9],
        [0.6, 0.2, 0.9, 0.35],
        [0.2, 0.2, 0.3, 0.45],
        [0.55, 0.6, 0.85, 0.75],
        [0.45, 0.1, 0.5, 0.3],
    ]
    .iter()
    .map(|l| Line::from_array(*l))
    .collect()
}

fn demo_lines() -> Vec<Line> {
    Scene::demo().line_data().into_iter().map(Line::from_array).collect()
}

fn same_segment(a: Line, b: Line, tolerance: f32) -> bool {
    let close = |p: Vec2, q: Vec2| (p - q).length() <= tolerance;
    (close(a.a, b.a) && close(a.b, b.b)) || (close(a.a, b.b) && close(a.b, b.a))
}

// ============================================================================
// BVH
// ============================================================================

#[test]
fn bvh_matches_brute_force_on_random_sets() {
    let mut rng = Rng::new(1234);
    for (n, fast_build) in [(1, true), (2, false), (7, true), (64, false), (300, true)] {
        let lines = random_lines(&mut rng, n);
        let config = BvhConfig {
            fast_build,
            ..BvhConfig::default()
        };
        let bvh = LineBvh::build(&lines, &config).unwrap();
        for _ in 0..300 {
            let origin = Vec2::new(rng.range_f32(-0.2, 1.2), rng.range_f32(-0.2, 1.2));
            let delta = Vec2::new(rng.range_f32(-1.5, 1.5), rng.range_f32(-1.5, 1.5));
            let fast = bvh.raycast_segment(origin, delta, false);
            let slow = raycast_brute_force(&lines, origin, delta);
            match (fast, slow) {
                (None, None) => {},
                (Some(f), Some(s)) => {
                    assert_eq!(f.id, s.id, "n={} origin={:?} delta={:?}", n, origin, delta);
                    assert!((f.t - s.t).abs() < 1e-6);
                    assert!((f.u - s.u).abs() < 1e-5);
                },
                (f, s) => panic!("bvh {:?} vs brute force {:?}", f, s),
            }
        }
    }
}

#[test]
fn bvh_matches_brute_force_on_demo_scene() {
    let lines = demo_lines();
    let bvh = LineBvh::build(&lines, &BvhConfig::default()).unwrap();
    let mut rng = Rng::new(99);
    for _ in 0..500 {
        let origin = Vec2::new(rng.range_f32(-1.0, 1.0), rng.range_f32(-1.0, 1.0));
        let delta = Vec2::new(rng.range_f32(-2.0, 2.0), rng.range_f32(-2.0, 2.0));
        let fast = bvh.raycast_segment(origin, delta, false).map(|h| h.id);
        let slow = raycast_brute_force(&lines, origin, delta).map(|h| h.id);
        assert_eq!(fast, slow);
    }
}

#[test]
fn bvh_leaves_are_a_permutation() {
    let mut rng = Rng::new(5);
    for n in [2, 3, 5, 16, 17, 125, 1000] {
        let lines = random_lines(&mut rng, n);
        for fast_build in [true, false] {
            let config = BvhConfig {
                fast_build,
                ..BvhConfig::default()
            };
            let bvh = LineBvh::build(&lines, &config).unwrap();
            let mut ids = bvh.leaf_ids();
            assert_eq!(ids.len(), n);
            ids.sort_unstable();
            assert!(ids.iter().copied().eq(0..n as u32));
        }
    }
}

#[test]
fn occlusion_query_agrees_with_nearest_hit() {
    let lines = demo_lines();
    let bvh = LineBvh::build(&lines, &BvhConfig::default()).unwrap();
    let mut rng = Rng::new(17);
    for _ in 0..500 {
        let a = Vec2::new(rng.range_f32(-1.0, 1.0), rng.range_f32(-1.0, 1.0));
        let b = Vec2::new(rng.range_f32(-1.0, 1.0), rng.range_f32(-1.0, 1.0));
        let any = bvh.occluded(a, b);
        let nearest = raycast_brute_force(&lines, a, b - a).is_some();
        assert_eq!(any, nearest);
    }
}

// ============================================================================
// Polar maps
// ============================================================================

#[test]
fn polar_row_holds_nearest_line_per_angle() {
    let lines = separated_lines();
    let lights = [
        PointLight::new(Vec2::new(0.5, 0.5), 1.0, Vec3::ONE),
        PointLight::new(Vec2::new(0.15, 0.3), 1.0, Vec3::ONE),
        PointLight::new(Vec2::new(0.7, 0.9), 1.0, Vec3::ONE),
    ];
    let width = 512;
    let mut maps = PolarShadowMaps::new(&PolarConfig {
        resolution: width,
        max_lights: 4,
        peel: true,
    });
    maps.rebuild_all(&lines, &lights);

    for (row, light) in lights.iter().enumerate() {
        let endpoint_angles: Vec<f32> = lines
            .iter()
            .flat_map(|l| [polar_angle(l.a - light.position), polar_angle(l.b - light.position)])
            .collect();

        for c in 0..width as i32 {
            let theta = column_angle(c, width);
            let near_endpoint = endpoint_angles.iter().any(|&e| {
                let d = (theta - e).rem_euclid(1.0);
                d.min(1.0 - d) < 2.0 / width as f32
            });
            if near_endpoint {
                continue;
            }

            let dir = Vec2::new((theta * std::f32::consts::TAU).cos(), (theta * std::f32::consts::TAU).sin());
            let mut hits: Vec<(f32, usize)> = lines
                .iter()
                .enumerate()
                .filter_map(|(id, l)| segment_intersection(light.position, dir * 4.0, l.a, l.b).map(|(t, _)| (t, id)))
                .collect();
            hits.sort_by(|a, b| a.0.total_cmp(&b.0));

            let stored = Line::from_vec4(maps.base().lines.get(c as u32, row as u32));
            match hits.first() {
                None => assert_eq!(stored.a, stored.b, "row {} column {} should be clear", row, c),
                Some(&(t, id)) => {
                    let expected = lines[id].translated(-light.position);
                    assert!(
                        same_segment(stored, expected, 1e-5),
                        "row {} column {}: {:?} vs {:?}",
                        row,
                        c,
                        stored,
                        expected
                    );
                    let depth = maps.base().distance_at(row as u32, c);
                    assert!((depth - t * 4.0).abs() < 1e-3, "depth {} vs {}", depth, t * 4.0);

                    // Peel holds the next line along the same ray
                    if let (Some(peel), Some(&(_, second))) = (maps.peel(), hits.get(1)) {
                        let stored = Line::from_vec4(peel.lines.get(c as u32, row as u32));
                        let expected = lines[second].translated(-light.position);
                        assert!(same_segment(stored, expected, 1e-5));
                    }
                },
            }
        }
    }
}

// ============================================================================
// Direct lighting
// ============================================================================

#[test]
fn shadow_test_matches_segment_intersection() {
    let lines = separated_lines();
    let lights = [
        PointLight::new(Vec2::new(0.5, 0.5), 2.0, Vec3::ONE),
        PointLight::new(Vec2::new(0.05, 0.05), 2.0, Vec3::ONE),
    ];
    let width = 1024;
    let mut maps = PolarShadowMaps::new(&PolarConfig {
        resolution: width,
        max_lights: 2,
        peel: false,
    });
    maps.rebuild_all(&lines, &lights);
    let config = DirectConfig::default();
    let direct = DirectLighting::new(&maps, &lights, &config);

    let mut rng = Rng::new(2024);
    let mut checked = 0;
    for _ in 0..4000 {
        let p = Vec2::new(rng.next_f32(), rng.next_f32());
        let index = rng.index(lights.len());
        let light = &lights[index];

        // Angular ties and points on a line are ambiguous
        let theta = polar_angle(p - light.position);
        let near_edge = lines.iter().any(|l| {
            [l.a, l.b].iter().any(|e| {
                let d = (theta - polar_angle(*e - light.position)).rem_euclid(1.0);
                d.min(1.0 - d) < 3.0 / width as f32
            }) || l.distance_squared_to(p) < 1e-6
        });
        if near_edge {
            continue;
        }

        let expected = lines
            .iter()
            .any(|l| segment_intersection(light.position, p - light.position, l.a, l.b).is_some());
        assert_eq!(direct.occluded(index, p), expected, "light {} point {:?}", index, p);
        checked += 1;
    }
    assert!(checked > 2000);
}

#[test]
fn contribution_falls_as_light_recedes() {
    let lines = separated_lines();
    let pixel = Vec2::new(0.5, 0.5);
    let config = DirectConfig::default();
    let mut maps = PolarShadowMaps::new(&PolarConfig {
        resolution: 256,
        max_lights: 1,
        peel: false,
    });

    // Walk the light away from the pixel along a clear corridor
    let dir = Vec2::new(-1.0, 0.0);
    let mut previous = f32::INFINITY;
    for step in 1..40 {
        let light = PointLight::new(pixel + dir * (step as f32 * 0.01), 0.6, Vec3::ONE);
        maps.rebuild_all(&lines, &[light]);
        let direct = DirectLighting::new(&maps, std::slice::from_ref(&light), &config);
        let value = direct.shade(pixel).x;
        assert!(value > 0.0);
        assert!(value < previous, "step {}: {} !< {}", step, value, previous);
        previous = value;
    }
}

// ============================================================================
// Probes
// ============================================================================

#[test]
fn uniform_radiance_roundtrips_through_harmonics() {
    let c = quantize_r11g11b10(Vec3::new(0.3, 0.55, 0.8));
    let config = ProbeConfig {
        resolution: 8,
        filter: false,
        ambient: c,
        ..ProbeConfig::default()
    };
    let domain = Domain::UNIT;
    let bvh = LineBvh::default();
    let df = DistanceField::generate(&bvh, domain, &DistanceFieldConfig::default(), 0.5 / 128.0);
    let mut grid = ProbeGrid::new(&config, domain);
    let scene = RadianceScene {
        bvh: &bvh,
        lines: &[],
        lights: &[],
        ambient: c,
        albedo: config.albedo,
    };
    assert!(grid.update(&df, &scene));

    let textures = HarmonicTextures::integrate(&grid);
    let sampler = IndirectSampler::new(&textures, &grid);
    let layout = *grid.layout();
    for y in 0..8 {
        for x in 0..8 {
            let center = layout.probe_center(IVec2::new(x, y));
            let e = sampler.sample(center).scalar_irradiance();
            for (got, want, bits) in [(e.x, c.x, 6), (e.y, c.y, 6), (e.z, c.z, 5)] {
                let ulp = small_float_ulp(want, bits);
                assert!(
                    (got - want).abs() <= ulp + 1e-6,
                    "probe ({}, {}): {} vs {} (ulp {})",
                    x,
                    y,
                    got,
                    want,
                    ulp
                );
            }
            // No directional structure either
            let h = sampler.sample(center);
            assert!((h.irradiance(0.3) - e).abs().max_element() < 1e-2);
        }
    }
}
