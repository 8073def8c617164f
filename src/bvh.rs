//! Line BVH
//!
//! A binary hierarchy over line centroids, flattened into `float4` words so a
//! shader (or any consumer holding the raw bytes) can walk it. Each node is
//! three words:
//!
//! ```text
//! word 0: (meta_left, payload_left, meta_right, payload_right)
//! word 1: left child data   - AABB (xmin, ymin, xmax, ymax) or line (ax, ay, bx, by)
//! word 2: right child data  - same contract
//! ```
//!
//! `meta` and `payload` are u32s stored as float bits. For a BBOX child the
//! payload is the child node's base address in float4 units; for a LINE child
//! it is the line id. Nodes are allocated in preorder, so the root lives at
//! address 0 and every subtree is contiguous. When only one child is a line
//! it sits in the left slot.

use glam::{Vec2, Vec4};

use crate::config::BvhConfig;
use crate::error::{LightError, LightResult, Resource};
use crate::geometry::{segment_intersection, Aabb2, Line};

/// Float4 words per node
pub const NODE_STRIDE: usize = 3;

pub const META_BBOX: u32 = 0;
pub const META_LINE: u32 = 1;

/// Slab tests run against boxes grown by this much so flat boxes of axis
/// aligned lines still admit rays
const BBOX_SLACK: f32 = 1e-6;

/// Initial capacity of the traversal stack
const STACK_CAPACITY: usize = 64;

/// A decoded child slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Child {
    Node { base: u32, bbox: Aabb2 },
    Line { id: u32, line: Line },
}

impl Child {
    fn decode(meta: f32, payload: f32, data: Vec4) -> Self {
        if meta.to_bits() == META_LINE {
            Self::Line {
                id: payload.to_bits(),
                line: Line::from_vec4(data),
            }
        } else {
            Self::Node {
                base: payload.to_bits(),
                bbox: Aabb2::from_vec4(data),
            }
        }
    }
}

/// Result of a nearest-hit ray query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub id: u32,
    /// Fraction of the query segment travelled to the hit
    pub t: f32,
    /// Position on the hit line, 0 at `a`, 1 at `b`
    pub u: f32,
    /// Displacement from the origin to the hit point
    pub d_uv: Vec2,
    pub distance_squared: f32,
}

impl RayHit {
    fn new(id: u32, t: f32, u: f32, delta: Vec2) -> Self {
        let d_uv = delta * t;
        Self {
            id,
            t,
            u,
            d_uv,
            distance_squared: d_uv.length_squared(),
        }
    }

    /// Closer along the ray, ties going to the smaller id
    #[inline]
    fn beats(&self, t: f32, id: u32) -> bool {
        t < self.t || (t == self.t && id < self.id)
    }
}

/// Result of a nearest-line query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestLine {
    pub id: u32,
    pub distance: f32,
    /// +1 left of the line's a->b, -1 right, 0 on it
    pub side: f32,
}

// ============================================================================
// Build
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Entry {
    center: Vec2,
    line: Line,
    id: u32,
}

/// What a finished subtree reports to its parent
#[derive(Debug, Clone, Copy)]
struct Built {
    meta: u32,
    payload: u32,
    data: Vec4,
    bbox: Aabb2,
}

impl Built {
    fn is_line(&self) -> bool {
        self.meta == META_LINE
    }
}

struct Builder {
    words: Vec<[f32; 4]>,
    next_address: usize,
    fast_build: bool,
}

impl Builder {
    fn alloc(&mut self) -> usize {
        let address = self.next_address;
        self.next_address += NODE_STRIDE;
        address
    }

    fn build(&mut self, entries: &mut [Entry], mut sorted_axis: Option<usize>) -> Built {
        if let [entry] = entries {
            return Built {
                meta: META_LINE,
                payload: entry.id,
                data: entry.line.to_vec4(),
                bbox: entry.line.aabb(),
            };
        }

        let address = self.alloc();

        if entries.len() > 2 {
            let mut extent = Aabb2::empty();
            for e in entries.iter() {
                extent.expand_point(e.center);
            }
            let range = extent.max - extent.min;
            let axis = if range.x > range.y { 0 } else { 1 };
            if sorted_axis != Some(axis) {
                entries.sort_by(|l, r| l.center[axis].total_cmp(&r.center[axis]));
                sorted_axis = Some(axis);
            }
        }

        let mut split = entries.len() / 2;
        if entries.len() % 2 == 1 {
            let mid = entries[split].center;
            let (left_mean, right_mean) = if self.fast_build {
                (
                    (entries[0].center + entries[split - 1].center) * 0.5,
                    (entries[split + 1].center + entries[entries.len() - 1].center) * 0.5,
                )
            } else {
                (mean_center(&entries[..split]), mean_center(&entries[split + 1..]))
            };
            if left_mean.distance_squared(mid) < right_mean.distance_squared(mid) {
                split += 1;
            }
        }

        let (lo, hi) = entries.split_at_mut(split);
        let mut left = self.build(lo, sorted_axis);
        let mut right = self.build(hi, sorted_axis);

        if right.is_line() && !left.is_line() {
            std::mem::swap(&mut left, &mut right);
        }

        let bbox = left.bbox.union(&right.bbox);
        self.words[address] = [
            f32::from_bits(left.meta),
            f32::from_bits(left.payload),
            f32::from_bits(right.meta),
            f32::from_bits(right.payload),
        ];
        self.words[address + 1] = left.data.to_array();
        self.words[address + 2] = right.data.to_array();

        Built {
            meta: META_BBOX,
            payload: address as u32,
            data: bbox.to_vec4(),
            bbox,
        }
    }
}

fn mean_center(entries: &[Entry]) -> Vec2 {
    entries.iter().map(|e| e.center).sum::<Vec2>() / entries.len() as f32
}

// ============================================================================
// LineBvh
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct LineBvh {
    words: Vec<[f32; 4]>,
    line_count: usize,
}

impl LineBvh {
    /// Build over `lines`; ids are slice indices.
    ///
    /// Lines are expected to be validated already (see `LineStore`). An empty
    /// slice yields an empty hierarchy; a single line is duplicated so the
    /// root always has two populated slots.
    pub fn build(lines: &[Line], config: &BvhConfig) -> LightResult<Self> {
        if lines.is_empty() {
            return Ok(Self::default());
        }

        let node_count = lines.len().max(2) - 1;
        if node_count > config.max_nodes {
            return Err(LightError::exhausted(Resource::BvhNodes, node_count, config.max_nodes));
        }

        let mut entries: Vec<Entry> = lines
            .iter()
            .enumerate()
            .map(|(id, line)| Entry {
                center: line.center(),
                line: *line,
                id: id as u32,
            })
            .collect();
        if entries.len() == 1 {
            entries.push(entries[0]);
        }

        let mut builder = Builder {
            words: vec![[0.0; 4]; node_count * NODE_STRIDE],
            next_address: 0,
            fast_build: config.fast_build,
        };
        builder.build(&mut entries, None);
        debug_assert_eq!(builder.next_address, builder.words.len());

        log::debug!("line bvh: {} lines, {} nodes", lines.len(), node_count);
        Ok(Self {
            words: builder.words,
            line_count: lines.len(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.words.len() / NODE_STRIDE
    }

    pub fn line_count(&self) -> usize {
        self.line_count
    }

    /// The flat float4 buffer
    pub fn words(&self) -> &[[f32; 4]] {
        &self.words
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    /// Both child slots of the node at `base`
    pub fn children(&self, base: u32) -> [Child; 2] {
        let b = base as usize;
        let w0 = self.words[b];
        [
            Child::decode(w0[0], w0[1], Vec4::from_array(self.words[b + 1])),
            Child::decode(w0[2], w0[3], Vec4::from_array(self.words[b + 2])),
        ]
    }

    /// Bounds of the whole hierarchy
    pub fn bounds(&self) -> Aabb2 {
        if self.is_empty() {
            return Aabb2::empty();
        }
        self.children(0)
            .iter()
            .map(child_bbox)
            .fold(Aabb2::empty(), |acc, b| acc.union(&b))
    }

    /// Leaf line ids in depth-first, left-first order
    pub fn leaf_ids(&self) -> Vec<u32> {
        let mut ids = Vec::with_capacity(self.line_count.max(2));
        if self.is_empty() {
            return ids;
        }
        let [left, right] = self.children(0);
        let mut stack = vec![right, left];
        while let Some(child) = stack.pop() {
            match child {
                Child::Line { id, .. } => ids.push(id),
                Child::Node { base, .. } => {
                    let [left, right] = self.children(base);
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
        ids
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Nearest hit along `origin + dir * max_distance`
    pub fn raycast(&self, origin: Vec2, dir: Vec2, max_distance: f32) -> Option<RayHit> {
        let delta = dir.normalize_or_zero() * max_distance;
        self.raycast_segment(origin, delta, false)
    }

    /// Nearest hit along the segment `origin -> origin + delta`.
    ///
    /// With `stop_on_first_hit` the first intersection found is returned,
    /// which is enough for occlusion.
    pub fn raycast_segment(&self, origin: Vec2, delta: Vec2, stop_on_first_hit: bool) -> Option<RayHit> {
        if self.is_empty() || delta == Vec2::ZERO {
            return None;
        }

        let mut best: Option<RayHit> = None;
        let mut stack: Vec<(u32, f32)> = Vec::with_capacity(STACK_CAPACITY);
        stack.push((0, 0.0));

        while let Some((base, entry)) = stack.pop() {
            if best.is_some_and(|b| entry > b.t) {
                continue;
            }

            let mut boxes: [Option<(u32, f32)>; 2] = [None, None];
            for (slot, child) in self.children(base).into_iter().enumerate() {
                match child {
                    Child::Line { id, line } => {
                        if let Some((t, u)) = segment_intersection(origin, delta, line.a, line.b) {
                            if best.map_or(true, |b| b.beats(t, id)) {
                                best = Some(RayHit::new(id, t, u, delta));
                                if stop_on_first_hit {
                                    return best;
                                }
                            }
                        }
                    }
                    Child::Node { base, bbox } => {
                        if let Some(t) = bbox.grown(BBOX_SLACK).segment_entry(origin, delta) {
                            if best.map_or(true, |b| t <= b.t) {
                                boxes[slot] = Some((base, t));
                            }
                        }
                    }
                }
            }

            // Farther pushed first so the nearer child is descended next
            match boxes {
                [Some(a), Some(b)] => {
                    let (near, far) = if b.1 < a.1 { (b, a) } else { (a, b) };
                    stack.push(far);
                    stack.push(near);
                }
                [Some(only), None] | [None, Some(only)] => stack.push(only),
                [None, None] => {}
            }
        }

        best
    }

    /// Does any line cross the segment `a -> b`?
    pub fn occluded(&self, a: Vec2, b: Vec2) -> bool {
        self.raycast_segment(a, b - a, true).is_some()
    }

    /// Closest line to `p`, ties going to the smaller id
    pub fn nearest(&self, p: Vec2) -> Option<NearestLine> {
        if self.is_empty() {
            return None;
        }

        let mut best: Option<(u32, f32, Line)> = None;
        let mut stack: Vec<(u32, f32)> = Vec::with_capacity(STACK_CAPACITY);
        stack.push((0, 0.0));

        while let Some((base, bound)) = stack.pop() {
            if best.is_some_and(|(_, d, _)| bound > d) {
                continue;
            }
            let mut boxes: [Option<(u32, f32)>; 2] = [None, None];
            for (slot, child) in self.children(base).into_iter().enumerate() {
                match child {
                    Child::Line { id, line } => {
                        let d = line.distance_squared_to(p);
                        let better = match best {
                            None => true,
                            Some((bid, bd, _)) => d < bd || (d == bd && id < bid),
                        };
                        if better {
                            best = Some((id, d, line));
                        }
                    }
                    Child::Node { base, bbox } => {
                        let d = bbox.distance_squared_to(p);
                        if best.map_or(true, |(_, bd, _)| d <= bd) {
                            boxes[slot] = Some((base, d));
                        }
                    }
                }
            }
            match boxes {
                [Some(a), Some(b)] => {
                    let (near, far) = if b.1 < a.1 { (b, a) } else { (a, b) };
                    stack.push(far);
                    stack.push(near);
                }
                [Some(only), None] | [None, Some(only)] => stack.push(only),
                [None, None] => {}
            }
        }

        best.map(|(id, d, line)| NearestLine {
            id,
            distance: d.sqrt(),
            side: line.side(p),
        })
    }
}

fn child_bbox(child: &Child) -> Aabb2 {
    match child {
        Child::Node { bbox, .. } => *bbox,
        Child::Line { line, .. } => line.aabb(),
    }
}

/// Reference scan over every line, with the same tie-break as the BVH
pub fn raycast_brute_force(lines: &[Line], origin: Vec2, delta: Vec2) -> Option<RayHit> {
    let mut best: Option<RayHit> = None;
    for (id, line) in lines.iter().enumerate() {
        let id = id as u32;
        if let Some((t, u)) = segment_intersection(origin, delta, line.a, line.b) {
            if best.map_or(true, |b| b.beats(t, id)) {
                best = Some(RayHit::new(id, t, u, delta));
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Rng;

    fn lines(raw: &[[f32; 4]]) -> Vec<Line> {
        raw.iter().map(|l| Line::from_array(*l)).collect()
    }

    fn random_lines(rng: &mut Rng, n: usize) -> Vec<Line> {
        (0..n)
            .map(|_| {
                let a = Vec2::new(rng.next_f32(), rng.next_f32());
                let dir = Vec2::new(rng.range_f32(-0.2, 0.2), rng.range_f32(-0.2, 0.2));
                Line::new(a, a + dir + Vec2::splat(1e-3))
            })
            .collect()
    }

    #[test]
    fn test_empty_input_gives_empty_bvh() {
        let bvh = LineBvh::build(&[], &BvhConfig::default()).unwrap();
        assert!(bvh.is_empty());
        assert!(bvh.raycast(Vec2::ZERO, Vec2::X, 1.0).is_none());
        assert!(bvh.nearest(Vec2::ZERO).is_none());
    }

    #[test]
    fn test_single_line_is_duplicated() {
        let bvh = LineBvh::build(&lines(&[[0.0, 0.0, 1.0, 0.0]]), &BvhConfig::default()).unwrap();
        assert_eq!(bvh.node_count(), 1);
        assert_eq!(bvh.leaf_ids(), vec![0, 0]);
        assert_eq!(bvh.words()[0][0].to_bits(), META_LINE);
        assert_eq!(bvh.words()[1], [0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_three_lines_layout() {
        // Spread along x; the lone leaf of the root must sit in the left slot
        let set = lines(&[
            [0.0, 0.0, 0.1, 0.0],
            [0.5, 0.0, 0.6, 0.0],
            [0.9, 0.0, 1.0, 0.0],
        ]);
        let bvh = LineBvh::build(&set, &BvhConfig::default()).unwrap();
        assert_eq!(bvh.node_count(), 2);
        let [left, right] = bvh.children(0);
        assert!(matches!(left, Child::Line { .. }));
        match right {
            Child::Node { base, bbox } => {
                assert_eq!(base, NODE_STRIDE as u32);
                assert!(bbox.max.x >= 0.6);
            }
            Child::Line { .. } => panic!("expected an interior node"),
        }
    }

    #[test]
    fn test_leaf_coverage_is_permutation() {
        let mut rng = Rng::new(7);
        for n in [2, 3, 5, 16, 33, 100] {
            let set = random_lines(&mut rng, n);
            for fast_build in [true, false] {
                let config = BvhConfig {
                    fast_build,
                    ..BvhConfig::default()
                };
                let bvh = LineBvh::build(&set, &config).unwrap();
                let mut ids = bvh.leaf_ids();
                ids.sort_unstable();
                assert_eq!(ids, (0..n as u32).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn test_node_budget() {
        let set = lines(&[[0.0, 0.0, 1.0, 0.0], [0.0, 1.0, 1.0, 1.0], [0.0, 2.0, 1.0, 2.0]]);
        let config = BvhConfig {
            max_nodes: 1,
            ..BvhConfig::default()
        };
        assert!(matches!(
            LineBvh::build(&set, &config),
            Err(LightError::ResourceExhausted {
                resource: Resource::BvhNodes,
                requested: 2,
                limit: 1
            })
        ));
    }

    #[test]
    fn test_raycast_matches_brute_force() {
        let mut rng = Rng::new(42);
        let set = random_lines(&mut rng, 64);
        let bvh = LineBvh::build(&set, &BvhConfig::default()).unwrap();
        for _ in 0..500 {
            let origin = Vec2::new(rng.next_f32(), rng.next_f32());
            let delta = Vec2::new(rng.range_f32(-1.0, 1.0), rng.range_f32(-1.0, 1.0));
            let expected = raycast_brute_force(&set, origin, delta);
            let got = bvh.raycast_segment(origin, delta, false);
            assert_eq!(got.map(|h| (h.id, h.t)), expected.map(|h| (h.id, h.t)));
        }
    }

    #[test]
    fn test_axis_aligned_ray_hits_flat_box() {
        let set = lines(&[[0.2, 0.5, 0.8, 0.5], [0.2, 0.7, 0.8, 0.7], [0.1, 0.1, 0.1, 0.2]]);
        let bvh = LineBvh::build(&set, &BvhConfig::default()).unwrap();
        let hit = bvh.raycast(Vec2::new(0.5, 0.0), Vec2::Y, 1.0).unwrap();
        assert_eq!(hit.id, 0);
        assert!((hit.d_uv.y - 0.5).abs() < 1e-6);
        assert!((hit.u - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_occluded() {
        let set = lines(&[[0.2, 0.5, 0.8, 0.5], [0.0, 0.0, 0.0, 0.1]]);
        let bvh = LineBvh::build(&set, &BvhConfig::default()).unwrap();
        assert!(bvh.occluded(Vec2::new(0.5, 0.3), Vec2::new(0.5, 0.7)));
        assert!(!bvh.occluded(Vec2::new(0.5, 0.3), Vec2::new(0.9, 0.7)));
    }

    #[test]
    fn test_nearest_matches_brute_force() {
        let mut rng = Rng::new(3);
        let set = random_lines(&mut rng, 40);
        let bvh = LineBvh::build(&set, &BvhConfig::default()).unwrap();
        for _ in 0..200 {
            let p = Vec2::new(rng.next_f32(), rng.next_f32());
            let expected = set
                .iter()
                .map(|l| l.distance_squared_to(p))
                .fold(f32::INFINITY, f32::min)
                .sqrt();
            let got = bvh.nearest(p).unwrap();
            assert!((got.distance - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_nearest_side() {
        let set = lines(&[[0.0, 0.0, 1.0, 0.0], [0.0, 1.0, 1.0, 1.0]]);
        let bvh = LineBvh::build(&set, &BvhConfig::default()).unwrap();
        let hit = bvh.nearest(Vec2::new(0.5, 0.1)).unwrap();
        assert_eq!(hit.id, 0);
        assert_eq!(hit.side, 1.0);
        assert!((hit.distance - 0.1).abs() < 1e-6);
    }
}
