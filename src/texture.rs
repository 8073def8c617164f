//! Texture storage and sampling for the CPU passes
//!
//! A [`Texture2d`] is a row-major grid of texels with per-axis wrap modes and
//! GL-style nearest / bilinear sampling. Passes write whole rows in parallel
//! through [`Texture2d::par_rows_mut`].

use std::ops::{Add, Mul};

use rayon::prelude::*;

use glam::Vec2;

/// Per-axis addressing outside `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapMode {
    Repeat,
    ClampToEdge,
}

impl WrapMode {
    #[inline]
    fn resolve(self, i: i32, size: u32) -> u32 {
        match self {
            Self::Repeat => i.rem_euclid(size as i32) as u32,
            Self::ClampToEdge => i.clamp(0, size as i32 - 1) as u32,
        }
    }
}

/// A 2D grid of texels
#[derive(Debug, Clone)]
pub struct Texture2d<T> {
    width: u32,
    height: u32,
    wrap_s: WrapMode,
    wrap_t: WrapMode,
    texels: Vec<T>,
}

impl<T: Copy + Send + Sync> Texture2d<T> {
    /// Create a texture with every texel set to `value`, clamped on both axes
    pub fn filled(width: u32, height: u32, value: T) -> Self {
        Self {
            width,
            height,
            wrap_s: WrapMode::ClampToEdge,
            wrap_t: WrapMode::ClampToEdge,
            texels: vec![value; (width * height) as usize],
        }
    }

    pub fn with_wrap(mut self, wrap_s: WrapMode, wrap_t: WrapMode) -> Self {
        self.wrap_s = wrap_s;
        self.wrap_t = wrap_t;
        self
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        (y * self.width + x) as usize
    }

    /// Read a texel (panics out of range, like slice indexing)
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> T {
        self.texels[self.index(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: T) {
        let idx = self.index(x, y);
        self.texels[idx] = value;
    }

    /// Read with the texture's wrap modes applied to signed texel coordinates
    #[inline]
    pub fn fetch(&self, x: i32, y: i32) -> T {
        let x = self.wrap_s.resolve(x, self.width);
        let y = self.wrap_t.resolve(y, self.height);
        self.get(x, y)
    }

    /// Bilinear sample, converting each of the four texels first
    pub fn sample_bilinear_with<U, F>(&self, uv: Vec2, convert: F) -> U
    where
        U: Add<Output = U> + Mul<f32, Output = U>,
        F: Fn(T) -> U,
    {
        let s = uv.x * self.width as f32 - 0.5;
        let t = uv.y * self.height as f32 - 0.5;
        let x0 = s.floor();
        let y0 = t.floor();
        let fx = s - x0;
        let fy = t - y0;
        let (x0, y0) = (x0 as i32, y0 as i32);

        let c00 = convert(self.fetch(x0, y0));
        let c10 = convert(self.fetch(x0 + 1, y0));
        let c01 = convert(self.fetch(x0, y0 + 1));
        let c11 = convert(self.fetch(x0 + 1, y0 + 1));

        let top = c00 * (1.0 - fx) + c10 * fx;
        let bottom = c01 * (1.0 - fx) + c11 * fx;
        top * (1.0 - fy) + bottom * fy
    }

    pub fn fill(&mut self, value: T) {
        self.texels.fill(value);
    }

    /// Scissored clear of a single row
    pub fn fill_row(&mut self, y: u32, value: T) {
        let start = self.index(0, y);
        let end = start + self.width as usize;
        self.texels[start..end].fill(value);
    }

    pub fn row(&self, y: u32) -> &[T] {
        let start = self.index(0, y);
        &self.texels[start..start + self.width as usize]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [T] {
        let start = self.index(0, y);
        let width = self.width as usize;
        &mut self.texels[start..start + width]
    }

    /// Rows paired with their index, for one-writer-per-texel parallel passes
    pub fn par_rows_mut(&mut self) -> impl IndexedParallelIterator<Item = (u32, &mut [T])> {
        self.texels
            .par_chunks_mut(self.width as usize)
            .enumerate()
            .map(|(y, row)| (y as u32, row))
    }

    pub fn as_slice(&self) -> &[T] {
        &self.texels
    }

    /// Build a same-sized texture by evaluating `f` at every texel in parallel
    pub fn from_fn<F>(width: u32, height: u32, fill: T, f: F) -> Self
    where
        F: Fn(u32, u32) -> T + Sync,
    {
        let mut tex = Self::filled(width, height, fill);
        tex.par_rows_mut().for_each(|(y, row)| {
            for (x, texel) in row.iter_mut().enumerate() {
                *texel = f(x as u32, y);
            }
        });
        tex
    }
}

impl<T> Texture2d<T>
where
    T: Copy + Send + Sync + Add<Output = T> + Mul<f32, Output = T>,
{
    #[inline]
    pub fn sample_bilinear(&self, uv: Vec2) -> T {
        self.sample_bilinear_with(uv, |t| t)
    }
}

// ============================================================================
// MipChain: progressively halved levels
// ============================================================================

/// A chain of textures, level N being `size >> N`
#[derive(Debug, Clone)]
pub struct MipChain<T> {
    levels: Vec<Texture2d<T>>,
}

impl<T: Copy + Send + Sync> MipChain<T> {
    pub fn new(levels: Vec<Texture2d<T>>) -> Self {
        Self { levels }
    }

    /// Number of mip levels
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Access a specific level, clamped to the last one
    pub fn level(&self, level: usize) -> &Texture2d<T> {
        let l = level.min(self.levels.len() - 1);
        &self.levels[l]
    }

    /// Build each coarser level by reducing 2x2 blocks of the previous one
    pub fn reduce_from<F>(base: Texture2d<T>, level_count: usize, reduce: F) -> Self
    where
        F: Fn([T; 4]) -> T + Sync,
    {
        let mut levels = vec![base];
        while levels.len() < level_count {
            let prev = &levels[levels.len() - 1];
            if prev.width() < 2 || prev.height() < 2 {
                break;
            }
            let fill = prev.get(0, 0);
            let next = Texture2d::from_fn(prev.width() / 2, prev.height() / 2, fill, |x, y| {
                let (sx, sy) = (x * 2, y * 2);
                reduce([
                    prev.get(sx, sy),
                    prev.get(sx + 1, sy),
                    prev.get(sx, sy + 1),
                    prev.get(sx + 1, sy + 1),
                ])
            })
            .with_wrap(prev.wrap_s, prev.wrap_t);
            levels.push(next);
        }
        Self { levels }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_wraps() {
        let mut tex = Texture2d::filled(4, 2, 0.0_f32).with_wrap(WrapMode::Repeat, WrapMode::ClampToEdge);
        tex.set(3, 1, 5.0);
        assert_eq!(tex.fetch(-1, 1), 5.0);
        assert_eq!(tex.fetch(7, 9), 5.0);
        assert_eq!(tex.fetch(3, -4), 0.0);
    }

    #[test]
    fn test_bilinear_midpoint() {
        let mut tex = Texture2d::filled(2, 1, 0.0_f32);
        tex.set(1, 0, 1.0);
        // Halfway between the two texel centres
        let v = tex.sample_bilinear(Vec2::new(0.5, 0.5));
        assert!((v - 0.5).abs() < 1e-6);
        // On a texel centre
        let v = tex.sample_bilinear(Vec2::new(0.75, 0.5));
        assert!((v - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_fill_row_only_touches_row() {
        let mut tex = Texture2d::filled(3, 3, 1_u8);
        tex.fill_row(1, 9);
        assert_eq!(tex.row(0), &[1, 1, 1]);
        assert_eq!(tex.row(1), &[9, 9, 9]);
        assert_eq!(tex.row(2), &[1, 1, 1]);
    }

    #[test]
    fn test_mip_reduce_max() {
        let base = Texture2d::from_fn(4, 4, 0.0_f32, |x, y| (x + y * 4) as f32);
        let chain = MipChain::reduce_from(base, 3, |t: [f32; 4]| t.iter().copied().fold(f32::MIN, f32::max));
        assert_eq!(chain.level_count(), 3);
        assert_eq!(chain.level(1).get(0, 0), 5.0);
        assert_eq!(chain.level(2).get(0, 0), 15.0);
    }
}
