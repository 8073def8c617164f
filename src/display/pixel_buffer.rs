use glam::{Vec2, Vec3};
use rayon::prelude::*;

use crate::geometry::{Aabb2, Domain};
use crate::texture::Texture2d;

// ============================================================================
// Utility Functions
// ============================================================================

/// Write ABGR pixel to slice (RGBA8888 little-endian byte order)
#[inline]
fn write_pixel(dest: &mut [u8], r: u8, g: u8, b: u8) {
    dest[0] = 255; // A
    dest[1] = b; // B
    dest[2] = g; // G
    dest[3] = r; // R
}

/// Reinhard curve followed by a 2.2 display gamma
#[inline]
pub fn tonemap(c: Vec3) -> (u8, u8, u8) {
    let mapped = (c.max(Vec3::ZERO) / (Vec3::ONE + c.max(Vec3::ZERO))).powf(1.0 / 2.2);
    let to_u8 = |v: f32| if v.is_finite() { (v * 255.0 + 0.5).clamp(0.0, 255.0) as u8 } else { 0 };
    (to_u8(mapped.x), to_u8(mapped.y), to_u8(mapped.z))
}

// ============================================================================
// PixelBuffer
// ============================================================================

/// RGBA8888 presentation buffer
///
/// Row 0 is the top of the window; domain `+y` points up.
pub struct PixelBuffer {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl PixelBuffer {
    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            pixels: vec![0; (width * height * 4) as usize],
            width,
            height,
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Check if coordinates are within bounds
    #[inline]
    fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && x < self.width as i32 && y >= 0 && y < self.height as i32
    }

    /// Calculate byte offset for pixel at (x, y)
    #[inline]
    fn pixel_index(&self, x: u32, y: u32) -> usize {
        ((y * self.width + x) * 4) as usize
    }

    /// Clear to a solid color
    /// Optimized: uses u32 fill for maximum speed
    pub fn clear(&mut self, r: u8, g: u8, b: u8) {
        let pixel = u32::from_ne_bytes([255, b, g, r]);
        let ptr = self.pixels.as_mut_ptr() as *mut u32;
        let len = self.pixels.len() / 4;
        for i in 0..len {
            // Safety: i < len and pixels.len() is a multiple of 4; the write
            // is unaligned so Vec<u8> alignment does not matter
            unsafe {
                ptr.add(i).write_unaligned(pixel);
            }
        }
    }

    /// Set a single pixel (bounds checked)
    #[inline]
    pub fn set_pixel(&mut self, x: i32, y: i32, r: u8, g: u8, b: u8) {
        if self.in_bounds(x, y) {
            let idx = self.pixel_index(x as u32, y as u32);
            write_pixel(&mut self.pixels[idx..idx + 4], r, g, b);
        }
    }

    /// Fast unchecked pixel set - use when you've already bounds-checked
    #[inline]
    unsafe fn set_pixel_unchecked(&mut self, x: u32, y: u32, r: u8, g: u8, b: u8) {
        let idx = self.pixel_index(x, y);
        *self.pixels.get_unchecked_mut(idx) = 255;
        *self.pixels.get_unchecked_mut(idx + 1) = b;
        *self.pixels.get_unchecked_mut(idx + 2) = g;
        *self.pixels.get_unchecked_mut(idx + 3) = r;
    }

    /// Read a pixel from the buffer (bounds checked)
    #[inline]
    pub fn get_pixel(&self, x: i32, y: i32) -> Option<(u8, u8, u8)> {
        if self.in_bounds(x, y) {
            let idx = self.pixel_index(x as u32, y as u32);
            Some((
                self.pixels[idx + 3], // R
                self.pixels[idx + 2], // G
                self.pixels[idx + 1], // B
            ))
        } else {
            None
        }
    }

    /// Tonemap an HDR frame into the buffer, flipping rows so `+y` is up.
    ///
    /// The source is nearest-sampled when its size differs.
    pub fn tonemap_from(&mut self, hdr: &Texture2d<Vec3>) {
        let (w, h) = (self.width, self.height);
        let (sw, sh) = (hdr.width(), hdr.height());
        self.pixels
            .par_chunks_mut((w * 4) as usize)
            .enumerate()
            .for_each(|(row, dest)| {
                let sy = ((h - 1 - row as u32) as u64 * sh as u64 / h as u64) as u32;
                for (x, px) in dest.chunks_exact_mut(4).enumerate() {
                    let sx = (x as u64 * sw as u64 / w as u64) as u32;
                    let (r, g, b) = tonemap(hdr.get(sx, sy));
                    write_pixel(px, r, g, b);
                }
            });
    }

    /// Draw a line using Bresenham's algorithm with Cohen-Sutherland clipping
    ///
    /// Clips to screen bounds first, then draws without per-pixel bounds checks.
    pub fn line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, r: u8, g: u8, b: u8) {
        let (clipped, cx0, cy0, cx1, cy1) = self.clip_line(x0, y0, x1, y1);
        if !clipped {
            return;
        }

        let dx = (cx1 - cx0).abs();
        let dy = -((cy1 - cy0).abs());
        let sx = if cx0 < cx1 { 1i32 } else { -1i32 };
        let sy = if cy0 < cy1 { 1i32 } else { -1i32 };
        let mut err = dx + dy;
        let mut x = cx0;
        let mut y = cy0;

        loop {
            // Safety: coordinates are clipped to valid range
            unsafe {
                self.set_pixel_unchecked(x as u32, y as u32, r, g, b);
            }
            if x == cx1 && y == cy1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Cohen-Sutherland line clipping algorithm
    /// Returns (visible, x0, y0, x1, y1) with clipped coordinates
    fn clip_line(
        &self,
        mut x0: i32,
        mut y0: i32,
        mut x1: i32,
        mut y1: i32,
    ) -> (bool, i32, i32, i32, i32) {
        const INSIDE: u8 = 0;
        const LEFT: u8 = 1;
        const RIGHT: u8 = 2;
        const BOTTOM: u8 = 4;
        const TOP: u8 = 8;
        // Converges in at most 4 iterations for valid input
        const MAX_ITERATIONS: u32 = 16;

        let w = self.width as i32;
        let h = self.height as i32;

        let outcode = |x: i32, y: i32| -> u8 {
            let mut code = INSIDE;
            if x < 0 {
                code |= LEFT;
            } else if x >= w {
                code |= RIGHT;
            }
            if y < 0 {
                code |= TOP;
            } else if y >= h {
                code |= BOTTOM;
            }
            code
        };

        let mut code0 = outcode(x0, y0);
        let mut code1 = outcode(x1, y1);

        for _ in 0..MAX_ITERATIONS {
            if (code0 | code1) == 0 {
                return (true, x0, y0, x1, y1);
            }
            if (code0 & code1) != 0 {
                return (false, 0, 0, 0, 0);
            }

            let code_out = if code0 != 0 { code0 } else { code1 };
            let (x, y);
            let dy = y1 - y0;
            let dx = x1 - x0;

            if (code_out & BOTTOM) != 0 {
                if dy == 0 {
                    return (false, 0, 0, 0, 0);
                }
                x = x0 + dx * (h - 1 - y0) / dy;
                y = h - 1;
            } else if (code_out & TOP) != 0 {
                if dy == 0 {
                    return (false, 0, 0, 0, 0);
                }
                x = x0 + dx * (0 - y0) / dy;
                y = 0;
            } else if (code_out & RIGHT) != 0 {
                if dx == 0 {
                    return (false, 0, 0, 0, 0);
                }
                y = y0 + dy * (w - 1 - x0) / dx;
                x = w - 1;
            } else {
                if dx == 0 {
                    return (false, 0, 0, 0, 0);
                }
                y = y0 + dy * (0 - x0) / dx;
                x = 0;
            }

            if code_out == code0 {
                x0 = x;
                y0 = y;
                code0 = outcode(x0, y0);
            } else {
                x1 = x;
                y1 = y;
                code1 = outcode(x1, y1);
            }
        }

        // Degenerate input
        (false, 0, 0, 0, 0)
    }

    // ------------------------------------------------------------------------
    // Domain-space overlays
    // ------------------------------------------------------------------------

    /// Pixel position of domain point `p`
    pub fn to_pixel(&self, domain: &Domain, p: Vec2) -> (i32, i32) {
        let uv = domain.to_uv(p);
        (
            (uv.x * self.width as f32).floor() as i32,
            ((1.0 - uv.y) * self.height as f32).floor() as i32,
        )
    }

    /// Domain position of pixel `(x, y)`'s centre
    pub fn to_domain(&self, domain: &Domain, x: i32, y: i32) -> Vec2 {
        let uv = Vec2::new(
            (x as f32 + 0.5) / self.width as f32,
            1.0 - (y as f32 + 0.5) / self.height as f32,
        );
        domain.from_uv(uv)
    }

    pub fn draw_segment(&mut self, domain: &Domain, a: Vec2, b: Vec2, color: (u8, u8, u8)) {
        let (x0, y0) = self.to_pixel(domain, a);
        let (x1, y1) = self.to_pixel(domain, b);
        self.line(x0, y0, x1, y1, color.0, color.1, color.2);
    }

    pub fn draw_box(&mut self, domain: &Domain, bounds: &Aabb2, color: (u8, u8, u8)) {
        if bounds.is_empty() {
            return;
        }
        let corners = [
            bounds.min,
            Vec2::new(bounds.max.x, bounds.min.y),
            bounds.max,
            Vec2::new(bounds.min.x, bounds.max.y),
        ];
        self.draw_outline(domain, &corners, color);
    }

    /// Closed polyline through `points`
    pub fn draw_outline(&mut self, domain: &Domain, points: &[Vec2], color: (u8, u8, u8)) {
        let n = points.len();
        if n < 2 {
            return;
        }
        for i in 0..n {
            self.draw_segment(domain, points[i], points[(i + 1) % n], color);
        }
    }

    /// Raw bytes for texture upload
    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tonemap_curve() {
        assert_eq!(tonemap(Vec3::ZERO), (0, 0, 0));
        let (r, _, _) = tonemap(Vec3::splat(1.0));
        // (0.5)^(1/2.2) ~ 0.73
        assert!((185..=188).contains(&r));
        assert_eq!(tonemap(Vec3::splat(f32::INFINITY)), (0, 0, 0));
        let (big, _, _) = tonemap(Vec3::splat(1e6));
        assert_eq!(big, 255);
    }

    #[test]
    fn test_tonemap_from_flips_rows() {
        let mut hdr = Texture2d::filled(2, 2, Vec3::ZERO);
        hdr.set(0, 1, Vec3::splat(10.0));
        let mut buffer = PixelBuffer::with_size(2, 2);
        buffer.tonemap_from(&hdr);
        let (top, _, _) = buffer.get_pixel(0, 0).unwrap();
        let (bottom, _, _) = buffer.get_pixel(0, 1).unwrap();
        assert!(top > 200);
        assert_eq!(bottom, 0);
    }

    #[test]
    fn test_set_pixel_ignores_out_of_bounds() {
        let mut buffer = PixelBuffer::with_size(4, 4);
        buffer.set_pixel(2, 1, 10, 20, 30);
        buffer.set_pixel(-1, 0, 255, 255, 255);
        buffer.set_pixel(4, 4, 255, 255, 255);
        assert_eq!(buffer.get_pixel(2, 1), Some((10, 20, 30)));
        assert_eq!(buffer.get_pixel(-1, 0), None);
        assert_eq!(buffer.as_bytes().iter().filter(|&&b| b == 255).count(), 1);
    }

    #[test]
    fn test_line_is_clipped() {
        let mut buffer = PixelBuffer::with_size(8, 8);
        buffer.clear(0, 0, 0);
        buffer.line(-10, 4, 20, 4, 255, 0, 0);
        for x in 0..8 {
            assert_eq!(buffer.get_pixel(x, 4), Some((255, 0, 0)));
        }
        assert_eq!(buffer.get_pixel(0, 3), Some((0, 0, 0)));
    }

    #[test]
    fn test_domain_mapping_roundtrip() {
        let buffer = PixelBuffer::with_size(64, 32);
        let domain = Domain::SIGNED;
        let p = buffer.to_domain(&domain, 10, 5);
        assert_eq!(buffer.to_pixel(&domain, p), (10, 5));
        // Top-left pixel is at low x, high y
        let corner = buffer.to_domain(&domain, 0, 0);
        assert!(corner.x < 0.0 && corner.y > 0.0);
    }

    #[test]
    fn test_draw_box_outline() {
        let mut buffer = PixelBuffer::with_size(16, 16);
        buffer.clear(0, 0, 0);
        let bounds = Aabb2::new(Vec2::new(0.25, 0.25), Vec2::new(0.75, 0.75));
        buffer.draw_box(&Domain::UNIT, &bounds, (0, 255, 0));
        assert_eq!(buffer.get_pixel(4, 4), Some((0, 255, 0)));
        assert_eq!(buffer.get_pixel(8, 8), Some((0, 0, 0)));
    }
}
