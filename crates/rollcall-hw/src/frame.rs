//! Frame type and image processing: YUYV conversion, CLAHE lighting
//! normalization, bilinear downscale, crop and annotation drawing.

use ab_glyph::{FontVec, PxScale};
use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;
use std::time::Instant;

/// Pixels between a box edge and its label.
const LABEL_GAP: i32 = 4;

/// A captured RGB8 frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    /// Source-assigned frame number (driver sequence or playback index).
    pub sequence: u32,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// Integer pixel rectangle, right/bottom exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Region {
    /// Round a float `x, y, width, height` box to whole pixels.
    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            left: x.round() as i32,
            top: y.round() as i32,
            right: (x + width).round() as i32,
            bottom: (y + height).round() as i32,
        }
    }

    /// Clip to a `width × height` canvas. Returns `None` when nothing remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Region> {
        let r = Region {
            left: self.left.max(0),
            top: self.top.max(0),
            right: self.right.min(width as i32),
            bottom: self.bottom.min(height as i32),
        };
        (r.right > r.left && r.bottom > r.top).then_some(r)
    }

    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }
}

impl Frame {
    /// Wrap packed RGB bytes, checking the buffer covers `width * height` pixels.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
        })
    }

    /// A frame filled with a single colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], sequence: u32) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
        }
    }

    pub fn from_rgb_image(img: image::RgbImage, sequence: u32) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
            timestamp: Instant::now(),
            sequence,
        }
    }

    pub fn to_rgb_image(&self) -> Option<image::RgbImage> {
        image::RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// BT.601 luma plane (one byte per pixel).
    pub fn luma(&self) -> Vec<u8> {
        self.data
            .chunks_exact(3)
            .map(|px| {
                let y = 299 * px[0] as u32 + 587 * px[1] as u32 + 114 * px[2] as u32;
                ((y + 500) / 1000) as u8
            })
            .collect()
    }

    /// Bilinear downscale by `factor` (0 < factor < 1). Other factors return a copy.
    pub fn downscale(&self, factor: f32) -> Frame {
        if !(factor > 0.0 && factor < 1.0) || self.pixel_count() == 0 {
            return self.clone();
        }

        let (src_w, src_h) = (self.width as usize, self.height as usize);
        let dst_w = ((src_w as f32 * factor).round() as usize).max(1);
        let dst_h = ((src_h as f32 * factor).round() as usize).max(1);
        let inv = 1.0 / factor;

        let mut data = vec![0u8; dst_w * dst_h * 3];
        for y in 0..dst_h {
            let sy = (y as f32 + 0.5) * inv - 0.5;
            let y0 = (sy.floor() as i32).clamp(0, src_h as i32 - 1) as usize;
            let y1 = (y0 + 1).min(src_h - 1);
            let fy = (sy - sy.floor()).clamp(0.0, 1.0);

            for x in 0..dst_w {
                let sx = (x as f32 + 0.5) * inv - 0.5;
                let x0 = (sx.floor() as i32).clamp(0, src_w as i32 - 1) as usize;
                let x1 = (x0 + 1).min(src_w - 1);
                let fx = (sx - sx.floor()).clamp(0.0, 1.0);

                for c in 0..3 {
                    let at = |xx: usize, yy: usize| self.data[(yy * src_w + xx) * 3 + c] as f32;
                    let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
                    let bot = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
                    let val = top * (1.0 - fy) + bot * fy;
                    data[(y * dst_w + x) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
                }
            }
        }

        Frame {
            data,
            width: dst_w as u32,
            height: dst_h as u32,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }

    /// Equalize lighting in-place: CLAHE on the luma plane, then rescale each
    /// pixel's RGB by the luma gain so chroma is preserved.
    pub fn normalize_lighting(&mut self, tiles: u32, clip_limit: f32) {
        let before = self.luma();
        let mut after = before.clone();
        clahe_enhance(&mut after, self.width, self.height, tiles, clip_limit);

        for (i, px) in self.data.chunks_exact_mut(3).enumerate() {
            let (old, new) = (before[i], after[i]);
            if old == new {
                continue;
            }
            if old == 0 {
                px.fill(new);
                continue;
            }
            let gain = new as f32 / old as f32;
            for c in px.iter_mut() {
                *c = (*c as f32 * gain).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    /// Copy out a sub-rectangle. `None` if the region misses the frame entirely.
    pub fn crop(&self, region: Region) -> Option<Frame> {
        let r = region.clamp_to(self.width, self.height)?;
        let img = self.to_rgb_image()?;
        let cropped = imageops::crop_imm(&img, r.left as u32, r.top as u32, r.width(), r.height()).to_image();

        Some(Frame {
            data: cropped.into_raw(),
            width: r.width(),
            height: r.height(),
            timestamp: self.timestamp,
            sequence: self.sequence,
        })
    }

    /// Draw a rectangle outline of the given thickness, clipped to the frame.
    /// Extra thickness grows inwards.
    pub fn draw_rect(&mut self, region: Region, rgb: [u8; 3], thickness: u32) {
        let Some(r) = region.clamp_to(self.width, self.height) else {
            return;
        };
        let (w, h) = (r.width(), r.height());
        let rings = thickness.max(1).min(w.min(h).div_ceil(2));

        self.edit_image(|img| {
            for i in 0..rings {
                let rect = Rect::at(r.left + i as i32, r.top + i as i32).of_size(w - 2 * i, h - 2 * i);
                draw_hollow_rect_mut(img, rect, Rgb(rgb));
            }
        });
    }

    /// Write `text` just above `region`, or inside its top edge when the box
    /// touches the top of the frame.
    pub fn draw_label(&mut self, region: Region, text: &str, rgb: [u8; 3], font: &LabelFont) {
        if text.is_empty() {
            return;
        }
        let Some(r) = region.clamp_to(self.width, self.height) else {
            return;
        };
        let (_, text_h) = font.text_size(text);
        let above = r.top - text_h as i32 - LABEL_GAP;
        let y = if above >= 0 { above } else { r.top + LABEL_GAP };

        self.edit_image(|img| draw_text_mut(img, Rgb(rgb), r.left, y, font.scale, &font.font, text));
    }

    /// Run `f` over the pixels as an `RgbImage` without copying them.
    fn edit_image(&mut self, f: impl FnOnce(&mut RgbImage)) {
        if self.data.len() != self.pixel_count() * 3 {
            return;
        }
        let data = std::mem::take(&mut self.data);
        if let Some(mut img) = RgbImage::from_raw(self.width, self.height, data) {
            f(&mut img);
            self.data = img.into_raw();
        }
    }
}

/// TrueType font and pixel size used for annotation labels.
pub struct LabelFont {
    font: FontVec,
    scale: PxScale,
}

impl std::fmt::Debug for LabelFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelFont").field("size", &self.scale.y).finish_non_exhaustive()
    }
}

impl LabelFont {
    pub fn load(path: &Path, size: f32) -> Result<Self, FrameError> {
        let data = std::fs::read(path).map_err(|e| FrameError::Font(format!("{}: {e}", path.display())))?;
        Self::from_bytes(data, size).map_err(|e| FrameError::Font(format!("{}: {e}", path.display())))
    }

    pub fn from_bytes(data: Vec<u8>, size: f32) -> Result<Self, FrameError> {
        let font = FontVec::try_from_vec(data).map_err(|e| FrameError::Font(e.to_string()))?;
        let size = if size.is_finite() { size.max(1.0) } else { 16.0 };
        Ok(Self {
            font,
            scale: PxScale::from(size),
        })
    }

    /// Rendered `(width, height)` of `text` in pixels.
    pub fn text_size(&self, text: &str) -> (u32, u32) {
        text_size(self.scale, &self.font, text)
    }
}

/// Convert packed YUYV (4:2:2) to RGB8 using BT.601 studio-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for quad in yuyv[..expected].chunks_exact(4) {
        let (u, v) = (quad[1] as i32 - 128, quad[3] as i32 - 128);
        for y in [quad[0], quad[2]] {
            let c = 298 * (y as i32 - 16);
            rgb.push(((c + 409 * v + 128) >> 8).clamp(0, 255) as u8);
            rgb.push(((c - 100 * u - 208 * v + 128) >> 8).clamp(0, 255) as u8);
            rgb.push(((c + 516 * u + 128) >> 8).clamp(0, 255) as u8);
        }
    }
    Ok(rgb)
}

/// Expand an 8-bit grayscale plane to RGB8.
pub fn grey_to_rgb(gray: &[u8]) -> Vec<u8> {
    gray.iter().flat_map(|&g| [g, g, g]).collect()
}

/// Contrast-Limited Adaptive Histogram Equalization, in-place on a gray plane.
///
/// The image is split into a `tiles × tiles` grid; each tile gets a clipped,
/// redistributed histogram turned into a lookup curve, and every pixel is
/// mapped through a bilinear blend of the four nearest tile curves.
pub fn clahe_enhance(gray: &mut [u8], width: u32, height: u32, tiles: u32, clip_limit: f32) {
    let (w, h, n) = (width as usize, height as usize, tiles.max(1) as usize);
    if w == 0 || h == 0 || gray.len() < w * h {
        return;
    }
    let (tile_w, tile_h) = (w / n, h / n);
    if tile_w == 0 || tile_h == 0 {
        return;
    }

    let curves: Vec<[f32; 256]> = (0..n * n)
        .map(|t| {
            let (row, col) = (t / n, t % n);
            let mut hist = [0u32; 256];
            for y in row * tile_h..(row + 1) * tile_h {
                for &p in &gray[y * w + col * tile_w..y * w + (col + 1) * tile_w] {
                    hist[p as usize] += 1;
                }
            }
            tile_curve(hist, tile_w * tile_h, clip_limit)
        })
        .collect();

    let last = (n - 1) as f32;
    for y in 0..h {
        let fy = (y as f32 / tile_h as f32 - 0.5).clamp(0.0, last);
        let (r0, dy) = (fy as usize, fy.fract());
        let r1 = (r0 + 1).min(n - 1);

        for x in 0..w {
            let fx = (x as f32 / tile_w as f32 - 0.5).clamp(0.0, last);
            let (c0, dx) = (fx as usize, fx.fract());
            let c1 = (c0 + 1).min(n - 1);

            let p = gray[y * w + x] as usize;
            let top = curves[r0 * n + c0][p] * (1.0 - dx) + curves[r0 * n + c1][p] * dx;
            let bot = curves[r1 * n + c0][p] * (1.0 - dx) + curves[r1 * n + c1][p] * dx;
            gray[y * w + x] = (top * (1.0 - dy) + bot * dy).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Clip a tile histogram at `clip_limit × pixels`, spread the excess evenly,
/// and return the normalized 0–255 cumulative curve.
fn tile_curve(mut hist: [u32; 256], pixels: usize, clip_limit: f32) -> [f32; 256] {
    let clip = ((clip_limit * pixels as f32) as u32).max(1);
    let excess: u32 = hist
        .iter_mut()
        .map(|bin| {
            let over = bin.saturating_sub(clip);
            *bin -= over;
            over
        })
        .sum();

    let (share, leftover) = (excess / 256, (excess % 256) as usize);
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += share + u32::from(i < leftover);
    }

    let mut curve = [0f32; 256];
    let mut acc = 0f32;
    for (slot, &count) in curve.iter_mut().zip(hist.iter()) {
        acc += count as f32;
        *slot = acc;
    }

    let floor = curve.iter().copied().find(|&v| v > 0.0).unwrap_or(0.0);
    let span = pixels as f32 - floor;
    if span > 0.0 {
        for v in curve.iter_mut() {
            *v = ((*v - floor) / span * 255.0).clamp(0.0, 255.0);
        }
    }
    curve
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("font: {0}")]
    Font(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEJAVU: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

    #[test]
    fn test_yuyv_white_and_black() {
        // Two pixels: Y0=235 (white), Y1=16 (black), neutral chroma
        let yuyv = vec![235, 128, 16, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![255, 255, 255, 0, 0, 0]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_frame_new_rejects_short_buffer() {
        assert!(Frame::new(vec![0; 5], 2, 1, 0).is_err());
        assert!(Frame::new(vec![0; 6], 2, 1, 0).is_ok());
    }

    #[test]
    fn test_downscale_quarter() {
        let frame = Frame::filled(640, 480, [10, 20, 30], 7);
        let small = frame.downscale(0.25);
        assert_eq!((small.width, small.height), (160, 120));
        assert_eq!(small.sequence, 7);
        assert_eq!(&small.data[..3], &[10, 20, 30]);
    }

    #[test]
    fn test_downscale_identity_for_invalid_factor() {
        let frame = Frame::filled(8, 8, [1, 2, 3], 0);
        assert_eq!(frame.downscale(1.0).width, 8);
        assert_eq!(frame.downscale(0.0).width, 8);
    }

    #[test]
    fn test_crop_clamps_to_bounds() {
        let mut frame = Frame::filled(10, 10, [0, 0, 0], 0);
        frame.data[(2 * 10 + 3) * 3] = 200; // red at (3, 2)
        let crop = frame
            .crop(Region { left: 3, top: 2, right: 20, bottom: 5 })
            .unwrap();
        assert_eq!((crop.width, crop.height), (7, 3));
        assert_eq!(crop.data[0], 200);
    }

    #[test]
    fn test_crop_outside_is_none() {
        let frame = Frame::filled(10, 10, [0, 0, 0], 0);
        assert!(frame.crop(Region { left: 20, top: 20, right: 30, bottom: 30 }).is_none());
        assert!(frame.crop(Region { left: 4, top: 4, right: 4, bottom: 8 }).is_none());
    }

    #[test]
    fn test_draw_rect_outline_only() {
        let mut frame = Frame::filled(10, 10, [0, 0, 0], 0);
        frame.draw_rect(Region { left: 2, top: 2, right: 8, bottom: 8 }, [0, 255, 0], 1);
        let at = |x: usize, y: usize| frame.data[(y * 10 + x) * 3 + 1];
        assert_eq!(at(2, 2), 255);
        assert_eq!(at(7, 5), 255);
        assert_eq!(at(5, 5), 0, "interior must stay untouched");
        assert_eq!(at(9, 9), 0);
    }

    #[test]
    fn test_draw_rect_thickness_grows_inwards() {
        let mut frame = Frame::filled(10, 10, [0, 0, 0], 0);
        frame.draw_rect(Region { left: 1, top: 1, right: 9, bottom: 9 }, [255, 0, 0], 2);
        let at = |x: usize, y: usize| frame.data[(y * 10 + x) * 3];
        assert_eq!(at(1, 1), 255);
        assert_eq!(at(2, 5), 255);
        assert_eq!(at(3, 5), 0);
        assert_eq!(at(0, 0), 0);
    }

    #[test]
    fn test_draw_rect_thicker_than_box_fills_it() {
        let mut frame = Frame::filled(6, 6, [0, 0, 0], 0);
        frame.draw_rect(Region { left: 1, top: 1, right: 5, bottom: 5 }, [0, 0, 255], 10);
        let at = |x: usize, y: usize| frame.data[(y * 6 + x) * 3 + 2];
        assert_eq!(at(2, 2), 255);
        assert_eq!(at(3, 3), 255);
        assert_eq!(at(5, 5), 0);
    }

    #[test]
    fn test_garbage_font_is_rejected() {
        assert!(matches!(
            LabelFont::from_bytes(vec![0; 32], 16.0),
            Err(FrameError::Font(_))
        ));
        assert!(LabelFont::load(Path::new("/nonexistent/font.ttf"), 16.0).is_err());
    }

    #[test]
    fn test_label_drawn_above_box() {
        let path = Path::new(DEJAVU);
        if !path.exists() {
            eprintln!("skipping: {DEJAVU} not installed");
            return;
        }
        let font = LabelFont::load(path, 14.0).unwrap();
        let mut frame = Frame::filled(120, 80, [0, 0, 0], 0);
        frame.draw_label(Region { left: 10, top: 40, right: 100, bottom: 70 }, "Alice", [0, 255, 0], &font);

        let lit: Vec<usize> = frame
            .data
            .chunks_exact(3)
            .enumerate()
            .filter(|(_, px)| px[1] > 0)
            .map(|(i, _)| i / 120)
            .collect();
        assert!(!lit.is_empty(), "label must change pixels");
        assert!(lit.iter().all(|&row| row < 40), "label must sit above the box");
    }

    #[test]
    fn test_empty_label_is_noop() {
        let path = Path::new(DEJAVU);
        if !path.exists() {
            return;
        }
        let font = LabelFont::load(path, 14.0).unwrap();
        let mut frame = Frame::filled(40, 40, [0, 0, 0], 0);
        frame.draw_label(Region { left: 0, top: 20, right: 30, bottom: 30 }, "", [255, 255, 255], &font);
        assert!(frame.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_clahe_increases_contrast() {
        // Low-contrast 16x16 plane: values 100–110
        let (w, h) = (16u32, 16u32);
        let mut gray: Vec<u8> = (0..(w * h) as usize).map(|i| 100 + (i % 11) as u8).collect();

        let orig = stddev(&gray);
        clahe_enhance(&mut gray, w, h, 2, 0.02);
        let new = stddev(&gray);

        assert!(new > orig, "CLAHE should increase contrast: orig={orig:.2}, new={new:.2}");
    }

    #[test]
    fn test_normalize_lighting_keeps_gray_gray() {
        let mut frame = Frame::filled(16, 16, [0, 0, 0], 0);
        for (i, px) in frame.data.chunks_exact_mut(3).enumerate() {
            px.fill(90 + (i % 7) as u8);
        }
        frame.normalize_lighting(2, 0.02);
        for px in frame.data.chunks_exact(3) {
            assert!(px[0].abs_diff(px[1]) <= 1 && px[1].abs_diff(px[2]) <= 1);
        }
    }

    #[test]
    fn test_region_from_xywh() {
        let r = Region::from_xywh(1.4, 2.6, 10.0, 5.0);
        assert_eq!(r, Region { left: 1, top: 3, right: 11, bottom: 8 });
    }

    fn stddev(data: &[u8]) -> f32 {
        let n = data.len() as f32;
        let mean = data.iter().map(|&b| b as f32).sum::<f32>() / n;
        let variance = data.iter().map(|&b| (b as f32 - mean).powi(2)).sum::<f32>() / n;
        variance.sqrt()
    }
}
