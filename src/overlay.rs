// src/overlay.rs
//
// Detection overlay rendering. The surface is a transparent RGBA canvas
// sized to the frame's intrinsic pixel resolution, because polygon
// coordinates are in source-frame pixel space. Render passes are
// scheduled into a pending slot and executed on the next refresh;
// scheduling again before the flush replaces the pending list.

use crate::types::RawDetection;
use image::{Rgba, RgbaImage, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut, draw_polygon_mut};
use imageproc::point::Point;
use imageproc::rect::Rect;
use tracing::debug;

const FILL: Rgba<u8> = Rgba([46, 204, 113, 70]);
const OUTLINE: Rgba<u8> = Rgba([46, 204, 113, 255]);
const LABEL_BG: Rgba<u8> = Rgba([20, 20, 20, 200]);
const LABEL_FG: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BADGE_BG: Rgba<u8> = Rgba([255, 87, 34, 230]);

const GLYPH_W: u32 = 8;
const GLYPH_H: u32 = 12;
const LABEL_PAD: u32 = 3;

pub struct OverlaySurface {
    canvas: RgbaImage,
}

impl OverlaySurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::new(width, height),
        }
    }

    /// Match the frame's intrinsic resolution. Resizing clears the
    /// surface; a same-size call is a no-op.
    pub fn resize_to(&mut self, width: u32, height: u32) {
        if self.canvas.width() == width && self.canvas.height() == height {
            return;
        }
        debug!("Overlay surface resized to {}x{}", width, height);
        self.canvas = RgbaImage::new(width, height);
    }

    pub fn clear(&mut self) {
        for pixel in self.canvas.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    /// Clear, then draw every detection that has geometry: translucent
    /// fill, stroked outline, label background + text, and a
    /// sequence-number badge anchored at the first vertex.
    pub fn render(&mut self, detections: &[RawDetection]) {
        self.clear();

        for (index, detection) in detections.iter().enumerate() {
            if detection.polygon.is_empty() {
                continue;
            }
            self.draw_polygon(&detection.polygon);
            self.draw_label(&detection.polygon, &detection.display_name());
            self.draw_badge(&detection.polygon, index + 1);
        }
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    /// Alpha-composite the overlay onto a raw RGB frame, for annotated
    /// snapshots.
    pub fn composite_over(&self, frame_rgb: &[u8], width: u32, height: u32) -> Option<RgbImage> {
        let mut out = RgbImage::from_raw(width, height, frame_rgb.to_vec())?;
        if (width, height) != self.canvas.dimensions() {
            return Some(out);
        }
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            let over = self.canvas.get_pixel(x, y);
            let alpha = over[3] as u32;
            if alpha == 0 {
                continue;
            }
            for c in 0..3 {
                let blended = (over[c] as u32 * alpha + pixel[c] as u32 * (255 - alpha)) / 255;
                pixel[c] = blended as u8;
            }
        }
        Some(out)
    }

    fn draw_polygon(&mut self, polygon: &[(f32, f32)]) {
        if polygon.len() >= 3 {
            let mut points: Vec<Point<i32>> = polygon
                .iter()
                .map(|&(x, y)| Point::new(x.round() as i32, y.round() as i32))
                .collect();
            // draw_polygon_mut rejects an explicitly closed ring.
            if points.len() > 1 && points.first() == points.last() {
                points.pop();
            }
            if points.len() >= 3 {
                draw_polygon_mut(&mut self.canvas, &points, FILL);
            }
        }

        for window in polygon.windows(2) {
            draw_line_segment_mut(&mut self.canvas, window[0], window[1], OUTLINE);
        }
        if polygon.len() > 2 {
            let first = polygon[0];
            let last = polygon[polygon.len() - 1];
            if first != last {
                draw_line_segment_mut(&mut self.canvas, last, first, OUTLINE);
            }
        }
    }

    fn draw_label(&mut self, polygon: &[(f32, f32)], text: &str) {
        let (ax, ay) = polygon[0];
        let text_w = text.chars().count() as u32 * GLYPH_W;
        let box_w = text_w + 2 * LABEL_PAD;
        let box_h = GLYPH_H + 2 * LABEL_PAD;

        // Above the anchor when there is room, below otherwise.
        let x = (ax.round() as i64).max(0) as i32;
        let y_above = ay.round() as i64 - box_h as i64 - 2;
        let y = if y_above >= 0 {
            y_above as i32
        } else {
            (ay.round() as i64 + 2).max(0) as i32
        };

        if box_w > 0 {
            draw_filled_rect_mut(
                &mut self.canvas,
                Rect::at(x, y).of_size(box_w, box_h),
                LABEL_BG,
            );
        }
        self.draw_text(text, x as i64 + LABEL_PAD as i64, y as i64 + LABEL_PAD as i64, LABEL_FG);
    }

    fn draw_badge(&mut self, polygon: &[(f32, f32)], number: usize) {
        let (ax, ay) = polygon[0];
        let text = number.to_string();
        let box_w = text.chars().count() as u32 * GLYPH_W + 2 * LABEL_PAD;
        let box_h = GLYPH_H + 2 * LABEL_PAD;
        let x = (ax.round() as i64).max(0) as i32;
        let y = (ay.round() as i64).max(0) as i32;

        draw_filled_rect_mut(
            &mut self.canvas,
            Rect::at(x, y).of_size(box_w, box_h),
            BADGE_BG,
        );
        self.draw_text(&text, x as i64 + LABEL_PAD as i64, y as i64 + LABEL_PAD as i64, LABEL_FG);
    }

    fn draw_text(&mut self, text: &str, start_x: i64, start_y: i64, color: Rgba<u8>) {
        let (width, height) = self.canvas.dimensions();
        let mut x = start_x;
        for ch in text.chars() {
            let pattern = glyph(ch);
            for (row, bits) in pattern.iter().enumerate() {
                let py = start_y + row as i64;
                if py < 0 || py >= height as i64 {
                    continue;
                }
                for col in 0..8 {
                    if (bits >> (7 - col)) & 1 == 0 {
                        continue;
                    }
                    let px = x + col as i64;
                    if px < 0 || px >= width as i64 {
                        continue;
                    }
                    self.canvas.put_pixel(px as u32, py as u32, color);
                }
            }
            x += GLYPH_W as i64;
        }
    }
}

/// Renderer with a last-write-wins pending slot. `schedule` is called
/// as detections arrive; `flush` executes at the next refresh point.
pub struct OverlayRenderer {
    surface: OverlaySurface,
    pending: Option<Vec<RawDetection>>,
}

impl OverlayRenderer {
    pub fn new() -> Self {
        Self {
            surface: OverlaySurface::new(0, 0),
            pending: None,
        }
    }

    pub fn resize_to(&mut self, width: u32, height: u32) {
        self.surface.resize_to(width, height);
    }

    /// Replace any pending pass with this detection list.
    pub fn schedule(&mut self, detections: Vec<RawDetection>) {
        self.pending = Some(detections);
    }

    /// Execute the pending pass, if any. Returns true when a pass ran.
    pub fn flush(&mut self) -> bool {
        match self.pending.take() {
            Some(detections) => {
                self.surface.render(&detections);
                true
            }
            None => false,
        }
    }

    pub fn surface(&self) -> &OverlaySurface {
        &self.surface
    }
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// 8x12 raster glyphs, one bit per pixel per row. Characters outside
/// the table render as a hollow box.
fn glyph(ch: char) -> [u8; 12] {
    match ch {
        'A' => [0x00, 0x18, 0x24, 0x42, 0x42, 0x7E, 0x42, 0x42, 0x42, 0x42, 0x00, 0x00],
        'B' => [0x00, 0x7C, 0x42, 0x42, 0x7C, 0x42, 0x42, 0x42, 0x42, 0x7C, 0x00, 0x00],
        'C' => [0x00, 0x3C, 0x42, 0x40, 0x40, 0x40, 0x40, 0x40, 0x42, 0x3C, 0x00, 0x00],
        'D' => [0x00, 0x78, 0x44, 0x42, 0x42, 0x42, 0x42, 0x42, 0x44, 0x78, 0x00, 0x00],
        'E' => [0x00, 0x7E, 0x40, 0x40, 0x40, 0x7C, 0x40, 0x40, 0x40, 0x7E, 0x00, 0x00],
        'F' => [0x00, 0x7E, 0x40, 0x40, 0x40, 0x7C, 0x40, 0x40, 0x40, 0x40, 0x00, 0x00],
        'G' => [0x00, 0x3C, 0x42, 0x40, 0x40, 0x4E, 0x42, 0x42, 0x46, 0x3A, 0x00, 0x00],
        'H' => [0x00, 0x42, 0x42, 0x42, 0x42, 0x7E, 0x42, 0x42, 0x42, 0x42, 0x00, 0x00],
        'I' => [0x00, 0x3E, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x3E, 0x00, 0x00],
        'J' => [0x00, 0x1E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x44, 0x44, 0x38, 0x00, 0x00],
        'K' => [0x00, 0x42, 0x44, 0x48, 0x50, 0x60, 0x50, 0x48, 0x44, 0x42, 0x00, 0x00],
        'L' => [0x00, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x7E, 0x00, 0x00],
        'M' => [0x00, 0x42, 0x66, 0x5A, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x00, 0x00],
        'N' => [0x00, 0x42, 0x62, 0x52, 0x4A, 0x46, 0x42, 0x42, 0x42, 0x42, 0x00, 0x00],
        'O' => [0x00, 0x3C, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x3C, 0x00, 0x00],
        'P' => [0x00, 0x7C, 0x42, 0x42, 0x42, 0x7C, 0x40, 0x40, 0x40, 0x40, 0x00, 0x00],
        'Q' => [0x00, 0x3C, 0x42, 0x42, 0x42, 0x42, 0x42, 0x4A, 0x44, 0x3A, 0x00, 0x00],
        'R' => [0x00, 0x7C, 0x42, 0x42, 0x42, 0x7C, 0x48, 0x44, 0x42, 0x42, 0x00, 0x00],
        'S' => [0x00, 0x3C, 0x42, 0x40, 0x30, 0x0C, 0x02, 0x42, 0x42, 0x3C, 0x00, 0x00],
        'T' => [0x00, 0x7F, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x00, 0x00],
        'U' => [0x00, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x3C, 0x00, 0x00],
        'V' => [0x00, 0x41, 0x41, 0x41, 0x22, 0x22, 0x14, 0x14, 0x08, 0x08, 0x00, 0x00],
        'W' => [0x00, 0x42, 0x42, 0x42, 0x42, 0x42, 0x5A, 0x5A, 0x66, 0x42, 0x00, 0x00],
        'X' => [0x00, 0x42, 0x42, 0x24, 0x18, 0x18, 0x24, 0x42, 0x42, 0x42, 0x00, 0x00],
        'Y' => [0x00, 0x41, 0x22, 0x14, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x00, 0x00],
        'Z' => [0x00, 0x7E, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x40, 0x7E, 0x00, 0x00],
        'a' => [0x00, 0x00, 0x00, 0x3C, 0x02, 0x3E, 0x42, 0x42, 0x46, 0x3A, 0x00, 0x00],
        'b' => [0x00, 0x40, 0x40, 0x5C, 0x62, 0x42, 0x42, 0x42, 0x62, 0x5C, 0x00, 0x00],
        'c' => [0x00, 0x00, 0x00, 0x3C, 0x42, 0x40, 0x40, 0x40, 0x42, 0x3C, 0x00, 0x00],
        'd' => [0x00, 0x02, 0x02, 0x3A, 0x46, 0x42, 0x42, 0x42, 0x46, 0x3A, 0x00, 0x00],
        'e' => [0x00, 0x00, 0x00, 0x3C, 0x42, 0x7E, 0x40, 0x40, 0x42, 0x3C, 0x00, 0x00],
        'f' => [0x00, 0x0C, 0x10, 0x10, 0x7C, 0x10, 0x10, 0x10, 0x10, 0x10, 0x00, 0x00],
        'g' => [0x00, 0x00, 0x00, 0x3A, 0x46, 0x42, 0x46, 0x3A, 0x02, 0x3C, 0x00, 0x00],
        'h' => [0x00, 0x40, 0x40, 0x5C, 0x62, 0x42, 0x42, 0x42, 0x42, 0x42, 0x00, 0x00],
        'i' => [0x00, 0x08, 0x00, 0x18, 0x08, 0x08, 0x08, 0x08, 0x08, 0x3E, 0x00, 0x00],
        'j' => [0x00, 0x04, 0x00, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x44, 0x38, 0x00, 0x00],
        'k' => [0x00, 0x40, 0x40, 0x44, 0x48, 0x70, 0x48, 0x44, 0x42, 0x41, 0x00, 0x00],
        'l' => [0x00, 0x18, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x3E, 0x00, 0x00],
        'm' => [0x00, 0x00, 0x00, 0x76, 0x49, 0x49, 0x49, 0x49, 0x49, 0x49, 0x00, 0x00],
        'n' => [0x00, 0x00, 0x00, 0x5C, 0x62, 0x42, 0x42, 0x42, 0x42, 0x42, 0x00, 0x00],
        'o' => [0x00, 0x00, 0x00, 0x3C, 0x42, 0x42, 0x42, 0x42, 0x42, 0x3C, 0x00, 0x00],
        'p' => [0x00, 0x00, 0x00, 0x5C, 0x62, 0x42, 0x62, 0x5C, 0x40, 0x40, 0x00, 0x00],
        'q' => [0x00, 0x00, 0x00, 0x3A, 0x46, 0x42, 0x46, 0x3A, 0x02, 0x02, 0x00, 0x00],
        'r' => [0x00, 0x00, 0x00, 0x5C, 0x62, 0x40, 0x40, 0x40, 0x40, 0x40, 0x00, 0x00],
        's' => [0x00, 0x00, 0x00, 0x3E, 0x40, 0x3C, 0x02, 0x02, 0x42, 0x3C, 0x00, 0x00],
        't' => [0x00, 0x10, 0x10, 0x7C, 0x10, 0x10, 0x10, 0x10, 0x10, 0x0C, 0x00, 0x00],
        'u' => [0x00, 0x00, 0x00, 0x42, 0x42, 0x42, 0x42, 0x42, 0x46, 0x3A, 0x00, 0x00],
        'v' => [0x00, 0x00, 0x00, 0x42, 0x42, 0x42, 0x24, 0x24, 0x18, 0x18, 0x00, 0x00],
        'w' => [0x00, 0x00, 0x00, 0x42, 0x42, 0x42, 0x5A, 0x66, 0x42, 0x42, 0x00, 0x00],
        'x' => [0x00, 0x00, 0x00, 0x42, 0x24, 0x18, 0x18, 0x24, 0x42, 0x42, 0x00, 0x00],
        'y' => [0x00, 0x00, 0x00, 0x42, 0x42, 0x42, 0x26, 0x1A, 0x02, 0x3C, 0x00, 0x00],
        'z' => [0x00, 0x00, 0x00, 0x7E, 0x04, 0x08, 0x10, 0x20, 0x40, 0x7E, 0x00, 0x00],
        '0' => [0x00, 0x3C, 0x42, 0x46, 0x4A, 0x52, 0x62, 0x42, 0x42, 0x3C, 0x00, 0x00],
        '1' => [0x00, 0x08, 0x18, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x3E, 0x00, 0x00],
        '2' => [0x00, 0x3C, 0x42, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x7E, 0x00, 0x00],
        '3' => [0x00, 0x3C, 0x42, 0x02, 0x1C, 0x02, 0x02, 0x02, 0x42, 0x3C, 0x00, 0x00],
        '4' => [0x00, 0x04, 0x0C, 0x14, 0x24, 0x44, 0x7E, 0x04, 0x04, 0x04, 0x00, 0x00],
        '5' => [0x00, 0x7E, 0x40, 0x40, 0x7C, 0x02, 0x02, 0x02, 0x42, 0x3C, 0x00, 0x00],
        '6' => [0x00, 0x1C, 0x20, 0x40, 0x7C, 0x42, 0x42, 0x42, 0x42, 0x3C, 0x00, 0x00],
        '7' => [0x00, 0x7E, 0x02, 0x04, 0x08, 0x08, 0x10, 0x10, 0x20, 0x20, 0x00, 0x00],
        '8' => [0x00, 0x3C, 0x42, 0x42, 0x3C, 0x42, 0x42, 0x42, 0x42, 0x3C, 0x00, 0x00],
        '9' => [0x00, 0x3C, 0x42, 0x42, 0x42, 0x3E, 0x02, 0x04, 0x08, 0x70, 0x00, 0x00],
        ':' => [0x00, 0x00, 0x00, 0x18, 0x18, 0x00, 0x00, 0x18, 0x18, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x18, 0x18, 0x00, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x3C, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        '/' => [0x00, 0x02, 0x04, 0x04, 0x08, 0x08, 0x10, 0x10, 0x20, 0x20, 0x00, 0x00],
        '?' => [0x00, 0x3C, 0x42, 0x02, 0x04, 0x08, 0x08, 0x00, 0x08, 0x08, 0x00, 0x00],
        ' ' => [0x00; 12],
        _ => [0x00, 0x7E, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x7E, 0x00, 0x00],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandidateMatch, RawDetection};

    fn sample_detection() -> RawDetection {
        RawDetection {
            polygon: vec![(20.0, 30.0), (120.0, 32.0), (118.0, 170.0), (22.0, 168.0)],
            crop_size: Some((448, 320)),
            matches: vec![CandidateMatch {
                name: Some("Pikachu".to_string()),
                card_id: Some("025".to_string()),
                set_id: Some("base1".to_string()),
                distance: Some(3.2),
            }],
        }
    }

    #[test]
    fn test_render_is_idempotent() {
        let mut surface = OverlaySurface::new(320, 240);
        let detections = vec![sample_detection()];

        surface.render(&detections);
        let first = surface.canvas().clone();
        surface.render(&detections);

        assert_eq!(surface.canvas().as_raw(), first.as_raw());
    }

    #[test]
    fn test_empty_render_only_clears() {
        let mut surface = OverlaySurface::new(64, 64);
        surface.render(&[sample_detection()]);
        assert!(surface.canvas().pixels().any(|p| p[3] != 0));

        surface.render(&[]);
        assert!(surface.canvas().pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_polygonless_detection_draws_nothing() {
        let mut surface = OverlaySurface::new(64, 64);
        let detection = RawDetection {
            polygon: vec![],
            crop_size: None,
            matches: vec![],
        };
        surface.render(&[detection]);
        assert!(surface.canvas().pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_out_of_bounds_polygon_is_clipped_not_fatal() {
        let mut surface = OverlaySurface::new(32, 32);
        let detection = RawDetection {
            polygon: vec![(-50.0, -50.0), (500.0, -20.0), (400.0, 400.0)],
            crop_size: None,
            matches: vec![],
        };
        surface.render(&[detection]);
    }

    #[test]
    fn test_resize_clears_surface() {
        let mut surface = OverlaySurface::new(64, 64);
        surface.render(&[sample_detection()]);
        surface.resize_to(128, 128);
        assert_eq!(surface.dimensions(), (128, 128));
        assert!(surface.canvas().pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_scheduled_pass_is_last_write_wins() {
        let mut renderer = OverlayRenderer::new();
        renderer.resize_to(320, 240);

        let replaced = RawDetection {
            polygon: vec![(200.0, 10.0), (300.0, 10.0), (300.0, 90.0)],
            ..sample_detection()
        };
        renderer.schedule(vec![replaced]);
        renderer.schedule(vec![sample_detection()]);
        assert!(renderer.flush());
        assert!(!renderer.flush(), "pending pass must not stack");

        let mut direct = OverlaySurface::new(320, 240);
        direct.render(&[sample_detection()]);
        assert_eq!(renderer.surface().canvas().as_raw(), direct.canvas().as_raw());
    }

    #[test]
    fn test_composite_preserves_frame_outside_overlay() {
        let mut surface = OverlaySurface::new(8, 8);
        surface.clear();
        let frame = vec![100u8; 8 * 8 * 3];
        let out = surface.composite_over(&frame, 8, 8).unwrap();
        assert!(out.pixels().all(|p| p.0 == [100, 100, 100]));
    }
}
