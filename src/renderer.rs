use eframe::egui::{Color32, ColorImage};

use crate::dicom::{DecodedImage, Pixels};
use crate::viewport::Rotation;
use crate::windowing::WindowLevel;

/// Renders a decoded frame with the active window and the user's invert flag.
/// MONOCHROME1 frames are already inverted by photometric interpretation, so
/// user invert flips them back.
pub fn render_image(image: &DecodedImage, window: WindowLevel, user_invert: bool) -> ColorImage {
    match &image.pixels {
        Pixels::Mono(samples) => render_window_level(
            image.width,
            image.height,
            samples,
            image.inverted_photometric ^ user_invert,
            window.center,
            window.width,
        ),
        Pixels::Rgb {
            samples,
            samples_per_pixel,
        } => {
            let mut color = render_rgb(image.width, image.height, samples, *samples_per_pixel);
            if user_invert {
                for pixel in &mut color.pixels {
                    let [r, g, b, a] = pixel.to_array();
                    *pixel = Color32::from_rgba_unmultiplied(255 - r, 255 - g, 255 - b, a);
                }
            }
            color
        }
    }
}

pub fn render_window_level(
    width_px: usize,
    height_px: usize,
    frame_pixels: &[i32],
    invert: bool,
    center: f32,
    width: f32,
) -> ColorImage {
    let effective_width = width.max(1.0);
    let low = center - effective_width / 2.0;
    let high = center + effective_width / 2.0;
    let range = (high - low).max(1e-6);
    let pixel_count = width_px.saturating_mul(height_px);

    let mut pixels = Vec::with_capacity(pixel_count);
    for &sample in frame_pixels.iter().take(pixel_count) {
        let normalized = ((sample as f32 - low) / range).clamp(0.0, 1.0);
        let mut gray = (normalized * 255.0).round() as u8;
        if invert {
            gray = 255 - gray;
        }
        pixels.push(Color32::from_gray(gray));
    }
    if pixels.len() < pixel_count {
        pixels.resize(pixel_count, Color32::BLACK);
    }

    ColorImage {
        size: [width_px, height_px],
        pixels,
    }
}

pub fn render_rgb(
    width_px: usize,
    height_px: usize,
    frame_pixels: &[u8],
    samples_per_pixel: u16,
) -> ColorImage {
    let spp = samples_per_pixel.max(1) as usize;
    let pixel_count = width_px.saturating_mul(height_px);
    let mut pixels = Vec::with_capacity(pixel_count);

    for chunk in frame_pixels.chunks_exact(spp).take(pixel_count) {
        let r = chunk[0];
        let g = if spp > 1 { chunk[1] } else { r };
        let b = if spp > 2 { chunk[2] } else { r };
        pixels.push(Color32::from_rgb(r, g, b));
    }

    if pixels.len() < pixel_count {
        pixels.resize(pixel_count, Color32::BLACK);
    }

    ColorImage {
        size: [width_px, height_px],
        pixels,
    }
}

/// Applies flips then rotation. Quarter turns swap the output dimensions.
pub fn orient_color_image(
    image: ColorImage,
    rotation: Rotation,
    flip_horizontal: bool,
    flip_vertical: bool,
) -> ColorImage {
    if rotation == Rotation::None && !flip_horizontal && !flip_vertical {
        return image;
    }

    let [width, height] = image.size;
    let source = |x: usize, y: usize| {
        let sx = if flip_horizontal { width - 1 - x } else { x };
        let sy = if flip_vertical { height - 1 - y } else { y };
        image.pixels[sy * width + sx]
    };

    let (out_width, out_height) = match rotation {
        Rotation::None | Rotation::Half => (width, height),
        Rotation::Quarter | Rotation::ThreeQuarter => (height, width),
    };

    let mut pixels = Vec::with_capacity(out_width * out_height);
    for oy in 0..out_height {
        for ox in 0..out_width {
            let (x, y) = match rotation {
                Rotation::None => (ox, oy),
                Rotation::Quarter => (oy, height - 1 - ox),
                Rotation::Half => (width - 1 - ox, height - 1 - oy),
                Rotation::ThreeQuarter => (width - 1 - oy, ox),
            };
            pixels.push(source(x, y));
        }
    }

    ColorImage {
        size: [out_width, out_height],
        pixels,
    }
}

/// Nearest-neighbour reduction so the longest edge is at most `max_dim`.
pub fn downsample_color_image(source: &ColorImage, max_dim: usize) -> ColorImage {
    let source_width = source.size[0];
    let source_height = source.size[1];
    if source_width == 0 || source_height == 0 || max_dim == 0 {
        return source.clone();
    }

    let longest_edge = source_width.max(source_height);
    if longest_edge <= max_dim {
        return source.clone();
    }

    let scale = max_dim as f32 / longest_edge as f32;
    let target_width = ((source_width as f32 * scale).round() as usize).max(1);
    let target_height = ((source_height as f32 * scale).round() as usize).max(1);

    let mut pixels = Vec::with_capacity(target_width * target_height);
    for target_y in 0..target_height {
        let source_y = ((target_y * source_height) / target_height).min(source_height - 1);
        for target_x in 0..target_width {
            let source_x = ((target_x * source_width) / target_width).min(source_width - 1);
            pixels.push(source.pixels[source_y * source_width + source_x]);
        }
    }

    ColorImage {
        size: [target_width, target_height],
        pixels,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn gray_values(image: &ColorImage) -> Vec<u8> {
        image.pixels.iter().map(|pixel| pixel.r()).collect()
    }

    fn numbered(width: usize, height: usize) -> ColorImage {
        let pixels = (0..width * height)
            .map(|value| Color32::from_gray(value as u8))
            .collect();
        ColorImage {
            size: [width, height],
            pixels,
        }
    }

    #[test]
    fn window_maps_range_onto_full_gray_scale() {
        let image = render_window_level(4, 1, &[-100, 0, 50, 100], false, 0.0, 200.0);
        assert_eq!(gray_values(&image), vec![0, 128, 191, 255]);

        let inverted = render_window_level(2, 1, &[-100, 100], true, 0.0, 200.0);
        assert_eq!(gray_values(&inverted), vec![255, 0]);
    }

    #[test]
    fn short_buffers_are_padded() {
        let image = render_window_level(2, 2, &[10], false, 0.0, 10.0);
        assert_eq!(image.pixels.len(), 4);
        let rgb = render_rgb(2, 1, &[1, 2, 3], 3);
        assert_eq!(rgb.pixels[1], Color32::BLACK);
    }

    #[test]
    fn user_invert_cancels_monochrome1() {
        let image = DecodedImage {
            width: 2,
            height: 1,
            pixels: Pixels::Mono(Arc::from(vec![0, 100])),
            inverted_photometric: true,
            min_value: 0,
            max_value: 100,
        };
        let window = WindowLevel::new(50.0, 100.0);

        assert_eq!(gray_values(&render_image(&image, window, false)), vec![255, 0]);
        assert_eq!(gray_values(&render_image(&image, window, true)), vec![0, 255]);
    }

    #[test]
    fn rgb_invert_keeps_alpha() {
        let image = DecodedImage {
            width: 1,
            height: 1,
            pixels: Pixels::Rgb {
                samples: Arc::from(vec![10u8, 20, 30]),
                samples_per_pixel: 3,
            },
            inverted_photometric: false,
            min_value: 0,
            max_value: 255,
        };
        let rendered = render_image(&image, WindowLevel::new(0.0, 1.0), true);
        assert_eq!(rendered.pixels[0], Color32::from_rgb(245, 235, 225));
    }

    #[test]
    fn quarter_turn_rotates_clockwise() {
        // 0 1 2        3 0
        // 3 4 5   ->   4 1
        //              5 2
        let rotated = orient_color_image(numbered(3, 2), Rotation::Quarter, false, false);
        assert_eq!(rotated.size, [2, 3]);
        assert_eq!(gray_values(&rotated), vec![3, 0, 4, 1, 5, 2]);

        let back = orient_color_image(numbered(3, 2), Rotation::ThreeQuarter, false, false);
        assert_eq!(gray_values(&back), vec![2, 5, 1, 4, 0, 3]);
    }

    #[test]
    fn flips_and_half_turn() {
        let flipped = orient_color_image(numbered(3, 2), Rotation::None, true, false);
        assert_eq!(gray_values(&flipped), vec![2, 1, 0, 5, 4, 3]);

        let vertical = orient_color_image(numbered(3, 2), Rotation::None, false, true);
        assert_eq!(gray_values(&vertical), vec![3, 4, 5, 0, 1, 2]);

        let half = orient_color_image(numbered(3, 2), Rotation::Half, false, false);
        assert_eq!(gray_values(&half), vec![5, 4, 3, 2, 1, 0]);

        let both = orient_color_image(numbered(3, 2), Rotation::None, true, true);
        assert_eq!(gray_values(&both), gray_values(&half));
    }

    #[test]
    fn downsample_keeps_aspect_ratio() {
        let small = downsample_color_image(&numbered(200, 100), 50);
        assert_eq!(small.size, [50, 25]);
        assert_eq!(small.pixels.len(), 50 * 25);

        let untouched = downsample_color_image(&numbered(3, 2), 50);
        assert_eq!(untouched.size, [3, 2]);
    }
}
