use image::{DynamicImage, Rgba, RgbaImage};
use pepmart_contracts::catalog::{EnhanceStep, StyleCatalog};

use crate::features::luminance;

/// Applies the style's adjustment list. Unknown styles come back unchanged.
pub fn enhance(image: &DynamicImage, art_style: &str, catalog: &StyleCatalog) -> DynamicImage {
    apply_steps(image, catalog.enhance_steps(art_style))
}

pub fn apply_steps(image: &DynamicImage, steps: &[EnhanceStep]) -> DynamicImage {
    if steps.is_empty() {
        return image.clone();
    }
    let mut rgba = image.to_rgba8();
    for step in steps {
        rgba = match *step {
            EnhanceStep::Color { factor } => adjust_color(&rgba, factor),
            EnhanceStep::Contrast { factor } => adjust_contrast(&rgba, factor),
            EnhanceStep::Sharpness { factor } => adjust_sharpness(&rgba, factor),
        };
    }
    DynamicImage::ImageRgba8(rgba)
}

/// Saturation: blend each pixel against its own grey level.
fn adjust_color(image: &RgbaImage, factor: f64) -> RgbaImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let grey = grey_level(pixel);
        let [r, g, b, a] = pixel.0;
        *pixel = Rgba([
            blend(grey, f64::from(r), factor),
            blend(grey, f64::from(g), factor),
            blend(grey, f64::from(b), factor),
            a,
        ]);
    }
    out
}

/// Contrast: blend against the image-wide mean grey level.
fn adjust_contrast(image: &RgbaImage, factor: f64) -> RgbaImage {
    let count = f64::from(image.width()) * f64::from(image.height());
    if count == 0.0 {
        return image.clone();
    }
    let total: f64 = image.pixels().map(grey_level).sum();
    let mean = (total / count).round();
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        *pixel = Rgba([
            blend(mean, f64::from(r), factor),
            blend(mean, f64::from(g), factor),
            blend(mean, f64::from(b), factor),
            a,
        ]);
    }
    out
}

/// Sharpness: blend against a 3x3 smoothed copy. Border pixels are left as they are.
fn adjust_sharpness(image: &RgbaImage, factor: f64) -> RgbaImage {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return image.clone();
    }
    let mut out = image.clone();
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let original = image.get_pixel(x, y).0;
            let mut next = original;
            for channel in 0..3 {
                let mut acc = 0.0f64;
                for dy in 0..3u32 {
                    for dx in 0..3u32 {
                        let weight = if dx == 1 && dy == 1 { 5.0 } else { 1.0 };
                        let sample = image.get_pixel(x + dx - 1, y + dy - 1).0[channel];
                        acc += weight * f64::from(sample);
                    }
                }
                let smoothed = (acc / 13.0).round();
                next[channel] = blend(smoothed, f64::from(original[channel]), factor);
            }
            out.put_pixel(x, y, Rgba(next));
        }
    }
    out
}

fn grey_level(pixel: &Rgba<u8>) -> f64 {
    let [r, g, b, _] = pixel.0;
    luminance(f64::from(r), f64::from(g), f64::from(b)).round()
}

/// `degenerate + factor * (value - degenerate)`, rounded and clamped to a channel value.
fn blend(degenerate: f64, value: f64, factor: f64) -> u8 {
    (degenerate + factor * (value - degenerate))
        .round()
        .clamp(0.0, 255.0) as u8
}
