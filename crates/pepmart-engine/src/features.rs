use anyhow::{bail, Result};
use image::imageops::FilterType;
use image::DynamicImage;
use pepmart_contracts::features::{FeatureProfile, FeatureThresholds};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageStats {
    pub mean_rgb: [f64; 3],
    pub mean_luminance: f64,
    pub luminance_variance: f64,
}

/// Advisory descriptors for prompt text. Falls back to a fixed profile instead of failing.
pub fn extract(image: &DynamicImage, thresholds: &FeatureThresholds) -> FeatureProfile {
    match measure(image, thresholds.max_edge) {
        Ok(stats) => profile_from_stats(&stats, thresholds),
        Err(err) => {
            tracing::warn!(error = %err, "feature extraction failed; using fallback profile");
            FeatureProfile::fallback()
        }
    }
}

pub fn profile_from_stats(stats: &ImageStats, thresholds: &FeatureThresholds) -> FeatureProfile {
    FeatureProfile {
        coat_color: thresholds.classify_coat(stats.mean_rgb).to_string(),
        texture: thresholds
            .classify_texture(stats.luminance_variance)
            .to_string(),
        lighting: Some(thresholds.classify_lighting(stats.mean_luminance).to_string()),
    }
}

/// Channel means plus population variance of luminance. Images beyond `max_edge` are
/// downsampled first; smaller ones are measured pixel for pixel.
pub fn measure(image: &DynamicImage, max_edge: u32) -> Result<ImageStats> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        bail!("cannot measure an empty {width}x{height} image");
    }
    let max_edge = max_edge.max(1);
    let rgb = if width.max(height) > max_edge {
        image.resize(max_edge, max_edge, FilterType::Triangle).to_rgb8()
    } else {
        image.to_rgb8()
    };

    let count = f64::from(rgb.width()) * f64::from(rgb.height());
    let mut sums = [0.0f64; 3];
    let mut lum_sum = 0.0f64;
    for pixel in rgb.pixels() {
        let [r, g, b] = pixel.0.map(f64::from);
        sums[0] += r;
        sums[1] += g;
        sums[2] += b;
        lum_sum += luminance(r, g, b);
    }
    let mean_luminance = lum_sum / count;
    let mut squared = 0.0f64;
    for pixel in rgb.pixels() {
        let [r, g, b] = pixel.0.map(f64::from);
        let delta = luminance(r, g, b) - mean_luminance;
        squared += delta * delta;
    }

    Ok(ImageStats {
        mean_rgb: sums.map(|sum| sum / count),
        mean_luminance,
        luminance_variance: squared / count,
    })
}

pub(crate) fn luminance(r: f64, g: f64, b: f64) -> f64 {
    0.299 * r + 0.587 * g + 0.114 * b
}
