use std::io::Cursor;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};

use super::{env_flag, Availability, ImageProvider, InvocationRequest, RawProviderResult};

const MAX_DRYRUN_EDGE: u32 = 1024;

/// Offline stand-in that paints a solid colour derived from the prompt and seed.
pub struct DryrunProvider {
    enabled: bool,
}

impl DryrunProvider {
    /// Enabled only when `PEPMART_ENABLE_DRYRUN` is truthy.
    pub fn new() -> Self {
        Self {
            enabled: env_flag("PEPMART_ENABLE_DRYRUN"),
        }
    }

    pub fn enabled() -> Self {
        Self { enabled: true }
    }
}

impl Default for DryrunProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn probe(&self) -> Availability {
        if self.enabled {
            Availability::Available
        } else {
            Availability::Unavailable("PEPMART_ENABLE_DRYRUN not set".to_string())
        }
    }

    fn invoke(&self, request: &InvocationRequest) -> Result<RawProviderResult> {
        let width = request.width.clamp(1, MAX_DRYRUN_EDGE);
        let height = request.height.clamp(1, MAX_DRYRUN_EDGE);
        let seed = request.seed.unwrap_or_default();
        let (r, g, b) = color_from_prompt(&request.positive_prompt, seed);
        let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("dryrun image encode failed")?;
        Ok(RawProviderResult::Binary(bytes))
    }
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{color_from_prompt, DryrunProvider};
    use crate::providers::{Availability, ImageProvider, InvocationRequest, RawProviderResult};

    #[test]
    fn dryrun_paints_prompt_colour_at_input_size() -> anyhow::Result<()> {
        let provider = DryrunProvider::enabled();
        assert_eq!(provider.probe(), Availability::Available);
        let request = InvocationRequest {
            source_png: Arc::new(Vec::new()),
            width: 20,
            height: 10,
            positive_prompt: "golden pet".to_string(),
            negative_prompt: String::new(),
            strength: None,
            steps: None,
            guidance_scale: None,
            seed: Some(3),
            timeout: Duration::from_secs(1),
        };
        let RawProviderResult::Binary(bytes) = provider.invoke(&request)? else {
            anyhow::bail!("dryrun should return inline bytes");
        };
        let image = image::load_from_memory(&bytes)?.to_rgb8();
        assert_eq!(image.dimensions(), (20, 10));
        let (r, g, b) = color_from_prompt("golden pet", 3);
        assert_eq!(image.get_pixel(5, 5).0, [r, g, b]);
        Ok(())
    }

    #[test]
    fn disabled_dryrun_reports_unavailable() {
        let provider = DryrunProvider { enabled: false };
        assert!(!provider.probe().is_available());
    }
}
