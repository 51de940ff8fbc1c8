use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ART_STYLE: &str = "popmart";
pub const DEFAULT_CUTENESS_LEVEL: &str = "high";
pub const DEFAULT_COLOR_PALETTE: &str = "vibrant";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedSpec {
    Fixed(u64),
    Random,
}

impl SeedSpec {
    /// Accepts a non-negative integer, or `random` / `-1` for a fresh seed per call.
    pub fn parse(raw: &str) -> Option<Self> {
        let value = raw.trim();
        if value.eq_ignore_ascii_case("random") || value == "-1" {
            return Some(Self::Random);
        }
        value.parse::<u64>().ok().map(Self::Fixed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tuning {
    pub strength: Option<f64>,
    pub steps: Option<u32>,
    pub guidance_scale: Option<f64>,
    pub seed: Option<SeedSpec>,
}

impl Tuning {
    pub fn validate(&self) -> Result<()> {
        if let Some(strength) = self.strength {
            if !(strength > 0.0 && strength <= 1.0) {
                bail!("strength must be in (0, 1], got {strength}");
            }
        }
        if let Some(steps) = self.steps {
            if !(1..=150).contains(&steps) {
                bail!("steps must be between 1 and 150, got {steps}");
            }
        }
        if let Some(guidance) = self.guidance_scale {
            if !(0.0..=30.0).contains(&guidance) {
                bail!("guidance_scale must be between 0 and 30, got {guidance}");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub image: Vec<u8>,
    pub art_style: String,
    pub cuteness_level: String,
    pub color_palette: String,
    pub custom_prompt: Option<String>,
    pub custom_negative_prompt: Option<String>,
    pub tuning: Tuning,
}

impl GenerationRequest {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            art_style: DEFAULT_ART_STYLE.to_string(),
            cuteness_level: DEFAULT_CUTENESS_LEVEL.to_string(),
            color_palette: DEFAULT_COLOR_PALETTE.to_string(),
            custom_prompt: None,
            custom_negative_prompt: None,
            tuning: Tuning::default(),
        }
    }

    /// Custom prompt text after trimming, if any remains.
    pub fn custom_prompt_text(&self) -> Option<&str> {
        self.custom_prompt
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Custom negative prompt exactly as supplied, unless it is blank.
    pub fn custom_negative_text(&self) -> Option<&str> {
        self.custom_negative_prompt
            .as_deref()
            .filter(|value| !value.trim().is_empty())
    }
}
