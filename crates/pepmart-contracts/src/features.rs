use serde::{Deserialize, Serialize};

pub const FALLBACK_COAT_COLOR: &str = "brown";
pub const FALLBACK_TEXTURE: &str = "soft fur";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureProfile {
    pub coat_color: String,
    pub texture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lighting: Option<String>,
}

impl FeatureProfile {
    /// Profile used when the image cannot be measured.
    pub fn fallback() -> Self {
        Self {
            coat_color: FALLBACK_COAT_COLOR.to_string(),
            texture: FALLBACK_TEXTURE.to_string(),
            lighting: None,
        }
    }
}

impl Default for FeatureProfile {
    fn default() -> Self {
        Self::fallback()
    }
}

/// Predicate over mean `[r, g, b]` channel values (0..=255).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoatCondition {
    AllBelow { value: f64 },
    AllAbove { value: f64 },
    RedWithGreenRatio { min_red: f64, green_ratio: f64 },
    RedDominant { min_red: f64 },
    GreenOverBlue,
    Always,
}

impl CoatCondition {
    pub fn matches(&self, mean: [f64; 3]) -> bool {
        let [r, g, b] = mean;
        match *self {
            Self::AllBelow { value } => r < value && g < value && b < value,
            Self::AllAbove { value } => r > value && g > value && b > value,
            Self::RedWithGreenRatio {
                min_red,
                green_ratio,
            } => r > min_red && g >= r * green_ratio,
            Self::RedDominant { min_red } => r > g && r > b && r >= min_red,
            Self::GreenOverBlue => g > b,
            Self::Always => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoatRule {
    pub label: String,
    pub when: CoatCondition,
}

/// `label` applies when the measured value is strictly greater than `above`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub above: f64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureThresholds {
    pub max_edge: u32,
    pub coat_rules: Vec<CoatRule>,
    pub coat_default: String,
    pub texture_bands: Vec<Band>,
    pub texture_default: String,
    pub lighting_bands: Vec<Band>,
    pub lighting_default: String,
}

impl Default for FeatureThresholds {
    fn default() -> Self {
        Self {
            max_edge: 1024,
            coat_rules: vec![
                rule("dark", CoatCondition::AllBelow { value: 80.0 }),
                rule("white", CoatCondition::AllAbove { value: 200.0 }),
                rule(
                    "golden",
                    CoatCondition::RedWithGreenRatio {
                        min_red: 170.0,
                        green_ratio: 0.8,
                    },
                ),
                rule("light brown", CoatCondition::RedDominant { min_red: 180.0 }),
                rule("brown", CoatCondition::RedDominant { min_red: 0.0 }),
                rule("golden", CoatCondition::GreenOverBlue),
                rule("cream", CoatCondition::Always),
            ],
            coat_default: FALLBACK_COAT_COLOR.to_string(),
            texture_bands: vec![band(1000.0, "curly fluffy fur"), band(500.0, "soft fluffy fur")],
            texture_default: "smooth fur".to_string(),
            lighting_bands: vec![band(150.0, "bright well-lit"), band(100.0, "naturally lit")],
            lighting_default: "softly lit".to_string(),
        }
    }
}

impl FeatureThresholds {
    /// First matching rule wins, in declaration order.
    pub fn classify_coat(&self, mean: [f64; 3]) -> &str {
        self.coat_rules
            .iter()
            .find(|rule| rule.when.matches(mean))
            .map(|rule| rule.label.as_str())
            .unwrap_or(self.coat_default.as_str())
    }

    pub fn classify_texture(&self, luminance_variance: f64) -> &str {
        classify_band(&self.texture_bands, luminance_variance, &self.texture_default)
    }

    pub fn classify_lighting(&self, mean_luminance: f64) -> &str {
        classify_band(&self.lighting_bands, mean_luminance, &self.lighting_default)
    }
}

fn classify_band<'a>(bands: &'a [Band], value: f64, default: &'a str) -> &'a str {
    bands
        .iter()
        .find(|band| value > band.above)
        .map(|band| band.label.as_str())
        .unwrap_or(default)
}

fn rule(label: &str, when: CoatCondition) -> CoatRule {
    CoatRule {
        label: label.to_string(),
        when,
    }
}

fn band(above: f64, label: &str) -> Band {
    Band {
        above,
        label: label.to_string(),
    }
}
