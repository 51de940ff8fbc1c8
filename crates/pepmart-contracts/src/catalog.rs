use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_STYLE_CATALOG_JSON: &str = include_str!("../resources/default_styles.json");
pub const STYLE_CATALOG_ENV: &str = "PEPMART_STYLE_CATALOG";
const MAX_ENHANCE_FACTOR: f64 = 3.0;
const TABLE_KEYS: [&str; 4] = ["styles", "families", "cuteness", "palettes"];

/// One multiplicative image adjustment. A factor of 1.0 leaves the image unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EnhanceStep {
    Color { factor: f64 },
    Contrast { factor: f64 },
    Sharpness { factor: f64 },
}

impl EnhanceStep {
    pub fn factor(&self) -> f64 {
        match *self {
            Self::Color { factor } | Self::Contrast { factor } | Self::Sharpness { factor } => {
                factor
            }
        }
    }

    fn clamped(self) -> Self {
        let clamp = |factor: f64| {
            if factor.is_finite() {
                factor.clamp(0.0, MAX_ENHANCE_FACTOR)
            } else {
                1.0
            }
        };
        match self {
            Self::Color { factor } => Self::Color {
                factor: clamp(factor),
            },
            Self::Contrast { factor } => Self::Contrast {
                factor: clamp(factor),
            },
            Self::Sharpness { factor } => Self::Sharpness {
                factor: clamp(factor),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleEntry {
    pub family: String,
    pub template: String,
    #[serde(default = "default_true")]
    pub preserve_subject: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhance: Option<Vec<EnhanceStep>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleFamily {
    pub negative_prompt: String,
    #[serde(default)]
    pub enhance: Vec<EnhanceStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleCatalog {
    pub preservation_clause: String,
    pub generic_negative_prompt: String,
    pub default_style: String,
    pub default_cuteness: String,
    pub default_palette: String,
    pub default_lighting: String,
    pub styles: IndexMap<String, StyleEntry>,
    pub families: IndexMap<String, StyleFamily>,
    pub cuteness: IndexMap<String, String>,
    pub palettes: IndexMap<String, String>,
}

impl StyleCatalog {
    pub fn embedded() -> Result<Self> {
        Self::from_json(DEFAULT_STYLE_CATALOG_JSON)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: Self =
            serde_json::from_str(raw).context("style catalog is not a valid catalog document")?;
        parsed.validated()
    }

    /// Embedded catalog overlaid with the file named by `PEPMART_STYLE_CATALOG`, if set.
    pub fn load() -> Result<Self> {
        let path = env::var_os(STYLE_CATALOG_ENV).map(PathBuf::from);
        Self::load_with_override(path.as_deref())
    }

    pub fn load_with_override(path: Option<&Path>) -> Result<Self> {
        let embedded = Self::embedded()?;
        let Some(path) = path else {
            return Ok(embedded);
        };
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "style catalog override unreadable; using embedded catalog"
                );
                return Ok(embedded);
            }
        };
        match overlay_catalog(&raw) {
            Ok(catalog) => {
                tracing::info!(
                    path = %path.display(),
                    styles = catalog.styles.len(),
                    "loaded style catalog override"
                );
                Ok(catalog)
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %format!("{err:#}"),
                    "style catalog override ignored"
                );
                Ok(embedded)
            }
        }
    }

    fn validated(mut self) -> Result<Self> {
        if self.styles.is_empty() {
            bail!("style catalog defines no styles");
        }
        if !self.styles.contains_key(&self.default_style) {
            bail!("default style '{}' is not defined", self.default_style);
        }
        if !self.cuteness.contains_key(&self.default_cuteness) {
            bail!("default cuteness '{}' is not defined", self.default_cuteness);
        }
        if !self.palettes.contains_key(&self.default_palette) {
            bail!("default palette '{}' is not defined", self.default_palette);
        }
        for (key, style) in &self.styles {
            if !self.families.contains_key(&style.family) {
                bail!("style '{key}' references unknown family '{}'", style.family);
            }
        }
        for style in self.styles.values_mut() {
            if let Some(steps) = style.enhance.as_mut() {
                clamp_steps(steps);
            }
        }
        for family in self.families.values_mut() {
            clamp_steps(&mut family.enhance);
        }
        Ok(self)
    }

    pub fn is_known_style(&self, key: &str) -> bool {
        self.styles.contains_key(key)
    }

    /// The requested style, or the declared default for unknown keys.
    pub fn resolve_style(&self, key: &str) -> Option<(&str, &StyleEntry)> {
        self.styles
            .get_key_value(key)
            .or_else(|| self.styles.get_key_value(self.default_style.as_str()))
            .map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn cuteness_phrase(&self, key: &str) -> &str {
        lookup_with_default(&self.cuteness, key, &self.default_cuteness)
    }

    pub fn palette_phrase(&self, key: &str) -> &str {
        lookup_with_default(&self.palettes, key, &self.default_palette)
    }

    /// Style override, then family default. Unknown styles get the generic negative prompt.
    pub fn negative_prompt_for(&self, key: &str) -> &str {
        let Some(style) = self.styles.get(key) else {
            return self.generic_negative_prompt.as_str();
        };
        if let Some(negative) = style.negative_prompt.as_deref() {
            return negative;
        }
        self.families
            .get(&style.family)
            .map(|family| family.negative_prompt.as_str())
            .unwrap_or(self.generic_negative_prompt.as_str())
    }

    /// Ordered adjustments for a style. Unknown styles get none.
    pub fn enhance_steps(&self, key: &str) -> &[EnhanceStep] {
        let Some(style) = self.styles.get(key) else {
            return &[];
        };
        if let Some(steps) = style.enhance.as_deref() {
            return steps;
        }
        self.families
            .get(&style.family)
            .map(|family| family.enhance.as_slice())
            .unwrap_or(&[])
    }

    pub fn style_keys(&self) -> Vec<String> {
        self.styles.keys().cloned().collect()
    }

    pub fn cuteness_keys(&self) -> Vec<String> {
        self.cuteness.keys().cloned().collect()
    }

    pub fn palette_keys(&self) -> Vec<String> {
        self.palettes.keys().cloned().collect()
    }
}

fn overlay_catalog(raw: &str) -> Result<StyleCatalog> {
    let mut merged: Value = serde_json::from_str(DEFAULT_STYLE_CATALOG_JSON)
        .context("embedded style catalog is not valid JSON")?;
    merge_catalog_overlay(&mut merged, raw)?;
    let catalog: StyleCatalog =
        serde_json::from_value(merged).context("merged style catalog is malformed")?;
    catalog.validated()
}

/// Table keys merge entry by entry; every other key is replaced wholesale.
fn merge_catalog_overlay(base: &mut Value, raw: &str) -> Result<()> {
    let overlay: Value = serde_json::from_str(raw).context("style catalog override is not JSON")?;
    let Some(overlay) = overlay.as_object() else {
        bail!("style catalog override must be a JSON object");
    };
    let Some(base) = base.as_object_mut() else {
        bail!("style catalog base must be a JSON object");
    };
    for (key, value) in overlay {
        let is_table = TABLE_KEYS.contains(&key.as_str());
        if let (true, Some(existing), Some(entries)) = (
            is_table,
            base.get_mut(key).and_then(Value::as_object_mut),
            value.as_object(),
        ) {
            for (entry_key, entry) in entries {
                existing.insert(entry_key.clone(), entry.clone());
            }
            continue;
        }
        base.insert(key.clone(), value.clone());
    }
    Ok(())
}

fn clamp_steps(steps: &mut [EnhanceStep]) {
    for step in steps.iter_mut() {
        *step = step.clamped();
    }
}

fn lookup_with_default<'a>(
    table: &'a IndexMap<String, String>,
    key: &str,
    default_key: &str,
) -> &'a str {
    table
        .get(key)
        .or_else(|| table.get(default_key))
        .map(String::as_str)
        .unwrap_or("")
}

fn default_true() -> bool {
    true
}
