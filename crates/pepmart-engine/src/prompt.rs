use pepmart_contracts::catalog::StyleCatalog;
use pepmart_contracts::features::FeatureProfile;
use pepmart_contracts::prompts::{PromptBundle, PromptSource};
use pepmart_contracts::request::GenerationRequest;

/// Builds the prompt pair. Pure and deterministic for identical inputs.
///
/// The preservation clause leads every custom positive prompt, and every synthesized one
/// whose style preserves the subject. It is never added to the negative prompt.
pub fn synthesize(
    catalog: &StyleCatalog,
    request: &GenerationRequest,
    features: Option<&FeatureProfile>,
) -> PromptBundle {
    let negative_prompt = match request.custom_negative_text() {
        Some(custom) => custom.to_string(),
        None => catalog.negative_prompt_for(&request.art_style).to_string(),
    };

    let clause = catalog.preservation_clause.trim();
    if let Some(custom) = request.custom_prompt_text() {
        return PromptBundle {
            positive_prompt: join_prompt(clause, custom),
            negative_prompt,
            source: PromptSource::Custom,
        };
    }

    let resolved = catalog.resolve_style(&request.art_style);
    let preserve = resolved
        .map(|(_, style)| style.preserve_subject)
        .unwrap_or(true);
    let clause = if preserve { clause } else { "" };

    let fallback = FeatureProfile::fallback();
    let profile = features.unwrap_or(&fallback);
    let lighting = profile
        .lighting
        .as_deref()
        .unwrap_or(catalog.default_lighting.as_str());
    let template = resolved
        .map(|(_, style)| style.template.as_str())
        .unwrap_or("");
    let body = template
        .replace("{coat_color}", &profile.coat_color)
        .replace("{texture}", &profile.texture)
        .replace("{lighting}", lighting)
        .replace("{cuteness}", catalog.cuteness_phrase(&request.cuteness_level))
        .replace("{palette}", catalog.palette_phrase(&request.color_palette));

    PromptBundle {
        positive_prompt: join_prompt(clause, body.trim()),
        negative_prompt,
        source: PromptSource::Synthesized,
    }
}

fn join_prompt(clause: &str, text: &str) -> String {
    match (clause.is_empty(), text.is_empty()) {
        (true, _) => text.to_string(),
        (false, true) => clause.to_string(),
        (false, false) => format!("{clause} {text}"),
    }
}

#[cfg(test)]
mod tests {
    use pepmart_contracts::catalog::StyleCatalog;
    use pepmart_contracts::features::FeatureProfile;
    use pepmart_contracts::prompts::PromptSource;
    use pepmart_contracts::request::GenerationRequest;

    use super::synthesize;

    fn profile() -> FeatureProfile {
        FeatureProfile {
            coat_color: "light brown".to_string(),
            texture: "curly fluffy fur".to_string(),
            lighting: Some("bright well-lit".to_string()),
        }
    }

    #[test]
    fn custom_prompt_is_clause_plus_trimmed_text() -> anyhow::Result<()> {
        let catalog = StyleCatalog::embedded()?;
        let mut request = GenerationRequest::new(Vec::new());
        request.custom_prompt = Some("   as a knight in shining armour \n".to_string());
        let bundle = synthesize(&catalog, &request, None);
        assert_eq!(
            bundle.positive_prompt,
            format!("{} as a knight in shining armour", catalog.preservation_clause)
        );
        assert_eq!(bundle.source, PromptSource::Custom);
        assert_eq!(bundle.negative_prompt, catalog.negative_prompt_for("popmart"));
        Ok(())
    }

    #[test]
    fn custom_negative_is_used_verbatim_without_clause() -> anyhow::Result<()> {
        let catalog = StyleCatalog::embedded()?;
        let mut request = GenerationRequest::new(Vec::new());
        request.custom_negative_prompt = Some("no hats, no glasses".to_string());
        let bundle = synthesize(&catalog, &request, Some(&profile()));
        assert_eq!(bundle.negative_prompt, "no hats, no glasses");
        assert!(!bundle.negative_prompt.contains(&catalog.preservation_clause));
        Ok(())
    }

    #[test]
    fn synthesized_prompt_interpolates_profile_and_modifiers() -> anyhow::Result<()> {
        let catalog = StyleCatalog::embedded()?;
        let request = GenerationRequest::new(Vec::new());
        let bundle = synthesize(&catalog, &request, Some(&profile()));
        assert!(bundle.positive_prompt.starts_with(&catalog.preservation_clause));
        assert!(bundle.positive_prompt.contains("popmart collectible vinyl figure"));
        assert!(bundle.positive_prompt.contains("light brown pet with curly fluffy fur"));
        assert!(bundle.positive_prompt.contains("bright well-lit"));
        assert!(bundle.positive_prompt.contains(catalog.cuteness_phrase("high")));
        assert!(bundle.positive_prompt.contains(catalog.palette_phrase("vibrant")));
        assert!(!bundle.positive_prompt.contains('{'));
        assert_eq!(bundle.source, PromptSource::Synthesized);
        Ok(())
    }

    #[test]
    fn unknown_keys_use_defaults_and_generic_negative() -> anyhow::Result<()> {
        let catalog = StyleCatalog::embedded()?;
        let mut request = GenerationRequest::new(Vec::new());
        request.art_style = "vaporwave".to_string();
        request.cuteness_level = "feral".to_string();
        request.color_palette = "plaid".to_string();
        let bundle = synthesize(&catalog, &request, None);
        assert!(bundle.positive_prompt.contains("popmart collectible vinyl figure"));
        assert!(bundle.positive_prompt.contains("brown pet with soft fur"));
        assert!(bundle.positive_prompt.contains(&catalog.default_lighting));
        assert_eq!(bundle.negative_prompt, catalog.generic_negative_prompt);
        Ok(())
    }

    #[test]
    fn synthesis_is_deterministic() -> anyhow::Result<()> {
        let catalog = StyleCatalog::embedded()?;
        let mut request = GenerationRequest::new(Vec::new());
        request.art_style = "watercolor".to_string();
        request.custom_prompt = Some("sleeping on a cloud".to_string());
        let first = synthesize(&catalog, &request, Some(&profile()));
        let second = synthesize(&catalog, &request, Some(&profile()));
        assert_eq!(first, second);

        request.custom_prompt = None;
        assert_eq!(
            synthesize(&catalog, &request, Some(&profile())),
            synthesize(&catalog, &request, Some(&profile()))
        );
        Ok(())
    }

    #[test]
    fn non_preserving_style_drops_clause_from_synthesized_prompt_only() -> anyhow::Result<()> {
        let mut catalog = StyleCatalog::embedded()?;
        if let Some(style) = catalog.styles.get_mut("sketch") {
            style.preserve_subject = false;
        }
        let mut request = GenerationRequest::new(Vec::new());
        request.art_style = "sketch".to_string();
        let synthesized = synthesize(&catalog, &request, None).positive_prompt;
        assert!(!synthesized.contains(&catalog.preservation_clause));

        request.custom_prompt = Some(" quick doodle ".to_string());
        assert_eq!(
            synthesize(&catalog, &request, None).positive_prompt,
            format!("{} quick doodle", catalog.preservation_clause)
        );
        Ok(())
    }
}
