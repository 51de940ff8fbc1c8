/// Providers ordered ascending by priority; equal priorities keep their insertion order.
#[derive(Debug, Clone)]
pub struct ProviderRegistry<T: NamedProvider> {
    providers: Vec<T>,
}

pub trait NamedProvider {
    fn name(&self) -> &str;
    fn priority(&self) -> i32;
}

impl<T: NamedProvider> ProviderRegistry<T> {
    pub fn new(providers: Vec<T>) -> Self {
        let mut unique: Vec<T> = Vec::with_capacity(providers.len());
        for provider in providers {
            if unique.iter().any(|existing| existing.name() == provider.name()) {
                tracing::warn!(
                    provider = provider.name(),
                    "duplicate provider name; keeping the first registration"
                );
                continue;
            }
            unique.push(provider);
        }
        unique.sort_by_key(|provider| provider.priority());
        Self { providers: unique }
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.providers
            .iter()
            .find(|provider| provider.name() == name)
    }

    /// Names in the order the fallback chain tries them.
    pub fn list(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|provider| provider.name().to_string())
            .collect()
    }

    pub fn providers(&self) -> &[T] {
        self.providers.as_slice()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{NamedProvider, ProviderRegistry};

    #[derive(Clone, Debug)]
    struct DummyProvider {
        name: String,
        priority: i32,
    }

    impl NamedProvider for DummyProvider {
        fn name(&self) -> &str {
            self.name.as_str()
        }

        fn priority(&self) -> i32 {
            self.priority
        }
    }

    fn dummy(name: &str, priority: i32) -> DummyProvider {
        DummyProvider {
            name: name.to_string(),
            priority,
        }
    }

    #[test]
    fn registry_orders_by_priority_with_stable_ties() {
        let registry = ProviderRegistry::new(vec![
            dummy("vision", 3),
            dummy("edit", 2),
            dummy("backup", 2),
            dummy("local", 1),
        ]);
        assert_eq!(registry.list(), vec!["local", "edit", "backup", "vision"]);
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.get("backup").map(|p| p.priority), Some(2));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn registry_keeps_first_of_duplicate_names() {
        let registry = ProviderRegistry::new(vec![dummy("local", 5), dummy("local", 1)]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("local").map(|p| p.priority), Some(5));
        assert!(!registry.is_empty());
    }
}
