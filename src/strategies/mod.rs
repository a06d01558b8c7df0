//! Built-in language strategies and the table that maps language names to
//! them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::traits::strategy::Strategy;

pub mod compiled;
pub mod interpreted;

pub use compiled::Compiled;
pub use interpreted::Interpreted;

#[derive(Default, Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let python: Arc<dyn Strategy> = Arc::new(Interpreted::new("python3", &["-u"], "py"));
        let shell: Arc<dyn Strategy> = Arc::new(Interpreted::new("bash", &[], "sh"));

        StrategyRegistry::new()
            .with("python", python.clone())
            .with("python3", python)
            .with("ruby", Arc::new(Interpreted::new("ruby", &[], "rb")))
            .with("javascript", Arc::new(Interpreted::new("node", &[], "js")))
            .with("bash", shell.clone())
            .with("shell", shell)
            .with("c", Arc::new(Compiled::new("gcc", &[], "c")))
            .with("cpp", Arc::new(Compiled::new("g++", &["-std=c++17"], "cpp")))
    }

    pub fn with(mut self, language: &str, strategy: Arc<dyn Strategy>) -> Self {
        self.strategies.insert(language.to_string(), strategy);
        self
    }

    pub fn get(&self, language: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(language).cloned()
    }

    pub fn languages(&self) -> Vec<&str> {
        let mut languages: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        languages.sort_unstable();
        languages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builtin_languages() {
        let registry = StrategyRegistry::builtin();

        assert_eq!(
            registry.languages(),
            vec!["bash", "c", "cpp", "javascript", "python", "python3", "ruby", "shell"]
        );
        assert!(registry.get("python").is_some());
        assert!(registry.get("cobol").is_none());
    }

    #[test]
    fn test_aliases_share_strategy() {
        let registry = StrategyRegistry::builtin();

        let python = registry.get("python").unwrap();
        let python3 = registry.get("python3").unwrap();
        assert!(Arc::ptr_eq(&python, &python3));
    }
}
