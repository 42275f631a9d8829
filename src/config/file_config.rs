use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    /// Feedback database file. Omit to keep everything in memory.
    pub db_path: Option<String>,

    pub classifier: Option<ClassifierFileConfig>,
    pub blending: Option<BlendingFileConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ClassifierFileConfig {
    pub feature_dim: Option<usize>,
    pub learning_rate: Option<f64>,
    pub init_scale: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BlendingFileConfig {
    pub admission_threshold: Option<f64>,
    pub max_results: Option<usize>,
    pub oracle_top_k: Option<usize>,
    /// How many of the user's own labels are offered to the oracle and the classifier.
    pub custom_label_limit: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            db_path = "/data/feedback.db"

            [classifier]
            feature_dim = 256
            learning_rate = 0.05
            init_scale = 0.0

            [blending]
            admission_threshold = 0.75
            max_results = 10
            oracle_top_k = 3
            custom_label_limit = 5
        "#;

        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.db_path, Some("/data/feedback.db".to_string()));

        let classifier = config.classifier.unwrap();
        assert_eq!(classifier.feature_dim, Some(256));
        assert_eq!(classifier.learning_rate, Some(0.05));
        assert_eq!(classifier.init_scale, Some(0.0));

        let blending = config.blending.unwrap();
        assert_eq!(blending.admission_threshold, Some(0.75));
        assert_eq!(blending.max_results, Some(10));
        assert_eq!(blending.oracle_top_k, Some(3));
        assert_eq!(blending.custom_label_limit, Some(5));
    }

    #[test]
    fn test_parse_partial_config() {
        let config: FileConfig = toml::from_str("[blending]\nmax_results = 4\n").unwrap();
        assert!(config.db_path.is_none());
        assert!(config.classifier.is_none());
        let blending = config.blending.unwrap();
        assert_eq!(blending.max_results, Some(4));
        assert!(blending.admission_threshold.is_none());
    }

    #[test]
    fn test_parse_empty_config() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.db_path.is_none());
        assert!(config.blending.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "db_path = \"tags.db\"").unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.db_path, Some("tags.db".to_string()));
    }

    #[test]
    fn test_load_invalid_toml_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "db_path = [unterminated").unwrap();

        let err = FileConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
