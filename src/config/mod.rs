mod file_config;

pub use file_config::{BlendingFileConfig, ClassifierFileConfig, FileConfig};

use crate::blend::{BlendConfig, DEFAULT_ADMISSION_THRESHOLD, DEFAULT_MAX_RESULTS};
use crate::classifier::{
    ClassifierConfig, DEFAULT_FEATURE_DIM, DEFAULT_INIT_SCALE, DEFAULT_LEARNING_RATE,
};
use crate::oracle::DEFAULT_ORACLE_TOP_K;
use anyhow::{bail, Result};
use std::path::PathBuf;

pub const DEFAULT_CUSTOM_LABEL_LIMIT: usize = 20;

/// CLI arguments that can be used for config resolution.
/// TOML values take precedence over these.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub learning_rate: f64,
    pub admission_threshold: f64,
    pub max_results: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            learning_rate: DEFAULT_LEARNING_RATE,
            admission_threshold: DEFAULT_ADMISSION_THRESHOLD,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// `None` runs without persistence.
    pub db_path: Option<PathBuf>,
    pub classifier: ClassifierConfig,
    pub blend: BlendConfig,
    pub oracle_top_k: usize,
    pub custom_label_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            classifier: ClassifierConfig::default(),
            blend: BlendConfig::default(),
            oracle_top_k: DEFAULT_ORACLE_TOP_K,
            custom_label_limit: DEFAULT_CUSTOM_LABEL_LIMIT,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file.db_path.map(PathBuf::from).or_else(|| cli.db_path.clone());
        if let Some(parent) = db_path.as_ref().and_then(|p| p.parent()) {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let classifier_file = file.classifier.unwrap_or_default();
        let classifier = ClassifierConfig {
            feature_dim: classifier_file.feature_dim.unwrap_or(DEFAULT_FEATURE_DIM),
            learning_rate: classifier_file.learning_rate.unwrap_or(cli.learning_rate),
            init_scale: classifier_file.init_scale.unwrap_or(DEFAULT_INIT_SCALE),
        };

        let blending_file = file.blending.unwrap_or_default();
        let blend = BlendConfig {
            admission_threshold: blending_file
                .admission_threshold
                .unwrap_or(cli.admission_threshold),
            max_results: blending_file.max_results.unwrap_or(cli.max_results),
        };

        let config = Self {
            db_path,
            classifier,
            blend,
            oracle_top_k: blending_file.oracle_top_k.unwrap_or(DEFAULT_ORACLE_TOP_K),
            custom_label_limit: blending_file
                .custom_label_limit
                .unwrap_or(DEFAULT_CUSTOM_LABEL_LIMIT),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.classifier.feature_dim == 0 {
            bail!("feature_dim must be positive");
        }
        if !(self.classifier.learning_rate.is_finite() && self.classifier.learning_rate > 0.0) {
            bail!(
                "learning_rate must be a positive number, got {}",
                self.classifier.learning_rate
            );
        }
        if !(self.classifier.init_scale.is_finite() && self.classifier.init_scale >= 0.0) {
            bail!(
                "init_scale must be a non-negative number, got {}",
                self.classifier.init_scale
            );
        }
        if !(0.0..=1.0).contains(&self.blend.admission_threshold) {
            bail!(
                "admission_threshold must be within [0, 1], got {}",
                self.blend.admission_threshold
            );
        }
        if self.blend.max_results == 0 {
            bail!("max_results must be positive");
        }
        if self.oracle_top_k == 0 {
            bail!("oracle_top_k must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_defaults() {
        let config = AppConfig::resolve(&CliConfig::default(), None).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.db_path.is_none());
        assert_eq!(config.classifier.feature_dim, 512);
        assert_eq!(config.blend.admission_threshold, 0.6);
        assert_eq!(config.blend.max_results, 8);
        assert_eq!(config.oracle_top_k, 5);
        assert_eq!(config.custom_label_limit, 20);
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("feedback.db");
        let cli = CliConfig {
            db_path: Some(db_path.clone()),
            learning_rate: 0.1,
            admission_threshold: 0.7,
            max_results: 3,
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_path, Some(db_path));
        assert_eq!(config.classifier.learning_rate, 0.1);
        assert_eq!(config.blend.admission_threshold, 0.7);
        assert_eq!(config.blend.max_results, 3);
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = TempDir::new().unwrap();
        let toml_path = temp_dir.path().join("toml.db");
        let cli = CliConfig {
            db_path: Some(temp_dir.path().join("cli.db")),
            learning_rate: 0.1,
            max_results: 3,
            ..Default::default()
        };
        let file_config = FileConfig {
            db_path: Some(toml_path.to_string_lossy().to_string()),
            classifier: Some(ClassifierFileConfig {
                learning_rate: Some(0.02),
                ..Default::default()
            }),
            blending: Some(BlendingFileConfig {
                custom_label_limit: Some(4),
                ..Default::default()
            }),
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        // TOML values should override CLI
        assert_eq!(config.db_path, Some(toml_path));
        assert_eq!(config.classifier.learning_rate, 0.02);
        assert_eq!(config.custom_label_limit, 4);
        // CLI value used when TOML doesn't specify
        assert_eq!(config.blend.max_results, 3);
    }

    #[test]
    fn test_resolve_relative_db_path_without_parent() {
        let cli = CliConfig {
            db_path: Some(PathBuf::from("feedback.db")),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, None).is_ok());
    }

    #[test]
    fn test_resolve_missing_db_directory_error() {
        let cli = CliConfig {
            db_path: Some(PathBuf::from("/nonexistent/path/that/should/not/exist/f.db")),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_resolve_rejects_invalid_values() {
        let bad_threshold = CliConfig {
            admission_threshold: 1.5,
            ..Default::default()
        };
        assert!(AppConfig::resolve(&bad_threshold, None).is_err());

        let bad_rate = CliConfig {
            learning_rate: f64::NAN,
            ..Default::default()
        };
        assert!(AppConfig::resolve(&bad_rate, None).is_err());

        let zero_dim = FileConfig {
            classifier: Some(ClassifierFileConfig {
                feature_dim: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = AppConfig::resolve(&CliConfig::default(), Some(zero_dim)).unwrap_err();
        assert!(err.to_string().contains("feature_dim"));

        let zero_results = CliConfig {
            max_results: 0,
            ..Default::default()
        };
        assert!(AppConfig::resolve(&zero_results, None).is_err());
    }
}
