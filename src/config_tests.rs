//! Tests for configuration

#[cfg(test)]
mod tests {
    use super::super::config::*;

    #[test]
    fn test_training_config_defaults() {
        let config = TrainingConfig::default();
        assert_eq!(config.min_resolved_markets, 50);
        assert_eq!(config.min_labeled_posts, 100);
        assert_eq!(config.folds, 3);
    }

    #[test]
    fn test_gbdt_params_defaults() {
        let params = GbdtParams::default();
        assert_eq!(params.num_rounds, 3000);
        assert_eq!(params.learning_rate, 0.03);
        assert_eq!(params.max_depth, 8);
        assert_eq!(params.min_samples_leaf, 2);
        assert_eq!(params.lambda, 1.0);
        assert_eq!(params.early_stopping_rounds, 50);
    }

    #[test]
    fn test_classifier_defaults_are_shallower() {
        let params = GbdtParams::classifier_defaults();
        assert_eq!(params.num_rounds, 2000);
        assert_eq!(params.learning_rate, 0.05);
        assert_eq!(params.max_depth, 6);
        // Shared knobs stay at the regression defaults
        assert_eq!(params.early_stopping_rounds, 50);
    }

    #[test]
    fn test_empty_toml_is_fully_usable() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.database.url, "sqlite://data/market_ml.db?mode=rwc");
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert!(config.server.internal_secret.is_empty());
        assert_eq!(config.paths.models_dir, "models");
        // The two model sections carry different defaults
        assert_eq!(config.correction_model.max_depth, 8);
        assert_eq!(config.usefulness_model.max_depth, 6);
    }

    #[test]
    fn test_partial_section_overrides() {
        let toml_str = r#"
[server]
port = 9100
internal_secret = "s3cret"

[training]
min_resolved_markets = 25

[correction_model]
num_rounds = 500
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.internal_secret, "s3cret");
        // Unset fields inside a present section still default
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.training.min_resolved_markets, 25);
        assert_eq!(config.training.min_labeled_posts, 100);
        assert_eq!(config.correction_model.num_rounds, 500);
        assert_eq!(config.correction_model.learning_rate, 0.03);
    }

    #[test]
    fn test_paths_expand_tilde() {
        let toml_str = r#"
[paths]
models_dir = "~/ml/models"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let expanded = config.paths.models_dir();
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().ends_with("ml/models"));
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let config = Config::load("/nonexistent/market-ml-config.toml").unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.training.folds, 3);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nport = 9200\n").unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 9200);
    }
}
