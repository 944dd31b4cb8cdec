//! Bootstrap configuration tests

use alias_common::config::{
    load_toml_config, load_toml_config_or_default, resolve_root_folder, write_toml_config,
    LoggingConfig, TomlConfig, ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_write_then_load_preserves_fields() {
    let temp_dir = TempDir::new().unwrap();
    let toml_path = temp_dir.path().join("alias-match.toml");

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/srv/alias")),
        logging: LoggingConfig {
            level: "debug".to_string(),
            file: None,
        },
        proposal_api_key: Some("test-key".to_string()),
    };

    write_toml_config(&config, &toml_path).unwrap();
    let loaded = load_toml_config(&toml_path).unwrap();

    assert_eq!(loaded, config);
    assert!(!toml_path.with_extension("toml.tmp").exists(), "temp file should be renamed away");
}

#[test]
fn test_explicit_missing_path_is_error() {
    let result = load_toml_config_or_default(Some(Path::new("/nonexistent/alias-match.toml")));
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_root_folder_cli_beats_env_and_toml() {
    std::env::set_var(ROOT_FOLDER_ENV, "/from/env");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    let resolved = resolve_root_folder(Some(Path::new("/from/cli")), &config);
    assert_eq!(resolved, PathBuf::from("/from/cli"));

    std::env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_root_folder_env_beats_toml() {
    std::env::set_var(ROOT_FOLDER_ENV, "/from/env");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/from/env"));

    std::env::remove_var(ROOT_FOLDER_ENV);
    assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/from/toml"));
}
