use super::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn load_config_with_explicit_dir() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let config =
        load_config(Some(temp_dir.path().to_path_buf())).expect("should load default config");
    assert_eq!(config.get_base_dir(), temp_dir.path());
}

#[test]
fn invalid_toml_handling() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    fs::write(temp_dir.path().join("config.toml"), "[embedding\nstrategy = ")
        .expect("should write config file");

    let result = load_config(Some(temp_dir.path().to_path_buf()));
    assert!(result.is_err());
}

#[test]
fn unknown_strategy_is_rejected() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[embedding]\nstrategy = \"word2vec\"\n",
    )
    .expect("should write config file");

    assert!(load_config(Some(temp_dir.path().to_path_buf())).is_err());
}
