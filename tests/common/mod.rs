use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Path to the `mcp_test_server` helper binary
///
/// Cargo sets `CARGO_BIN_EXE_mcp_test_server` for integration tests of this
/// package.
#[allow(dead_code)]
pub fn test_server_exe() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mcp_test_server"))
}

/// Write `contents` to `llm_mcp_config.json5` in a fresh temp directory
#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("llm_mcp_config.json5");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
