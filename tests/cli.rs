use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

fn write_config(dir: &Path, file_name: &str, body: &str) -> PathBuf {
    let config_path = dir.join(file_name);
    fs::write(&config_path, body).expect("write config");
    config_path
}

fn write_valid_config(dir: &Path, file_name: &str) -> PathBuf {
    write_config(
        dir,
        file_name,
        r#"
name = "sessioncast-cli-test"
env = "dev"

[auth]
refresh_token = "M.R3_BAY.cli-test"

[relay]
server_address = "127.0.0.1:19132"

[observability.log]
output = "console"
"#,
    )
}

/// 生产环境使用控制台日志且没有 refresh token：只有警告
fn write_warning_only_config(dir: &Path, file_name: &str) -> PathBuf {
    write_config(
        dir,
        file_name,
        &format!(
            r#"
name = "sessioncast-cli-warning-test"
env = "prod"

[auth]
refresh_token_file = "{cache}"

[observability.log]
output = "console"
"#,
            cache = dir.join("cache").join("refresh_token").display()
        ),
    )
}

fn write_validation_error_config(dir: &Path, file_name: &str) -> PathBuf {
    write_config(
        dir,
        file_name,
        r#"
name = "sessioncast-cli-validation-error-test"
env = "staging"

[auth]
refresh_token = "M.R3_BAY.cli-test"

[directory]
heartbeat_interval_secs = 300
session_expiry_secs = 120
"#,
    )
}

fn run_sessioncast(args: &[&str], current_dir: Option<&Path>) -> Output {
    let mut cmd = Command::new(PathBuf::from(env!("CARGO_BIN_EXE_sessioncast")));
    cmd.args(args);
    cmd.env_remove("RUST_LOG");
    if let Some(dir) = current_dir {
        cmd.current_dir(dir);
    }
    cmd.output().expect("run sessioncast command")
}

#[test]
fn test_command_accepts_explicit_valid_config() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_valid_config(temp.path(), "valid.toml");
    let output = run_sessioncast(&["test", config_path.to_str().expect("utf8 path")], None);

    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_command_finds_default_config_in_current_directory() {
    let temp = tempfile::tempdir().expect("temp dir");
    write_valid_config(temp.path(), "config.toml");
    let output = run_sessioncast(&["test"], Some(temp.path()));

    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_command_fails_for_missing_custom_config_path() {
    let temp = tempfile::tempdir().expect("temp dir");
    let missing_path = temp.path().join("missing.toml");
    let output = run_sessioncast(&["test", missing_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(
        stderr.contains("Config file not found"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn test_command_fails_when_no_default_config_exists() {
    let temp = tempfile::tempdir().expect("temp dir");
    let output = run_sessioncast(&["test"], Some(temp.path()));
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(
        stderr.contains("No configuration file found"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn test_command_fails_for_invalid_config_content() {
    let temp = tempfile::tempdir().expect("temp dir");
    let bad_path = temp.path().join("bad.toml");
    fs::write(&bad_path, "name = \"broken\"\nenv = [\n").expect("write invalid toml");

    let output = run_sessioncast(&["test", bad_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(
        stderr.contains("配置解析失败"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn test_command_fails_for_validation_errors() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_validation_error_config(temp.path(), "validation-error.toml");
    let output = run_sessioncast(&["test", config_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(
        stderr.contains("配置验证失败"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn test_command_succeeds_with_warning_only_config() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_warning_only_config(temp.path(), "warning.toml");
    let output = run_sessioncast(&["test", config_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        output.status.success(),
        "warning-only config should succeed, stderr: {stderr}"
    );
}

#[test]
fn run_mode_fails_when_no_default_config_exists() {
    let temp = tempfile::tempdir().expect("temp dir");
    let output = run_sessioncast(&[], Some(temp.path()));
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "run mode should fail");
    assert!(
        stderr.contains("No configuration file found"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn run_mode_fails_for_invalid_config_content() {
    let temp = tempfile::tempdir().expect("temp dir");
    let bad_path = temp.path().join("bad-run.toml");
    fs::write(&bad_path, "name = \"broken\"\nenv = [\n").expect("write invalid toml");
    let output = run_sessioncast(&["--config", bad_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "run mode should fail");
    assert!(
        stderr.contains("配置加载失败"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn run_mode_fails_for_validation_errors() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_validation_error_config(temp.path(), "run-validation-error.toml");
    let output = run_sessioncast(
        &["--config", config_path.to_str().expect("utf8 path")],
        None,
    );
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "run mode should fail");
    assert!(
        stderr.contains("配置验证失败"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn run_mode_fails_without_refresh_token() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_warning_only_config(temp.path(), "no-token.toml");
    let output = run_sessioncast(
        &["--config", config_path.to_str().expect("utf8 path")],
        Some(temp.path()),
    );
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "run mode should fail");
    assert!(
        stderr.contains("sessioncast login"),
        "unexpected stderr: {stderr}"
    );
}
