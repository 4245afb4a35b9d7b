use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn fitwatch(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fitwatch"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run fitwatch")
}

fn write_config(dir: &Path, extra: &str) -> std::path::PathBuf {
    let rides = dir.join("rides");
    std::fs::create_dir_all(&rides).unwrap();
    let config_path = dir.join("config.toml");
    let content = format!(
        r#"
store_path = "{store}"

[watch]
dirs = ["{rides}"]
settle_ms = 50

{extra}
"#,
        store = dir.join("ledger.db").display(),
        rides = rides.display(),
    );
    std::fs::write(&config_path, content).unwrap();
    config_path
}

#[test]
fn test_init_command() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("nested").join("config.toml");

    let output = fitwatch(&config_path, &["init"]);
    assert!(output.status.success());
    assert!(config_path.exists());

    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("version = 1"));
    assert!(content.contains("[watch]"));
    assert!(content.contains("[dispatch]"));

    // Refuses to overwrite without --force
    let output = fitwatch(&config_path, &["init"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--force"));

    let output = fitwatch(&config_path, &["init", "--force"]);
    assert!(output.status.success());
}

#[test]
fn test_config_command() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = write_config(temp_dir.path(), "[dispatch]\nmax_retries = 7\n");

    let output = fitwatch(&config_path, &["config"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("max_retries = 7"));
    assert!(stdout.contains("settle_ms = 50"));
    assert!(stdout.contains("extension = \"fit\""));
}

#[test]
fn test_run_once_then_stats() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = write_config(temp_dir.path(), "");
    let rides = temp_dir.path().join("rides");
    std::fs::write(rides.join("morning.fit"), b"ride one").unwrap();
    std::fs::write(rides.join("evening.FIT"), b"ride two").unwrap();
    std::fs::write(rides.join("notes.txt"), b"not a ride").unwrap();

    let output = fitwatch(&config_path, &["run", "--once"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(temp_dir.path().join("ledger.db").exists());

    let output = fitwatch(&config_path, &["stats"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2 artifacts"));
    assert!(stdout.contains("morning.fit"));

    // A second run finds nothing new.
    let output = fitwatch(&config_path, &["run", "--once"]);
    assert!(output.status.success());
    let output = fitwatch(&config_path, &["stats"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2 artifacts"));
}

#[test]
fn test_invalid_destination_fails_fast() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = write_config(
        temp_dir.path(),
        "[intervals]\nenabled = true\nathlete_id = \"i12345\"\n",
    );

    let output = fitwatch(&config_path, &["run", "--once"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("api_key"));
    assert!(!temp_dir.path().join("ledger.db").exists());
}
