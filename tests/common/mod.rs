pub mod harness;

use std::path::Path;
use std::process::Command;

#[allow(dead_code)]
pub fn scl() -> Command {
    Command::new(env!("CARGO_BIN_EXE_scl"))
}

/// Run scl in `dir` with --format json and parse the output.
///
/// The attribute store is redirected into `dir` so runs are hermetic.
#[allow(dead_code)]
pub fn scl_json_in(dir: &Path, args: &[&str]) -> (serde_json::Value, i32) {
    let output = scl()
        .current_dir(dir)
        .env("SCL_CACHE_DIR", dir.join(".scl-cache"))
        .args(args)
        .output()
        .expect("failed to run scl");
    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap_or_else(|e| {
        panic!(
            "invalid JSON: {e}\nstdout: {stdout}\nstderr: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    });
    (json, code)
}

/// Run scl in `dir` with NO_COLOR=1 and return (stderr, exit_code).
#[allow(dead_code)]
pub fn scl_human_in(dir: &Path, args: &[&str]) -> (String, i32) {
    let output = scl()
        .current_dir(dir)
        .env("NO_COLOR", "1")
        .env("SCL_CACHE_DIR", dir.join(".scl-cache"))
        .args(args)
        .output()
        .expect("failed to run scl");
    let code = output.status.code().unwrap_or(-1);
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    (stderr, code)
}
