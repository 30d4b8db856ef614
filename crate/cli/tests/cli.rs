use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

const PROG_NAME: &str = "lunasample";

fn lunasample() -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin(PROG_NAME)?;
    cmd.env_remove("LUNA_SAMPLES_CONF")
        .env_remove("LUNA_PKCS11_LIB")
        .env_remove("RUST_LOG");
    Ok(cmd)
}

#[test]
fn test_help_lists_samples() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = lunasample()?;
    cmd.arg("--help");
    cmd.assert().success().stdout(
        predicate::str::contains("get-info")
            .and(predicate::str::contains("threading"))
            .and(predicate::str::contains("private-wrap"))
            .and(predicate::str::contains("ssl-client")),
    );
    Ok(())
}

#[test]
fn test_get_info_requires_a_flag() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = lunasample()?;
    cmd.arg("get-info");
    cmd.assert().failure().code(2);
    Ok(())
}

#[test]
fn test_missing_library() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = lunasample()?;
    cmd.args([
        "--pkcs11-lib",
        "/nonexistent/libCryptoki2_64.so",
        "get-info",
        "--info",
    ]);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("ERROR:"));
    Ok(())
}

#[test]
fn test_malformed_configuration() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let conf = dir.path().join("luna.toml");
    std::fs::write(&conf, "unknown_entry = 1\n")?;

    let mut cmd = lunasample()?;
    cmd.arg("--conf").arg(&conf).args(["get-info", "--info"]);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("malformed configuration file"));
    Ok(())
}
