//! Shared helpers for the binary-level tests
//!
//! Every command runs inside its own temp directory with `HOME` pointed
//! there too, so no configuration file from the host is picked up.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

const ENV_VARS: &[&str] = &[
    "TENEO_CONFIG",
    "TENEO_ENDPOINT_URL",
    "TENEO_ENDPOINT_VERSION",
    "TENEO_STORE_PATH",
    "TENEO_LOG_LEVEL",
    "TENEO_LOG_FILE",
    "TENEO_LOG_JSON",
    "RUST_LOG",
];

/// An isolated working directory for one test
pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write `contents` to `name` and return its path
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.join(name);
        fs::write(&path, contents).expect("write fixture");
        path
    }

    /// A `teneo-node` command confined to this sandbox
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("teneo-node").expect("binary built");
        cmd.current_dir(self.path())
            .env("HOME", self.path())
            .env("XDG_CONFIG_HOME", self.join(".config"));
        for var in ENV_VARS {
            cmd.env_remove(var);
        }
        cmd
    }

    /// The same isolation for a `std::process::Command`, for long-running runs
    pub fn std_cmd(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(env!("CARGO_BIN_EXE_teneo-node"));
        cmd.current_dir(self.path())
            .env("HOME", self.path())
            .env("XDG_CONFIG_HOME", self.join(".config"));
        for var in ENV_VARS {
            cmd.env_remove(var);
        }
        cmd
    }
}
