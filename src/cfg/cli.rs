// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::PathBuf;

use anyhow::{Context, Result, ensure};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "VARBRIDGE_CONFIG";

/// Resolve a bridge config path to its canonical absolute form. Relative
/// paths are anchored at the server's working directory, and the file
/// must already exist: a worker spawned with a bad config path should
/// fail before the readiness handshake, not after.
pub fn resolve_config_path(raw: &str) -> Result<PathBuf> {
    ensure!(!raw.is_empty(), "config path must not be empty");

    let path = PathBuf::from(raw);
    let abs = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(path)
    };

    abs.canonicalize()
        .with_context(|| format!("bridge config {abs:?} is not readable"))
}

/// Config file for this run: the first CLI argument wins, then
/// `VARBRIDGE_CONFIG`, then none (pure defaults + env overrides).
pub fn config_path_from_invocation() -> Result<Option<PathBuf>> {
    let explicit = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok().filter(|p| !p.is_empty()));
    explicit.map(|p| resolve_config_path(&p)).transpose()
}
