// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{cfg::logger::LogConfig, store::DEFAULT_SESSION_TTL};

/// Environment override for the listen address.
pub const ENV_BIND_ADDRESS: &str = "GRPC_BIND_ADDRESS";
/// Environment override for the listen port (0 = ephemeral).
pub const ENV_PORT: &str = "GRPC_PORT";
/// Environment override for the default session TTL, in seconds.
pub const ENV_DEFAULT_TTL: &str = "SESSION_DEFAULT_TTL";

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Listener parameters.
    pub server: ServerConfig,
    /// Session lifetime management.
    pub session: SessionConfig,
    /// Watch stream tuning.
    pub watch: WatchConfig,
    /// Logger setup; stdout stays reserved for the readiness handshake.
    pub logger: LogConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(rename = "BindAddress")]
    pub bind_address: String,
    /// 0 asks the kernel for an ephemeral port.
    #[serde(rename = "Port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(rename = "DefaultTtl", with = "serde_secs")]
    /// TTL applied when a session does not pick its own.
    pub default_ttl: Duration,
    #[serde(rename = "SweepInterval", with = "serde_secs")]
    /// How often the background eviction pass runs.
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_SESSION_TTL,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct WatchConfig {
    #[serde(rename = "QueueCapacity")]
    /// Per-observer outbound buffer; overflow drops the oldest event.
    pub queue_capacity: usize,
    #[serde(rename = "HeartbeatInterval", with = "serde_secs")]
    /// Idle time before a keep-alive update is sent.
    pub heartbeat: Duration,
    #[serde(rename = "SweepInterval", with = "serde_secs")]
    /// Backstop pass removing observers whose liveness handle died.
    pub sweep_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            heartbeat: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Loads the configuration from YAML, applies environment overrides,
    /// validates it and returns the ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.apply_env_overrides()?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Pure defaults plus environment overrides; used when no config file
    /// is given.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Config::default();
        cfg.apply_env_overrides()?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// `GRPC_BIND_ADDRESS`, `GRPC_PORT` and `SESSION_DEFAULT_TTL` always
    /// win over the file.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var(ENV_BIND_ADDRESS)
            && !addr.is_empty()
        {
            self.server.bind_address = addr;
        }
        if let Ok(port) = std::env::var(ENV_PORT)
            && !port.is_empty()
        {
            self.server.port = port
                .parse()
                .with_context(|| format!("{ENV_PORT}={port} is not a valid port"))?;
        }
        if let Ok(ttl) = std::env::var(ENV_DEFAULT_TTL)
            && !ttl.is_empty()
        {
            let secs: u64 = ttl
                .parse()
                .with_context(|| format!("{ENV_DEFAULT_TTL}={ttl} is not a number of seconds"))?;
            self.session.default_ttl = Duration::from_secs(secs);
        }
        Ok(())
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            !self.server.bind_address.is_empty(),
            "BindAddress must not be empty"
        );
        ensure!(
            self.session.default_ttl >= Duration::from_secs(1),
            "DefaultTtl must be >= 1s"
        );
        ensure!(
            self.session.sweep_interval >= Duration::from_secs(1),
            "session SweepInterval must be >= 1s"
        );
        ensure!(self.watch.queue_capacity >= 1, "QueueCapacity must be >= 1");
        ensure!(
            self.watch.heartbeat >= Duration::from_secs(1),
            "HeartbeatInterval must be >= 1s"
        );
        ensure!(
            self.watch.sweep_interval >= Duration::from_secs(1),
            "watch SweepInterval must be >= 1s"
        );
        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
