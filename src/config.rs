//! Runtime configuration for the gate and mutator pipeline.
//! Values come from environment variables with safe defaults; nothing here is hot-reloaded.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const DEFAULT_MUTATION_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Development,
    Test,
    Production,
}

impl RunMode {
    fn parse(s: &str) -> Option<RunMode> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Some(RunMode::Development),
            "test" | "testing" => Some(RunMode::Test),
            "production" | "prod" => Some(RunMode::Production),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub mode: RunMode,
    /// Ceiling for a single mutation; queued mutations run in order so one stuck
    /// mutation blocks all the ones behind it.
    #[serde(default = "GateConfig::default_timeout_ms")]
    pub mutation_timeout_ms: u64,
    #[serde(default)]
    pub development_logging: bool,
}

impl GateConfig {
    fn default_timeout_ms() -> u64 { DEFAULT_MUTATION_TIMEOUT_MS }

    pub fn for_mode(mode: RunMode) -> Self {
        Self { mode, mutation_timeout_ms: DEFAULT_MUTATION_TIMEOUT_MS, development_logging: mode != RunMode::Production }
    }

    /// ROWGATE_ENV, ROWGATE_MUTATION_TIMEOUT_MS, ROWGATE_DEV_LOGGING
    pub fn from_env() -> Self {
        let mode = env::var("ROWGATE_ENV").ok().and_then(|v| RunMode::parse(&v)).unwrap_or(RunMode::Development);
        let mut cfg = Self::for_mode(mode);
        if let Some(ms) = parse_u64_env("ROWGATE_MUTATION_TIMEOUT_MS") {
            if ms > 0 { cfg.mutation_timeout_ms = ms; }
        }
        if let Some(b) = parse_bool_env("ROWGATE_DEV_LOGGING") {
            cfg.development_logging = b;
        }
        cfg
    }

    pub fn is_production(&self) -> bool { self.mode == RunMode::Production }

    /// Denial errors carry the pretty-printed query outside production.
    pub fn diagnostics(&self) -> bool { !self.is_production() }

    pub fn mutation_timeout(&self) -> Duration { Duration::from_millis(self.mutation_timeout_ms) }
}

impl Default for GateConfig {
    fn default() -> Self { Self::for_mode(RunMode::Development) }
}

fn parse_u64_env(name: &str) -> Option<u64> {
    match env::var(name) {
        Ok(val) => val.trim().parse::<u64>().ok(),
        Err(_) => None,
    }
}

fn parse_bool_env(name: &str) -> Option<bool> {
    match env::var(name) {
        Ok(v) => {
            let s = v.to_lowercase();
            match s.as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            }
        }
        Err(_) => None,
    }
}
