use std::env;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

fn get_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn get_env_bool(key: &str, default: bool) -> bool {
    match get_env(key) {
        None => default,
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"),
    }
}

fn get_env_f64(key: &str, default: f64) -> Result<f64> {
    match get_env(key) {
        None => Ok(default),
        Some(v) => Ok(v
            .parse::<f64>()
            .map_err(|e| anyhow!("{key} invalid float: {e}"))?),
    }
}

fn get_env_usize(key: &str, default: usize) -> Result<usize> {
    match get_env(key) {
        None => Ok(default),
        Some(v) => Ok(v
            .parse::<usize>()
            .map_err(|e| anyhow!("{key} invalid int: {e}"))?),
    }
}

fn get_env_string(key: &str, default: &str) -> String {
    get_env(key).unwrap_or_else(|| default.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Modes
    pub run_mode: String, // live|rank

    // Storage (the local stand-in for the hosted backend)
    pub sqlite_path: String,

    // Change feed
    pub feed_channel_capacity: usize,

    // Ranking
    pub rank_on_rounded: bool,

    // Synthetic activity driver
    pub sim_enabled: bool,
    pub sim_tick_secs: u64,
    pub sim_ops_lambda: f64,
    pub sim_drop_rate: f64,

    // Dashboard
    pub dashboard_enabled: bool,
    pub dashboard_host: String,
    pub dashboard_port: u16,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let run_mode = get_env_string("RUN_MODE", "live").to_lowercase();
        if !matches!(run_mode.as_str(), "live" | "rank") {
            return Err(anyhow!("RUN_MODE must be live|rank (got {run_mode})"));
        }

        let s = Self {
            run_mode,
            sqlite_path: get_env_string("SQLITE_PATH", "./data/botradar.sqlite"),
            feed_channel_capacity: get_env_usize("FEED_CHANNEL_CAPACITY", 256)?,
            rank_on_rounded: get_env_bool("RANK_ON_ROUNDED", false),
            sim_enabled: get_env_bool("SIM_ENABLED", true),
            sim_tick_secs: get_env_usize("SIM_TICK_SECS", 2)? as u64,
            sim_ops_lambda: get_env_f64("SIM_OPS_LAMBDA", 1.5)?,
            sim_drop_rate: get_env_f64("SIM_DROP_RATE", 0.02)?,
            dashboard_enabled: get_env_bool("DASHBOARD_ENABLED", true),
            dashboard_host: get_env_string("DASHBOARD_HOST", "127.0.0.1"),
            dashboard_port: get_env_usize("DASHBOARD_PORT", 8000)? as u16,
        };

        s.validate()?;
        Ok(s)
    }

    pub fn validate(&self) -> Result<()> {
        if self.feed_channel_capacity < 16 {
            return Err(anyhow!(
                "FEED_CHANNEL_CAPACITY must be >= 16 (got {})",
                self.feed_channel_capacity
            ));
        }
        if self.sim_tick_secs < 1 {
            return Err(anyhow!(
                "SIM_TICK_SECS must be >= 1 (got {})",
                self.sim_tick_secs
            ));
        }
        if !self.sim_ops_lambda.is_finite() || self.sim_ops_lambda < 0.0 {
            return Err(anyhow!(
                "SIM_OPS_LAMBDA must be >= 0 (got {})",
                self.sim_ops_lambda
            ));
        }
        if !(0.0..=1.0).contains(&self.sim_drop_rate) {
            return Err(anyhow!(
                "SIM_DROP_RATE must be in [0,1] (got {})",
                self.sim_drop_rate
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Settings {
        Settings {
            run_mode: "live".to_string(),
            sqlite_path: ":memory:".to_string(),
            feed_channel_capacity: 64,
            rank_on_rounded: false,
            sim_enabled: false,
            sim_tick_secs: 2,
            sim_ops_lambda: 1.0,
            sim_drop_rate: 0.0,
            dashboard_enabled: false,
            dashboard_host: "127.0.0.1".to_string(),
            dashboard_port: 0,
        }
    }

    #[test]
    fn valid_settings_pass() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn rejects_bad_knobs() {
        let mut s = base();
        s.feed_channel_capacity = 1;
        assert!(s.validate().is_err());

        let mut s = base();
        s.sim_drop_rate = 1.5;
        assert!(s.validate().is_err());

        let mut s = base();
        s.sim_ops_lambda = f64::NAN;
        assert!(s.validate().is_err());
    }
}
