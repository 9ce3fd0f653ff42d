use std::collections::HashMap;

use anyhow::Result;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use uuid::Uuid;

use crate::{
    backend::{OperationEvent, SqliteBackend},
    catalog::CatalogBot,
    config::Settings,
    radar::StatusRecord,
    utils::{iso_now, now_ts, poisson_sample},
};

/// Rolling window for the wins/losses counters reported on each status row.
const RECENT_WINDOW: usize = 20;

#[derive(Default)]
struct BotActivity {
    consecutive_losses: i64,
    ops_since_pattern: i64,
    total_ops: i64,
    total_wins: i64,
    last_pattern: Option<String>,
    // true = win, oldest first, capped at RECENT_WINDOW
    recent: Vec<bool>,
}

/// Drives synthetic bot activity through the backend so the radar cache and
/// ranking service have something live to chew on: Poisson-arrival operations,
/// win/loss drawn from catalog accuracy, and martingale-style disable rules
/// keyed off loss streaks.
pub struct Simulator {
    settings: Settings,
    backend: SqliteBackend,
    catalog: Vec<CatalogBot>,
    activity: HashMap<String, BotActivity>,
    rng: SmallRng,
}

impl Simulator {
    pub fn new(settings: Settings, backend: SqliteBackend, catalog: Vec<CatalogBot>) -> Self {
        Self {
            settings,
            backend,
            catalog,
            activity: HashMap::new(),
            rng: SmallRng::seed_from_u64(rand::random()),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut tick =
            tokio::time::interval(std::time::Duration::from_secs(self.settings.sim_tick_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        log::info!(
            "sim.start bots={} lambda={}",
            self.catalog.len(),
            self.settings.sim_ops_lambda
        );
        loop {
            tick.tick().await;
            if let Err(e) = self.step() {
                log::warn!("sim.step.error {e:#}");
            }
        }
    }

    fn step(&mut self) -> Result<()> {
        let ops = poisson_sample(&mut self.rng, self.settings.sim_ops_lambda);
        for _ in 0..ops {
            let idx = self.rng.random_range(0..self.catalog.len());
            self.run_operation(idx)?;
        }

        // Rarely drop a status row outright so REMOVE events flow too; the
        // next operation for that bot recreates it.
        if self.rng.random::<f64>() < self.settings.sim_drop_rate {
            let idx = self.rng.random_range(0..self.catalog.len());
            let name = self.catalog[idx].name.clone();
            self.activity.remove(&name);
            self.backend.delete_status(&name)?;
            log::debug!("sim.drop bot={name}");
        }
        Ok(())
    }

    fn run_operation(&mut self, idx: usize) -> Result<()> {
        let bot = self.catalog[idx].clone();
        let won = self.rng.random::<f64>() < (bot.accuracy_pct / 100.0).clamp(0.05, 0.98);

        self.backend.insert_operation(&OperationEvent {
            id: Uuid::new_v4().to_string(),
            bot_name: bot.name.clone(),
            won,
            ts: now_ts(),
        })?;

        let state = self.activity.entry(bot.name.clone()).or_default();
        state.total_ops += 1;
        state.ops_since_pattern += 1;
        state.recent.push(won);
        if state.recent.len() > RECENT_WINDOW {
            state.recent.remove(0);
        }
        if won {
            state.total_wins += 1;
            state.consecutive_losses = 0;
        } else {
            state.consecutive_losses += 1;
            if state.consecutive_losses >= 3 {
                state.last_pattern = Some(format!(
                    "{}x loss streak",
                    state.consecutive_losses
                ));
                state.ops_since_pattern = 0;
            }
        }

        let threshold = disable_threshold(bot.risk_level);
        let safe = state.consecutive_losses < threshold;
        let reason = if safe {
            "operating normally".to_string()
        } else {
            format!("max consecutive losses reached ({threshold})")
        };
        let wins_recent = state.recent.iter().filter(|w| **w).count() as i64;
        let rec = StatusRecord {
            id: Uuid::new_v4().to_string(),
            bot_name: bot.name.clone(),
            is_safe_to_operate: safe,
            reason,
            operations_since_last_pattern: state.ops_since_pattern,
            last_updated: iso_now(),
            last_pattern_found: state.last_pattern.clone(),
            losses_in_last_ops: Some(state.recent.len() as i64 - wins_recent),
            wins_in_last_ops: Some(wins_recent),
            historical_accuracy: if state.total_ops > 0 {
                Some(state.total_wins as f64 / state.total_ops as f64)
            } else {
                None
            },
            auto_disable_after_ops: Some(threshold),
        };
        self.backend.upsert_status(&rec)?;
        Ok(())
    }
}

/// How many consecutive losses a bot tolerates before it is flagged unsafe.
/// Riskier gale progressions blow up faster, so their budget is smaller.
fn disable_threshold(risk_level: u8) -> i64 {
    (11 - i64::from(risk_level.clamp(1, 10))).max(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChangeFeed;

    #[test]
    fn disable_threshold_shrinks_with_risk() {
        assert_eq!(disable_threshold(1), 10);
        assert_eq!(disable_threshold(5), 6);
        assert_eq!(disable_threshold(10), 2);
        // Out-of-range levels are clamped, never zero.
        assert_eq!(disable_threshold(0), 10);
        assert!(disable_threshold(200) >= 2);
    }

    #[test]
    fn operations_drive_status_rows_and_events() {
        let path =
            std::env::temp_dir().join(format!("botradar-sim-test-{}.sqlite", Uuid::new_v4()));
        let backend = SqliteBackend::new(path.to_str().unwrap(), 64).unwrap();
        backend.init_db().unwrap();

        let settings = Settings {
            run_mode: "live".to_string(),
            sqlite_path: path.to_str().unwrap().to_string(),
            feed_channel_capacity: 64,
            rank_on_rounded: false,
            sim_enabled: true,
            sim_tick_secs: 1,
            sim_ops_lambda: 1.0,
            sim_drop_rate: 0.0,
            dashboard_enabled: false,
            dashboard_host: "127.0.0.1".to_string(),
            dashboard_port: 0,
        };
        let catalog = crate::catalog::default_catalog();
        let mut sim = Simulator::new(settings, backend.clone(), catalog.clone());

        for idx in 0..catalog.len() {
            sim.run_operation(idx).unwrap();
        }

        let rows = backend.fetch_all().unwrap();
        assert_eq!(rows.len(), catalog.len());
        for row in rows {
            let rec: StatusRecord = serde_json::from_value(row).unwrap();
            assert!(rec.auto_disable_after_ops.unwrap() >= 2);
            assert!(!rec.last_updated.is_empty());
        }
    }

    #[test]
    fn loss_streak_flags_bot_unsafe() {
        let path =
            std::env::temp_dir().join(format!("botradar-sim-test-{}.sqlite", Uuid::new_v4()));
        let backend = SqliteBackend::new(path.to_str().unwrap(), 64).unwrap();
        backend.init_db().unwrap();

        let settings = Settings {
            run_mode: "live".to_string(),
            sqlite_path: path.to_str().unwrap().to_string(),
            feed_channel_capacity: 64,
            rank_on_rounded: false,
            sim_enabled: true,
            sim_tick_secs: 1,
            sim_ops_lambda: 1.0,
            sim_drop_rate: 0.0,
            dashboard_enabled: false,
            dashboard_host: "127.0.0.1".to_string(),
            dashboard_port: 0,
        };
        // Single maximally risky bot that never wins: threshold 2 trips fast.
        let mut gale = crate::catalog::default_catalog()
            .into_iter()
            .find(|b| b.name == "Gale Rider")
            .unwrap();
        gale.accuracy_pct = 0.0;
        let mut sim = Simulator::new(settings, backend.clone(), vec![gale]);

        // accuracy clamps to 0.05, so a handful of ops is overwhelmingly
        // likely to include the needed loss streak; loop until flagged.
        let mut flagged = false;
        for _ in 0..200 {
            sim.run_operation(0).unwrap();
            let row = backend.fetch_all().unwrap().pop().unwrap();
            let rec: StatusRecord = serde_json::from_value(row).unwrap();
            if !rec.is_safe_to_operate {
                assert!(rec.reason.contains("max consecutive losses"));
                flagged = true;
                break;
            }
        }
        assert!(flagged, "bot never tripped its loss-streak threshold");
    }
}
