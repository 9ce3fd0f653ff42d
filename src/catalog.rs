use serde::{Deserialize, Serialize};

use crate::ranking::ExternalStats;

/// A bot as described by the local catalog. `accuracy_pct`, `operations`,
/// `wins` and `losses` may be overlaid by external stats during
/// reconciliation; `rank` is derived, never stored authoritatively.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogBot {
    pub id: String,
    pub name: String,
    pub description: String,
    pub strategy: String,
    pub accuracy_pct: f64,
    pub operations: i64,
    pub risk_level: u8,
    #[serde(default)]
    pub rank: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wins: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub losses: Option<i64>,
}

fn bot(
    id: &str,
    name: &str,
    description: &str,
    strategy: &str,
    accuracy_pct: f64,
    operations: i64,
    risk_level: u8,
) -> CatalogBot {
    CatalogBot {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        strategy: strategy.to_string(),
        accuracy_pct,
        operations,
        risk_level,
        rank: 0,
        wins: None,
        losses: None,
    }
}

/// The static local catalog. Always available, shown even when the backend
/// reports nothing.
pub fn default_catalog() -> Vec<CatalogBot> {
    vec![
        bot(
            "wolf",
            "Wolf Bot",
            "Aggressive trend follower with martingale sizing on losing streaks.",
            "Martingale G2",
            87.0,
            1240,
            8,
        ),
        bot(
            "quantum",
            "Quantum Bot",
            "Mean-reversion entries gated by volatility bands.",
            "Fixed fraction",
            79.0,
            860,
            4,
        ),
        bot(
            "sniper",
            "Sniper Bot",
            "Waits for a confirmed pattern before a single sized entry.",
            "Pattern break",
            83.0,
            410,
            6,
        ),
        bot(
            "falcon2",
            "Falcon Bot 2.0",
            "Momentum scalper, second generation with tighter stops.",
            "Momentum scalp",
            75.0,
            1980,
            7,
        ),
        bot(
            "titan",
            "Titan Bot",
            "Slow swing entries, doubles down at most twice per cycle.",
            "Martingale G1",
            71.0,
            540,
            3,
        ),
        bot(
            "phoenix",
            "Phoenix Bot 1.0",
            "Recovery sequence after drawdown, resets on first win.",
            "Soros ladder",
            68.0,
            320,
            9,
        ),
        bot(
            "gale",
            "Gale Rider",
            "Classic gale progression capped by a hard loss limit.",
            "Martingale G3",
            64.0,
            275,
            10,
        ),
        bot(
            "orion",
            "Orion",
            "Conservative signal copier, skips high-volatility windows.",
            "Flat stake",
            81.0,
            1130,
            2,
        ),
    ]
}

/// Last-resort stats dataset (fallback tier c). Must never be empty: the
/// ranking service's no-empty-result guarantee bottoms out here.
pub fn default_external_stats() -> Vec<ExternalStats> {
    vec![
        ExternalStats {
            bot_name: "Wolf Bot".to_string(),
            accuracy_pct: 86.2,
            wins: 1069,
            losses: 171,
            total_operations: 1240,
        },
        ExternalStats {
            bot_name: "Quantum Bot".to_string(),
            accuracy_pct: 78.4,
            wins: 674,
            losses: 186,
            total_operations: 860,
        },
        ExternalStats {
            bot_name: "Sniper Bot".to_string(),
            accuracy_pct: 82.7,
            wins: 339,
            losses: 71,
            total_operations: 410,
        },
        ExternalStats {
            bot_name: "Falcon Bot 2.0".to_string(),
            accuracy_pct: 74.9,
            wins: 1483,
            losses: 497,
            total_operations: 1980,
        },
        ExternalStats {
            bot_name: "Orion".to_string(),
            accuracy_pct: 80.5,
            wins: 910,
            losses: 220,
            total_operations: 1130,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::normalize_name;
    use std::collections::HashSet;

    #[test]
    fn catalog_names_do_not_collide_after_normalization() {
        let mut seen = HashSet::new();
        for b in default_catalog() {
            let n = normalize_name(&b.name);
            assert!(!n.is_empty(), "{} normalizes to empty", b.name);
            assert!(seen.insert(n.clone()), "{} collides on {n}", b.name);
        }
    }

    #[test]
    fn fallback_stats_are_never_empty_and_all_match_catalog() {
        let stats = default_external_stats();
        assert!(!stats.is_empty());
        let catalog: HashSet<String> = default_catalog()
            .iter()
            .map(|b| normalize_name(&b.name))
            .collect();
        for s in &stats {
            assert!(
                catalog.contains(&normalize_name(&s.bot_name)),
                "{} has no catalog counterpart",
                s.bot_name
            );
        }
    }

    #[test]
    fn risk_levels_are_in_range() {
        for b in default_catalog() {
            assert!((1..=10).contains(&b.risk_level), "{}", b.name);
            assert!((0.0..=100.0).contains(&b.accuracy_pct), "{}", b.name);
        }
    }
}
