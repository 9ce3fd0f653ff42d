use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{OperationEvent, StatsSource};
use crate::catalog::{default_external_stats, CatalogBot};
use crate::utils::normalize_name;

/// Per-bot statistics as reported by the backend aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalStats {
    pub bot_name: String,
    pub accuracy_pct: f64,
    pub wins: i64,
    pub losses: i64,
    pub total_operations: i64,
}

/// Merges backend-reported stats into the local catalog and ranks the result.
/// Pure apart from the stats fetch; each call is independent.
pub struct RankingService {
    source: Arc<dyn StatsSource>,
    catalog: Vec<CatalogBot>,
    rank_on_rounded: bool,
}

impl RankingService {
    pub fn new(source: Arc<dyn StatsSource>, catalog: Vec<CatalogBot>, rank_on_rounded: bool) -> Self {
        Self {
            source,
            catalog,
            rank_on_rounded,
        }
    }

    /// Fetch, merge, rank. The one entry point the dashboard uses.
    pub fn rankings(&self) -> Vec<CatalogBot> {
        let stats = self.fetch_external_stats();
        reconcile(&stats, &self.catalog, self.rank_on_rounded)
    }

    /// Stats with three fallback tiers: the precomputed view, then an
    /// aggregation of raw operation events, then the bundled dataset. Never
    /// returns empty; tier failures are logged, not propagated.
    pub fn fetch_external_stats(&self) -> Vec<ExternalStats> {
        match self.source.query_performance_view() {
            Ok(rows) if !rows.is_empty() => return rows,
            Ok(_) => log::warn!("ranking.view.empty falling back to raw operation events"),
            Err(e) => log::warn!("ranking.view.error {e:#}"),
        }

        match self.source.query_operation_events() {
            Ok(events) => {
                let agg = aggregate_operations(&events);
                if !agg.is_empty() {
                    return agg;
                }
                log::warn!("ranking.events.empty falling back to bundled stats");
            }
            Err(e) => log::warn!("ranking.events.error {e:#}"),
        }

        default_external_stats()
    }
}

/// Fold raw win/loss events into per-bot stats, preserving first-seen order.
pub fn aggregate_operations(events: &[OperationEvent]) -> Vec<ExternalStats> {
    let mut order: Vec<String> = Vec::new();
    let mut tally: HashMap<String, (i64, i64)> = HashMap::new();
    for ev in events {
        let name = ev.bot_name.trim();
        if name.is_empty() {
            continue;
        }
        let entry = tally.entry(name.to_string()).or_insert_with(|| {
            order.push(name.to_string());
            (0, 0)
        });
        if ev.won {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
    }
    order
        .into_iter()
        .map(|name| {
            let (wins, losses) = tally[&name];
            let total = wins + losses;
            ExternalStats {
                accuracy_pct: if total > 0 {
                    100.0 * wins as f64 / total as f64
                } else {
                    0.0
                },
                bot_name: name,
                wins,
                losses,
                total_operations: total,
            }
        })
        .collect()
}

/// Merge external stats into the catalog and assign ranks.
///
/// The merged list is built in original catalog order: external values overlay
/// matched entries (exact case-insensitive name first, normalized name
/// second), unmatched catalog entries pass through unchanged, and external
/// records with no catalog counterpart are warned about and dropped. When
/// nothing matched at all the catalog comes back in its original order with
/// ranks 1..N. Otherwise the list is stable-sorted by accuracy descending, so
/// ties keep their catalog-relative order.
///
/// `rank_on_rounded` picks which accuracy drives the sort: the stored display
/// value is always rounded to a whole percent, but by default ranking uses the
/// unrounded figure to avoid tie artifacts from premature rounding.
pub fn reconcile(
    stats: &[ExternalStats],
    catalog: &[CatalogBot],
    rank_on_rounded: bool,
) -> Vec<CatalogBot> {
    let mut by_exact: HashMap<String, usize> = HashMap::new();
    let mut by_norm: HashMap<String, usize> = HashMap::new();
    for (i, s) in stats.iter().enumerate() {
        by_exact.entry(s.bot_name.to_lowercase()).or_insert(i);
        by_norm.entry(normalize_name(&s.bot_name)).or_insert(i);
    }

    let mut used = vec![false; stats.len()];
    let mut matched = 0usize;
    // (bot, sort key)
    let mut merged: Vec<(CatalogBot, f64)> = Vec::with_capacity(catalog.len());

    for bot in catalog {
        let hit = by_exact
            .get(&bot.name.to_lowercase())
            .or_else(|| by_norm.get(&normalize_name(&bot.name)))
            .copied();

        let mut out = bot.clone();
        let key = match hit {
            Some(i) => {
                used[i] = true;
                matched += 1;
                let s = &stats[i];
                out.accuracy_pct = s.accuracy_pct.round();
                out.operations = s.total_operations;
                out.wins = Some(s.wins);
                out.losses = Some(s.losses);
                if rank_on_rounded {
                    s.accuracy_pct.round()
                } else {
                    s.accuracy_pct
                }
            }
            None => out.accuracy_pct,
        };
        merged.push((out, key));
    }

    for (i, s) in stats.iter().enumerate() {
        if !used[i] {
            log::warn!("ranking.unmatched_external bot={}", s.bot_name);
        }
    }

    if matched == 0 {
        // External stats entirely unusable: the catalog itself, ranked by its
        // original order, is still a valid answer.
        return finish(merged);
    }

    merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    finish(merged)
}

fn finish(merged: Vec<(CatalogBot, f64)>) -> Vec<CatalogBot> {
    merged
        .into_iter()
        .enumerate()
        .map(|(i, (mut bot, _))| {
            bot.rank = i + 1;
            bot
        })
        .collect()
}
