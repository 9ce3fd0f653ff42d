use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;

use crate::radar::StatusRecord;
use crate::ranking::ExternalStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Update,
    Remove,
    /// Unknown feed event kinds are carried through so consumers can ignore
    /// them without breaking on future additions.
    Other,
}

/// One change-feed message: the kind plus the row payloads the feed origin
/// attaches (new row for creates/updates, prior row for removes).
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: EventKind,
    pub new_record: Option<JsonValue>,
    pub old_record: Option<JsonValue>,
}

/// Push-based change feed with a pull-based bootstrap, the seam the radar
/// cache consumes. The transport behind it is the collaborator's business.
pub trait ChangeFeed: Send + Sync {
    fn fetch_all(&self) -> Result<Vec<JsonValue>>;
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Aggregate statistics source consumed by the ranking service: a precomputed
/// per-bot view, plus the raw operation log as a fallback.
pub trait StatsSource: Send + Sync {
    fn query_performance_view(&self) -> Result<Vec<ExternalStats>>;
    fn query_operation_events(&self) -> Result<Vec<OperationEvent>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationEvent {
    pub id: String,
    pub bot_name: String,
    pub won: bool,
    pub ts: f64,
}

/// Local stand-in for the hosted backend: SQLite tables for statuses and raw
/// operations, and a broadcast channel standing in for the realtime channel.
/// Writers publish a matching change event after every committed write.
#[derive(Clone)]
pub struct SqliteBackend {
    path: String,
    events_tx: broadcast::Sender<ChangeEvent>,
}

impl SqliteBackend {
    pub fn new(path: &str, channel_capacity: usize) -> Result<Self> {
        if path.trim().is_empty() {
            anyhow::bail!("SQLITE_PATH is empty");
        }
        if path != ":memory:" && !path.starts_with("file:") {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create sqlite parent dir for {path}"))?;
            }
        }

        // rusqlite::Connection is not Send/Sync; we keep only a path and open
        // short-lived connections per operation. WAL keeps this fast enough
        // for status upserts and dashboard reads.
        let (events_tx, _) = broadcast::channel(channel_capacity.max(16));
        Ok(Self {
            path: path.to_string(),
            events_tx,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn open_conn(&self) -> Result<Connection> {
        let conn =
            Connection::open(&self.path).with_context(|| format!("open sqlite {}", self.path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Ok(conn)
    }

    pub fn init_db(&self) -> Result<()> {
        let conn = self.open_conn()?;
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS bot_status (
  bot_name TEXT PRIMARY KEY,
  id TEXT,
  is_safe_to_operate INTEGER,
  reason TEXT,
  operations_since_last_pattern INTEGER,
  last_pattern_found TEXT,
  losses_in_last_ops INTEGER,
  wins_in_last_ops INTEGER,
  historical_accuracy REAL,
  auto_disable_after_ops INTEGER,
  last_updated TEXT
);

CREATE TABLE IF NOT EXISTS operation_events (
  id TEXT PRIMARY KEY,
  bot_name TEXT,
  won INTEGER,
  ts REAL
);

CREATE INDEX IF NOT EXISTS idx_ops_bot ON operation_events(bot_name, ts);

CREATE VIEW IF NOT EXISTS bot_performance AS
SELECT bot_name,
       COUNT(*) AS total_operations,
       SUM(won) AS wins,
       COUNT(*) - SUM(won) AS losses,
       100.0 * SUM(won) / COUNT(*) AS accuracy_pct
FROM operation_events
GROUP BY bot_name;
"#,
        )?;
        Ok(())
    }

    /// Insert-or-replace a status row, then publish Create or Update depending
    /// on whether the row existed before this write.
    pub fn upsert_status(&self, rec: &StatusRecord) -> Result<()> {
        let mut conn = self.open_conn()?;
        let tx = conn.transaction()?;
        let existed: bool = tx
            .query_row(
                "SELECT 1 FROM bot_status WHERE bot_name=?",
                params![rec.bot_name],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        tx.execute(
            r#"
INSERT INTO bot_status(
  bot_name, id, is_safe_to_operate, reason,
  operations_since_last_pattern, last_pattern_found,
  losses_in_last_ops, wins_in_last_ops,
  historical_accuracy, auto_disable_after_ops, last_updated
)
VALUES(?,?,?,?,?,?,?,?,?,?,?)
ON CONFLICT(bot_name) DO UPDATE SET
  id=excluded.id,
  is_safe_to_operate=excluded.is_safe_to_operate,
  reason=excluded.reason,
  operations_since_last_pattern=excluded.operations_since_last_pattern,
  last_pattern_found=excluded.last_pattern_found,
  losses_in_last_ops=excluded.losses_in_last_ops,
  wins_in_last_ops=excluded.wins_in_last_ops,
  historical_accuracy=excluded.historical_accuracy,
  auto_disable_after_ops=excluded.auto_disable_after_ops,
  last_updated=excluded.last_updated
"#,
            params![
                rec.bot_name,
                rec.id,
                if rec.is_safe_to_operate { 1 } else { 0 },
                rec.reason,
                rec.operations_since_last_pattern,
                rec.last_pattern_found,
                rec.losses_in_last_ops,
                rec.wins_in_last_ops,
                rec.historical_accuracy,
                rec.auto_disable_after_ops,
                rec.last_updated,
            ],
        )?;
        tx.commit()?;

        let kind = if existed {
            EventKind::Update
        } else {
            EventKind::Create
        };
        let _ = self.events_tx.send(ChangeEvent {
            kind,
            new_record: Some(serde_json::to_value(rec)?),
            old_record: None,
        });
        Ok(())
    }

    /// Delete a status row. Publishes Remove with the prior row attached;
    /// deleting an absent row is a no-op and publishes nothing.
    pub fn delete_status(&self, bot_name: &str) -> Result<()> {
        let conn = self.open_conn()?;
        let old = fetch_status_json(&conn, bot_name)?;
        let Some(old) = old else {
            return Ok(());
        };
        conn.execute("DELETE FROM bot_status WHERE bot_name=?", params![bot_name])?;
        let _ = self.events_tx.send(ChangeEvent {
            kind: EventKind::Remove,
            new_record: None,
            old_record: Some(old),
        });
        Ok(())
    }

    pub fn insert_operation(&self, op: &OperationEvent) -> Result<()> {
        let conn = self.open_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO operation_events(id, bot_name, won, ts) VALUES(?,?,?,?)",
            params![op.id, op.bot_name, if op.won { 1 } else { 0 }, op.ts],
        )?;
        Ok(())
    }
}

fn status_row_to_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<JsonValue> {
    Ok(serde_json::json!({
        "bot_name": r.get::<_, String>(0)?,
        "id": r.get::<_, Option<String>>(1)?.unwrap_or_default(),
        "is_safe_to_operate": r.get::<_, i64>(2)? != 0,
        "reason": r.get::<_, Option<String>>(3)?.unwrap_or_default(),
        "operations_since_last_pattern": r.get::<_, Option<i64>>(4)?.unwrap_or(0),
        "last_pattern_found": r.get::<_, Option<String>>(5)?,
        "losses_in_last_ops": r.get::<_, Option<i64>>(6)?,
        "wins_in_last_ops": r.get::<_, Option<i64>>(7)?,
        "historical_accuracy": r.get::<_, Option<f64>>(8)?,
        "auto_disable_after_ops": r.get::<_, Option<i64>>(9)?,
        "last_updated": r.get::<_, Option<String>>(10)?.unwrap_or_default(),
    }))
}

const STATUS_COLUMNS: &str = "bot_name, id, is_safe_to_operate, reason, \
     operations_since_last_pattern, last_pattern_found, losses_in_last_ops, \
     wins_in_last_ops, historical_accuracy, auto_disable_after_ops, last_updated";

fn fetch_status_json(conn: &Connection, bot_name: &str) -> Result<Option<JsonValue>> {
    let row = conn
        .query_row(
            &format!("SELECT {STATUS_COLUMNS} FROM bot_status WHERE bot_name=?"),
            params![bot_name],
            status_row_to_json,
        )
        .optional()?;
    Ok(row)
}

impl ChangeFeed for SqliteBackend {
    fn fetch_all(&self) -> Result<Vec<JsonValue>> {
        let conn = self.open_conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {STATUS_COLUMNS} FROM bot_status"))?;
        let mut rows = stmt.query([])?;
        let mut out = vec![];
        while let Some(r) = rows.next()? {
            out.push(status_row_to_json(r)?);
        }
        Ok(out)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events_tx.subscribe()
    }
}

impl StatsSource for SqliteBackend {
    fn query_performance_view(&self) -> Result<Vec<ExternalStats>> {
        let conn = self.open_conn()?;
        let mut stmt = conn.prepare(
            "SELECT bot_name, accuracy_pct, wins, losses, total_operations \
             FROM bot_performance ORDER BY bot_name",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = vec![];
        while let Some(r) = rows.next()? {
            out.push(ExternalStats {
                bot_name: r.get(0)?,
                accuracy_pct: r.get(1)?,
                wins: r.get(2)?,
                losses: r.get(3)?,
                total_operations: r.get(4)?,
            });
        }
        Ok(out)
    }

    fn query_operation_events(&self) -> Result<Vec<OperationEvent>> {
        let conn = self.open_conn()?;
        let mut stmt =
            conn.prepare("SELECT id, bot_name, won, ts FROM operation_events ORDER BY ts")?;
        let mut rows = stmt.query([])?;
        let mut out = vec![];
        while let Some(r) = rows.next()? {
            out.push(OperationEvent {
                id: r.get(0)?,
                bot_name: r.get(1)?,
                won: r.get::<_, i64>(2)? != 0,
                ts: r.get(3)?,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_backend() -> SqliteBackend {
        let path = std::env::temp_dir().join(format!("botradar-test-{}.sqlite", uuid::Uuid::new_v4()));
        let be = SqliteBackend::new(path.to_str().unwrap(), 64).unwrap();
        be.init_db().unwrap();
        be
    }

    fn record(name: &str, safe: bool) -> StatusRecord {
        StatusRecord {
            id: uuid::Uuid::new_v4().to_string(),
            bot_name: name.to_string(),
            is_safe_to_operate: safe,
            reason: "test".to_string(),
            operations_since_last_pattern: 3,
            last_updated: "2026-01-01T00:00:00Z".to_string(),
            last_pattern_found: None,
            losses_in_last_ops: Some(1),
            wins_in_last_ops: Some(9),
            historical_accuracy: Some(0.9),
            auto_disable_after_ops: Some(5),
        }
    }

    #[test]
    fn upsert_publishes_create_then_update() {
        let be = temp_backend();
        let mut rx = be.subscribe();

        be.upsert_status(&record("Wolf Bot", true)).unwrap();
        be.upsert_status(&record("Wolf Bot", false)).unwrap();

        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.kind, EventKind::Create);
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.kind, EventKind::Update);
        assert_eq!(
            ev.new_record.unwrap()["is_safe_to_operate"],
            serde_json::json!(false)
        );
    }

    #[test]
    fn delete_publishes_remove_with_prior_row_and_is_idempotent() {
        let be = temp_backend();
        be.upsert_status(&record("Sniper Bot", true)).unwrap();

        let mut rx = be.subscribe();
        be.delete_status("Sniper Bot").unwrap();
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.kind, EventKind::Remove);
        assert_eq!(
            ev.old_record.unwrap()["bot_name"],
            serde_json::json!("Sniper Bot")
        );

        // Absent row: no error, no event.
        be.delete_status("Sniper Bot").unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fetch_all_round_trips_rows() {
        let be = temp_backend();
        be.upsert_status(&record("Wolf Bot", true)).unwrap();
        be.upsert_status(&record("Orion", false)).unwrap();

        let rows = be.fetch_all().unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            let rec: StatusRecord = serde_json::from_value(row.clone()).unwrap();
            assert!(!rec.bot_name.is_empty());
            assert_eq!(rec.auto_disable_after_ops, Some(5));
        }
    }

    #[test]
    fn performance_view_aggregates_operations() {
        let be = temp_backend();
        for i in 0..10 {
            be.insert_operation(&OperationEvent {
                id: format!("op-{i}"),
                bot_name: "Wolf Bot".to_string(),
                won: i < 8,
                ts: i as f64,
            })
            .unwrap();
        }

        let stats = be.query_performance_view().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].bot_name, "Wolf Bot");
        assert_eq!(stats[0].wins, 8);
        assert_eq!(stats[0].losses, 2);
        assert_eq!(stats[0].total_operations, 10);
        assert!((stats[0].accuracy_pct - 80.0).abs() < 1e-9);
    }
}
