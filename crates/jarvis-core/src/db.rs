use crate::types::{Run, RunStatus, RunUpdate, Trigger};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("../schema.sql");

/// Persistent record of every attempt to resolve an issue. Backs
/// idempotency via `is_issue_claimed`.
pub struct Db {
    conn: Mutex<Connection>,
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| ndt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

fn now_str() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
    let status_str: String = row.get(4)?;
    let trigger_str: String = row.get(5)?;
    let created_at_str: String = row.get(12)?;
    let updated_at_str: String = row.get(13)?;
    Ok(Run {
        id: row.get(0)?,
        issue_number: row.get(1)?,
        issue_title: row.get(2)?,
        repo: row.get(3)?,
        status: RunStatus::from_str_lossy(&status_str),
        trigger: match trigger_str.as_str() {
            "webhook" => Trigger::Webhook,
            "poll" => Trigger::Poll,
            _ => Trigger::Cli,
        },
        branch: row.get(6)?,
        pr_url: row.get(7)?,
        error: row.get(8)?,
        agent_output: row.get(9)?,
        agent_name: row.get(10)?,
        tokens_used: row.get(11)?,
        created_at: parse_ts(&created_at_str),
        updated_at: parse_ts(&updated_at_str),
    })
}

const RUN_COLUMNS: &str = "id, issue_number, issue_title, repo, status, trigger, branch, \
     pr_url, error, agent_output, agent_name, tokens_used, created_at, updated_at";

impl Db {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open SQLite database at {path:?}"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .context("failed to set PRAGMAs")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply schema migrations")?;
        // Idempotent column additions for ledgers created before these
        // columns existed. ALTER TABLE fails if the column is already
        // there; ignore that error.
        let alters = [
            "ALTER TABLE runs ADD COLUMN agent_name TEXT",
            "ALTER TABLE runs ADD COLUMN tokens_used INTEGER",
            "ALTER TABLE runs ADD COLUMN pr_url TEXT",
        ];
        for sql in alters {
            let _ = conn.execute(sql, []);
        }
        Ok(())
    }

    pub fn create_run(
        &self,
        issue_number: i64,
        issue_title: &str,
        repo: &str,
        trigger: Trigger,
    ) -> Result<Run> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let now = now_str();
        conn.execute(
            "INSERT INTO runs (issue_number, issue_title, repo, status, trigger, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                issue_number,
                issue_title,
                repo,
                RunStatus::Pending.as_str(),
                trigger.to_string(),
                now,
            ],
        )
        .context("create_run")?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_run(id)
    }

    pub fn update_run(&self, id: i64, update: &RunUpdate) -> Result<Run> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = update.status {
            sets.push("status = ?".to_string());
            values.push(Box::new(status.as_str().to_string()));
        }
        if let Some(branch) = &update.branch {
            sets.push("branch = ?".to_string());
            values.push(Box::new(branch.clone()));
        }
        if let Some(pr_url) = &update.pr_url {
            sets.push("pr_url = ?".to_string());
            values.push(Box::new(pr_url.clone()));
        }
        if let Some(error) = &update.error {
            sets.push("error = ?".to_string());
            values.push(Box::new(error.clone()));
        }
        if let Some(agent_output) = &update.agent_output {
            sets.push("agent_output = ?".to_string());
            values.push(Box::new(agent_output.clone()));
        }
        if let Some(agent_name) = &update.agent_name {
            sets.push("agent_name = ?".to_string());
            values.push(Box::new(agent_name.clone()));
        }
        if let Some(tokens_used) = update.tokens_used {
            sets.push("tokens_used = ?".to_string());
            values.push(Box::new(tokens_used));
        }
        sets.push("updated_at = ?".to_string());
        values.push(Box::new(now_str()));

        let sql = format!("UPDATE runs SET {} WHERE id = ?", sets.join(", "));
        values.push(Box::new(id));

        let param_refs: Vec<&dyn rusqlite::ToSql> =
            values.iter().map(|v| v.as_ref()).collect();
        conn.execute(&sql, param_refs.as_slice())
            .context("update_run")?;
        drop(conn);
        self.get_run(id)
    }

    pub fn get_run(&self, id: i64) -> Result<Run> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
            params![id],
            row_to_run,
        )
        .context("get_run")
    }

    pub fn get_runs_for_issue(&self, issue_number: i64, repo: &str) -> Result<Vec<Run>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE issue_number = ?1 AND repo = ?2 \
             ORDER BY id DESC"
        ))?;
        let runs = stmt
            .query_map(params![issue_number, repo], row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("get_runs_for_issue")?;
        Ok(runs)
    }

    pub fn get_all_runs(&self) -> Result<Vec<Run>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt =
            conn.prepare(&format!("SELECT {RUN_COLUMNS} FROM runs ORDER BY id DESC"))?;
        let runs = stmt
            .query_map([], row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("get_all_runs")?;
        Ok(runs)
    }

    /// True iff a run in a claiming status already exists for this issue.
    /// `deferred`/`failed`/`timeout`/`blocked` intentionally do not claim,
    /// so the next poll cycle can retry.
    pub fn is_issue_claimed(&self, issue_number: i64, repo: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let claims = RunStatus::claims();
        let placeholders = claims.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT 1 FROM runs WHERE issue_number = ?1 AND repo = ?2 \
             AND status IN ({placeholders}) LIMIT 1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut param_values: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(issue_number), Box::new(repo.to_string())];
        for s in claims {
            param_values.push(Box::new(s.as_str().to_string()));
        }
        let param_refs: Vec<&dyn rusqlite::ToSql> =
            param_values.iter().map(|v| v.as_ref()).collect();
        let found = stmt
            .query_row(param_refs.as_slice(), |_| Ok(()))
            .optional()
            .context("is_issue_claimed")?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunUpdate;

    fn temp_db() -> (Db, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Db::open(path.to_str().unwrap()).unwrap();
        (db, dir)
    }

    #[test]
    fn create_and_get_run_round_trips() {
        let (db, _dir) = temp_db();
        let run = db
            .create_run(42, "Fix the thing", "acme/widgets", Trigger::Poll)
            .unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.issue_number, 42);

        let fetched = db.get_run(run.id).unwrap();
        assert_eq!(fetched.issue_title, "Fix the thing");
        assert_eq!(fetched.repo, "acme/widgets");
    }

    #[test]
    fn update_run_only_touches_supplied_fields() {
        let (db, _dir) = temp_db();
        let run = db.create_run(1, "title", "r/r", Trigger::Cli).unwrap();

        let updated = db
            .update_run(
                run.id,
                &RunUpdate {
                    status: Some(RunStatus::Running),
                    branch: Some("agent/issue-1".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.status, RunStatus::Running);
        assert_eq!(updated.branch.as_deref(), Some("agent/issue-1"));
        assert_eq!(updated.issue_title, "title");
    }

    #[test]
    fn is_issue_claimed_excludes_retryable_statuses() {
        let (db, _dir) = temp_db();
        let run = db.create_run(7, "title", "r/r", Trigger::Poll).unwrap();
        assert!(db.is_issue_claimed(7, "r/r").unwrap());

        db.update_run(
            run.id,
            &RunUpdate {
                status: Some(RunStatus::Deferred),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!db.is_issue_claimed(7, "r/r").unwrap());
    }

    #[test]
    fn get_runs_for_issue_orders_newest_first() {
        let (db, _dir) = temp_db();
        let first = db.create_run(5, "t", "r/r", Trigger::Poll).unwrap();
        let second = db.create_run(5, "t", "r/r", Trigger::Poll).unwrap();

        let runs = db.get_runs_for_issue(5, "r/r").unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second.id);
        assert_eq!(runs[1].id, first.id);
    }
}
