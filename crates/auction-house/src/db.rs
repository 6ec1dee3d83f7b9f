// SQLite persistence layer for auction state.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::auction::state::{AppState, ClassLabel, Selection};
use crate::store::{StateStore, StorageError};

/// SQLite-backed [`StateStore`]: one versioned JSON snapshot of the whole
/// application state, plus an append-only log of finalized selections per
/// auction run.
///
/// Several processes can open the same file. The snapshot row is
/// last-write-wins, each write takes the SQLite write lock before reading
/// the version it must exceed, and the store watcher picks up foreign
/// writes through [`StateStore::stored_version`].
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS app_state (
                id         INTEGER PRIMARY KEY CHECK (id = 1),
                version    INTEGER NOT NULL,
                payload    TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS selection_log (
                run_id           TEXT NOT NULL,
                seq              INTEGER NOT NULL,
                candidate        TEXT NOT NULL,
                admission_number TEXT NOT NULL,
                class_label      TEXT NOT NULL,
                team             TEXT NOT NULL,
                recorded_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (run_id, seq)
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Replace the snapshot row and append any selections of the current run
    /// not yet in the log, in one immediate transaction. `state` is written
    /// under a version above the stored one, which is returned.
    fn write_snapshot(&self, state: &mut AppState) -> Result<u64> {
        let mut conn = self.conn();
        // IMMEDIATE takes the write lock up front, so no other process can
        // commit between the version read and the upsert.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin transaction")?;

        let stored: Option<i64> = tx
            .query_row("SELECT version FROM app_state WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .context("failed to read app state version")?;
        let floor = stored.map_or(0, |v| v as u64 + 1);
        let version = state.version().max(floor);
        state.auction.state_version = version;

        let payload = serde_json::to_string(state).context("failed to serialize app state")?;

        tx.execute(
            "INSERT INTO app_state (id, version, payload, updated_at)
             VALUES (1, ?1, ?2, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
             ON CONFLICT(id) DO UPDATE SET
                version = excluded.version,
                payload = excluded.payload,
                updated_at = excluded.updated_at",
            params![version as i64, payload],
        )
        .context("failed to write app state")?;

        if let Some(run_id) = &state.auction.run_id {
            // Selections are append-only within a run, so (run_id, seq) is a
            // stable key and re-recording is a no-op.
            let mut stmt = tx
                .prepare(
                    "INSERT OR IGNORE INTO selection_log
                        (run_id, seq, candidate, admission_number, class_label, team)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .context("failed to prepare selection log insert")?;
            for (seq, selection) in state.auction.selections.iter().enumerate() {
                stmt.execute(params![
                    run_id,
                    seq as i64,
                    selection.candidate,
                    selection.admission_number,
                    selection.class_label.to_string(),
                    selection.team,
                ])
                .context("failed to record selection")?;
            }
        }

        tx.commit().context("failed to commit app state")?;
        Ok(version)
    }

    fn read_payload(&self) -> Result<Option<String>> {
        let conn = self.conn();
        conn.query_row("SELECT payload FROM app_state WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()
        .context("failed to read app state")
    }

    fn read_version(&self) -> Result<Option<u64>> {
        let conn = self.conn();
        let version: Option<i64> = conn
            .query_row("SELECT version FROM app_state WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .context("failed to read app state version")?;
        Ok(version.map(|v| v as u64))
    }

    /// Selections recorded for an auction run, in the order they were made.
    ///
    /// Survives `stop`, restarts and resets: only a new run gets a new id.
    pub fn load_selection_log(&self, run_id: &str) -> Result<Vec<Selection>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT candidate, admission_number, class_label, team
                 FROM selection_log WHERE run_id = ?1 ORDER BY seq",
            )
            .context("failed to prepare selection log query")?;

        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .context("failed to query selection log")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map selection log rows")?;

        rows.into_iter()
            .map(|(candidate, admission_number, class_label, team)| {
                let class_label = ClassLabel::parse(&class_label).with_context(|| {
                    format!("invalid class label {class_label:?} in selection log")
                })?;
                Ok(Selection {
                    candidate,
                    admission_number,
                    class_label,
                    team,
                })
            })
            .collect()
    }
}

impl StateStore for Database {
    fn load(&self) -> Result<Option<AppState>, StorageError> {
        let payload = self
            .read_payload()
            .map_err(|e| StorageError::Read(format!("{e:#}")))?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save(&self, state: &mut AppState) -> Result<u64, StorageError> {
        self.write_snapshot(state)
            .map_err(|e| StorageError::Write(format!("{e:#}")))
    }

    fn stored_version(&self) -> Result<Option<u64>, StorageError> {
        self.read_version()
            .map_err(|e| StorageError::Read(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::state::{AuctionStatus, Candidate, Team};

    /// Helper: create a fresh in-memory database for each test.
    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    fn label(v: u8) -> ClassLabel {
        ClassLabel::new(v).unwrap()
    }

    fn sample_state(version: u64) -> AppState {
        let mut state = AppState::default();
        state.candidates = vec![
            Candidate::new("Ada", label(1), "1001"),
            Candidate::new("Hopper, Grace", label(2), "1002"),
        ];
        state.teams = vec![Team::new("Owls", "Olive", Some("Oscar"))];
        state.auction.status = AuctionStatus::InProgress;
        state.auction.state_version = version;
        state
    }

    fn selection(candidate: &str, admission: &str, team: &str) -> Selection {
        Selection {
            candidate: candidate.to_string(),
            admission_number: admission.to_string(),
            class_label: label(1),
            team: team.to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Schema / open
    // ------------------------------------------------------------------

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let conn = db.conn();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"app_state".to_string()));
        assert!(tables.contains(&"selection_log".to_string()));
    }

    // ------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------

    #[test]
    fn empty_database_has_no_state() {
        let db = test_db();
        assert!(db.load().unwrap().is_none());
        assert!(db.stored_version().unwrap().is_none());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let db = test_db();
        let mut state = sample_state(3);

        assert_eq!(db.save(&mut state).unwrap(), 3);

        assert_eq!(db.load().unwrap(), Some(state));
        assert_eq!(db.stored_version().unwrap(), Some(3));
    }

    #[test]
    fn save_overwrites_single_row() {
        let db = test_db();
        db.save(&mut sample_state(1)).unwrap();
        let mut newer = sample_state(2);
        newer.teams.clear();
        db.save(&mut newer).unwrap();

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM app_state", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(db.load().unwrap().unwrap().teams.len(), 0);
        assert_eq!(db.stored_version().unwrap(), Some(2));
    }

    #[test]
    fn corrupt_payload_is_reported() {
        let db = test_db();
        db.conn()
            .execute(
                "INSERT INTO app_state (id, version, payload) VALUES (1, 5, 'not json')",
                [],
            )
            .unwrap();

        assert!(matches!(db.load(), Err(StorageError::Corrupt(_))));
        // The version column is still readable.
        assert_eq!(db.stored_version().unwrap(), Some(5));
    }

    #[test]
    fn two_handles_share_a_file() {
        let tmp_dir = std::env::temp_dir();
        let db_path = tmp_dir.join(format!("test_shared_{}.db", std::process::id()));
        let db_path_str = db_path.to_str().unwrap();
        let _ = std::fs::remove_file(&db_path);

        let writer = Database::open(db_path_str).unwrap();
        let reader = Database::open(db_path_str).unwrap();

        writer.save(&mut sample_state(9)).unwrap();
        assert_eq!(reader.stored_version().unwrap(), Some(9));
        assert_eq!(reader.load().unwrap(), Some(sample_state(9)));

        drop(writer);
        drop(reader);
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }

    #[test]
    fn writers_on_one_file_never_share_a_version() {
        let db_path = std::env::temp_dir().join(format!("test_race_{}.db", std::process::id()));
        let db_path_str = db_path.to_str().unwrap();
        let _ = std::fs::remove_file(&db_path);

        let first = Database::open(db_path_str).unwrap();
        let second = Database::open(db_path_str).unwrap();

        // Both writers last saw v4 and propose v5.
        let mut ours = sample_state(5);
        let mut theirs = sample_state(5);
        theirs.teams.clear();
        assert_eq!(first.save(&mut ours).unwrap(), 5);
        assert_eq!(second.save(&mut theirs).unwrap(), 6);
        assert_eq!(theirs.version(), 6);

        let stored = first.load().unwrap().unwrap();
        assert_eq!(stored.version(), 6);
        assert!(stored.teams.is_empty());

        drop(first);
        drop(second);
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }

    // ------------------------------------------------------------------
    // Selection log
    // ------------------------------------------------------------------

    #[test]
    fn selection_log_appends_per_run() {
        let db = test_db();
        let mut state = sample_state(1);
        state.auction.run_id = Some("auction_a".into());
        state.auction.selections = vec![selection("Ada", "1001", "Owls")];
        db.save(&mut state).unwrap();

        state.auction.state_version = 2;
        state
            .auction
            .selections
            .push(selection("Hopper, Grace", "1002", "Owls"));
        db.save(&mut state).unwrap();
        // Saving the same selections again is a no-op.
        db.save(&mut state).unwrap();

        let log = db.load_selection_log("auction_a").unwrap();
        assert_eq!(log, state.auction.selections);
        assert!(db.load_selection_log("auction_b").unwrap().is_empty());
    }

    #[test]
    fn selection_log_outlives_snapshot_reset() {
        let db = test_db();
        let mut state = sample_state(1);
        state.auction.run_id = Some("auction_a".into());
        state.auction.selections = vec![selection("Ada", "1001", "Owls")];
        db.save(&mut state).unwrap();

        let mut reset = AppState::default();
        reset.auction.state_version = 2;
        db.save(&mut reset).unwrap();

        assert_eq!(db.load_selection_log("auction_a").unwrap().len(), 1);
    }

    #[test]
    fn no_run_id_records_nothing() {
        let db = test_db();
        let mut state = sample_state(1);
        state.auction.selections = vec![selection("Ada", "1001", "Owls")];
        db.save(&mut state).unwrap();

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM selection_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
