//! SQLite-backed [`RecordStore`].
//!
//! Natural keys are enforced by `UNIQUE` constraints, and every upsert is an
//! `INSERT OR IGNORE` followed by a lookup on the same key. Two workers that
//! meet the same council for the first time therefore both end up with the
//! one row that won the insert. Page transactions use `BEGIN IMMEDIATE`, so
//! the write lock is taken up front and a busy database surfaces as a
//! retryable [`StoreError::is_conflict`] at `begin` rather than mid-page.
//!
//! Each worker opens its own connection to the same database file.

use super::RecordStore;
use crate::error::StoreError;
use crate::model::{
    Council, CouncilId, Decision, Deputy, DeputyId, Session, SessionId, Tally, Vote, VoiceChange,
    VoiceResult, VoteId, VoteKey, VoteType,
};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS council (
      id INTEGER PRIMARY KEY,
      title TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS session (
      id INTEGER PRIMARY KEY,
      title TEXT NOT NULL UNIQUE,
      date TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS vote (
      id INTEGER PRIMARY KEY,
      title TEXT NOT NULL,
      vote_type INTEGER,
      council_id INTEGER NOT NULL REFERENCES council(id),
      session_id INTEGER NOT NULL REFERENCES session(id),
      agree INTEGER NOT NULL DEFAULT 0,
      disagree INTEGER NOT NULL DEFAULT 0,
      abstained INTEGER NOT NULL DEFAULT 0,
      did_not_participate INTEGER NOT NULL DEFAULT 0,
      absent INTEGER NOT NULL DEFAULT 0,
      result INTEGER
    );
    CREATE UNIQUE INDEX IF NOT EXISTS vote_natural_key
      ON vote(title, IFNULL(vote_type, 0), council_id, session_id);
    CREATE TABLE IF NOT EXISTS deputy (
      id INTEGER PRIMARY KEY,
      full_name TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS voice (
      deputy_id INTEGER NOT NULL REFERENCES deputy(id) ON DELETE CASCADE,
      vote_id INTEGER NOT NULL REFERENCES vote(id) ON DELETE CASCADE,
      result INTEGER NOT NULL,
      PRIMARY KEY (deputy_id, vote_id)
    );
    CREATE INDEX IF NOT EXISTS voice_by_vote ON voice(vote_id);
"#;

const VOTE_COLUMNS: &str = "id, title, vote_type, council_id, session_id, \
     agree, disagree, abstained, did_not_participate, absent, result";

#[derive(Debug)]
pub struct SqliteStore {
    path: Option<PathBuf>,
    conn: Connection,
    in_transaction: bool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self {
            path: Some(path),
            conn,
            in_transaction: false,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Private in-memory database; used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            path: None,
            conn: Connection::open_in_memory()?,
            in_transaction: false,
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn read_vote(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<Vote>, StoreError> {
        let row = self
            .conn
            .query_row(sql, params, |row| {
                Ok(VoteRow {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    vote_type: row.get(2)?,
                    council_id: row.get(3)?,
                    session_id: row.get(4)?,
                    counts: [row.get(5)?, row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?],
                    result: row.get(10)?,
                })
            })
            .optional()?;
        row.map(VoteRow::into_vote).transpose()
    }
}

/// Raw `vote` columns before enum codes are validated.
struct VoteRow {
    id: i64,
    title: String,
    vote_type: Option<i64>,
    council_id: i64,
    session_id: i64,
    counts: [i64; 5],
    result: Option<i64>,
}

impl VoteRow {
    fn into_vote(self) -> Result<Vote, StoreError> {
        let vote_type = self
            .vote_type
            .map(|code| {
                VoteType::from_code(code).ok_or(StoreError::InvalidCode {
                    entity: "vote type",
                    code,
                })
            })
            .transpose()?;
        let result = self
            .result
            .map(|code| {
                Decision::from_code(code).ok_or(StoreError::InvalidCode {
                    entity: "decision",
                    code,
                })
            })
            .transpose()?;
        let count = |code: i64| {
            u32::try_from(code).map_err(|_| StoreError::InvalidCode {
                entity: "tally count",
                code,
            })
        };
        let [agree, disagree, abstained, did_not_participate, absent] = self.counts;
        let tally = Tally {
            agree: count(agree)?,
            disagree: count(disagree)?,
            abstained: count(abstained)?,
            did_not_participate: count(did_not_participate)?,
            absent: count(absent)?,
        };
        Ok(Vote::from_stored(
            VoteId(self.id),
            VoteKey {
                title: self.title,
                vote_type,
                council: CouncilId(self.council_id),
                session: SessionId(self.session_id),
            },
            tally,
            result,
        ))
    }
}

impl RecordStore for SqliteStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::NoTransaction);
        }
        self.conn.execute_batch("COMMIT;")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::NoTransaction);
        }
        self.in_transaction = false;
        self.conn.execute_batch("ROLLBACK;")?;
        Ok(())
    }

    fn upsert_council(&mut self, title: &str) -> Result<Council, StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO council (title) VALUES (?1)",
            params![title],
        )?;
        self.find_council(title)?
            .ok_or_else(|| StoreError::MissingAfterUpsert {
                entity: "council",
                key: title.to_string(),
            })
    }

    fn upsert_session(&mut self, title: &str, date: NaiveDate) -> Result<Session, StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO session (title, date) VALUES (?1, ?2)",
            params![title, date],
        )?;
        self.find_session(title)?
            .ok_or_else(|| StoreError::MissingAfterUpsert {
                entity: "session",
                key: title.to_string(),
            })
    }

    fn upsert_vote(&mut self, key: &VoteKey) -> Result<Vote, StoreError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO vote (title, vote_type, council_id, session_id) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                key.title,
                key.vote_type.map(VoteType::code),
                key.council.0,
                key.session.0
            ],
        )?;
        if inserted > 0 {
            debug!("Created vote '{}'", key.title);
        }
        self.find_vote(key)?
            .ok_or_else(|| StoreError::MissingAfterUpsert {
                entity: "vote",
                key: key.title.clone(),
            })
    }

    fn upsert_deputy(&mut self, full_name: &str) -> Result<Deputy, StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO deputy (full_name) VALUES (?1)",
            params![full_name],
        )?;
        self.find_deputy(full_name)?
            .ok_or_else(|| StoreError::MissingAfterUpsert {
                entity: "deputy",
                key: full_name.to_string(),
            })
    }

    fn upsert_voice(
        &mut self,
        deputy: DeputyId,
        vote: VoteId,
        result: VoiceResult,
    ) -> Result<VoiceChange, StoreError> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT result FROM voice WHERE deputy_id=?1 AND vote_id=?2",
                params![deputy.0, vote.0],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            Some(code) if code == result.code() => Ok(VoiceChange::Unchanged),
            Some(_) => {
                self.conn.execute(
                    "UPDATE voice SET result=?3 WHERE deputy_id=?1 AND vote_id=?2",
                    params![deputy.0, vote.0, result.code()],
                )?;
                Ok(VoiceChange::Updated)
            }
            None => {
                self.conn.execute(
                    "INSERT INTO voice (deputy_id, vote_id, result) VALUES (?1, ?2, ?3) \
                     ON CONFLICT(deputy_id, vote_id) DO UPDATE SET result=excluded.result",
                    params![deputy.0, vote.0, result.code()],
                )?;
                Ok(VoiceChange::Created)
            }
        }
    }

    fn find_council(&self, title: &str) -> Result<Option<Council>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, title FROM council WHERE title=?1",
                params![title],
                |row| {
                    Ok(Council {
                        id: CouncilId(row.get(0)?),
                        title: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    fn find_session(&self, title: &str) -> Result<Option<Session>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, title, date FROM session WHERE title=?1",
                params![title],
                |row| {
                    Ok(Session {
                        id: SessionId(row.get(0)?),
                        title: row.get(1)?,
                        date: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    fn find_vote(&self, key: &VoteKey) -> Result<Option<Vote>, StoreError> {
        let sql = format!(
            "SELECT {VOTE_COLUMNS} FROM vote \
             WHERE title=?1 AND vote_type IS ?2 AND council_id=?3 AND session_id=?4"
        );
        self.read_vote(
            &sql,
            params![
                key.title,
                key.vote_type.map(VoteType::code),
                key.council.0,
                key.session.0
            ],
        )
    }

    fn find_deputy(&self, full_name: &str) -> Result<Option<Deputy>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, full_name FROM deputy WHERE full_name=?1",
                params![full_name],
                |row| {
                    Ok(Deputy {
                        id: DeputyId(row.get(0)?),
                        full_name: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    fn vote(&self, id: VoteId) -> Result<Option<Vote>, StoreError> {
        let sql = format!("SELECT {VOTE_COLUMNS} FROM vote WHERE id=?1");
        self.read_vote(&sql, params![id.0])
    }

    fn list_voices(&self, vote: VoteId) -> Result<Vec<(DeputyId, VoiceResult)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT deputy_id, result FROM voice WHERE vote_id=?1 ORDER BY deputy_id")?;
        let rows = stmt.query_map(params![vote.0], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut voices = Vec::new();
        for row in rows {
            let (deputy, code) = row?;
            let result = VoiceResult::from_code(code).ok_or(StoreError::InvalidCode {
                entity: "voice result",
                code,
            })?;
            voices.push((DeputyId(deputy), result));
        }
        Ok(voices)
    }

    fn delete_voices(
        &mut self,
        vote: VoteId,
        keep: &BTreeSet<DeputyId>,
    ) -> Result<usize, StoreError> {
        let stale: Vec<DeputyId> = self
            .list_voices(vote)?
            .into_iter()
            .map(|(deputy, _)| deputy)
            .filter(|deputy| !keep.contains(deputy))
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }
        let mut stmt = self
            .conn
            .prepare("DELETE FROM voice WHERE vote_id=?1 AND deputy_id=?2")?;
        let mut removed = 0;
        for deputy in &stale {
            removed += stmt.execute(params![vote.0, deputy.0])?;
        }
        debug!("Pruned {} stale voice(s) from vote {}", removed, vote);
        Ok(removed)
    }

    fn recount(&mut self, vote: VoteId) -> Result<Tally, StoreError> {
        let mut tally = Tally::default();
        {
            let mut stmt = self.conn.prepare(
                "SELECT result, COUNT(*) FROM voice WHERE vote_id=?1 GROUP BY result",
            )?;
            let rows = stmt.query_map(params![vote.0], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, u32>(1)?))
            })?;
            for row in rows {
                let (code, count) = row?;
                let result = VoiceResult::from_code(code).ok_or(StoreError::InvalidCode {
                    entity: "voice result",
                    code,
                })?;
                tally.add(result, count);
            }
        }

        let updated = self.conn.execute(
            "UPDATE vote SET agree=?2, disagree=?3, abstained=?4, did_not_participate=?5, \
             absent=?6, result=?7 WHERE id=?1",
            params![
                vote.0,
                tally.agree,
                tally.disagree,
                tally.abstained,
                tally.did_not_participate,
                tally.absent,
                tally.decision().code()
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::MissingAfterUpsert {
                entity: "vote",
                key: vote.to_string(),
            });
        }
        Ok(tally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 9, 22).unwrap()
    }

    fn vote_key(store: &mut SqliteStore, vote_type: Option<VoteType>) -> VoteKey {
        let council = store.upsert_council("Броварська міська рада").unwrap();
        let session = store.upsert_session("18 чергова сесія 22.09.16", date()).unwrap();
        VoteKey {
            title: "Про затвердження порядку денного".into(),
            vote_type,
            council: council.id,
            session: session.id,
        }
    }

    #[test]
    fn upserts_return_existing_rows() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let a = store.upsert_council("Броварська міська рада").unwrap();
        let b = store.upsert_council("Броварська міська рада").unwrap();
        assert_eq!(a, b);

        let d1 = store.upsert_deputy("Іваненко Валерій Іванович").unwrap();
        let d2 = store.upsert_deputy("Іваненко Валерій Іванович").unwrap();
        assert_eq!(d1.id, d2.id);
    }

    #[test]
    fn session_date_kept_from_first_insert() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.upsert_session("18 чергова сесія 22.09.16", date()).unwrap();
        let later = NaiveDate::from_ymd_opt(2017, 1, 1).unwrap();
        let s = store.upsert_session("18 чергова сесія 22.09.16", later).unwrap();
        assert_eq!(s.date, date());
    }

    #[test]
    fn vote_key_without_type_is_unique() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let key = vote_key(&mut store, None);
        let v1 = store.upsert_vote(&key).unwrap();
        let v2 = store.upsert_vote(&key).unwrap();
        assert_eq!(v1.id, v2.id);
        assert_eq!(v1.result(), None);

        let typed = VoteKey {
            vote_type: Some(VoteType::InFull),
            ..key
        };
        let v3 = store.upsert_vote(&typed).unwrap();
        assert_ne!(v1.id, v3.id);
        assert_eq!(v3.key.vote_type, Some(VoteType::InFull));
    }

    #[test]
    fn voice_upsert_reports_changes() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let key = vote_key(&mut store, None);
        let vote = store.upsert_vote(&key).unwrap();
        let deputy = store.upsert_deputy("Веремчук Ірина Сергіївна").unwrap();

        assert_eq!(
            store.upsert_voice(deputy.id, vote.id, VoiceResult::For).unwrap(),
            VoiceChange::Created
        );
        assert_eq!(
            store.upsert_voice(deputy.id, vote.id, VoiceResult::For).unwrap(),
            VoiceChange::Unchanged
        );
        assert_eq!(
            store.upsert_voice(deputy.id, vote.id, VoiceResult::Absent).unwrap(),
            VoiceChange::Updated
        );
        assert_eq!(
            store.list_voices(vote.id).unwrap(),
            vec![(deputy.id, VoiceResult::Absent)]
        );
    }

    #[test]
    fn delete_voices_keeps_active_set() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let key = vote_key(&mut store, None);
        let vote = store.upsert_vote(&key).unwrap();
        let a = store.upsert_deputy("A").unwrap();
        let b = store.upsert_deputy("B").unwrap();
        store.upsert_voice(a.id, vote.id, VoiceResult::For).unwrap();
        store.upsert_voice(b.id, vote.id, VoiceResult::Against).unwrap();

        let keep: BTreeSet<DeputyId> = [a.id].into_iter().collect();
        assert_eq!(store.delete_voices(vote.id, &keep).unwrap(), 1);
        assert_eq!(store.list_voices(vote.id).unwrap(), vec![(a.id, VoiceResult::For)]);
    }

    #[test]
    fn rollback_discards_page_writes() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.begin().unwrap();
        store.upsert_council("Тимчасова рада").unwrap();
        store.rollback().unwrap();
        assert!(store.find_council("Тимчасова рада").unwrap().is_none());
        assert!(matches!(store.commit(), Err(StoreError::NoTransaction)));
    }

    #[test]
    fn recount_counts_stored_voices() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let key = vote_key(&mut store, Some(VoteType::OnTheBasis));
        let vote = store.upsert_vote(&key).unwrap();
        let outcomes = [
            ("A", VoiceResult::For),
            ("B", VoiceResult::For),
            ("C", VoiceResult::Against),
            ("D", VoiceResult::DidNotVote),
            ("E", VoiceResult::Absent),
        ];
        for (name, result) in outcomes {
            let deputy = store.upsert_deputy(name).unwrap();
            store.upsert_voice(deputy.id, vote.id, result).unwrap();
        }

        let tally = store.recount(vote.id).unwrap();
        let expected = Tally {
            agree: 2,
            disagree: 1,
            abstained: 0,
            did_not_participate: 1,
            absent: 1,
        };
        assert_eq!(tally, expected);
        let stored = store.vote(vote.id).unwrap().unwrap();
        assert_eq!(stored.tally(), &expected);
        assert_eq!(stored.result(), Some(Decision::Accepted));
    }

    #[test]
    fn recount_of_vote_without_voices_is_zero() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let key = vote_key(&mut store, None);
        let vote = store.upsert_vote(&key).unwrap();

        let tally = store.recount(vote.id).unwrap();
        assert_eq!(tally.total(), 0);
        let stored = store.vote(vote.id).unwrap().unwrap();
        assert_eq!(stored.tally().total(), 0);
        assert_eq!(stored.result(), Some(Decision::Rejected));
    }

    #[test]
    fn recount_of_unknown_vote_fails() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(
            store.recount(VoteId(99)),
            Err(StoreError::MissingAfterUpsert { entity: "vote", .. })
        ));
    }

    #[test]
    fn file_database_is_shared_between_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("votes.db");
        let mut first = SqliteStore::open(&path, Duration::from_secs(1)).unwrap();
        let second = SqliteStore::open(&path, Duration::from_secs(1)).unwrap();
        let council = first.upsert_council("Броварська міська рада").unwrap();
        assert_eq!(
            second.find_council("Броварська міська рада").unwrap(),
            Some(council)
        );
        assert_eq!(second.path(), Some(path.as_path()));
    }
}
