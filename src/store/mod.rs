//! Keyed record store consumed by the reconciler.
//!
//! Every create goes through a natural-key upsert that returns the existing
//! row when the key is already taken, so repeated and concurrent calls never
//! duplicate councils, sessions, votes or deputies. A page's writes are
//! grouped between [`RecordStore::begin`] and [`RecordStore::commit`]; on any
//! error the reconciler calls [`RecordStore::rollback`] so a vote never keeps a
//! half-written voice set.
//!
//! The read-only reporting layer queries the same store; nothing else couples
//! it to the pipeline.

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::model::{
    Council, Deputy, DeputyId, Session, Tally, Vote, VoiceChange, VoiceResult, VoteId, VoteKey,
};
use chrono::NaiveDate;
use std::collections::BTreeSet;

pub trait RecordStore {
    /// Open a write transaction for one page.
    fn begin(&mut self) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;

    fn upsert_council(&mut self, title: &str) -> Result<Council, StoreError>;
    /// `date` is only written when the session is created.
    fn upsert_session(&mut self, title: &str, date: NaiveDate) -> Result<Session, StoreError>;
    fn upsert_vote(&mut self, key: &VoteKey) -> Result<Vote, StoreError>;
    fn upsert_deputy(&mut self, full_name: &str) -> Result<Deputy, StoreError>;
    fn upsert_voice(
        &mut self,
        deputy: DeputyId,
        vote: VoteId,
        result: VoiceResult,
    ) -> Result<VoiceChange, StoreError>;

    fn find_council(&self, title: &str) -> Result<Option<Council>, StoreError>;
    fn find_session(&self, title: &str) -> Result<Option<Session>, StoreError>;
    fn find_vote(&self, key: &VoteKey) -> Result<Option<Vote>, StoreError>;
    fn find_deputy(&self, full_name: &str) -> Result<Option<Deputy>, StoreError>;
    fn vote(&self, id: VoteId) -> Result<Option<Vote>, StoreError>;

    fn list_voices(&self, vote: VoteId) -> Result<Vec<(DeputyId, VoiceResult)>, StoreError>;

    /// Delete every voice of `vote` whose deputy is not in `keep`. Returns the
    /// number of rows removed.
    fn delete_voices(&mut self, vote: VoteId, keep: &BTreeSet<DeputyId>)
        -> Result<usize, StoreError>;

    /// Count the voices of `vote` as stored and write the counts and decision
    /// onto the vote. The only writer of those columns.
    fn recount(&mut self, vote: VoteId) -> Result<Tally, StoreError>;
}
