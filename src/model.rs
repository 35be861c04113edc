//! Persisted entities: councils, sessions, votes, deputies and their voices.
//!
//! Records are only ever produced by a [`crate::store::RecordStore`]; their
//! identifiers are opaque row keys. A [`Vote`]'s counts and decision have no
//! setter: the only way to change them is
//! [`crate::store::RecordStore::recount`], which counts the vote's stored
//! voices and derives the decision from them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Row key of a [`Council`].
    CouncilId
);
row_id!(
    /// Row key of a [`Session`].
    SessionId
);
row_id!(
    /// Row key of a [`Vote`].
    VoteId
);
row_id!(
    /// Row key of a [`Deputy`].
    DeputyId
);

// ── Enumerations ─────────────────────────────────────────────────────────

/// Which stage of a decision a vote was held on. Optional on a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteType {
    /// "За основу"
    OnTheBasis,
    /// "За пропозицію"
    OnTheProposal,
    /// "В цілому"
    InFull,
    /// "За правку"
    ForAmendment,
}

impl VoteType {
    pub const ALL: [VoteType; 4] = [
        VoteType::OnTheBasis,
        VoteType::OnTheProposal,
        VoteType::InFull,
        VoteType::ForAmendment,
    ];

    /// The phrase printed in the report.
    pub fn label(self) -> &'static str {
        match self {
            VoteType::OnTheBasis => "За основу",
            VoteType::OnTheProposal => "За пропозицію",
            VoteType::InFull => "В цілому",
            VoteType::ForAmendment => "За правку",
        }
    }

    pub fn code(self) -> i64 {
        match self {
            VoteType::OnTheBasis => 1,
            VoteType::OnTheProposal => 2,
            VoteType::InFull => 3,
            VoteType::ForAmendment => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.label() == label)
    }
}

/// One deputy's recorded outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoiceResult {
    /// "За"
    For,
    /// "Проти"
    Against,
    /// "Утримався"
    Abstained,
    /// "Не голосував"
    DidNotVote,
    /// "Відсутній"
    Absent,
}

impl VoiceResult {
    pub const ALL: [VoiceResult; 5] = [
        VoiceResult::For,
        VoiceResult::Against,
        VoiceResult::Abstained,
        VoiceResult::DidNotVote,
        VoiceResult::Absent,
    ];

    pub fn label(self) -> &'static str {
        match self {
            VoiceResult::For => "За",
            VoiceResult::Against => "Проти",
            VoiceResult::Abstained => "Утримався",
            VoiceResult::DidNotVote => "Не голосував",
            VoiceResult::Absent => "Відсутній",
        }
    }

    pub fn code(self) -> i64 {
        match self {
            VoiceResult::For => 1,
            VoiceResult::Against => 2,
            VoiceResult::Abstained => 3,
            VoiceResult::DidNotVote => 4,
            VoiceResult::Absent => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }

    /// Exact match against the printed outcome, ignoring surrounding whitespace.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL.into_iter().find(|r| r.label() == label)
    }
}

/// Outcome of a vote as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    /// "Принято"
    Accepted,
    /// "Не принято"
    Rejected,
}

impl Decision {
    pub fn code(self) -> i64 {
        match self {
            Decision::Accepted => 1,
            Decision::Rejected => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Decision::Accepted),
            2 => Some(Decision::Rejected),
            _ => None,
        }
    }
}

// ── Tally ────────────────────────────────────────────────────────────────

/// Per-outcome counts of a vote's voices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub agree: u32,
    pub disagree: u32,
    pub abstained: u32,
    pub did_not_participate: u32,
    pub absent: u32,
}

impl Tally {
    /// Count every outcome in `results`.
    pub fn from_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = VoiceResult>,
    {
        let mut tally = Tally::default();
        for result in results {
            tally.add(result, 1);
        }
        tally
    }

    /// Add `count` voices of `result`.
    pub fn add(&mut self, result: VoiceResult, count: u32) {
        let slot = match result {
            VoiceResult::For => &mut self.agree,
            VoiceResult::Against => &mut self.disagree,
            VoiceResult::Abstained => &mut self.abstained,
            VoiceResult::DidNotVote => &mut self.did_not_participate,
            VoiceResult::Absent => &mut self.absent,
        };
        *slot += count;
    }

    /// Accepted only on a strict majority of "for" over "against".
    pub fn decision(&self) -> Decision {
        if self.agree > self.disagree {
            Decision::Accepted
        } else {
            Decision::Rejected
        }
    }

    pub fn total(&self) -> u32 {
        self.agree + self.disagree + self.abstained + self.did_not_participate + self.absent
    }
}

// ── Entities ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Council {
    pub id: CouncilId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub date: NaiveDate,
}

/// Natural key of a [`Vote`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoteKey {
    pub title: String,
    pub vote_type: Option<VoteType>,
    pub council: CouncilId,
    pub session: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vote {
    pub id: VoteId,
    pub key: VoteKey,
    tally: Tally,
    result: Option<Decision>,
}

impl Vote {
    /// Rebuild a vote from its stored columns.
    pub(crate) fn from_stored(
        id: VoteId,
        key: VoteKey,
        tally: Tally,
        result: Option<Decision>,
    ) -> Self {
        Self {
            id,
            key,
            tally,
            result,
        }
    }

    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    /// `None` until the first tally has been stored.
    pub fn result(&self) -> Option<Decision> {
        self.result
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deputy {
    pub id: DeputyId,
    pub full_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub deputy: DeputyId,
    pub vote: VoteId,
    pub result: VoiceResult,
}

/// What an upsert did to a voice row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoiceChange {
    Created,
    Updated,
    Unchanged,
}
