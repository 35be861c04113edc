//! Header field parsing: council, session, vote title and vote type.
//!
//! Each field is read from the raw page text with a fixed pattern from the
//! "Рада Голос" report template. Fields are independent of each other and of
//! earlier pages; every vote-result page carries its full header.

use crate::error::ParseError;
use crate::model::VoteType;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

/// Parsed header of one vote-result page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteHeader {
    pub council_title: String,
    pub session_title: String,
    pub session_date: NaiveDate,
    pub vote_title: String,
    pub vote_type: Option<VoteType>,
}

/// Run every header extractor over `text`.
pub fn parse_header(text: &str) -> Result<VoteHeader, ParseError> {
    let council_title = extract_council_title(text)?;
    let session_title = extract_session_title(text)?;
    let session_date = extract_session_date(&session_title)?;
    let vote_title = extract_vote_title(text)?;
    let vote_type = extract_vote_type(text);
    Ok(VoteHeader {
        council_title,
        session_title,
        session_date,
        vote_title,
        vote_type,
    })
}

// ── Council ──────────────────────────────────────────────────────────────────

/// First line ending in "рада", e.g. "Броварська міська рада".
pub fn extract_council_title(text: &str) -> Result<String, ParseError> {
    text.lines()
        .map(str::trim_end)
        .find(|line| line.ends_with("рада"))
        .map(|line| line.trim().to_string())
        .ok_or(ParseError::MissingCouncilTitle)
}

// ── Session ──────────────────────────────────────────────────────────────────

static RE_SESSION_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2}\.\d{1,2}\.\d{2})\b").unwrap());

/// First line carrying a dd.mm.yy date, e.g. "18 чергова сесія 22.09.16".
pub fn extract_session_title(text: &str) -> Result<String, ParseError> {
    text.lines()
        .find(|line| RE_SESSION_DATE.is_match(line))
        .map(|line| line.trim().to_string())
        .ok_or(ParseError::MissingSessionTitle)
}

/// Date embedded in a session title; the two-digit year is expanded by
/// chrono's `%y` century rule.
///
/// Both a missing dd.mm.yy substring and a date that does not exist on the
/// calendar are a bad date.
pub fn extract_session_date(session_title: &str) -> Result<NaiveDate, ParseError> {
    let bad_date = || ParseError::BadDateFormat(session_title.to_string());
    let caps = RE_SESSION_DATE.captures(session_title).ok_or_else(bad_date)?;
    NaiveDate::parse_from_str(&caps[1], "%d.%m.%y")
        .map_err(|_| bad_date())
}

// ── Vote ─────────────────────────────────────────────────────────────────────

static RE_VOTE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)Результат поіменного голосування:(.*)№:").unwrap());

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Subject of the vote, which may wrap across several lines in the report.
pub fn extract_vote_title(text: &str) -> Result<String, ParseError> {
    let caps = RE_VOTE_TITLE
        .captures(text)
        .ok_or(ParseError::MissingVoteTitle)?;
    Ok(RE_WHITESPACE.replace_all(caps[1].trim(), " ").into_owned())
}

static RE_VOTE_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"За основу|За пропозицію|В цілому|За правку").unwrap());

/// Stage the vote was held on; absent on many votes.
pub fn extract_vote_type(text: &str) -> Option<VoteType> {
    RE_VOTE_TYPE
        .find(text)
        .and_then(|m| VoteType::from_label(m.as_str()))
}
