//! Roll-call table extraction.
//!
//! The result table prints two column groups side by side, each a deputy
//! name column plus an outcome column. Two printings exist, told apart by
//! their column count; [`TableLayout`] maps each to the column indices of its
//! groups so extraction never does column arithmetic inline.
//!
//! Long names wrap onto a second table row. The first row of such a pair has
//! an empty outcome cell, so its name is carried into the next row.
//!
//! Extraction is split in two: [`extract_roster`] turns a grid into
//! `(name, outcome)` entries without touching the store, then
//! [`record_roster`] upserts deputies and voices and prunes voices of deputies
//! no longer on the page.

use crate::error::{ParseError, StoreError};
use crate::model::{DeputyId, VoiceChange, VoiceResult, VoteId};
use crate::pipeline::source::TableGrid;
use crate::store::RecordStore;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// Column indices of one name + outcome group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnGroup {
    pub name: usize,
    pub result: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableLayout {
    /// `№ | name | outcome | № | name | outcome`
    SixColumn,
    /// Eight columns, with a spacer column after each name.
    EightColumn,
}

impl TableLayout {
    pub fn detect(columns: usize) -> Result<Self, ParseError> {
        match columns {
            6 => Ok(TableLayout::SixColumn),
            8 => Ok(TableLayout::EightColumn),
            columns => Err(ParseError::UnsupportedTableLayout { columns }),
        }
    }

    /// Left group first.
    pub fn groups(self) -> [ColumnGroup; 2] {
        match self {
            TableLayout::SixColumn => [
                ColumnGroup { name: 1, result: 2 },
                ColumnGroup { name: 4, result: 5 },
            ],
            TableLayout::EightColumn => [
                ColumnGroup { name: 1, result: 3 },
                ColumnGroup { name: 5, result: 7 },
            ],
        }
    }
}

/// One deputy's line from the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub full_name: String,
    pub result: VoiceResult,
}

/// Read both column groups of `grid`, left group first.
pub fn extract_roster(grid: &TableGrid) -> Result<Vec<RosterEntry>, ParseError> {
    let layout = TableLayout::detect(grid.column_count())?;
    let mut roster = Vec::new();
    for group in layout.groups() {
        roster.extend(extract_group(grid, group)?);
    }
    Ok(roster)
}

fn extract_group(grid: &TableGrid, group: ColumnGroup) -> Result<Vec<RosterEntry>, ParseError> {
    let mut entries = Vec::new();
    let mut carried: Option<String> = None;

    for row in 1..grid.row_count() {
        let own = grid.cell(row, group.name).trim();
        let name = match carried.take() {
            Some(prev) if !prev.is_empty() && !own.is_empty() => format!("{prev} {own}"),
            Some(prev) if own.is_empty() => prev,
            _ => own.to_string(),
        };

        let outcome = grid.cell(row, group.result).trim();
        if outcome.is_empty() {
            carried = Some(name);
            continue;
        }
        if name.is_empty() {
            return Err(ParseError::MissingDeputyName { row });
        }

        let result =
            VoiceResult::from_label(outcome).ok_or_else(|| ParseError::UnknownVoiceResult {
                deputy: name.clone(),
                text: outcome.to_string(),
            })?;
        entries.push(RosterEntry {
            full_name: name,
            result,
        });
    }

    if let Some(dangling) = carried.filter(|n| !n.is_empty()) {
        debug!("Dropping name without outcome at end of table: '{}'", dangling);
    }
    Ok(entries)
}

/// Store-side effects of one page's roster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RosterOutcome {
    /// Deputies seen on this page.
    pub active: BTreeSet<DeputyId>,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Voices deleted because their deputy was not on the page.
    pub pruned: usize,
}

/// Upsert every entry's deputy and voice, then delete voices of `vote`
/// whose deputy is not in the roster.
pub fn record_roster<S>(
    store: &mut S,
    vote: VoteId,
    roster: &[RosterEntry],
) -> Result<RosterOutcome, StoreError>
where
    S: RecordStore + ?Sized,
{
    let mut outcome = RosterOutcome::default();
    for entry in roster {
        let deputy = store.upsert_deputy(&entry.full_name)?;
        outcome.active.insert(deputy.id);
        match store.upsert_voice(deputy.id, vote, entry.result)? {
            VoiceChange::Created => outcome.created += 1,
            VoiceChange::Updated => outcome.updated += 1,
            VoiceChange::Unchanged => outcome.unchanged += 1,
        }
    }
    outcome.pruned = store.delete_voices(vote, &outcome.active)?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn six(rows: &[[&str; 6]]) -> TableGrid {
        TableGrid::from_rows(rows.iter().map(|r| r.to_vec()))
    }

    #[test]
    fn layout_by_column_count() {
        assert_eq!(TableLayout::detect(6).unwrap(), TableLayout::SixColumn);
        assert_eq!(
            TableLayout::detect(8).unwrap().groups()[1],
            ColumnGroup { name: 5, result: 7 }
        );
        assert_eq!(
            TableLayout::detect(7),
            Err(ParseError::UnsupportedTableLayout { columns: 7 })
        );
    }

    #[test]
    fn wrapped_name_merges_into_next_row() {
        let grid = six(&[
            ["№", "ПІБ", "Результат", "№", "ПІБ", "Результат"],
            ["1", "Smith", "", "", "", ""],
            ["", "John", "За", "", "", ""],
        ]);
        let roster = extract_roster(&grid).unwrap();
        assert_eq!(
            roster,
            vec![RosterEntry {
                full_name: "Smith John".into(),
                result: VoiceResult::For,
            }]
        );
    }

    #[test]
    fn both_groups_read_left_first() {
        let grid = six(&[
            ["№", "ПІБ", "Результат", "№", "ПІБ", "Результат"],
            ["1", "Іваненко Валерій Іванович", "За", "3", "Петренко Олег", "Відсутній"],
            ["2", "Веремчук Ірина Сергіївна", "Проти", "", "", ""],
        ]);
        let names: Vec<_> = extract_roster(&grid)
            .unwrap()
            .into_iter()
            .map(|e| (e.full_name, e.result))
            .collect();
        assert_eq!(
            names,
            vec![
                ("Іваненко Валерій Іванович".to_string(), VoiceResult::For),
                ("Веремчук Ірина Сергіївна".to_string(), VoiceResult::Against),
                ("Петренко Олег".to_string(), VoiceResult::Absent),
            ]
        );
    }

    #[test]
    fn eight_column_layout_skips_spacers() {
        let grid = TableGrid::from_rows(vec![
            vec!["№", "ПІБ", "", "Результат", "№", "ПІБ", "", "Результат"],
            vec!["1", "Гнатюк Анна", "x", "Утримався", "2", "Бойко Ігор", "x", "Не голосував"],
        ]);
        let roster = extract_roster(&grid).unwrap();
        assert_eq!(roster[0].result, VoiceResult::Abstained);
        assert_eq!(roster[1].full_name, "Бойко Ігор");
        assert_eq!(roster[1].result, VoiceResult::DidNotVote);
    }

    #[test]
    fn unknown_outcome_is_rejected() {
        let grid = six(&[
            ["№", "ПІБ", "Результат", "№", "ПІБ", "Результат"],
            ["1", "Іваненко", "Може", "", "", ""],
        ]);
        assert_eq!(
            extract_roster(&grid),
            Err(ParseError::UnknownVoiceResult {
                deputy: "Іваненко".into(),
                text: "Може".into(),
            })
        );
    }

    #[test]
    fn outcome_without_name_is_rejected() {
        let grid = six(&[
            ["№", "ПІБ", "Результат", "№", "ПІБ", "Результат"],
            ["1", "", "За", "", "", ""],
        ]);
        assert_eq!(
            extract_roster(&grid),
            Err(ParseError::MissingDeputyName { row: 1 })
        );
    }

    #[test]
    fn header_only_table_is_empty() {
        let grid = six(&[["№", "ПІБ", "Результат", "№", "ПІБ", "Результат"]]);
        assert!(extract_roster(&grid).unwrap().is_empty());
    }
}
