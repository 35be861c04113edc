//! Table detection from positioned text.
//!
//! pdfium reports text as segments with bounding boxes in PDF points
//! (origin bottom-left). The roll-call table has no ruling we can rely on,
//! so the grid is rebuilt from geometry alone:
//!
//! 1. segments are clustered into rows by vertical centre
//! 2. touching segments inside a row are merged into one cell
//! 3. rows with at least [`MIN_TABLE_CELLS`] cells mark the table region,
//!    from the first such row to the last, then on down over rows whose
//!    cells all sit on a column and that follow within [`MAX_ROW_GAP`]
//! 4. column anchors are left edges that recur across the dense rows
//! 5. every cell in the region is assigned to the nearest anchor at or left
//!    of its left edge
//! 6. a fragment row, one whose cells only fill columns left empty by an
//!    adjacent fuller row, is joined into that row
//!
//! Step 6 handles names wrapped around a vertically centred outcome: the
//! name's lines print above and below the row carrying `№` and the outcome.

use crate::pipeline::source::TableGrid;
use tracing::debug;

/// Fewest cells a row needs to count as a table row.
pub const MIN_TABLE_CELLS: usize = 4;

/// Horizontal slack (points) when matching left edges to a column.
const COLUMN_TOLERANCE: f32 = 6.0;

/// Segments closer than this (points) are one cell.
const CELL_GAP: f32 = 3.0;

/// Largest distance between row centres, in line heights, that still
/// continues the table past its last dense row.
pub const MAX_ROW_GAP: f32 = 2.0;

/// A text run and its bounding box in PDF points.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBox {
    pub text: String,
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl TextBox {
    fn center_y(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }

    fn height(&self) -> f32 {
        (self.top - self.bottom).abs()
    }
}

/// Rebuild the page's table, or `None` when no region is dense enough.
pub fn detect_table(boxes: Vec<TextBox>) -> Option<TableGrid> {
    let rows = merge_cells(group_rows(boxes));

    let dense: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| row.len() >= MIN_TABLE_CELLS)
        .map(|(i, _)| i)
        .collect();
    let (&first, &last) = (dense.first()?, dense.last()?);

    let anchors = column_anchors(dense.iter().map(|&i| &rows[i]));
    if anchors.is_empty() {
        return None;
    }
    let last = extend_region(&rows, last, &anchors);

    let placed = rows[first..=last]
        .iter()
        .map(|row| PlacedRow::place(row, &anchors))
        .collect();
    Some(TableGrid::new(join_fragments(placed)))
}

/// Index of the last table row, continuing past `last` over rows that are
/// column-aligned and close enough to their predecessor.
fn extend_region(rows: &[Vec<TextBox>], mut last: usize, anchors: &[f32]) -> usize {
    while let Some(next) = rows.get(last + 1) {
        let aligned = next
            .iter()
            .all(|cell| anchors.iter().any(|&a| (a - cell.left).abs() <= COLUMN_TOLERANCE));
        let line = row_height(&rows[last]).max(row_height(next));
        let gap = row_center(&rows[last]) - row_center(next);
        if !aligned || gap > MAX_ROW_GAP * line {
            break;
        }
        last += 1;
    }
    last
}

fn row_center(row: &[TextBox]) -> f32 {
    row.iter().map(TextBox::center_y).sum::<f32>() / row.len().max(1) as f32
}

fn row_height(row: &[TextBox]) -> f32 {
    row.iter().map(TextBox::height).fold(0.0, f32::max)
}

/// A region row with its cells assigned to columns.
#[derive(Debug)]
struct PlacedRow {
    cells: Vec<String>,
    center: f32,
}

impl PlacedRow {
    fn place(row: &[TextBox], anchors: &[f32]) -> Self {
        let mut cells = vec![String::new(); anchors.len()];
        for cell in row {
            let column = anchors
                .iter()
                .rposition(|&a| a <= cell.left + COLUMN_TOLERANCE)
                .unwrap_or(0);
            let slot = &mut cells[column];
            if !slot.is_empty() {
                slot.push(' ');
            }
            slot.push_str(cell.text.trim());
        }
        Self {
            cells,
            center: row_center(row),
        }
    }

    fn filled(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_empty()).count()
    }

    /// `true` when every cell of `self` lands in a column `other` left empty
    /// and `other` is the fuller row.
    fn fits_into(&self, other: &PlacedRow) -> bool {
        let filled = self.filled();
        filled > 0
            && filled < MIN_TABLE_CELLS
            && filled < other.filled()
            && self
                .cells
                .iter()
                .zip(&other.cells)
                .all(|(own, theirs)| own.is_empty() || theirs.is_empty())
    }
}

/// Join each fragment row into the adjacent row it completes, keeping the
/// text in top-to-bottom order.
fn join_fragments(rows: Vec<PlacedRow>) -> Vec<Vec<String>> {
    let mut target: Vec<Option<usize>> = (0..rows.len())
        .map(|i| {
            let distance = |j: usize| (rows[j].center - rows[i].center).abs();
            [i.checked_sub(1), Some(i + 1).filter(|&j| j < rows.len())]
                .into_iter()
                .flatten()
                .filter(|&j| rows[i].fits_into(&rows[j]))
                .min_by(|&a, &b| distance(a).total_cmp(&distance(b)))
        })
        .collect();

    // A row that receives a fragment stays in the grid.
    let receiving: Vec<usize> = target.iter().flatten().copied().collect();
    for j in receiving {
        target[j] = None;
    }

    let mut cells: Vec<Vec<String>> = rows.into_iter().map(|r| r.cells).collect();
    for (i, t) in target.iter().enumerate() {
        let Some(t) = *t else { continue };
        debug!("Joining fragment row {} into table row {}", i, t);
        let fragment = std::mem::take(&mut cells[i]);
        for (slot, text) in cells[t].iter_mut().zip(fragment) {
            if text.is_empty() {
                continue;
            }
            *slot = match (slot.is_empty(), i < t) {
                (true, _) => text,
                (false, true) => format!("{text} {slot}"),
                (false, false) => format!("{slot} {text}"),
            };
        }
    }

    cells
        .into_iter()
        .zip(target)
        .filter(|(_, t)| t.is_none())
        .map(|(row, _)| row)
        .collect()
}

/// Rows top to bottom, each sorted left to right.
fn group_rows(mut boxes: Vec<TextBox>) -> Vec<Vec<TextBox>> {
    boxes.retain(|b| !b.text.trim().is_empty());
    boxes.sort_by(|a, b| {
        b.center_y()
            .total_cmp(&a.center_y())
            .then(a.left.total_cmp(&b.left))
    });

    let mut rows: Vec<Vec<TextBox>> = Vec::new();
    let mut row_center = f32::NAN;
    let mut row_height = 0.0f32;
    for b in boxes {
        let tolerance = row_height.max(b.height()) / 2.0;
        match rows.last_mut() {
            Some(row) if (row_center - b.center_y()).abs() <= tolerance => row.push(b),
            _ => {
                row_center = b.center_y();
                row_height = b.height();
                rows.push(vec![b]);
            }
        }
    }
    for row in &mut rows {
        row.sort_by(|a, b| a.left.total_cmp(&b.left));
    }
    rows
}

fn merge_cells(rows: Vec<Vec<TextBox>>) -> Vec<Vec<TextBox>> {
    rows.into_iter()
        .map(|row| {
            let mut cells: Vec<TextBox> = Vec::with_capacity(row.len());
            for b in row {
                match cells.last_mut() {
                    Some(prev) if b.left - prev.right < CELL_GAP => {
                        if b.left - prev.right > 0.5 {
                            prev.text.push(' ');
                        }
                        prev.text.push_str(&b.text);
                        prev.right = prev.right.max(b.right);
                        prev.top = prev.top.max(b.top);
                        prev.bottom = prev.bottom.min(b.bottom);
                    }
                    _ => cells.push(b),
                }
            }
            cells
        })
        .collect()
}

/// Left edges shared by at least a third of the dense rows, ascending.
fn column_anchors<'a>(dense_rows: impl Iterator<Item = &'a Vec<TextBox>>) -> Vec<f32> {
    let mut row_count = 0usize;
    let mut lefts: Vec<f32> = Vec::new();
    for row in dense_rows {
        row_count += 1;
        lefts.extend(row.iter().map(|c| c.left));
    }
    lefts.sort_by(f32::total_cmp);

    let min_support = (row_count / 3).max(1);
    let mut anchors = Vec::new();
    let mut start = 0;
    while start < lefts.len() {
        let mut end = start + 1;
        while end < lefts.len() && lefts[end] - lefts[end - 1] <= COLUMN_TOLERANCE {
            end += 1;
        }
        if end - start >= min_support {
            anchors.push(lefts[start]);
        }
        start = end;
    }
    anchors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::table::extract_roster;

    fn tb(text: &str, left: f32, width: f32, top: f32) -> TextBox {
        TextBox {
            text: text.into(),
            left,
            right: left + width,
            top,
            bottom: top - 10.0,
        }
    }

    /// Six columns at x = 20, 60, 200, 280, 320, 460.
    fn row(y: f32, cells: [&str; 6]) -> Vec<TextBox> {
        let xs = [20.0, 60.0, 200.0, 280.0, 320.0, 460.0];
        cells
            .iter()
            .zip(xs)
            .filter(|(t, _)| !t.is_empty())
            .map(|(t, x)| tb(t, x, 30.0, y))
            .collect()
    }

    #[test]
    fn rebuilds_six_column_table() {
        let mut boxes = vec![tb("Броварська міська рада", 100.0, 200.0, 800.0)];
        boxes.extend(row(700.0, ["№", "ПІБ", "Результат", "№", "ПІБ", "Результат"]));
        boxes.extend(row(688.0, ["1", "Іваненко", "За", "2", "Петренко", "Проти"]));
        boxes.extend(row(676.0, ["3", "Веремчук", "", "", "", ""]));
        boxes.extend(row(664.0, ["", "Ірина", "За", "", "", ""]));
        boxes.extend(row(652.0, ["4", "Бойко", "Відсутній", "5", "Гнатюк", "За"]));
        boxes.push(tb("Система поіменного голосування", 100.0, 200.0, 100.0));

        let grid = detect_table(boxes).unwrap();
        assert_eq!(grid.column_count(), 6);
        assert_eq!(grid.row_count(), 5);
        assert_eq!(grid.cell(0, 2), "Результат");
        assert_eq!(grid.cell(1, 4), "Петренко");
        assert_eq!(grid.cell(2, 2), "");
        assert_eq!(grid.cell(3, 1), "Ірина");
        assert_eq!(grid.cell(4, 5), "За");
    }

    #[test]
    fn adjacent_segments_merge_into_one_cell() {
        let boxes = vec![
            tb("Іван", 40.0, 20.0, 500.0),
            tb("енко", 60.2, 20.0, 500.0),
            tb("Олег", 82.0, 20.0, 500.0),
        ];
        let rows = merge_cells(group_rows(boxes));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0].text, "Іваненко Олег");
    }

    #[test]
    fn centred_outcome_joins_name_lines_above_and_below() {
        let mut boxes = row(700.0, ["№", "ПІБ", "Результат", "№", "ПІБ", "Результат"]);
        boxes.extend(row(688.0, ["", "Smith", "", "", "", ""]));
        boxes.extend(row(682.0, ["1", "", "За", "2", "Бойко", "За"]));
        boxes.extend(row(676.0, ["", "John", "", "", "", ""]));
        boxes.extend(row(664.0, ["3", "Петренко", "Проти", "4", "Гнатюк", "За"]));

        let grid = detect_table(boxes).unwrap();
        assert_eq!(grid.row_count(), 3);
        assert_eq!(grid.cell(1, 0), "1");
        assert_eq!(grid.cell(1, 1), "Smith John");
        assert_eq!(grid.cell(1, 2), "За");

        let names: Vec<String> = extract_roster(&grid)
            .unwrap()
            .into_iter()
            .map(|e| e.full_name)
            .collect();
        assert_eq!(names, ["Smith John", "Петренко", "Бойко", "Гнатюк"]);
    }

    #[test]
    fn table_continues_past_last_dense_row() {
        let mut boxes = row(700.0, ["№", "ПІБ", "Результат", "№", "ПІБ", "Результат"]);
        boxes.extend(row(688.0, ["1", "Іваненко", "За", "2", "Петренко", "Проти"]));
        boxes.extend(row(682.0, ["", "Веремчук", "", "", "", ""]));
        boxes.extend(row(676.0, ["3", "", "Утримався", "", "", ""]));
        boxes.extend(row(670.0, ["", "Ірина", "", "", "", ""]));
        boxes.push(tb("Головуючий", 100.0, 80.0, 600.0));

        let grid = detect_table(boxes).unwrap();
        assert_eq!(grid.row_count(), 3);
        assert_eq!(grid.cell(2, 1), "Веремчук Ірина");
        assert_eq!(grid.cell(2, 2), "Утримався");
    }

    #[test]
    fn bottom_aligned_wrap_is_left_to_the_roster() {
        let mut boxes = row(700.0, ["№", "ПІБ", "Результат", "№", "ПІБ", "Результат"]);
        boxes.extend(row(688.0, ["1", "Smith", "", "2", "Бойко", "За"]));
        boxes.extend(row(676.0, ["", "John", "За", "", "", ""]));

        let grid = detect_table(boxes).unwrap();
        assert_eq!(grid.row_count(), 3);
        assert_eq!(grid.cell(2, 1), "John");
        let roster = extract_roster(&grid).unwrap();
        assert_eq!(roster[0].full_name, "Smith John");
    }

    #[test]
    fn prose_page_has_no_table() {
        let boxes = vec![
            tb("Результат поіменного голосування:", 20.0, 200.0, 700.0),
            tb("Про бюджет", 20.0, 80.0, 688.0),
        ];
        assert!(detect_table(boxes).is_none());
    }
}
