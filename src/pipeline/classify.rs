//! Page classification: is this page the first page of a roll-call result?

/// Footer printed by the "Рада Голос" voting system on every result page.
pub const VOTE_PAGE_MARKER: &str = "Система поіменного голосування \"Рада Голос\"";

/// `true` when `text` is a vote-result page.
///
/// Continuation pages and unrelated content lack the marker and are skipped
/// without touching the store.
pub fn is_vote_page(text: &str) -> bool {
    text.contains(VOTE_PAGE_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_page_is_vote_page() {
        let text = "Броварська міська рада\nСистема поіменного голосування \"Рада Голос\"\n";
        assert!(is_vote_page(text));
    }

    #[test]
    fn continuation_page_is_skipped() {
        assert!(!is_vote_page("Іваненко Валерій Іванович За\n"));
        assert!(!is_vote_page(""));
    }
}
