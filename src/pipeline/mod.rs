//! Pipeline stages for one document.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ source ──▶ classify ──▶ header ─┐
//! (*.pdf)   (pdfium)   (marker)     table  ─┴─▶ reconcile ──▶ tally
//!                                   (grid)      (one txn/page)
//! ```
//!
//! 1. [`input`]     discover the run's PDFs and check their magic bytes
//! 2. [`source`]    page text and table boundary; [`pdfium`] implements it,
//!    rebuilding tables from text geometry in [`grid`]
//! 3. [`classify`]  keep only vote-result pages
//! 4. [`header`]    council, session, vote title and vote type
//! 5. [`table`]     roster of `(deputy, outcome)` from the grid
//! 6. [`reconcile`] natural-key upserts and stale-voice pruning, with retry
//!    on write conflicts
//! 7. [`tally`]     recount a vote and store its decision
//!
//! Stages 3 to 5 are pure functions of the page; only [`reconcile`] and
//! [`tally`] touch the store.

pub mod classify;
pub mod grid;
pub mod header;
pub mod input;
pub mod pdfium;
pub mod reconcile;
pub mod source;
pub mod table;
pub mod tally;
