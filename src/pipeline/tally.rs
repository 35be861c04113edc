//! Vote tally recomputation.

use crate::error::StoreError;
use crate::model::{Tally, VoteId};
use crate::store::RecordStore;
use tracing::debug;

/// Recount `vote` from its current voices and persist counts and decision.
///
/// Writes even when nothing changed, so it is safe to call after every page
/// that touched the vote.
pub fn recalculate<S>(store: &mut S, vote: VoteId) -> Result<Tally, StoreError>
where
    S: RecordStore + ?Sized,
{
    let tally = store.recount(vote)?;
    debug!(
        "Vote {}: {} voice(s), {:?}",
        vote,
        tally.total(),
        tally.decision()
    );
    Ok(tally)
}
