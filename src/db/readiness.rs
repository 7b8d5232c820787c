use chrono::{DateTime, Utc};

use crate::types::RequestAndResponses;

/// Reduce a set of completed candidate requests to the maximal contiguous
/// run starting at `next_needed`.
///
/// This is the ordering guarantee of the whole scheduling core: flow logic
/// only ever sees request N+1 after request N, so a gap (an id that is
/// missing, not yet complete, or withheld by a future `start_time`)
/// truncates the run and everything past it is invisible until the gap
/// closes.
#[must_use]
pub fn ready_run(
    next_needed: u64,
    now: DateTime<Utc>,
    mut candidates: Vec<RequestAndResponses>,
) -> Vec<RequestAndResponses> {
    candidates.sort_by_key(|item| item.request.request_id);

    let mut run = Vec::new();
    let mut expected = next_needed;
    for item in candidates {
        if item.request.request_id != expected {
            break;
        }
        if !item.request.needs_processing {
            break;
        }
        if item.request.start_time.is_some_and(|t| t > now) {
            break;
        }
        expected += 1;
        run.push(item);
    }
    run
}

/// A request is complete once its stored response count has reached the
/// expected total declared by the terminating status. Counts only grow and
/// the comparison is monotone, which is what makes concurrent response
/// writers safe without a separate lock.
#[must_use]
pub const fn responses_complete(expected: Option<u64>, stored: u64) -> bool {
    match expected {
        Some(expected) => stored >= expected,
        None => false,
    }
}
