//! Per-source merge of fresh fetch results into the previous snapshot.

use crate::models::pull_request::{PullRequestItem, PullRequestsData};
use std::collections::HashMap;

/// Merge freshly fetched items with the previous data of the same source.
///
/// The result holds exactly the fetched set: ids missing from `fetched` are
/// treated as resolved and dropped. Duplicate ids keep the first position
/// and the last content. An item is new if the previous data did not have
/// it, or still had it flagged as new.
pub fn merge(
    previous: Option<&PullRequestsData>,
    fetched: Vec<PullRequestItem>,
    fetched_at: i64,
) -> PullRequestsData {
    let previously_new: HashMap<u64, bool> = previous
        .map(|data| {
            data.pull_requests
                .iter()
                .map(|pr| (pr.id, pr.is_new))
                .collect()
        })
        .unwrap_or_default();

    let mut positions: HashMap<u64, usize> = HashMap::with_capacity(fetched.len());
    let mut merged: Vec<PullRequestItem> = Vec::with_capacity(fetched.len());

    for mut item in fetched {
        item.is_new = previously_new.get(&item.id).copied().unwrap_or(true);

        match positions.get(&item.id) {
            Some(&idx) => merged[idx] = item,
            None => {
                positions.insert(item.id, merged.len());
                merged.push(item);
            }
        }
    }

    PullRequestsData {
        last_updated: fetched_at,
        pull_requests: merged,
        last_error: None,
    }
}

/// Data kept for a source whose fetch failed: the previous data unchanged,
/// with the error recorded.
pub fn retain_on_failure(previous: Option<&PullRequestsData>, error: &str) -> PullRequestsData {
    let mut data = previous.cloned().unwrap_or_default();
    data.last_error = Some(error.to_string());
    data
}

/// Clear the new flag on every item. Returns how many were cleared.
pub fn acknowledge(data: &mut PullRequestsData) -> usize {
    let mut cleared = 0;
    for pr in data.pull_requests.iter_mut().filter(|pr| pr.is_new) {
        pr.is_new = false;
        cleared += 1;
    }
    cleared
}
