//! Batched move, copy and delete of cached messages
//!
//! All three operations chunk to the server batch bound and reconcile the
//! local cache for exactly the subset the server confirms, even when the
//! call as a whole reports an error.

use anyhow::Result;
use log::{debug, warn};
use std::sync::Arc;

use super::CancelToken;
use crate::ews::types::{BatchResponse, MAX_FETCH_COUNT};
use crate::ews::RemoteItemClient;
use crate::storage::{BodyCache, MessageInfoStore};

/// Outcome of one transfer call: the UIDs whose local state was
/// reconciled. On error, `done` still names the subset that went through.
#[derive(Debug, Default)]
pub struct TransferOutcome {
    pub done: Vec<String>,
}

/// Move messages to another folder, removing them from the local cache of
/// the source folder as the server confirms each one.
pub fn move_messages(
    client: &Arc<dyn RemoteItemClient>,
    store: &Arc<dyn MessageInfoStore>,
    bodies: &Arc<BodyCache>,
    folder_id: &str,
    dest_folder_id: &str,
    uids: &[String],
    cancel: &CancelToken,
) -> Result<TransferOutcome> {
    transfer(uids, cancel, |chunk| client.move_items(dest_folder_id, chunk), |uid| {
        evict(store, bodies, folder_id, uid)
    })
}

/// Copy messages to another folder. The source cache is untouched; the
/// outcome lists the UIDs the server confirmed.
pub fn copy_messages(
    client: &Arc<dyn RemoteItemClient>,
    dest_folder_id: &str,
    uids: &[String],
    cancel: &CancelToken,
) -> Result<TransferOutcome> {
    transfer(uids, cancel, |chunk| client.copy_items(dest_folder_id, chunk), |_| Ok(()))
}

/// Delete messages, hard or via the deleted-items folder, evicting
/// confirmed ones from the local cache.
pub fn delete_messages(
    client: &Arc<dyn RemoteItemClient>,
    store: &Arc<dyn MessageInfoStore>,
    bodies: &Arc<BodyCache>,
    folder_id: &str,
    uids: &[String],
    hard: bool,
    cancel: &CancelToken,
) -> Result<TransferOutcome> {
    transfer(uids, cancel, |chunk| client.delete_items(chunk, hard), |uid| {
        evict(store, bodies, folder_id, uid)
    })
}

fn evict(
    store: &Arc<dyn MessageInfoStore>,
    bodies: &Arc<BodyCache>,
    folder_id: &str,
    uid: &str,
) -> Result<()> {
    store.delete_meta(folder_id, uid)?;
    bodies.delete(uid)?;
    Ok(())
}

/// Shared chunking and partial-batch reconciliation.
///
/// `reconcile` runs for every entry the server confirmed, plus entries
/// reported as already gone (the goal state is reached either way). When
/// the response carries an overall error, the confirmed subset is still
/// reconciled before the error propagates.
fn transfer(
    uids: &[String],
    cancel: &CancelToken,
    call: impl Fn(&[String]) -> crate::error::EwsResult<BatchResponse>,
    reconcile: impl Fn(&str) -> Result<()>,
) -> Result<TransferOutcome> {
    let mut outcome = TransferOutcome::default();

    for chunk in uids.chunks(MAX_FETCH_COUNT) {
        cancel.check()?;

        let response = call(chunk)?;

        let mut overall = response.error;
        for (uid, entry) in chunk.iter().zip(&response.entries) {
            match &entry.outcome {
                Ok(_) => {
                    reconcile(uid)?;
                    outcome.done.push(uid.clone());
                }
                Err(err) if err.is_not_found() => {
                    debug!("Message {uid} already gone on server");
                    reconcile(uid)?;
                    outcome.done.push(uid.clone());
                }
                Err(err) => {
                    warn!("Batch entry for message {uid} failed: {err}");
                }
            }
        }

        if let Some(err) = overall.take() {
            return Err(anyhow::Error::new(err)
                .context(format!("{} of {} entries applied", outcome.done.len(), uids.len())));
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EwsError;
    use crate::ews::types::BatchOutcome;
    use std::sync::Mutex;

    fn response(outcomes: Vec<Result<(), EwsError>>, error: Option<EwsError>) -> BatchResponse {
        BatchResponse {
            entries: outcomes
                .into_iter()
                .enumerate()
                .map(|(i, outcome)| BatchOutcome {
                    id: format!("m{i}"),
                    outcome: outcome.map(|_| None),
                })
                .collect(),
            error,
        }
    }

    fn uids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("m{i}")).collect()
    }

    #[test]
    fn test_partial_batch_reconciles_succeeded_subset() {
        let uids = uids(5);
        let cancel = CancelToken::new();
        let reconciled = Mutex::new(Vec::new());

        // 3 of 5 entries succeed, then the server reports an overall error.
        let result = transfer(
            &uids,
            &cancel,
            |_| {
                Ok(response(
                    vec![
                        Ok(()),
                        Ok(()),
                        Err(EwsError::Transient("busy".to_string())),
                        Ok(()),
                        Err(EwsError::Transient("busy".to_string())),
                    ],
                    Some(EwsError::Transient("batch aborted".to_string())),
                ))
            },
            |uid| {
                reconciled.lock().unwrap().push(uid.to_string());
                Ok(())
            },
        );

        assert!(result.is_err());
        assert_eq!(*reconciled.lock().unwrap(), vec!["m0", "m1", "m3"]);
    }

    #[test]
    fn test_not_found_counts_as_done() {
        let uids = uids(2);
        let cancel = CancelToken::new();

        let outcome = transfer(
            &uids,
            &cancel,
            |_| Ok(response(vec![Ok(()), Err(EwsError::ItemNotFound)], None)),
            |_| Ok(()),
        )
        .unwrap();

        assert_eq!(outcome.done, vec!["m0", "m1"]);
    }

    #[test]
    fn test_chunking_stays_within_batch_bound() {
        let uids = uids(250);
        let cancel = CancelToken::new();
        let sizes = Mutex::new(Vec::new());

        let outcome = transfer(
            &uids,
            &cancel,
            |chunk| {
                sizes.lock().unwrap().push(chunk.len());
                Ok(response((0..chunk.len()).map(|_| Ok(())).collect(), None))
            },
            |_| Ok(()),
        )
        .unwrap();

        assert_eq!(*sizes.lock().unwrap(), vec![100, 100, 50]);
        assert_eq!(outcome.done.len(), 250);
    }

    #[test]
    fn test_cancelled_before_first_call() {
        let uids = uids(1);
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = transfer(&uids, &cancel, |_| panic!("should not be called"), |_| Ok(()));
        assert!(result.is_err());
    }
}
