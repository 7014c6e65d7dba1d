//! On-demand message body download with in-flight dedup
//!
//! Multiple readers can ask for the same uncached body concurrently; only
//! one request goes to the server, the others block until the download
//! lands in the body cache and then read from there.

use anyhow::Result;
use log::debug;
use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use super::CancelToken;
use crate::error::EwsError;
use crate::ews::RemoteItemClient;
use crate::storage::BodyCache;

const WAIT_SLICE: Duration = Duration::from_millis(200);

/// Tracks which message bodies are currently being downloaded.
#[derive(Default)]
pub struct InFlightFetchRegistry {
    inner: Mutex<HashSet<String>>,
    cond: Condvar,
}

/// Outcome of [`InFlightFetchRegistry::acquire`].
pub enum Acquire<'a> {
    /// This caller owns the download; the guard releases the slot on drop.
    Owned(FetchGuard<'a>),
    /// Another caller finished (or abandoned) the download while we waited.
    Waited,
}

/// Releases the in-flight slot and wakes waiters, on success and on panic
/// or error unwinding alike.
pub struct FetchGuard<'a> {
    registry: &'a InFlightFetchRegistry,
    uid: String,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.registry.inner.lock().unwrap();
        set.remove(&self.uid);
        self.registry.cond.notify_all();
    }
}

impl InFlightFetchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the download slot for `uid`, or block until whoever holds it
    /// releases it. Waiting is sliced so cancellation is honored promptly.
    pub fn acquire(&self, uid: &str, cancel: &CancelToken) -> Result<Acquire<'_>, EwsError> {
        let mut set = self.inner.lock().unwrap();
        if set.insert(uid.to_string()) {
            return Ok(Acquire::Owned(FetchGuard {
                registry: self,
                uid: uid.to_string(),
            }));
        }

        debug!("Fetch already in flight for {uid}, waiting");
        while set.contains(uid) {
            cancel.check()?;
            let (guard, _) = self.cond.wait_timeout(set, WAIT_SLICE).unwrap();
            set = guard;
        }
        Ok(Acquire::Waited)
    }

    #[cfg(test)]
    fn in_flight(&self, uid: &str) -> bool {
        self.inner.lock().unwrap().contains(uid)
    }
}

/// Fetch a message body, serving from the cache when possible and joining
/// an in-flight download otherwise. At most one server request per UID is
/// outstanding at any time.
pub fn fetch_message(
    registry: &InFlightFetchRegistry,
    client: &dyn RemoteItemClient,
    bodies: &BodyCache,
    uid: &str,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    loop {
        cancel.check()?;

        if let Some(body) = bodies.get(uid)? {
            return Ok(body);
        }

        match registry.acquire(uid, cancel)? {
            Acquire::Owned(_guard) => {
                // A previous owner may have landed the body between our
                // cache miss and winning the slot.
                if let Some(body) = bodies.get(uid)? {
                    return Ok(body);
                }
                let content = client.get_message_content(uid)?;
                bodies.put(uid, &content)?;
                return Ok(content);
            }
            // The downloader finished; re-check the cache. If it failed,
            // the cache is still empty and we become the new owner.
            Acquire::Waited => continue,
        }
    }
}
