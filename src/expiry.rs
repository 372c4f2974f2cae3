//! Active expiration via random sampling of keys that carry a TTL.
//!
//! Passive expiry lives in `storage`: every access drops an expired key
//! first. This module only reclaims keys nobody touches again.

use std::sync::{Arc, Weak};

use log::{debug, info};
use tokio::runtime::Handle;

use crate::server::{ServerState, Shared};

/// Maximum rounds per database per pass.
const MAX_ROUNDS: usize = 16;

/// One pass over every database: sample, drop the expired ones, and go
/// again while more than a quarter of the sample had expired.
/// Returns how many keys were removed.
pub(crate) fn sweep_once(state: &mut ServerState, sample: usize, now: i64) -> usize {
    if sample == 0 {
        return 0;
    }
    let mut rng = rand::thread_rng();
    let mut total = 0;
    for db in state.dbs.iter_mut() {
        for _ in 0..MAX_ROUNDS {
            let keys = db.sample_volatile(sample, &mut rng);
            if keys.is_empty() {
                break;
            }
            let expired = keys
                .iter()
                .filter(|key| db.expire_if_needed(key, now))
                .count();
            total += expired;
            if expired * 4 <= keys.len() {
                break;
            }
        }
    }
    total
}

/// Starts the sweep task on the current tokio runtime, if there is one.
/// The task exits once the last server handle is gone.
pub(crate) fn spawn(shared: &Arc<Shared>) {
    let Ok(handle) = Handle::try_current() else {
        debug!("no tokio runtime, active expiry disabled");
        return;
    };
    let weak: Weak<Shared> = Arc::downgrade(shared);
    let interval = shared.config.expiry_interval;
    let sample = shared.config.expiry_sample_size;

    handle.spawn(async move {
        info!("active expiry started, every {:?}", interval);
        loop {
            tokio::time::sleep(interval).await;
            let Some(shared) = weak.upgrade() else {
                break;
            };
            let removed = {
                let mut state = shared.lock();
                let now = state.now();
                sweep_once(&mut state, sample, now)
            };
            if removed > 0 {
                debug!("active expiry removed {} keys", removed);
            }
        }
        info!("active expiry stopped");
    });
}
