//! Process-wide anonymous-principal cache.
//!
//! The sentinel anonymous user is looked up by username and cached with a
//! configurable TTL: 0 disables caching, -1 caches indefinitely, a positive
//! value caches for that many seconds. This is the only process-wide
//! mutable state in the crate; reads are frequent, repopulation is rare.

use std::time::Instant;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::WardenConfig;
use crate::principal::{User, UserId};
use crate::store::Store;

#[derive(Debug, Default)]
struct CacheSlot {
    username: Option<String>,
    pinned_id: Option<UserId>,
    user: Option<User>,
    fetched_at: Option<Instant>,
}

static CACHE: Lazy<Mutex<CacheSlot>> = Lazy::new(|| Mutex::new(CacheSlot::default()));

/// Fetch the sentinel anonymous user, consulting the cache per the
/// configured TTL.
///
/// A missing sentinel row degrades to `None` with a warning rather than an
/// error: during bootstrap, before fixtures are in place, this lookup is
/// expected to fail.
pub fn anonymous_user(store: &Store, config: &WardenConfig) -> Option<User> {
    let ttl = config.anonymous_cache_ttl_secs;
    if ttl == 0 {
        return fetch(store, config);
    }

    let mut slot = CACHE.lock();
    let same_sentinel = slot.username.as_deref() == Some(config.anonymous_user_name.as_str())
        && slot.pinned_id == config.anonymous_user_id;
    let fresh = same_sentinel
        && match (slot.user.as_ref(), slot.fetched_at) {
            (Some(_), Some(at)) => ttl == -1 || at.elapsed().as_secs() < ttl as u64,
            _ => false,
        };
    if fresh {
        return slot.user.clone();
    }
    let user = fetch(store, config);
    slot.username = Some(config.anonymous_user_name.clone());
    slot.pinned_id = config.anonymous_user_id;
    slot.user = user.clone();
    slot.fetched_at = Some(Instant::now());
    user
}

/// Drop the cached sentinel so the next lookup repopulates it.
pub fn invalidate_anonymous_cache() {
    let mut slot = CACHE.lock();
    *slot = CacheSlot::default();
    debug!("anonymous-user cache invalidated");
}

/// A pinned sentinel id takes precedence over the username lookup.
fn fetch(store: &Store, config: &WardenConfig) -> Option<User> {
    let user = match config.anonymous_user_id {
        Some(id) => store.user_by_id(id),
        None => store.user_by_name(&config.anonymous_user_name),
    };
    if user.is_none() {
        warn!(
            username = %config.anonymous_user_name,
            pinned_id = ?config.anonymous_user_id,
            "anonymous sentinel user not found; treating as unresolvable"
        );
    }
    user
}
