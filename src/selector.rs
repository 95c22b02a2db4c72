//! The selection algorithm: smooth weighted round-robin with health-aware
//! demotion, backup fallback, and (optionally) TLS session reuse.
//!
//! `Selector` itself carries no per-request state — that lives in
//! [`RequestState`] — so one `Selector` is shared across every request
//! against every pool it is configured with, a single long-lived value
//! driving many lookups.

use std::sync::Arc;

use crate::addr::Address;
use crate::clock::{Clock, MonotonicClock};
use crate::error::{AllocError, SelectorError};
use crate::peer::Peer;
use crate::pool::Pool;
use crate::request::RequestState;

/// The result of a selection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Selected(T),
    /// No untried, eligible peer remains in the current pool and no backup
    /// pool remains either. Not an error: the caller decides whether to fail
    /// the request or serve something stale.
    Busy,
}

/// What happened on the attempt a prior `get` produced, as reported back to
/// [`Selector::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Success,
    Failed,
}

/// Drives selection and outcome reporting against one or more [`Pool`]s.
///
/// Holds only a clock; everything else is read from the `Pool`/`RequestState`
/// passed to each call, so cloning a `Selector` (or constructing several) is
/// cheap and never shares mutable state beyond what the `Pool`'s own lock
/// already guards.
pub struct Selector {
    clock: Arc<dyn Clock>,
}

impl Default for Selector {
    fn default() -> Self {
        Self::new(Arc::new(MonotonicClock::default()))
    }
}

impl Selector {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Allocates a fresh [`RequestState`] against `pool`.
    pub fn init_request(&self, pool: Arc<Pool>) -> Result<RequestState, SelectorError> {
        Ok(RequestState::new(pool)?)
    }

    pub fn remaining_tries(&self, state: &RequestState) -> usize {
        state.remaining_tries()
    }

    /// Returns an untried, eligible peer, falling back to the backup pool
    /// (at most once) if the current pool is exhausted.
    ///
    /// The `checked` window refresh below (`refresh_checked`) happens
    /// whenever a stale failure window is observed, *even if the peer that
    /// triggered it is then returned as healthy*. This looks redundant but is
    /// deliberately preserved: a later `release(Success)` for this same pick
    /// will see `accessed < checked` only if `accessed` predates this
    /// refresh, which is the source behavior this core reproduces rather
    /// than "fixes".
    pub fn get(&self, state: &mut RequestState) -> Outcome<(Address, String)> {
        let now = self.clock.now();

        loop {
            let pool = Arc::clone(&state.pool);
            let picked = if pool.single {
                self.get_single(&pool, state, now)
            } else {
                self.get_weighted(&pool, state, now)
            };

            if let Some((addr, name)) = picked {
                tracing::debug!(peer = %name, upstream = %pool.name, "selected peer");
                return Outcome::Selected((addr, name));
            }

            match pool.backup.clone() {
                Some(backup) => {
                    state.fallback_to_backup(backup);
                    continue;
                }
                None => return Outcome::Busy,
            }
        }
    }

    /// The single-peer fast path never touches `current_weight`/
    /// `effective_weight`, and — unlike the general weighted path — never
    /// refreshes `checked` either: the source's single-peer branch of
    /// `ngx_http_upstream_get_round_robin_peer` returns the peer directly
    /// without passing through the `checked` rollover that only the general
    /// path performs.
    fn get_single(
        &self,
        pool: &Arc<Pool>,
        state: &mut RequestState,
        now: u64,
    ) -> Option<(Address, String)> {
        let mut peers = pool.peers.write();
        if state.is_tried(0) || !peers[0].eligible(now) {
            return None;
        }
        state.mark_tried(0);
        state.current = Some(0);
        peers[0].conns += 1;
        Some((peers[0].addr.clone(), peers[0].name.clone()))
    }

    fn get_weighted(
        &self,
        pool: &Arc<Pool>,
        state: &mut RequestState,
        now: u64,
    ) -> Option<(Address, String)> {
        let mut peers = pool.peers.write();

        let mut best_idx = None;
        let mut best_weight = i64::MIN;
        let mut total = 0i64;

        for i in 0..peers.len() {
            if state.is_tried(i) || !peers[i].eligible(now) {
                continue;
            }
            peers[i].current_weight += peers[i].effective_weight;
            total += peers[i].effective_weight;
            if peers[i].effective_weight < peers[i].weight {
                peers[i].effective_weight += 1;
            }
            if peers[i].current_weight > best_weight {
                best_weight = peers[i].current_weight;
                best_idx = Some(i);
            }
        }

        let idx = best_idx?;
        peers[idx].current_weight -= total;
        state.mark_tried(idx);
        state.current = Some(idx);
        peers[idx].conns += 1;
        refresh_checked(&mut peers[idx], now);

        Some((peers[idx].addr.clone(), peers[idx].name.clone()))
    }

    /// Reports the outcome of the most recent `get`. Must be called exactly
    /// once per `get` that returned `Selected`; calling it without a prior
    /// pick is a programming error.
    pub fn release(&self, state: &mut RequestState, outcome: ReleaseOutcome) {
        let now = self.clock.now();
        let pool = Arc::clone(&state.pool);
        let idx = state
            .current
            .take()
            .expect("release called without a prior get");

        {
            let mut peers = pool.peers.write();
            let peer = &mut peers[idx];
            peer.conns = peer.conns.saturating_sub(1);

            match outcome {
                ReleaseOutcome::Failed => {
                    peer.fails += 1;
                    peer.accessed = now;
                    peer.checked = now;
                    if peer.max_fails != 0 {
                        let crossed = peer.fails == peer.max_fails;
                        peer.effective_weight =
                            (peer.effective_weight - peer.weight / peer.max_fails as i64).max(0);
                        if crossed {
                            tracing::warn!(
                                peer = %peer.name,
                                upstream = %pool.name,
                                fails = peer.fails,
                                "peer entered probation"
                            );
                        }
                    }
                }
                ReleaseOutcome::Success => {
                    if peer.accessed < peer.checked {
                        peer.fails = 0;
                    }
                }
            }
        }

        state.decrement_tries();
        if pool.single {
            state.force_exhausted();
        }
    }

    /// Copies out the cached TLS session for the peer the request currently
    /// holds, if any. A no-op returning `None` once the session is empty.
    #[cfg(feature = "tls")]
    pub fn load_session(&self, state: &RequestState) -> Option<Vec<u8>> {
        let idx = state.current?;
        let peers = state.pool.peers.read();
        peers[idx].session.load()
    }

    /// Stores a serialized TLS session against the peer the request
    /// currently holds. Blobs over `max_size` are silently dropped.
    #[cfg(feature = "tls")]
    pub fn save_session(
        &self,
        state: &RequestState,
        blob: Vec<u8>,
        max_size: usize,
    ) -> Result<(), AllocError> {
        let idx = state
            .current
            .expect("save_session called without a current peer");
        let peers = state.pool.peers.read();
        peers[idx]
            .session
            .save(blob, max_size, state.pool.slab.as_deref())
    }
}

fn refresh_checked(peer: &mut Peer, now: u64) {
    if now.saturating_sub(peer.checked) > peer.fail_timeout {
        peer.checked = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::pool::{Pool, ServerSpec};

    fn spec(name: &str, addr: &str, weight: i64, max_fails: u32, fail_timeout: u64, backup: bool) -> ServerSpec {
        ServerSpec {
            name: name.to_string(),
            addresses: vec![addr.parse::<std::net::SocketAddr>().unwrap().into()],
            weight,
            max_conns: 0,
            max_fails,
            fail_timeout,
            down: false,
            backup,
        }
    }

    fn selector(clock: Arc<FixedClock>) -> Selector {
        Selector::new(clock)
    }

    fn expect_name(outcome: Outcome<(Address, String)>) -> String {
        match outcome {
            Outcome::Selected((_, name)) => name,
            Outcome::Busy => panic!("expected a peer, got Busy"),
        }
    }

    #[test]
    fn two_equal_peers_alternate() {
        let specs = vec![
            spec("a", "127.0.0.1:1", 1, 1, 10, false),
            spec("b", "127.0.0.1:2", 1, 1, 10, false),
        ];
        let pool = Pool::build("up", &specs, false).unwrap();
        let clock = Arc::new(FixedClock::new(0));
        let sel = selector(clock);

        let mut picks = Vec::new();
        for _ in 0..6 {
            let mut req = sel.init_request(Arc::clone(&pool)).unwrap();
            let name = expect_name(sel.get(&mut req));
            sel.release(&mut req, ReleaseOutcome::Success);
            picks.push(name);
        }
        assert_eq!(picks, vec!["a", "b", "a", "b", "a", "b"]);
    }

    #[test]
    fn smooth_weighted_distribution_over_many_requests() {
        let specs = vec![
            spec("a", "127.0.0.1:1", 5, 1, 10, false),
            spec("b", "127.0.0.1:2", 1, 1, 10, false),
        ];
        let pool = Pool::build("up", &specs, false).unwrap();
        let clock = Arc::new(FixedClock::new(0));
        let sel = selector(clock);

        let mut counts = std::collections::HashMap::new();
        for _ in 0..60 {
            let mut req = sel.init_request(Arc::clone(&pool)).unwrap();
            let name = expect_name(sel.get(&mut req));
            sel.release(&mut req, ReleaseOutcome::Success);
            *counts.entry(name).or_insert(0) += 1;
        }
        assert_eq!(counts.get("a"), Some(&50));
        assert_eq!(counts.get("b"), Some(&10));
    }

    #[test]
    fn smooth_weighted_does_not_burst() {
        let specs = vec![
            spec("a", "127.0.0.1:1", 5, 1, 10, false),
            spec("b", "127.0.0.1:2", 1, 1, 10, false),
        ];
        let pool = Pool::build("up", &specs, false).unwrap();
        let clock = Arc::new(FixedClock::new(0));
        let sel = selector(clock);

        let mut picks = Vec::new();
        for _ in 0..6 {
            let mut req = sel.init_request(Arc::clone(&pool)).unwrap();
            let name = expect_name(sel.get(&mut req));
            sel.release(&mut req, ReleaseOutcome::Success);
            picks.push(name);
        }
        assert_eq!(picks, vec!["a", "a", "a", "b", "a", "a"]);
    }

    #[test]
    fn failure_demotion_drives_peer_to_probation() {
        let specs = vec![spec("a", "127.0.0.1:1", 4, 2, 30, false)];
        let pool = Pool::build("up", &specs, false).unwrap();
        let clock = Arc::new(FixedClock::new(0));
        let sel = selector(Arc::clone(&clock));

        for _ in 0..2 {
            let mut req = sel.init_request(Arc::clone(&pool)).unwrap();
            expect_name(sel.get(&mut req));
            sel.release(&mut req, ReleaseOutcome::Failed);
        }

        assert_eq!(pool.peers.read()[0].effective_weight, 0);
        assert_eq!(pool.peers.read()[0].fails, 2);

        let mut req = sel.init_request(Arc::clone(&pool)).unwrap();
        assert_eq!(sel.get(&mut req), Outcome::Busy);
    }

    #[test]
    fn window_expiry_reopens_a_probation_peer() {
        let specs = vec![spec("a", "127.0.0.1:1", 4, 2, 30, false)];
        let pool = Pool::build("up", &specs, false).unwrap();
        let clock = Arc::new(FixedClock::new(0));
        let sel = selector(Arc::clone(&clock));

        for _ in 0..2 {
            let mut req = sel.init_request(Arc::clone(&pool)).unwrap();
            expect_name(sel.get(&mut req));
            sel.release(&mut req, ReleaseOutcome::Failed);
        }

        clock.advance(31);

        let mut req = sel.init_request(Arc::clone(&pool)).unwrap();
        assert_eq!(expect_name(sel.get(&mut req)), "a");
    }

    #[test]
    fn backup_fallback_is_used_once_primary_is_exhausted() {
        let mut down_a = spec("a", "127.0.0.1:1", 1, 1, 10, false);
        down_a.down = true;
        let specs = vec![down_a, spec("b", "127.0.0.1:2", 1, 1, 10, true)];
        let pool = Pool::build("up", &specs, false).unwrap();
        let clock = Arc::new(FixedClock::new(0));
        let sel = selector(clock);

        let mut req = sel.init_request(Arc::clone(&pool)).unwrap();
        assert_eq!(req.remaining_tries(), 1);
        assert_eq!(expect_name(sel.get(&mut req)), "b");

        // b is now marked tried within this request's (reset) bitmap, and
        // there is no further backup behind the backup pool.
        assert_eq!(sel.get(&mut req), Outcome::Busy);
    }

    #[test]
    fn max_conns_cap_returns_busy_until_released() {
        let mut only = spec("a", "127.0.0.1:1", 1, 1, 10, false);
        only.max_conns = 1;
        let pool = Pool::build("up", &[only], false).unwrap();
        let clock = Arc::new(FixedClock::new(0));
        let sel = selector(clock);

        let mut first = sel.init_request(Arc::clone(&pool)).unwrap();
        expect_name(sel.get(&mut first));

        let mut second = sel.init_request(Arc::clone(&pool)).unwrap();
        assert_eq!(sel.get(&mut second), Outcome::Busy);

        sel.release(&mut first, ReleaseOutcome::Success);

        let mut third = sel.init_request(Arc::clone(&pool)).unwrap();
        assert_eq!(expect_name(sel.get(&mut third)), "a");
    }

    #[test]
    fn single_pool_forces_tries_to_zero_on_release() {
        let pool = Pool::build("up", &[spec("a", "127.0.0.1:1", 1, 1, 10, false)], false).unwrap();
        assert!(pool.single);
        let clock = Arc::new(FixedClock::new(0));
        let sel = selector(clock);

        let mut req = sel.init_request(Arc::clone(&pool)).unwrap();
        expect_name(sel.get(&mut req));
        assert_eq!(req.remaining_tries(), 1);
        sel.release(&mut req, ReleaseOutcome::Success);
        assert_eq!(req.remaining_tries(), 0);
    }

    #[test]
    fn no_peer_is_selected_twice_in_one_request() {
        let specs = vec![
            spec("a", "127.0.0.1:1", 1, 1, 10, false),
            spec("b", "127.0.0.1:2", 1, 1, 10, false),
        ];
        let pool = Pool::build("up", &specs, false).unwrap();
        let clock = Arc::new(FixedClock::new(0));
        let sel = selector(clock);

        let mut req = sel.init_request(Arc::clone(&pool)).unwrap();
        let first = expect_name(sel.get(&mut req));
        let second = expect_name(sel.get(&mut req));
        assert_ne!(first, second);
        assert_eq!(sel.get(&mut req), Outcome::Busy);
    }
}
