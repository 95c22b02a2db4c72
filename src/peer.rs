//! A single backend endpoint and its health/weight bookkeeping.

use crate::addr::Address;

/// Observable health state of a [`Peer`], derived from its counters.
///
/// `Disabled` is administrative and never produced by the runtime state
/// machine in this module; it is surfaced purely for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Up,
    Probation,
    Disabled,
}

/// One backend endpoint: static configuration plus the mutable counters the
/// selector updates on every `get`/`release`.
///
/// No method here mutates state outside of what [`crate::selector::Selector`]
/// does in its `get`/`release` paths; `Peer` itself is pure data plus the
/// [`Peer::eligible`] predicate.
#[derive(Debug)]
pub struct Peer {
    pub addr: Address,
    pub name: String,
    pub server: String,

    pub weight: i64,
    pub effective_weight: i64,
    pub current_weight: i64,

    pub conns: u32,
    pub max_conns: u32,

    pub fails: u32,
    pub max_fails: u32,
    pub fail_timeout: u64,

    pub accessed: u64,
    pub checked: u64,

    pub down: bool,

    #[cfg(feature = "tls")]
    pub(crate) session: crate::session::SessionSlot,
}

impl Peer {
    /// Constructs a peer with static configuration; dynamic counters start
    /// at their rest values (`effective_weight == weight`, everything else
    /// zero).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        addr: Address,
        name: String,
        server: String,
        weight: i64,
        max_conns: u32,
        max_fails: u32,
        fail_timeout: u64,
        down: bool,
        #[cfg_attr(not(feature = "tls"), allow(unused_variables))] shared: bool,
    ) -> Self {
        Self {
            addr,
            name,
            server,
            weight,
            effective_weight: weight,
            current_weight: 0,
            conns: 0,
            max_conns,
            fails: 0,
            max_fails,
            fail_timeout,
            accessed: 0,
            checked: 0,
            down,
            #[cfg(feature = "tls")]
            session: if shared {
                crate::session::SessionSlot::shared()
            } else {
                crate::session::SessionSlot::local()
            },
        }
    }

    /// An implicitly-resolved peer (single hostname resolved to N addresses):
    /// `weight = effective_weight = 1`, `max_fails = 1`, `fail_timeout = 10s`,
    /// `max_conns = 0`.
    pub fn implicit(addr: Address, name: String, shared: bool) -> Self {
        Self::new(addr, name.clone(), name, 1, 0, 1, 10, false, shared)
    }

    /// `eligible(now) ≡ ¬down ∧ (max_conns = 0 ∨ conns < max_conns) ∧
    /// ¬(max_fails > 0 ∧ fails ≥ max_fails ∧ now − checked ≤ fail_timeout)`
    pub fn eligible(&self, now: u64) -> bool {
        if self.down {
            return false;
        }
        if self.max_conns != 0 && self.conns >= self.max_conns {
            return false;
        }
        if self.max_fails != 0
            && self.fails >= self.max_fails
            && now.saturating_sub(self.checked) <= self.fail_timeout
        {
            return false;
        }
        true
    }

    /// The state `eligible` is summarizing, useful for diagnostics/logging.
    pub fn state(&self, now: u64) -> PeerState {
        if self.down {
            return PeerState::Disabled;
        }
        if self.max_fails != 0
            && self.fails >= self.max_fails
            && now.saturating_sub(self.checked) <= self.fail_timeout
        {
            return PeerState::Probation;
        }
        PeerState::Up
    }
}
