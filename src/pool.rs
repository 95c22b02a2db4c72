//! A pool of peers selected among as a unit, plus the server specs pools are
//! built from.

use std::sync::Arc;

use serde::Deserialize;

use crate::addr::Address;
use crate::error::ConfigError;
use crate::lock::PoolLock;
use crate::peer::Peer;

/// One `server` line inside an `upstream` block: a logical backend that may
/// resolve to several addresses, all sharing the same weight/limits.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSpec {
    pub name: String,
    pub addresses: Vec<Address>,
    #[serde(default = "default_weight")]
    pub weight: i64,
    #[serde(default)]
    pub max_conns: u32,
    #[serde(default = "default_max_fails")]
    pub max_fails: u32,
    #[serde(default = "default_fail_timeout")]
    pub fail_timeout: u64,
    #[serde(default)]
    pub down: bool,
    #[serde(default)]
    pub backup: bool,
}

fn default_weight() -> i64 {
    1
}

fn default_max_fails() -> u32 {
    1
}

fn default_fail_timeout() -> u64 {
    10
}

/// Default capacity of a shared-memory TLS session slab, per pool. Nginx
/// sizes this from the `ssl_session_cache shared:...:<size>` directive; this
/// core has no config surface for it yet, so a fixed default stands in.
#[cfg(feature = "tls")]
const DEFAULT_SHARED_SLAB_BYTES: usize = 1 << 20;

/// An ordered, non-empty collection of [`Peer`]s plus the pool-wide counters
/// computed once at construction, and an optional link to a backup pool.
pub struct Pool {
    pub name: String,
    /// All peers, guarded by a single lock rather than a pool-level lock plus
    /// a separate per-peer lock: peers live in a `Vec` owned by this one
    /// guard, so holding the pool lock already gives exclusive access to
    /// every peer's mutable fields, and a second nested lock would be
    /// redundant under Rust's borrowing rules. See DESIGN.md for this
    /// decision.
    pub(crate) peers: PoolLock<Vec<Peer>>,
    pub total_weight: i64,
    pub weighted: bool,
    /// Count of peers with `down = false` at construction time.
    pub tries: usize,
    /// True iff this pool has exactly one peer and no backup exists.
    pub single: bool,
    pub backup: Option<Arc<Pool>>,
    /// Shared-memory TLS session slab, present only for `shared` pools built
    /// with the `tls` feature on.
    #[cfg(feature = "tls")]
    pub(crate) slab: Option<Arc<crate::session::SlabAllocator>>,
}

#[cfg(feature = "tls")]
fn shared_slab(shared: bool) -> Option<Arc<crate::session::SlabAllocator>> {
    shared.then(|| Arc::new(crate::session::SlabAllocator::new(DEFAULT_SHARED_SLAB_BYTES)))
}

impl Pool {
    pub fn number(&self) -> usize {
        self.peers.read().len()
    }

    /// Builds the primary/backup pool pair from a list of server specs. The
    /// `shared` flag selects the locking discipline (see [`crate::lock`]).
    pub fn build(name: &str, specs: &[ServerSpec], shared: bool) -> Result<Arc<Pool>, ConfigError> {
        let mut primary_peers = Vec::new();
        let mut primary_weight = 0i64;
        let mut primary_tries = 0usize;

        let mut backup_peers = Vec::new();
        let mut backup_weight = 0i64;
        let mut backup_tries = 0usize;

        for spec in specs {
            if spec.weight <= 0 && !spec.down {
                let err = ConfigError::ZeroWeight {
                    upstream: name.to_string(),
                    server: spec.name.clone(),
                };
                tracing::error!(upstream = %name, server = %spec.name, "{err}");
                return Err(err);
            }

            let (peers, weight, tries) = if spec.backup {
                (&mut backup_peers, &mut backup_weight, &mut backup_tries)
            } else {
                (&mut primary_peers, &mut primary_weight, &mut primary_tries)
            };

            for addr in &spec.addresses {
                peers.push(Peer::new(
                    addr.clone(),
                    addr.to_string(),
                    spec.name.clone(),
                    spec.weight,
                    spec.max_conns,
                    spec.max_fails,
                    spec.fail_timeout,
                    spec.down,
                    shared,
                ));
                *weight += spec.weight;
                if !spec.down {
                    *tries += 1;
                }
            }
        }

        if primary_peers.is_empty() {
            let err = ConfigError::EmptyPrimary {
                upstream: name.to_string(),
            };
            tracing::error!(upstream = %name, "{err}");
            return Err(err);
        }

        let backup = if backup_peers.is_empty() {
            None
        } else {
            let weighted = backup_weight != backup_peers.len() as i64;
            Some(Arc::new(Pool {
                name: name.to_string(),
                peers: if shared {
                    PoolLock::shared(backup_peers)
                } else {
                    PoolLock::local(backup_peers)
                },
                total_weight: backup_weight,
                weighted,
                tries: backup_tries,
                // A backup pool never takes the single-peer fast path,
                // regardless of its peer count: `ngx_http_upstream_init_round_robin`
                // forces both `peers->single` and `backup->single` to 0
                // whenever a backup list exists, so a lone backup peer still
                // recovers `effective_weight` through the general weighted path.
                single: false,
                backup: None,
                #[cfg(feature = "tls")]
                slab: shared_slab(shared),
            }))
        };

        let weighted = primary_weight != primary_peers.len() as i64;
        let single = primary_peers.len() == 1 && backup.is_none();

        Ok(Arc::new(Pool {
            name: name.to_string(),
            peers: if shared {
                PoolLock::shared(primary_peers)
            } else {
                PoolLock::local(primary_peers)
            },
            total_weight: primary_weight,
            weighted,
            tries: primary_tries,
            single,
            backup,
            #[cfg(feature = "tls")]
            slab: shared_slab(shared),
        }))
    }

    /// Builds an implicit pool: a single hostname already resolved to one or
    /// more addresses by the caller. Each address becomes a peer with
    /// `weight = effective_weight = 1`, `max_fails = 1`, `fail_timeout = 10s`,
    /// `max_conns = 0`, and there is no backup.
    pub fn implicit(name: &str, addresses: Vec<Address>, shared: bool) -> Result<Arc<Pool>, ConfigError> {
        if addresses.is_empty() {
            let err = ConfigError::MissingPort {
                upstream: name.to_string(),
            };
            tracing::error!(upstream = %name, "{err}");
            return Err(err);
        }

        let n = addresses.len();
        let peers: Vec<Peer> = addresses
            .into_iter()
            .map(|addr| Peer::implicit(addr.clone(), addr.to_string(), shared))
            .collect();

        Ok(Arc::new(Pool {
            name: name.to_string(),
            peers: if shared {
                PoolLock::shared(peers)
            } else {
                PoolLock::local(peers)
            },
            total_weight: n as i64,
            weighted: false,
            tries: n,
            single: n == 1,
            backup: None,
            #[cfg(feature = "tls")]
            slab: shared_slab(shared),
        }))
    }

    /// Sum of `tries` across this pool and its backup, if any — the maximum
    /// number of distinct peers a request may try.
    pub fn total_tries(&self) -> usize {
        self.tries + self.backup.as_ref().map(|b| b.tries).unwrap_or(0)
    }
}
