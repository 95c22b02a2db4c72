//! Weighted, health-aware round-robin peer selection for a reverse proxy
//! upstream.
//!
//! The entry points are [`pool::Pool`] (built once per upstream from a list
//! of [`pool::ServerSpec`]s) and [`selector::Selector`] (shared across every
//! request against that pool). A request's lifecycle is:
//!
//! ```ignore
//! let mut state = selector.init_request(pool.clone())?;
//! loop {
//!     match selector.get(&mut state) {
//!         Outcome::Selected((addr, name)) => {
//!             // dial addr, run the request, then:
//!             selector.release(&mut state, outcome);
//!         }
//!         Outcome::Busy => break,
//!     }
//! }
//! ```

pub mod addr;
pub mod clock;
pub mod error;
pub mod lock;
pub mod peer;
pub mod pool;
pub mod request;
pub mod selector;

#[cfg(feature = "tls")]
pub mod session;

pub use addr::Address;
pub use clock::{Clock, FixedClock, MonotonicClock};
pub use error::{AllocError, ConfigError, SelectorError};
pub use peer::{Peer, PeerState};
pub use pool::{Pool, ServerSpec};
pub use request::RequestState;
pub use selector::{Outcome, ReleaseOutcome, Selector};
