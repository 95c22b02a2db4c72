//! Opaque endpoint addresses.
//!
//! The selection core never dials a socket itself (that is the connection
//! layer's job), but it still needs something to hand back from [`get`] and
//! to key peers by, so [`Address`] is kept deliberately thin.
//!
//! [`get`]: crate::selector::Selector::get

use std::{fmt, hash::Hash, net::SocketAddr};

#[cfg(target_family = "unix")]
use std::os::unix::net::SocketAddr as StdUnixSocketAddr;

use serde::de::{self, Deserialize, Deserializer};

/// A backend endpoint address.
///
/// Mirrors the shape of the connection layer's own address type rather than
/// inventing a new one: most deployments only ever see `Ip`, but a reverse
/// proxy that also load-balances over local unix sockets needs the second
/// variant.
#[derive(Clone, Debug)]
pub enum Address {
    Ip(SocketAddr),
    #[cfg(target_family = "unix")]
    Unix(StdUnixSocketAddr),
}

impl Address {
    pub const fn is_ip(&self) -> bool {
        matches!(self, Self::Ip(_))
    }

    pub const fn ip_addr(&self) -> Option<&SocketAddr> {
        match self {
            Self::Ip(ip) => Some(ip),
            #[cfg(target_family = "unix")]
            Self::Unix(_) => None,
        }
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Ip(a), Self::Ip(b)) => a == b,
            #[cfg(target_family = "unix")]
            (Self::Unix(a), Self::Unix(b)) => match (a.as_pathname(), b.as_pathname()) {
                (Some(pa), Some(pb)) => pa == pb,
                (None, None) => true,
                _ => false,
            },
            #[cfg(target_family = "unix")]
            _ => false,
        }
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Self::Ip(ip) => {
                state.write_u8(0);
                Hash::hash(ip, state);
            }
            #[cfg(target_family = "unix")]
            Self::Unix(uds) => {
                state.write_u8(1);
                if let Some(pathname) = uds.as_pathname() {
                    Hash::hash(pathname, state);
                } else {
                    state.write_u8(2);
                }
            }
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{addr}"),
            #[cfg(target_family = "unix")]
            Self::Unix(addr) => match addr.as_pathname() {
                Some(p) => write!(f, "{}", p.to_string_lossy()),
                None => f.write_str("(unnamed)"),
            },
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Ip(addr)
    }
}

#[cfg(target_family = "unix")]
impl From<StdUnixSocketAddr> for Address {
    fn from(value: StdUnixSocketAddr) -> Self {
        Address::Unix(value)
    }
}

/// Server specs only ever deserialize the `Ip` form: a config file names
/// `host:port` strings, never a process-local unix socket path wearing a
/// socket address's clothes.
impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<SocketAddr>()
            .map(Address::Ip)
            .map_err(|e| de::Error::custom(format!("invalid socket address {raw:?}: {e}")))
    }
}
