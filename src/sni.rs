//! Server Name Indication routing.
//!
//! A server narrows credential lookups to the virtual host a client asked for
//! in its ClientHello. Whether that happens is decided by the receiving side
//! alone: with SNI disabled a received host name is ignored, never an error.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::message::ClientHello;
use crate::Error;

/// Longest host name a ClientHello can carry.
const MAX_NAME_LEN: usize = 255;

/// A host name exactly as the client sent it.
///
/// Comparison and hashing ignore ASCII case, so credential lookups match
/// `Example.COM` against `example.com` while the session still reports the
/// name as received.
#[derive(Clone)]
pub struct ServerName(String);

impl ServerName {
    /// Accept any non-empty host name of at most 255 bytes.
    pub fn new(name: &str) -> Result<ServerName, Error> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(Error::ConfigError(format!(
                "Invalid host name length {}: {:?}",
                name.len(),
                name
            )));
        }

        Ok(ServerName(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for ServerName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for ServerName {}

impl Hash for ServerName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        state.write_usize(self.0.len());
    }
}

impl PartialOrd for ServerName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServerName {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.0.bytes().map(|b| b.to_ascii_lowercase());
        let b = other.0.bytes().map(|b| b.to_ascii_lowercase());
        a.cmp(b)
    }
}

impl fmt::Display for ServerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ServerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerName({})", self.0)
    }
}

/// Picks the virtual host of an inbound handshake.
#[derive(Debug, Clone, Copy)]
pub struct SniRouter {
    enabled: bool,
}

impl SniRouter {
    pub fn new(enabled: bool) -> Self {
        SniRouter { enabled }
    }

    /// Virtual host for a ClientHello.
    ///
    /// `None` when SNI is disabled here or the client sent no host name.
    /// An empty or over-long host name is treated like an absent one.
    pub fn route(&self, hello: &ClientHello) -> Option<ServerName> {
        let requested = hello.server_name.as_deref()?;

        if !self.enabled {
            trace!("Ignoring server name {:?}, SNI disabled", requested);
            return None;
        }

        match ServerName::new(requested) {
            Ok(name) => {
                debug!("Routing handshake to virtual host {}", name);
                Some(name)
            }
            Err(e) => {
                warn!("Ignoring server name: {}", e);
                None
            }
        }
    }
}
