//! Fleet management: the ordered, mutable list of backend servers.
//!
//! The fleet is the source of truth every continuum is built from. It is a
//! plain data structure; locking and rebuild scheduling live in the
//! [`Selector`](crate::selector::Selector), which wraps a fleet the same way
//! the concurrent containers in this crate's lineage wrap their cores.
//!
//! ## Key Concepts
//!
//! - **Identity**: a server is identified by `(hostname, port)`. Removal
//!   matches the first instance with a given hostname.
//! - **Ordering**: when host sorting is enabled, the fleet is stable-sorted
//!   lexicographically by hostname, then numerically by port, before every
//!   rebuild.
//! - **Ejection**: `next_retry` holds the epoch second until which a server
//!   is considered dead. Zero means live. Ejected servers contribute no ring
//!   points while auto-ejection is enabled.
//!
//! ## Example Usage
//!
//! ```
//! use ringkit::fleet::Fleet;
//!
//! let mut fleet = Fleet::new();
//! fleet.push_tcp("cache-b.internal", 0, 0).unwrap();
//! fleet.push_tcp("cache-a.internal", 11212, 2).unwrap();
//! fleet.sort();
//!
//! assert_eq!(fleet.get(0).unwrap().hostname(), "cache-a.internal");
//! // Port 0 falls back to the well-known memcache port.
//! assert_eq!(fleet.get(1).unwrap().port(), 11211);
//! ```

use crate::error::SelectError;

/// Well-known memcache port, substituted when a TCP server is added with
/// port 0.
pub const DEFAULT_PORT: u16 = 11211;

/// Upper bound on hostname length, matching the resolver limit the wire
/// labels are sized for.
pub const MAX_HOSTNAME: usize = 1024;

/// Transport used to reach a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    /// `hostname` is a filesystem path and `port` is 0.
    Unix,
}

/// A single backend server record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInstance {
    hostname: String,
    port: u16,
    transport: Transport,
    weight: u32,
    next_retry: i64,
}

impl ServerInstance {
    pub fn new(hostname: impl Into<String>, port: u16, weight: u32, transport: Transport) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            transport,
            weight,
            next_retry: 0,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Weight for weighted ring construction. 0 and 1 both mean unweighted.
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Epoch second until which the server is ejected. 0 means live.
    pub fn next_retry(&self) -> i64 {
        self.next_retry
    }

    pub(crate) fn set_next_retry(&mut self, epoch: i64) {
        self.next_retry = epoch;
    }

    /// A server is live when it has no retry delay or the delay has expired.
    #[inline]
    pub fn is_live(&self, now: i64) -> bool {
        self.next_retry <= now
    }

    pub(crate) fn uses_default_port(&self) -> bool {
        self.port == DEFAULT_PORT
    }
}

/// Bulk-add description of a TCP server, consumed by
/// [`Selector::server_push`](crate::selector::Selector::server_push).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    pub hostname: String,
    pub port: u16,
    pub weight: u32,
}

impl ServerEntry {
    pub fn new(hostname: impl Into<String>, port: u16, weight: u32) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            weight,
        }
    }
}

/// Ordered, mutable list of [`ServerInstance`] records.
#[derive(Debug, Default)]
pub struct Fleet {
    servers: Vec<ServerInstance>,
}

impl Fleet {
    pub fn new() -> Self {
        Self {
            servers: Vec::new(),
        }
    }

    /// Appends a TCP server, applying the classic defaults: an empty
    /// hostname becomes `localhost`, port 0 becomes [`DEFAULT_PORT`], and a
    /// leading `/` switches the entry to a unix-socket transport.
    pub fn push_tcp(&mut self, hostname: &str, port: u16, weight: u32) -> Result<(), SelectError> {
        let hostname = if hostname.is_empty() {
            "localhost"
        } else {
            hostname
        };
        if hostname.starts_with('/') {
            return self.push_unix(hostname, weight);
        }
        validate_hostname(hostname)?;
        let port = if port == 0 { DEFAULT_PORT } else { port };
        self.servers
            .push(ServerInstance::new(hostname, port, weight, Transport::Tcp));
        Ok(())
    }

    /// Appends a TCP server without hostname rewriting. Used by the parsed
    /// add path where the hostname was already extracted from a config
    /// string.
    pub fn push_parsed(&mut self, hostname: &str, port: u16, weight: u32) -> Result<(), SelectError> {
        validate_hostname(hostname)?;
        let port = if port == 0 { DEFAULT_PORT } else { port };
        self.servers
            .push(ServerInstance::new(hostname, port, weight, Transport::Tcp));
        Ok(())
    }

    /// Appends a unix-socket server. The path is stored as the hostname and
    /// the port is fixed at 0.
    pub fn push_unix(&mut self, path: &str, weight: u32) -> Result<(), SelectError> {
        if path.is_empty() {
            return Err(SelectError::InvalidArguments(
                "invalid filename for socket provided".into(),
            ));
        }
        validate_hostname(path)?;
        self.servers
            .push(ServerInstance::new(path, 0, weight, Transport::Unix));
        Ok(())
    }

    /// Appends an already-constructed instance, preserving its fields.
    pub fn push_instance(&mut self, instance: ServerInstance) {
        self.servers.push(instance);
    }

    /// Removes the first server whose hostname matches, returning its former
    /// position so the active continuum knows which points to drop.
    ///
    /// Returns [`SelectError::NotFound`] when no hostname matches and
    /// [`SelectError::SomeErrors`] when the removal would empty the fleet.
    pub fn remove_first(&mut self, hostname: &str) -> Result<usize, SelectError> {
        let position = self
            .servers
            .iter()
            .position(|server| server.hostname == hostname)
            .ok_or(SelectError::NotFound)?;
        if self.servers.len() <= 1 {
            return Err(SelectError::SomeErrors);
        }
        self.servers.remove(position);
        Ok(position)
    }

    /// Stable sort by `(hostname, port)`.
    pub fn sort(&mut self) {
        self.servers
            .sort_by(|a, b| a.hostname.cmp(&b.hostname).then(a.port.cmp(&b.port)));
    }

    /// Records an ejection deadline on the first `(hostname, port)` match.
    pub fn set_retry(&mut self, hostname: &str, port: u16, epoch: i64) -> Result<(), SelectError> {
        let server = self
            .servers
            .iter_mut()
            .find(|server| server.hostname == hostname && server.port == port)
            .ok_or(SelectError::NotFound)?;
        server.set_next_retry(epoch);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ServerInstance> {
        self.servers.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ServerInstance> {
        self.servers.iter()
    }

    /// Number of servers without an active retry delay.
    pub fn live_count(&self, now: i64) -> usize {
        self.servers.iter().filter(|s| s.is_live(now)).count()
    }
}

fn validate_hostname(hostname: &str) -> Result<(), SelectError> {
    if hostname.len() > MAX_HOSTNAME {
        return Err(SelectError::InvalidArguments("invalid hostname provided".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
