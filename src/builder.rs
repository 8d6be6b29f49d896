//! Selector builder: one place to choose a distribution, hash, and the
//! knobs the strategies read.
//!
//! ## Example
//!
//! ```rust
//! use ringkit::builder::{Distribution, SelectorBuilder};
//! use ringkit::hash::HashAlgorithm;
//! use ringkit::selector::Command;
//!
//! let selector = SelectorBuilder::new()
//!     .distribution(Distribution::ConsistentKetama)
//!     .hash(HashAlgorithm::Md5)
//!     .use_sort_hosts(true)
//!     .build()
//!     .unwrap();
//! selector.server_add("10.0.1.1", 11211).unwrap();
//! selector.server_add("10.0.1.2", 11211).unwrap();
//! assert!(selector.select(b"foo", Command::Get) < 2);
//! ```

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::bucket::VirtualBucketTable;
use crate::error::SelectError;
use crate::hash::{HashAlgorithm, Hashkit};
use crate::ring::dynamic::DynamicState;
use crate::ring::Continuum;
use crate::selector::{now_epoch, Selector, Strategy, MAX_KEY_LEN};

/// Key-to-server mapping strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    /// `hash % fleet_len`.
    Modulo,
    /// Uniform random draw per call; the generator reseeds from the wall
    /// clock at every rebuild.
    Random,
    /// Delegates to an externally managed bucket table.
    VirtualBucket,
    /// Standard consistent-hashing continuum.
    ConsistentKetama,
    /// Continuum with weight-proportional point counts and the grouped MD5
    /// point layout.
    ConsistentKetamaWeighted,
    /// Continuum with the `/{host}:{port}-{i}` label scheme used by the spy
    /// client family.
    ConsistentKetamaSpy,
    /// Load-aware continuum adjusted by the rebalance controller.
    Dynamic,
    /// Accepted alias of [`Distribution::Dynamic`]; server weights are
    /// recorded but not yet consulted by the dynamic layout.
    DynamicWeighted,
}

impl Distribution {
    pub(crate) fn is_consistent(self) -> bool {
        matches!(
            self,
            Distribution::ConsistentKetama
                | Distribution::ConsistentKetamaWeighted
                | Distribution::ConsistentKetamaSpy
        )
    }
}

/// Builder for [`Selector`]. Invalid combinations fail at `build` time with
/// [`SelectError::InvalidArguments`].
#[derive(Debug)]
pub struct SelectorBuilder {
    distribution: Distribution,
    hash: HashAlgorithm,
    hashkit: Option<Hashkit>,
    namespace: Option<String>,
    hash_with_namespace: bool,
    use_sort_hosts: bool,
    auto_eject_hosts: bool,
    alpha: f64,
    beta: f64,
    repetition: u32,
    virtual_buckets: Option<VirtualBucketTable>,
}

impl SelectorBuilder {
    pub fn new() -> Self {
        Self {
            distribution: Distribution::Modulo,
            hash: HashAlgorithm::Default,
            hashkit: None,
            namespace: None,
            hash_with_namespace: false,
            use_sort_hosts: false,
            auto_eject_hosts: false,
            alpha: 1.0,
            beta: 0.1,
            repetition: 1,
            virtual_buckets: None,
        }
    }

    pub fn distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn hash(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash = algorithm;
        self
    }

    /// Installs a prebuilt hash handle, e.g. one carrying a custom
    /// function. Takes precedence over [`hash`](Self::hash).
    pub fn hashkit(mut self, hashkit: Hashkit) -> Self {
        self.hashkit = Some(hashkit);
        self
    }

    /// Prefix prepended to every key before hashing. Also turns namespace
    /// hashing on; use [`hash_with_namespace`](Self::hash_with_namespace)
    /// to toggle it independently.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self.hash_with_namespace = true;
        self
    }

    pub fn hash_with_namespace(mut self, enabled: bool) -> Self {
        self.hash_with_namespace = enabled;
        self
    }

    /// Stable-sort the fleet by `(hostname, port)` before every rebuild.
    pub fn use_sort_hosts(mut self, enabled: bool) -> Self {
        self.use_sort_hosts = enabled;
        self
    }

    /// Drop ejected servers from the ring until their retry deadline.
    pub fn auto_eject_hosts(mut self, enabled: bool) -> Self {
        self.auto_eject_hosts = enabled;
        self
    }

    /// Weight of the miss-rate term in the rebalance cost function.
    pub fn alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Weight of the usage term in the cost function, and the step scale of
    /// a controller boundary move.
    pub fn beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    /// Repetitions of the dynamic ring's base owner sequence.
    pub fn repetition(mut self, repetition: u32) -> Self {
        self.repetition = repetition;
        self
    }

    /// Bucket table for [`Distribution::VirtualBucket`].
    pub fn virtual_buckets(mut self, table: VirtualBucketTable) -> Self {
        self.virtual_buckets = Some(table);
        self
    }

    pub fn build(self) -> Result<Selector, SelectError> {
        if let Some(namespace) = &self.namespace {
            if namespace.len() > MAX_KEY_LEN - 1 {
                return Err(SelectError::InvalidArguments(
                    "namespace longer than the key limit".into(),
                ));
            }
        }
        if !self.alpha.is_finite() || self.alpha < 0.0 {
            return Err(SelectError::InvalidArguments(
                "alpha must be finite and non-negative".into(),
            ));
        }
        if !self.beta.is_finite() || self.beta < 0.0 {
            return Err(SelectError::InvalidArguments(
                "beta must be finite and non-negative".into(),
            ));
        }
        if self.repetition == 0 {
            return Err(SelectError::InvalidArguments(
                "repetition must be at least 1".into(),
            ));
        }

        let strategy = match self.distribution {
            Distribution::Modulo => Strategy::Modulo,
            Distribution::Random => Strategy::Random(Mutex::new(SmallRng::seed_from_u64(
                now_epoch()? as u64,
            ))),
            Distribution::VirtualBucket => {
                let table = self.virtual_buckets.ok_or_else(|| {
                    SelectError::InvalidArguments(
                        "virtual bucket distribution requires a bucket table".into(),
                    )
                })?;
                Strategy::VirtualBucket(table)
            },
            Distribution::ConsistentKetama
            | Distribution::ConsistentKetamaWeighted
            | Distribution::ConsistentKetamaSpy => Strategy::Ketama(Continuum::default()),
            Distribution::Dynamic | Distribution::DynamicWeighted => {
                Strategy::Dynamic(DynamicState::new())
            },
        };

        let hashkit = self.hashkit.unwrap_or_else(|| Hashkit::new(self.hash));

        Ok(Selector::from_parts(
            hashkit,
            strategy,
            self.distribution,
            self.namespace.map(String::into_bytes),
            self.hash_with_namespace,
            self.use_sort_hosts,
            self.auto_eject_hosts,
            self.alpha,
            self.beta,
            self.repetition,
        ))
    }
}

impl Default for SelectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
