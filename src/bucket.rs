//! Virtual-bucket table: a fixed hash-to-server mapping.
//!
//! The table is an external collaborator of the selector. Deployments that
//! manage bucket ownership elsewhere install one through the builder and the
//! selector only performs the final `hash % buckets` indirection.

use crate::error::SelectError;

/// Fixed mapping from hash buckets to server indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualBucketTable {
    buckets: Vec<u32>,
}

impl VirtualBucketTable {
    /// Builds a table from an explicit bucket-to-server assignment.
    pub fn new(buckets: Vec<u32>) -> Result<Self, SelectError> {
        if buckets.is_empty() {
            return Err(SelectError::InvalidArguments(
                "virtual bucket table must not be empty".into(),
            ));
        }
        Ok(Self { buckets })
    }

    /// Server index owning the bucket `hash` falls into.
    #[inline]
    pub fn server(&self, hash: u32) -> u32 {
        self.buckets[hash as usize % self.buckets.len()]
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
