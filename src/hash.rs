//! Hash primitives for key-to-ring mapping.
//!
//! Every algorithm reduces an opaque key to a `u32` position on the ring.
//! The outputs are wire-compatible with the hash family used by the classic
//! memcache client ecosystem, so a ring built here agrees with rings built
//! by peer clients configured with the same algorithm:
//!
//! - MD5 takes the first four digest bytes little-endian.
//! - CRC keeps bits 16..31 of the standard CRC-32 and masks to 15 bits.
//! - The FNV family runs the canonical offset-basis/prime constants; the
//!   64-bit variants truncate their state to `u32`.
//! - Jenkins is `hashlittle` from lookup3 with an initval of 13.
//! - Murmur is MurmurHash2 seeded with `0xdeadbeef`.
//! - Hsieh is SuperFastHash with a zero seed.
//!
//! [`Hashkit`] bundles an algorithm choice with an optional caller-supplied
//! function and is the swappable handle the selector hashes through.

use std::fmt;
use std::sync::Arc;

use md5::{Digest, Md5};

/// Hash algorithms understood by [`digest`] and [`Hashkit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// Alias of [`HashAlgorithm::Fnv1a32`].
    Default,
    Md5,
    Crc,
    Fnv1_64,
    Fnv1a64,
    Fnv1_32,
    Fnv1a32,
    Jenkins,
    Hsieh,
    Murmur,
    /// Dispatches to the function installed on the [`Hashkit`].
    Custom,
}

/// Caller-supplied hash function for [`HashAlgorithm::Custom`].
pub type CustomHashFn = Arc<dyn Fn(&[u8]) -> u32 + Send + Sync>;

/// Swappable hash handle used by the selector.
///
/// Cloning a `Hashkit` shares the custom function, mirroring how the handle
/// is cloned into the selector when installed.
#[derive(Clone, Default)]
pub struct Hashkit {
    algorithm: HashAlgorithm,
    custom: Option<CustomHashFn>,
}

impl Hashkit {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            custom: None,
        }
    }

    /// Builds a handle that hashes through `f`.
    pub fn with_custom(f: CustomHashFn) -> Self {
        Self {
            algorithm: HashAlgorithm::Custom,
            custom: Some(f),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hashes `key` with the configured algorithm.
    #[inline]
    pub fn digest(&self, key: &[u8]) -> u32 {
        match (self.algorithm, &self.custom) {
            (HashAlgorithm::Custom, Some(f)) => f(key),
            (algorithm, _) => digest(key, algorithm),
        }
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Default
    }
}

impl fmt::Debug for Hashkit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hashkit")
            .field("algorithm", &self.algorithm)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

/// Pure hash facade: maps `key` to a `u32` with the named algorithm.
///
/// [`HashAlgorithm::Custom`] carries no function here and falls back to the
/// default algorithm; installing a custom function requires a [`Hashkit`].
pub fn digest(key: &[u8], algorithm: HashAlgorithm) -> u32 {
    match algorithm {
        HashAlgorithm::Default | HashAlgorithm::Fnv1a32 => fnv1a_32(key),
        HashAlgorithm::Md5 => md5_u32(key),
        HashAlgorithm::Crc => (crc32fast::hash(key) >> 16) & 0x7fff,
        HashAlgorithm::Fnv1_64 => fnv1_64(key),
        HashAlgorithm::Fnv1a64 => fnv1a_64(key),
        HashAlgorithm::Fnv1_32 => fnv1_32(key),
        HashAlgorithm::Jenkins => jenkins(key, 13),
        HashAlgorithm::Hsieh => hsieh(key),
        HashAlgorithm::Murmur => murmur2(key, 0xdead_beef),
        HashAlgorithm::Custom => {
            debug_assert!(false, "Custom requires a Hashkit with an installed function");
            fnv1a_32(key)
        },
    }
}

/// First four MD5 digest bytes, little-endian.
#[inline]
pub(crate) fn md5_u32(key: &[u8]) -> u32 {
    let d = Md5::digest(key);
    u32::from_le_bytes([d[0], d[1], d[2], d[3]])
}

const FNV_64_INIT: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_64_PRIME: u64 = 0x0000_0100_0000_01b3;
const FNV_32_INIT: u32 = 0x811c_9dc5;
const FNV_32_PRIME: u32 = 0x0100_0193;

fn fnv1_64(key: &[u8]) -> u32 {
    let mut hash = FNV_64_INIT;
    for &byte in key {
        hash = hash.wrapping_mul(FNV_64_PRIME);
        hash ^= u64::from(byte);
    }
    hash as u32
}

fn fnv1a_64(key: &[u8]) -> u32 {
    let mut hash = FNV_64_INIT;
    for &byte in key {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_64_PRIME);
    }
    hash as u32
}

fn fnv1_32(key: &[u8]) -> u32 {
    let mut hash = FNV_32_INIT;
    for &byte in key {
        hash = hash.wrapping_mul(FNV_32_PRIME);
        hash ^= u32::from(byte);
    }
    hash
}

fn fnv1a_32(key: &[u8]) -> u32 {
    let mut hash = FNV_32_INIT;
    for &byte in key {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_32_PRIME);
    }
    hash
}

// lookup3 hashlittle. Partial trailing words are zero-extended, which is
// equivalent to the original's masked reads.
fn jenkins(key: &[u8], initval: u32) -> u32 {
    let init = 0xdead_beef_u32
        .wrapping_add(key.len() as u32)
        .wrapping_add(initval);
    let (mut a, mut b, mut c) = (init, init, init);

    let mut chunks = key.chunks_exact(12);
    let mut consumed = 0;
    for chunk in chunks.by_ref() {
        // The original mixes every full 12-byte block except the last one;
        // a block that ends the key exactly goes through the final switch.
        if consumed + 12 == key.len() {
            break;
        }
        a = a.wrapping_add(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        b = b.wrapping_add(u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]));
        c = c.wrapping_add(u32::from_le_bytes([chunk[8], chunk[9], chunk[10], chunk[11]]));

        a = a.wrapping_sub(c) ^ c.rotate_left(4);
        c = c.wrapping_add(b);
        b = b.wrapping_sub(a) ^ a.rotate_left(6);
        a = a.wrapping_add(c);
        c = c.wrapping_sub(b) ^ b.rotate_left(8);
        b = b.wrapping_add(a);
        a = a.wrapping_sub(c) ^ c.rotate_left(16);
        c = c.wrapping_add(b);
        b = b.wrapping_sub(a) ^ a.rotate_left(19);
        a = a.wrapping_add(c);
        c = c.wrapping_sub(b) ^ b.rotate_left(4);
        b = b.wrapping_add(a);
        consumed += 12;
    }

    let tail = &key[consumed..];
    if tail.is_empty() {
        return c;
    }
    let mut padded = [0u8; 12];
    padded[..tail.len()].copy_from_slice(tail);
    let k0 = u32::from_le_bytes([padded[0], padded[1], padded[2], padded[3]]);
    let k1 = u32::from_le_bytes([padded[4], padded[5], padded[6], padded[7]]);
    let k2 = u32::from_le_bytes([padded[8], padded[9], padded[10], padded[11]]);

    a = a.wrapping_add(k0);
    if tail.len() > 4 {
        b = b.wrapping_add(k1);
    }
    if tail.len() > 8 {
        c = c.wrapping_add(k2);
    }

    c = (c ^ b).wrapping_sub(b.rotate_left(14));
    a = (a ^ c).wrapping_sub(c.rotate_left(11));
    b = (b ^ a).wrapping_sub(a.rotate_left(25));
    c = (c ^ b).wrapping_sub(b.rotate_left(16));
    a = (a ^ c).wrapping_sub(c.rotate_left(4));
    b = (b ^ a).wrapping_sub(a.rotate_left(14));
    c = (c ^ b).wrapping_sub(b.rotate_left(24));
    c
}

fn murmur2(key: &[u8], seed: u32) -> u32 {
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h = seed ^ key.len() as u32;
    let mut chunks = key.chunks_exact(4);
    for chunk in chunks.by_ref() {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() == 3 {
        h ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        h ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        h ^= u32::from(tail[0]);
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

fn hsieh(key: &[u8]) -> u32 {
    if key.is_empty() {
        return 0;
    }
    let mut hash: u32 = 0;
    let mut chunks = key.chunks_exact(4);
    for chunk in chunks.by_ref() {
        hash = hash.wrapping_add(u32::from(u16::from_le_bytes([chunk[0], chunk[1]])));
        let tmp = (u32::from(u16::from_le_bytes([chunk[2], chunk[3]])) << 11) ^ hash;
        hash = (hash << 16) ^ tmp;
        hash = hash.wrapping_add(hash >> 11);
    }

    let tail = chunks.remainder();
    match tail.len() {
        3 => {
            hash = hash.wrapping_add(u32::from(u16::from_le_bytes([tail[0], tail[1]])));
            hash ^= hash << 16;
            hash ^= u32::from(tail[2]) << 18;
            hash = hash.wrapping_add(hash >> 11);
        },
        2 => {
            hash = hash.wrapping_add(u32::from(u16::from_le_bytes([tail[0], tail[1]])));
            hash ^= hash << 11;
            hash = hash.wrapping_add(hash >> 17);
        },
        1 => {
            hash = hash.wrapping_add(u32::from(tail[0]));
            hash ^= hash << 10;
            hash = hash.wrapping_add(hash >> 1);
        },
        _ => {},
    }

    hash ^= hash << 3;
    hash = hash.wrapping_add(hash >> 5);
    hash ^= hash << 4;
    hash = hash.wrapping_add(hash >> 17);
    hash ^= hash << 25;
    hash = hash.wrapping_add(hash >> 6);
    hash
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: [&str; 3] = ["foo", "hello world", "memcached"];

    fn check(algorithm: HashAlgorithm, expected: [u32; 3]) {
        for (key, want) in KEYS.iter().zip(expected) {
            assert_eq!(
                digest(key.as_bytes(), algorithm),
                want,
                "{:?} of {:?}",
                algorithm,
                key
            );
        }
    }

    #[test]
    fn md5_reference_values() {
        check(HashAlgorithm::Md5, [0xdb18_bdac, 0xbb3b_b65e, 0x50e7_29ed]);
    }

    #[test]
    fn crc_reference_values() {
        check(HashAlgorithm::Crc, [0x0c73, 0x0d4a, 0x2e7f]);
    }

    #[test]
    fn fnv_reference_values() {
        check(HashAlgorithm::Fnv1_64, [0x6ba1_3533, 0xb191_0e6f, 0x32bb_23a2]);
        check(HashAlgorithm::Fnv1a64, [0xfed9_d577, 0x023c_d2e7, 0x3da9_92e8]);
        check(HashAlgorithm::Fnv1_32, [0x408f_5e13, 0x548d_a96f, 0x00ce_f422]);
        check(HashAlgorithm::Fnv1a32, [0xa9f3_7ed7, 0xd58b_3fa7, 0xfb92_ab48]);
    }

    #[test]
    fn jenkins_reference_values() {
        check(HashAlgorithm::Jenkins, [0x99f8_4f99, 0x1533_43fb, 0x1026_edaa]);
    }

    #[test]
    fn murmur_reference_values() {
        check(HashAlgorithm::Murmur, [0xb98a_5cb8, 0x0592_9d59, 0x1da8_3b1d]);
    }

    #[test]
    fn hsieh_reference_values() {
        check(HashAlgorithm::Hsieh, [0x76d4_d427, 0x4f79_9873, 0xaf99_50e2]);
    }

    #[test]
    fn default_is_fnv1a_32() {
        for key in KEYS {
            assert_eq!(
                digest(key.as_bytes(), HashAlgorithm::Default),
                digest(key.as_bytes(), HashAlgorithm::Fnv1a32)
            );
        }
    }

    #[test]
    fn empty_key_is_stable() {
        assert_eq!(digest(b"", HashAlgorithm::Fnv1a32), FNV_32_INIT);
        assert_eq!(digest(b"", HashAlgorithm::Hsieh), 0);
        // Jenkins of an empty key is the mixed seed with no final round.
        assert_eq!(
            digest(b"", HashAlgorithm::Jenkins),
            0xdead_beef_u32.wrapping_add(13)
        );
    }

    #[test]
    fn hashkit_custom_function_wins() {
        let kit = Hashkit::with_custom(Arc::new(|key: &[u8]| key.len() as u32));
        assert_eq!(kit.digest(b"abcd"), 4);
        assert_eq!(kit.algorithm(), HashAlgorithm::Custom);

        // Cloned handles share the function.
        let clone = kit.clone();
        assert_eq!(clone.digest(b"xy"), 2);
    }

    #[test]
    fn hashkit_plain_algorithm() {
        let kit = Hashkit::new(HashAlgorithm::Md5);
        assert_eq!(kit.digest(b"foo"), 0xdb18_bdac);
    }
}
