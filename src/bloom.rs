//! Per-SSTable Bloom filter — probabilistic set membership with no false
//! negatives.
//!
//! Sized once at construction; implementations that dynamically resize a
//! Bloom filter invalidate every previously hashed position, so this one
//! does not.

use thiserror::Error;

/// Errors produced while building or reading a Bloom filter.
#[derive(Debug, Error)]
pub enum BloomError {
    /// The serialized header was truncated or malformed.
    #[error("corrupt bloom filter header: {0}")]
    Corrupt(String),
}

/// A fixed-size Bloom filter over opaque byte keys.
///
/// `add` never needs to grow the bit array after construction: either the
/// target capacity is known up front, or the bit array is allocated lazily
/// on the first insertion and never resized afterward.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits_per_key: u32,
    num_hashes: u32,
    num_bits: u32,
    num_keys: u32,
    bits: Vec<u8>,
}

const MIN_BITS: u32 = 64;

impl BloomFilter {
    /// Builds a filter sized for `capacity` keys at false-positive rate `fp_rate`.
    ///
    /// `m/n = ceil(-1.44 * ln(p) / ln(2)^2)`, `k = ceil((m/n) * ln(2))`, both
    /// clamped to at least 1.
    pub fn with_capacity(capacity: usize, fp_rate: f64) -> Self {
        let fp_rate = fp_rate.clamp(f64::EPSILON, 1.0 - f64::EPSILON);
        let ln2_sq = std::f64::consts::LN_2 * std::f64::consts::LN_2;
        let bits_per_key = ((-1.44 * fp_rate.ln()) / ln2_sq).ceil().max(1.0) as u32;
        let num_hashes = ((bits_per_key as f64) * std::f64::consts::LN_2).ceil().max(1.0) as u32;

        let n = capacity.max(1) as u64;
        let num_bits = ((n * bits_per_key as u64).div_ceil(8) * 8).max(MIN_BITS as u64) as u32;

        Self {
            bits_per_key,
            num_hashes,
            num_bits,
            num_keys: 0,
            bits: vec![0u8; (num_bits as usize).div_ceil(8)],
        }
    }

    /// Builds a filter from an explicit `bits_per_key`/`num_hashes` pair.
    ///
    /// The bit array is allocated lazily (here: immediately, at the minimum
    /// 64-bit size) and grows only implicitly through `with_capacity`-style
    /// construction; this constructor never resizes after the fact.
    pub fn with_params(bits_per_key: u32, num_hashes: u32) -> Self {
        let bits_per_key = bits_per_key.max(1);
        let num_hashes = num_hashes.max(1);
        Self {
            bits_per_key,
            num_hashes,
            num_bits: MIN_BITS,
            num_keys: 0,
            bits: vec![0u8; (MIN_BITS as usize).div_ceil(8)],
        }
    }

    /// Builds a filter over a known key set at a target false-positive rate.
    pub fn from_keys<'a, I: IntoIterator<Item = &'a [u8]>>(keys: I, fp_rate: f64) -> Self {
        let keys: Vec<&[u8]> = keys.into_iter().collect();
        let mut filter = Self::with_capacity(keys.len(), fp_rate);
        for key in keys {
            filter.add(key);
        }
        filter
    }

    fn bit_positions(&self, key: &[u8]) -> impl Iterator<Item = u32> + '_ {
        let m = self.num_bits;
        (0..self.num_hashes).map(move |i| murmur32(key, i) % m)
    }

    /// Sets all `k` bit positions for `key`.
    pub fn add(&mut self, key: &[u8]) {
        let positions: Vec<u32> = self.bit_positions(key).collect();
        for pos in positions {
            let byte = (pos / 8) as usize;
            let bit = pos % 8;
            self.bits[byte] |= 1 << bit;
        }
        self.num_keys += 1;
    }

    /// Returns `false` iff `key` is certainly absent; never a false negative
    /// against keys that were passed to [`add`](Self::add).
    pub fn may_contain(&self, key: &[u8]) -> bool {
        for pos in self.bit_positions(key) {
            let byte = (pos / 8) as usize;
            let bit = pos % 8;
            match self.bits.get(byte) {
                Some(b) if b & (1 << bit) != 0 => {}
                _ => return false,
            }
        }
        true
    }

    /// Serializes as `[bits_per_key u32 le][num_hashes u32 le][num_bits u32 le][num_keys u32 le][bits]`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.bits.len());
        out.extend_from_slice(&self.bits_per_key.to_le_bytes());
        out.extend_from_slice(&self.num_hashes.to_le_bytes());
        out.extend_from_slice(&self.num_bits.to_le_bytes());
        out.extend_from_slice(&self.num_keys.to_le_bytes());
        out.extend_from_slice(&self.bits);
        out
    }

    /// Deserializes a filter, tolerating a truncated trailing bit array by
    /// shrinking `num_bits` to the bytes actually present — the filter
    /// becomes conservatively permissive (more false positives, never a
    /// false negative) rather than rejected outright.
    pub fn deserialize(buf: &[u8]) -> Result<Self, BloomError> {
        if buf.len() < 16 {
            return Err(BloomError::Corrupt(format!(
                "header needs 16 bytes, have {}",
                buf.len()
            )));
        }
        let bits_per_key = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let num_hashes = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let mut num_bits = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let num_keys = u32::from_le_bytes(buf[12..16].try_into().unwrap());

        if bits_per_key == 0 || num_hashes == 0 {
            return Err(BloomError::Corrupt("zero bits_per_key or num_hashes".into()));
        }

        let body = &buf[16..];
        let available_bits = (body.len() as u64) * 8;
        if (num_bits as u64) > available_bits {
            num_bits = available_bits as u32;
        }
        let needed_bytes = (num_bits as usize).div_ceil(8);
        let bits = body[..needed_bytes.min(body.len())].to_vec();

        Ok(Self {
            bits_per_key,
            num_hashes,
            num_bits: num_bits.max(1),
            num_keys,
            bits,
        })
    }

    /// Total serialized byte length, header included.
    pub fn serialized_len(&self) -> usize {
        16 + self.bits.len()
    }

    /// Number of keys inserted so far.
    pub fn len(&self) -> u32 {
        self.num_keys
    }

    /// Whether no keys have been inserted.
    pub fn is_empty(&self) -> bool {
        self.num_keys == 0
    }
}

/// A small, stable, seedable 32-bit hash (MurmurHash3 finalizer-derived).
///
/// Not cryptographically secure; only required to be stable across
/// construction and query, which a fixed-seed finalizer mix satisfies.
fn murmur32(key: &[u8], seed: u32) -> u32 {
    let mut h: u32 = seed ^ (key.len() as u32);
    for chunk in key.chunks(4) {
        let mut k = 0u32;
        for (i, &b) in chunk.iter().enumerate() {
            k |= (b as u32) << (i * 8);
        }
        k = k.wrapping_mul(0xcc9e_2d51);
        k = k.rotate_left(15);
        k = k.wrapping_mul(0x1b87_3593);
        h ^= k;
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }
    h ^= key.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}
