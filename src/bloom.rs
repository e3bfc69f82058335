//! Bloom filters over the identifiers a dump imports from a package.
//!
//! Filters are stored as gzip-compressed JSON
//! `{"buckets": [i32, ...], "numHashFunctions": k}`, the format written by
//! the upload processor. Bit positions come from two seeded FNV-1a hashes
//! over the identifier's UTF-16 code units combined by double hashing, so an
//! identifier tests identically here and in the producer.

use crate::error::Result;
use crate::model::PackageReference;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const SECOND_HASH_SEED: u32 = 1_576_284_489;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    buckets: Vec<i32>,
    num_hash_functions: usize,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncodedFilter {
    buckets: Vec<i32>,
    num_hash_functions: usize,
}

impl BloomFilter {
    /// Creates an empty filter. `num_bits` is rounded up to a multiple of 32.
    pub fn new(num_bits: usize, num_hash_functions: usize) -> Self {
        let num_buckets = num_bits.div_ceil(32).max(1);
        Self {
            buckets: vec![0; num_buckets],
            num_hash_functions,
        }
    }

    pub fn num_bits(&self) -> usize {
        self.buckets.len() * 32
    }

    pub fn add(&mut self, value: &str) {
        for location in self.locations(value) {
            self.buckets[location / 32] |= (1u32 << (location % 32)) as i32;
        }
    }

    /// Tests possible membership. Never returns false for an added value.
    pub fn test(&self, value: &str) -> bool {
        self.locations(value)
            .all(|location| (self.buckets[location / 32] as u32) & (1u32 << (location % 32)) != 0)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(&EncodedFilter {
            buckets: self.buckets.clone(),
            num_hash_functions: self.num_hash_functions,
        })?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload)?;
        Ok(encoder.finish()?)
    }

    pub fn decode(encoded: &[u8]) -> Result<Self> {
        let mut payload = Vec::new();
        GzDecoder::new(encoded).read_to_end(&mut payload)?;
        let decoded: EncodedFilter = serde_json::from_slice(&payload)?;
        if decoded.buckets.is_empty() {
            return Err(anyhow::anyhow!("bloom filter has no buckets").into());
        }
        let filter = Self {
            buckets: decoded.buckets,
            num_hash_functions: decoded.num_hash_functions,
        };
        // Valid filters hash at least once and at most once per bit.
        if filter.num_hash_functions == 0 || filter.num_hash_functions > filter.num_bits() {
            return Err(anyhow::anyhow!(
                "bloom filter has {} hash functions for {} bits",
                filter.num_hash_functions,
                filter.num_bits()
            )
            .into());
        }
        Ok(filter)
    }

    fn locations(&self, value: &str) -> impl Iterator<Item = usize> + use<> {
        let m = self.num_bits() as i64;
        let a = fnv_1a(value, 0) as i64;
        let b = fnv_1a(value, SECOND_HASH_SEED) as i64;

        // Remainders keep the sign of the dividend; negative positions wrap
        // once into range but the running value stays unnormalized.
        let mut x = a % m;
        (0..self.num_hash_functions).map(move |_| {
            let location = if x < 0 { x + m } else { x };
            x = (x + b) % m;
            location as usize
        })
    }
}

/// Decodes a serialized filter and tests it for `identifier`.
pub fn decode_and_test(encoded: &[u8], identifier: &str) -> Result<bool> {
    Ok(BloomFilter::decode(encoded)?.test(identifier))
}

/// Keeps references whose filter may contain `identifier`, stopping once
/// `limit` matches are found. Returns the matches and the number of input
/// rows examined; callers advance their outer offset by the latter.
pub fn apply_bloom_filter(
    references: Vec<PackageReference>,
    identifier: &str,
    limit: usize,
) -> (Vec<PackageReference>, usize) {
    if limit == 0 {
        return (Vec::new(), 0);
    }

    let total = references.len();
    let mut matches = Vec::new();
    for (index, reference) in references.into_iter().enumerate() {
        match decode_and_test(&reference.filter, identifier) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => {
                tracing::warn!(
                    dump_id = reference.dump_id,
                    scheme = %reference.scheme,
                    name = %reference.name,
                    version = %reference.version,
                    "skipping package reference with undecodable bloom filter: {err}"
                );
                continue;
            }
        }
        matches.push(reference);
        if matches.len() >= limit {
            return (matches, index + 1);
        }
    }
    (matches, total)
}

fn fnv_1a(value: &str, seed: u32) -> i32 {
    let mut a = FNV_OFFSET_BASIS ^ seed;
    for unit in value.encode_utf16() {
        let c = u32::from(unit);
        let high = c & 0xff00;
        if high != 0 {
            a = fnv_multiply(a ^ (high >> 8));
        }
        a = fnv_multiply(a ^ (c & 0xff));
    }
    fnv_mix(a) as i32
}

// a * 16777619 mod 2^32
fn fnv_multiply(a: u32) -> u32 {
    a.wrapping_add(a << 1)
        .wrapping_add(a << 4)
        .wrapping_add(a << 7)
        .wrapping_add(a << 8)
        .wrapping_add(a << 24)
}

fn fnv_mix(mut a: u32) -> u32 {
    a = a.wrapping_add(a << 13);
    a ^= a >> 7;
    a = a.wrapping_add(a << 3);
    a ^= a >> 17;
    a = a.wrapping_add(a << 5);
    a
}
