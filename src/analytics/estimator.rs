//! Mergeable cardinality estimator (HyperLogLog)
//!
//! Every aggregation row holds one [`Estimator`]. Visitors are absorbed as
//! opaque fingerprints and only the register maxima survive, so the row
//! never contains anything that identifies a visitor.
//!
//! ## Precision vs Memory vs Error
//!
//! | Precision | Registers | Memory | Std Error |
//! |-----------|-----------|--------|-----------|
//! | 10        | 1,024     | 1 KB   | 3.25%     |
//! | 12        | 4,096     | 4 KB   | 1.62%     |
//! | 14        | 16,384    | 16 KB  | 0.81%     |
//!
//! The stores persist the raw register array, so the precision of a row is
//! implied by its length.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Precision used for every aggregation row (4096 registers, ~1.6% error)
pub const DEFAULT_PRECISION: u8 = 12;

const MIN_PRECISION: u8 = 4;
const MAX_PRECISION: u8 = 18;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EstimatorError {
    #[error("cannot merge estimators with precision {0} and {1}")]
    PrecisionMismatch(u8, u8),
    #[error("invalid estimator encoding: {0} bytes is not a supported register count")]
    InvalidEncoding(usize),
}

/// HyperLogLog register array
///
/// Equality is register-state equality, which is what the merge laws are
/// stated in terms of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Estimator {
    precision: u8,
    registers: Vec<u8>,
}

impl Estimator {
    /// The merge identity at [`DEFAULT_PRECISION`]
    pub fn empty() -> Self {
        Self::with_precision(DEFAULT_PRECISION)
    }

    /// Create an empty estimator with `2^precision` registers
    ///
    /// # Panics
    /// Panics if precision is outside 4..=18
    pub fn with_precision(precision: u8) -> Self {
        assert!(
            (MIN_PRECISION..=MAX_PRECISION).contains(&precision),
            "Precision must be between 4 and 18"
        );

        Self {
            precision,
            registers: vec![0; 1 << precision],
        }
    }

    /// Absorb a fingerprint
    pub fn add(&mut self, fingerprint: &[u8]) {
        let (index, rho) = self.locate(fingerprint);
        if rho > self.registers[index] {
            self.registers[index] = rho;
        }
    }

    /// Register index and rank a fingerprint maps to
    ///
    /// Adding a fingerprint is exactly `registers[index] = max(registers[index], rho)`,
    /// which lets a store apply the update server-side without reading the row.
    pub fn locate(&self, fingerprint: &[u8]) -> (usize, u8) {
        let hash = hash_fingerprint(fingerprint);
        let p = u32::from(self.precision);
        let index = (hash >> (64 - p)) as usize;
        // Sentinel bit caps rho at 64 - p + 1
        let remaining = (hash << p) | (1 << (p - 1));
        let rho = remaining.leading_zeros() as u8 + 1;
        (index, rho)
    }

    /// Union of two estimators as a new estimator
    pub fn merge(&self, other: &Estimator) -> Result<Estimator, EstimatorError> {
        let mut merged = self.clone();
        merged.merge_from(other)?;
        Ok(merged)
    }

    /// Union another estimator into this one
    pub fn merge_from(&mut self, other: &Estimator) -> Result<(), EstimatorError> {
        if self.precision != other.precision {
            return Err(EstimatorError::PrecisionMismatch(
                self.precision,
                other.precision,
            ));
        }

        self.registers
            .iter_mut()
            .zip(other.registers.iter())
            .for_each(|(a, &b)| *a = (*a).max(b));
        Ok(())
    }

    /// Merge any number of estimators; an empty input yields [`Estimator::empty`]
    pub fn merge_all<'a, I>(estimators: I) -> Result<Estimator, EstimatorError>
    where
        I: IntoIterator<Item = &'a Estimator>,
    {
        let mut iter = estimators.into_iter();
        let Some(first) = iter.next() else {
            return Ok(Estimator::empty());
        };

        let mut merged = first.clone();
        for estimator in iter {
            merged.merge_from(estimator)?;
        }
        Ok(merged)
    }

    /// Estimated number of distinct fingerprints
    ///
    /// Harmonic-mean estimate with linear counting for the small range. The
    /// large-range correction is unnecessary with 64-bit hashes.
    pub fn cardinality(&self) -> u64 {
        let m = self.registers.len() as f64;

        let mut sum = 0.0;
        let mut zeros = 0u32;
        for &r in &self.registers {
            sum += (-f64::from(r)).exp2();
            if r == 0 {
                zeros += 1;
            }
        }

        let raw_estimate = alpha(self.registers.len()) * m * m / sum;

        let estimate = if raw_estimate <= 2.5 * m && zeros > 0 {
            m * (m / f64::from(zeros)).ln()
        } else {
            raw_estimate
        };

        estimate.round() as u64
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn is_empty(&self) -> bool {
        self.registers.iter().all(|&r| r == 0)
    }

    /// Expected relative standard error, `1.04 / sqrt(m)`
    pub fn expected_error(&self) -> f64 {
        1.04 / (self.registers.len() as f64).sqrt()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.registers
    }

    /// Decode a raw register array; the length must be a power of two in range
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EstimatorError> {
        let len = bytes.len();
        if !len.is_power_of_two() {
            return Err(EstimatorError::InvalidEncoding(len));
        }

        let precision = len.trailing_zeros() as u8;
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
            return Err(EstimatorError::InvalidEncoding(len));
        }

        Ok(Self {
            precision,
            registers: bytes.to_vec(),
        })
    }
}

impl Default for Estimator {
    fn default() -> Self {
        Self::empty()
    }
}

fn alpha(m: usize) -> f64 {
    match m {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / m as f64),
    }
}

/// Stable 64-bit hash (persisted registers must hash identically across processes)
fn hash_fingerprint(fingerprint: &[u8]) -> u64 {
    let digest = Sha256::digest(fingerprint);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}
