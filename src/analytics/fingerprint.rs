//! Visitor fingerprinting
//!
//! A fingerprint is a keyed hash of the visitor's IP address. It is fed into
//! an estimator and then dropped; it is never persisted. With daily rotation
//! the UTC day is part of the hashed message, so the same visitor yields
//! unrelated fingerprints on different days.

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::net::IpAddr;

use crate::config::{HashRotation, TrackingConfig};

/// Opaque per-event visitor value
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint([u8; 32]);

impl AsRef<[u8]> for Fingerprint {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Fingerprint {
    fn from(bytes: [u8; 32]) -> Self {
        Fingerprint(bytes)
    }
}

// Keep fingerprints out of logs
impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Fingerprint(..)")
    }
}

#[derive(Clone)]
pub struct VisitorHasher {
    mac: Hmac<Sha256>,
    rotation: HashRotation,
}

impl VisitorHasher {
    pub fn new(secret: Option<&str>, rotation: HashRotation) -> Result<Self> {
        let key = secret.map(str::as_bytes).unwrap_or_default();
        let mac = Hmac::<Sha256>::new_from_slice(key)
            .map_err(|e| anyhow!("Failed to create HMAC: {}", e))?;

        Ok(Self { mac, rotation })
    }

    pub fn from_config(config: &TrackingConfig) -> Result<Self> {
        if config.visitor_hash_secret.is_none() {
            tracing::warn!(
                "VISITOR_HASH_SECRET is not set, visitor fingerprints use an empty HMAC key"
            );
        }

        Self::new(
            config.visitor_hash_secret.as_deref(),
            config.visitor_hash_rotation,
        )
    }

    pub fn fingerprint(&self, ip: IpAddr, day: NaiveDate) -> Fingerprint {
        let mut mac = self.mac.clone();
        mac.update(ip.to_string().as_bytes());
        if self.rotation == HashRotation::Daily {
            mac.update(b"|");
            mac.update(day.format("%Y-%m-%d").to_string().as_bytes());
        }

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&mac.finalize().into_bytes());
        Fingerprint(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let hasher = VisitorHasher::new(Some("secret"), HashRotation::Daily).unwrap();
        let ip: IpAddr = "203.0.113.7".parse().unwrap();

        assert_eq!(hasher.fingerprint(ip, day(1)), hasher.fingerprint(ip, day(1)));
    }

    #[test]
    fn test_distinct_ips_distinct_fingerprints() {
        let hasher = VisitorHasher::new(Some("secret"), HashRotation::Daily).unwrap();

        let a = hasher.fingerprint("203.0.113.7".parse().unwrap(), day(1));
        let b = hasher.fingerprint("203.0.113.8".parse().unwrap(), day(1));
        assert_ne!(a, b);
    }

    #[test]
    fn test_daily_rotation_unlinks_days() {
        let hasher = VisitorHasher::new(Some("secret"), HashRotation::Daily).unwrap();
        let ip: IpAddr = "2001:db8::1".parse().unwrap();

        assert_ne!(hasher.fingerprint(ip, day(1)), hasher.fingerprint(ip, day(2)));
    }

    #[test]
    fn test_no_rotation_is_stable_across_days() {
        let hasher = VisitorHasher::new(Some("secret"), HashRotation::None).unwrap();
        let ip: IpAddr = "2001:db8::1".parse().unwrap();

        assert_eq!(hasher.fingerprint(ip, day(1)), hasher.fingerprint(ip, day(2)));
    }

    #[test]
    fn test_secret_changes_fingerprint() {
        let ip: IpAddr = "198.51.100.20".parse().unwrap();
        let a = VisitorHasher::new(Some("one"), HashRotation::None).unwrap();
        let b = VisitorHasher::new(Some("two"), HashRotation::None).unwrap();
        let unkeyed = VisitorHasher::new(None, HashRotation::None).unwrap();

        assert_ne!(a.fingerprint(ip, day(1)), b.fingerprint(ip, day(1)));
        assert_ne!(a.fingerprint(ip, day(1)), unkeyed.fingerprint(ip, day(1)));
    }

    #[test]
    fn test_debug_hides_bytes() {
        let hasher = VisitorHasher::new(None, HashRotation::Daily).unwrap();
        let fingerprint = hasher.fingerprint("192.0.2.1".parse().unwrap(), day(1));
        assert_eq!(format!("{fingerprint:?}"), "Fingerprint(..)");
    }
}
