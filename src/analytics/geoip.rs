//! Country lookup using a MaxMind GeoLite2/GeoIP2 MMDB
//!
//! Used only when the edge did not supply a country header. The reader is
//! memory-mapped once at startup and shared read-only.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;

/// GeoIP lookup service backed by a Country or City database
#[derive(Clone, Default)]
pub struct GeoIpService {
    reader: Option<Arc<Reader<Mmap>>>,
}

impl GeoIpService {
    /// Open the MMDB at `path`; `None` yields a service that never resolves
    pub fn new(path: Option<&str>) -> Result<Self> {
        let reader = if let Some(path) = path {
            let reader = unsafe { Reader::open_mmap(path) }
                .with_context(|| format!("Failed to open GeoIP database at {}", path))?;
            Some(Arc::new(reader))
        } else {
            None
        };

        Ok(Self { reader })
    }

    pub fn is_enabled(&self) -> bool {
        self.reader.is_some()
    }

    /// ISO country code for an IP address, if the database knows it
    pub fn country_code(&self, ip: IpAddr) -> Option<String> {
        let reader = self.reader.as_ref()?;
        let result = reader.lookup(ip).ok()?;

        // geoip2::Country decodes the country fields from City databases too
        let country = result.decode::<geoip2::Country>().ok()??;
        country.country.iso_code.map(|s| s.to_string())
    }
}
