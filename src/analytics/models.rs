//! Data models for analytics

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::analytics::estimator::Estimator;

/// Referrer value recorded for direct visits and self-referrals
pub const DIRECT_REFERRER: &str = "Direct / None";

/// The three axes pageviews are aggregated by
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Pages,
    Countries,
    Sources,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Pages, Dimension::Countries, Dimension::Sources];

    /// Backing table name
    pub fn table_name(self) -> &'static str {
        match self {
            Dimension::Pages => "pageviews",
            Dimension::Countries => "country_views",
            Dimension::Sources => "source_views",
        }
    }

    /// Column holding the dimension value, also used as the JSON field name
    pub fn column(self) -> &'static str {
        match self {
            Dimension::Pages => "path",
            Dimension::Countries => "country",
            Dimension::Sources => "referrer",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::Pages => "pages",
            Dimension::Countries => "countries",
            Dimension::Sources => "sources",
        };
        f.write_str(name)
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pages" | "paths" => Ok(Dimension::Pages),
            "countries" => Ok(Dimension::Countries),
            "sources" | "referrers" => Ok(Dimension::Sources),
            other => Err(format!(
                "unknown table '{other}', expected one of: pages, countries, sources"
            )),
        }
    }
}

/// Unique key of an aggregation row within one dimension table
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct DimensionKey {
    pub domain: String,

    /// Path, country code or referrer domain depending on the table
    pub value: String,

    /// UTC calendar day
    pub day: NaiveDate,
}

impl DimensionKey {
    pub fn new(domain: impl Into<String>, value: impl Into<String>, day: NaiveDate) -> Self {
        Self {
            domain: domain.into(),
            value: value.into(),
            day,
        }
    }
}

/// One stored row: the visitors seen for a key
#[derive(Debug, Clone)]
pub struct AggregationRow {
    pub key: DimensionKey,
    pub estimator: Estimator,
}

/// A parsed beacon hit as handed over by the HTTP layer
#[derive(Debug, Clone)]
pub struct BeaconRequest {
    /// Visited page URL
    pub url: Option<String>,

    pub user_agent: String,

    /// Referrer as reported by the script or the Referer header
    pub referrer: Option<String>,

    /// Socket remote address
    pub client_ip: IpAddr,

    /// Client address resolved from trusted proxy headers, preferred when present
    pub proxy_ip_hint: Option<IpAddr>,

    /// ISO country code, if the edge or GeoIP supplied one
    pub country_hint: Option<String>,
}

impl BeaconRequest {
    /// Best available visitor address
    pub fn visitor_ip(&self) -> IpAddr {
        self.proxy_ip_hint.unwrap_or(self.client_ip)
    }
}

/// Dimension values derived from a beacon hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedEvent {
    pub domain: String,
    pub path: String,
    pub referrer_domain: String,
    pub country: Option<String>,
}

/// Read request against one dimension table
#[derive(Debug, Clone)]
pub struct StatsQuery {
    pub table: Dimension,
    pub domain: String,
    pub start_day: NaiveDate,
    pub end_day: NaiveDate,

    /// Merge all paths per day (pages only)
    pub aggregate: bool,
}

/// One result row of a stats query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatRow {
    /// Omitted in pages-aggregate mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub day: NaiveDate,
    pub visitors: u64,
}
