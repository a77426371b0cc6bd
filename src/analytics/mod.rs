//! Pageview analytics core
//!
//! Hits flow through [`pipeline::IngestPipeline`]: bot filtering, visitor
//! fingerprinting, classification into pages, countries and sources, then a
//! merge into per-day [`estimator::Estimator`] rows. [`query::QueryService`]
//! turns those rows back into visitor counts.

pub mod bot_filter;
pub mod classifier;
pub mod estimator;
pub mod fingerprint;
pub mod geoip;
pub mod ip_extractor;
pub mod models;
pub mod pipeline;
pub mod query;

pub use bot_filter::{BotFilter, SignatureDatabase};
pub use estimator::Estimator;
pub use fingerprint::VisitorHasher;
pub use geoip::GeoIpService;
pub use models::{BeaconRequest, Dimension, StatRow, StatsQuery};
pub use pipeline::{IngestError, IngestOutcome, IngestPipeline};
pub use query::{QueryError, QueryService};
