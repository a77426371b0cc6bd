//! Beacon ingestion: bot gate, fingerprint, classify, merge into the stores
//!
//! Pages are the primary dimension and their write failure is reported to
//! the caller. Country and source writes run concurrently after it; their
//! failures are logged and the hit still counts as recorded.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::analytics::bot_filter::BotFilter;
use crate::analytics::classifier::{self, ClassifyError};
use crate::analytics::fingerprint::{Fingerprint, VisitorHasher};
use crate::analytics::models::{BeaconRequest, Dimension, DimensionKey};
use crate::storage::{AggregationStore, StorageError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("missing page URL")]
    MissingUrl,
    #[error("malformed page URL: {0}")]
    MalformedUrl(#[source] url::ParseError),
    #[error("failed to record pageview: {0}")]
    Storage(#[from] StorageError),
}

impl From<ClassifyError> for IngestError {
    fn from(err: ClassifyError) -> Self {
        match err {
            ClassifyError::MalformedUrl(e) => IngestError::MalformedUrl(e),
        }
    }
}

/// What happened to an accepted hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Recorded,
    IgnoredBot,
}

pub struct IngestPipeline {
    store: Arc<dyn AggregationStore>,
    bot_filter: Arc<BotFilter>,
    hasher: VisitorHasher,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn AggregationStore>,
        bot_filter: Arc<BotFilter>,
        hasher: VisitorHasher,
    ) -> Self {
        Self {
            store,
            bot_filter,
            hasher,
        }
    }

    pub async fn ingest(&self, request: BeaconRequest) -> Result<IngestOutcome, IngestError> {
        self.ingest_on(request, Utc::now().date_naive()).await
    }

    async fn ingest_on(
        &self,
        request: BeaconRequest,
        day: NaiveDate,
    ) -> Result<IngestOutcome, IngestError> {
        let raw_url = match request.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url,
            _ => return Err(IngestError::MissingUrl),
        };

        if self.bot_filter.is_bot(&request.user_agent) {
            debug!(user_agent = %request.user_agent, "ignoring bot hit");
            return Ok(IngestOutcome::IgnoredBot);
        }

        let fingerprint = self.hasher.fingerprint(request.visitor_ip(), day);
        let event = classifier::classify(
            raw_url,
            request.referrer.as_deref(),
            request.country_hint.clone(),
        )?;

        let page_key = DimensionKey::new(&event.domain, &event.path, day);
        self.store
            .merge_upsert(Dimension::Pages, &page_key, &fingerprint)
            .await?;

        let source_key = DimensionKey::new(&event.domain, &event.referrer_domain, day);
        let country_key = event
            .country
            .as_deref()
            .map(|country| DimensionKey::new(&event.domain, country, day));

        tokio::join!(
            async {
                if let Some(key) = &country_key {
                    self.record_secondary(Dimension::Countries, key, &fingerprint)
                        .await;
                }
            },
            self.record_secondary(Dimension::Sources, &source_key, &fingerprint),
        );

        debug!(
            domain = %event.domain,
            path = %event.path,
            referrer = %event.referrer_domain,
            "recorded pageview"
        );
        Ok(IngestOutcome::Recorded)
    }

    async fn record_secondary(
        &self,
        table: Dimension,
        key: &DimensionKey,
        fingerprint: &Fingerprint,
    ) {
        if let Err(err) = self.store.merge_upsert(table, key, fingerprint).await {
            warn!(
                table = %table,
                domain = %key.domain,
                value = %key.value,
                error = %err,
                "failed to record secondary dimension"
            );
        }
    }
}
