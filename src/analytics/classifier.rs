//! Turns a raw beacon into the values of the three dimensions

use thiserror::Error;
use url::Url;

use crate::analytics::models::{ClassifiedEvent, DIRECT_REFERRER};

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("malformed page URL: {0}")]
    MalformedUrl(#[from] url::ParseError),
}

/// Derive domain, path, referrer domain and country for a hit
///
/// The referrer collapses to [`DIRECT_REFERRER`] when it is absent, empty or
/// points back at the visited domain. A referrer that does not parse as a URL
/// is kept verbatim.
pub fn classify(
    raw_url: &str,
    referrer: Option<&str>,
    country_hint: Option<String>,
) -> Result<ClassifiedEvent, ClassifyError> {
    let page = Url::parse(raw_url.trim())?;

    let domain = page.host_str().unwrap_or_default().to_string();
    let path = match page.path() {
        "" => "/".to_string(),
        path => path.to_string(),
    };

    let referrer_domain = referrer_domain(referrer, &domain);

    Ok(ClassifiedEvent {
        domain,
        path,
        referrer_domain,
        country: country_hint,
    })
}

fn referrer_domain(referrer: Option<&str>, domain: &str) -> String {
    let Some(raw) = referrer.map(str::trim).filter(|r| !r.is_empty()) else {
        return DIRECT_REFERRER.to_string();
    };

    let host = match Url::parse(raw) {
        Ok(parsed) => parsed.host_str().map(str::to_string),
        Err(_) => None,
    }
    .unwrap_or_else(|| raw.to_string());

    if host == domain {
        DIRECT_REFERRER.to_string()
    } else {
        host
    }
}
