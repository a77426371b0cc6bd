//! Client IP extraction from HTTP headers with trust validation
//!
//! This module implements client IP extraction that:
//! - Validates trust chains for X-Forwarded-For and Forwarded headers
//! - Supports vendor-specific headers (CF-Connecting-IP, CF-IPCountry)
//! - Leaves the socket remote address as the fallback to the caller
//! - Handles both IPv4 and IPv6
//!
//! The result is a *hint*: the pipeline prefers it over the socket address
//! when present.

use axum::http::HeaderMap;
use ipnet::IpNet;
use std::net::IpAddr;
use tracing::debug;

use crate::config::{TrackingConfig, TrustedProxyMode};

/// Extract the client IP address from trusted proxy headers
///
/// Returns `None` when the trust configuration does not allow headers or no
/// usable header is present.
pub fn extract_proxy_ip(headers: &HeaderMap, config: &TrackingConfig) -> Option<IpAddr> {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => {
            let ip = extract_cloudflare_ip(headers);
            if ip.is_none() {
                debug!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            }
            ip
        }
        TrustedProxyMode::Standard => extract_standard_ip(headers, config),
        TrustedProxyMode::None => None,
    }
}

/// Extract the edge-supplied country code (Cloudflare mode only)
///
/// `XX` (unknown) and empty values count as absent.
pub fn extract_country_hint(headers: &HeaderMap, config: &TrackingConfig) -> Option<String> {
    if config.trusted_proxy_mode != TrustedProxyMode::Cloudflare {
        return None;
    }

    headers
        .get("cf-ipcountry")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|code| !code.is_empty() && !code.eq_ignore_ascii_case("XX"))
        .map(str::to_string)
}

/// Extract IP from Cloudflare-specific header
fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// Extract IP from standard headers (Forwarded, X-Forwarded-For) with trust validation
fn extract_standard_ip(headers: &HeaderMap, config: &TrackingConfig) -> Option<IpAddr> {
    // Prefer RFC 7239 Forwarded header
    if let Some(chain) = forwarded_chain(headers) {
        if let Some(ip) = select_from_chain(&chain, config) {
            return Some(ip);
        }
    }

    let chain = x_forwarded_for_chain(headers)?;
    select_from_chain(&chain, config)
}

/// Parse the `for=` parameters of a Forwarded header, left to right
fn forwarded_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    // Forwarded: for=192.0.2.60;proto=http;by=203.0.113.43, for="[2001:db8::1]:4711"
    let chain: Vec<IpAddr> = forwarded
        .split(',')
        .flat_map(|element| element.split(';'))
        .filter_map(|param| {
            let param = param.trim();
            let (name, value) = param.split_once('=')?;
            if !name.trim().eq_ignore_ascii_case("for") {
                return None;
            }
            parse_forwarded_node(value.trim())
        })
        .collect();

    (!chain.is_empty()).then_some(chain)
}

/// Strip quotes, IPv6 brackets and ports from a Forwarded node
fn parse_forwarded_node(value: &str) -> Option<IpAddr> {
    let value = value.trim_matches('"');

    if let Some(rest) = value.strip_prefix('[') {
        let (addr, _) = rest.split_once(']')?;
        return addr.parse().ok();
    }

    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }

    // IPv4 with port
    let (addr, _port) = value.rsplit_once(':')?;
    addr.parse().ok()
}

fn x_forwarded_for_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    let chain: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    (!chain.is_empty()).then_some(chain)
}

/// Pick the client address from a proxy chain, walking right to left
fn select_from_chain(chain: &[IpAddr], config: &TrackingConfig) -> Option<IpAddr> {
    // A fixed hop count wins over the CIDR list
    if let Some(num_trusted) = config.num_trusted_proxies {
        if chain.len() > num_trusted {
            return Some(chain[chain.len() - num_trusted - 1]);
        }
        // Not enough hops in the chain, return the leftmost (least trusted)
        return chain.first().copied();
    }

    if !config.trusted_proxies.is_empty() {
        return chain
            .iter()
            .rev()
            .find(|ip| !is_trusted(**ip, &config.trusted_proxies))
            .or_else(|| chain.first())
            .copied();
    }

    // No trust configuration, return the rightmost IP
    chain.last().copied()
}

fn is_trusted(ip: IpAddr, trusted: &[IpNet]) -> bool {
    trusted.iter().any(|net| net.contains(&ip))
}
