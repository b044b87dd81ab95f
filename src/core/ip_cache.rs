//! C2 — IP-info cache: memoizes hostname and country per IP, resolving both
//! asynchronously and best-effort on first sighting.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::config;
use crate::model::IpInfo;

/// Concurrent map from IP to its (possibly partial) [`IpInfo`]. Safe for
/// unbounded concurrent readers and writers (R2); entries never expire.
#[derive(Clone)]
pub struct IpInfoCache {
    entries: Arc<DashMap<IpAddr, IpInfo>>,
    http: reqwest::Client,
    geoip_url: Arc<String>,
}

impl IpInfoCache {
    pub fn new() -> Self {
        Self::with_geoip_url("http://ip-api.com/json/".to_string())
    }

    pub fn with_geoip_url(geoip_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config::GEOIP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            entries: Arc::new(DashMap::new()),
            http,
            geoip_url: Arc::new(geoip_url),
        }
    }

    /// Synchronous, O(1), never fails. Returns an empty `IpInfo` for an
    /// IP that hasn't been seen (or resolved) yet.
    pub fn lookup(&self, ip: IpAddr) -> IpInfo {
        self.entries.get(&ip).map(|e| e.clone()).unwrap_or_default()
    }

    /// Best-effort, idempotent asynchronous resolution. Safe to call
    /// concurrently for the same IP — duplicated network work is acceptable,
    /// corruption is not (merges are CAS, never overwrite a set field with
    /// an empty one).
    pub fn resolve(&self, ip: IpAddr) {
        if is_local(ip) {
            self.entries.entry(ip).or_insert_with(|| IpInfo {
                hostname: String::new(),
                country: "Local".into(),
            });
            return;
        }

        self.entries.entry(ip).or_default();

        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            if let Ok(name) = reverse_dns(ip).await {
                if let Some(mut e) = entries.get_mut(&ip) {
                    if e.hostname.is_empty() {
                        e.hostname = name;
                    }
                }
            }
        });

        let entries = Arc::clone(&self.entries);
        let http = self.http.clone();
        let url = format!("{}{}", self.geoip_url, ip);
        tokio::spawn(async move {
            if let Ok(country) = fetch_geoip_country(&http, &url).await {
                if let Some(mut e) = entries.get_mut(&ip) {
                    if e.country.is_empty() {
                        e.country = country;
                    }
                }
            }
        });
    }
}

impl Default for IpInfoCache {
    fn default() -> Self {
        Self::new()
    }
}

async fn reverse_dns(ip: IpAddr) -> anyhow::Result<String> {
    let host = tokio::task::spawn_blocking(move || {
        dns_lookup::lookup_addr(&ip).map_err(|e| anyhow::anyhow!(e.to_string()))
    })
    .await??;
    Ok(host)
}

#[derive(serde::Deserialize)]
struct GeoIpResponse {
    status: String,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
}

async fn fetch_geoip_country(client: &reqwest::Client, url: &str) -> anyhow::Result<String> {
    let resp: GeoIpResponse = client.get(url).send().await?.json().await?;
    if resp.status == "success" {
        resp.country_code
            .ok_or_else(|| anyhow::anyhow!("missing countryCode"))
    } else {
        Err(anyhow::anyhow!("geoip lookup failed: {}", resp.status))
    }
}

/// Private, loopback, link-local, or IPv6 ULA/LL address (§8 testable property).
pub fn is_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || (v6.segments()[0] & 0xfe00) == 0xfc00 // fc00::/7 (ULA)
                || (v6.segments()[0] & 0xffc0) == 0xfe80 // fe80::/10 (link-local)
        }
    }
}
