//! Outbound product page fetching.
//!
//! Every request is bounded by the configured total and connect timeouts and
//! by a maximum body size. Private and loopback targets are refused unless
//! explicitly allowed, including targets reached through a redirect.

use std::net::{Ipv4Addr, Ipv6Addr};

use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder};
use tracing::{debug, instrument};
use url::Url;

use pricewatch_shared::{FetchOptions, PriceWatchError, Result};

/// User-Agent string for page requests.
const USER_AGENT: &str = concat!("PriceWatch/", env!("CARGO_PKG_VERSION"));

/// HTTP GET capability: URL in, raw page bytes out.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_body_bytes: usize,
    /// Allow localhost/private IPs (local testing against mock servers).
    allow_private_hosts: bool,
}

impl HttpFetcher {
    /// Build a fetcher with its own connection pool.
    pub fn new(options: &FetchOptions) -> Result<Self> {
        let client = client_builder(options)
            .build()
            .map_err(|e| PriceWatchError::Fetch(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_body_bytes: options.max_body_bytes,
            allow_private_hosts: options.allow_private_hosts,
        })
    }

    /// Fetch a page body. Non-2xx responses are errors.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        if !self.allow_private_hosts && is_ssrf_target(url) {
            return Err(PriceWatchError::Fetch(format!(
                "{url}: refusing to fetch private or non-http target"
            )));
        }

        debug!("fetching page");

        let mut response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| PriceWatchError::Fetch(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PriceWatchError::Fetch(format!("{url}: HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_body_bytes {
                return Err(self.too_large(url));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| PriceWatchError::Fetch(format!("{url}: body read failed: {e}")))?
        {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(self.too_large(url));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(status = status.as_u16(), bytes = body.len(), "page fetched");
        Ok(body)
    }

    fn too_large(&self, url: &Url) -> PriceWatchError {
        PriceWatchError::Fetch(format!(
            "{url}: page exceeds {} bytes",
            self.max_body_bytes
        ))
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Client settings shared by every fetcher built from `options`.
fn client_builder(options: &FetchOptions) -> ClientBuilder {
    let user_agent = options.user_agent.as_deref().unwrap_or(USER_AGENT);
    Client::builder()
        .user_agent(user_agent)
        .redirect(redirect_policy(options.max_redirects, options.allow_private_hosts))
        .timeout(options.timeout)
        .connect_timeout(options.connect_timeout)
}

/// Follow at most `max_redirects` hops, re-checking every hop's target.
fn redirect_policy(max_redirects: usize, allow_private_hosts: bool) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() > max_redirects {
            attempt.error(format!("too many redirects (max {max_redirects})"))
        } else if !allow_private_hosts && is_ssrf_target(attempt.url()) {
            let reason = format!("refusing redirect to {}", attempt.url());
            attempt.error(reason)
        } else {
            attempt.follow()
        }
    })
}

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ipv4(&v4),
        Some(url::Host::Ipv6(v6)) => is_private_ipv6(&v6),
        Some(url::Host::Domain(host)) => {
            // `localhost.` is the same name as `localhost`.
            let host = host.strip_suffix('.').unwrap_or(host);
            host == "localhost"
                || host.ends_with(".localhost")
                || host.ends_with(".local")
                || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ipv4(v4: &Ipv4Addr) -> bool {
    v4.is_loopback()
        || v4.is_private()
        || v4.is_link_local()
        || v4.is_broadcast()
        || v4.is_unspecified()
        // 100.64.0.0/10 (Carrier-grade NAT)
        || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
}

fn is_private_ipv6(v6: &Ipv6Addr) -> bool {
    if let Some(v4) = v6.to_ipv4_mapped() {
        return is_private_ipv4(&v4);
    }
    let first = v6.segments()[0];
    v6.is_loopback()
        || v6.is_unspecified()
        // fc00::/7 (unique local)
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 (link local)
        || (first & 0xffc0) == 0xfe80
}
