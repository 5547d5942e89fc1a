use std::{error::Error, net::IpAddr, time::Duration};

use reqwest::{redirect, StatusCode};

use crate::config::ScrapeConfig;

/// A failed page fetch, carrying the URL that failed. Scraping arbitrary
/// third-party pages is unreliable by nature; none of these ever propagate
/// past the job handler.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("url {url} denied by fetch policy: {reason}")]
    PolicyDenied { url: String, reason: String },

    #[error("request for {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: StatusCode },
}

/// Seam between the job handler and the network.
pub trait ImageFetcher: Send + Sync {
    /// `Ok(Some(url))` with the raw, unnormalized image URL on success,
    /// `Ok(None)` when the page carries no preview metadata, `Err` on any
    /// fetch or parse failure.
    fn fetch_preview_image(&self, url: &str) -> Result<Option<String>, FetchError>;
}

pub struct HttpFetcher {
    config: ScrapeConfig,
}

impl HttpFetcher {
    pub fn new(config: ScrapeConfig) -> Self {
        Self { config }
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch_preview_image(&self, url: &str) -> Result<Option<String>, FetchError> {
        let html = fetch_page(url, &self.config)?;
        Ok(preview_image_from_page(&html, url))
    }
}

fn is_ip_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

fn is_private_ip(host: &str) -> bool {
    use std::net::ToSocketAddrs;

    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_ip_private(&ip);
    }

    if let Ok(addrs) = (host, 80).to_socket_addrs() {
        for addr in addrs {
            if is_ip_private(&addr.ip()) {
                return true;
            }
        }
    }

    false
}

fn validate_url_policy(url_parsed: &reqwest::Url, config: &ScrapeConfig) -> Result<(), String> {
    if !config
        .allowed_schemes
        .iter()
        .any(|s| s == url_parsed.scheme())
    {
        return Err(format!("scheme '{}' not allowed", url_parsed.scheme()));
    }

    let host = url_parsed.host_str().unwrap_or_default();

    if config.blocked_hosts.iter().any(|h| h == host) {
        return Err(format!("host '{host}' is blocked"));
    }

    if config.block_private_ips && is_private_ip(host) {
        return Err(format!("host '{host}' resolves to private IP"));
    }

    Ok(())
}

// reqwest wraps the interesting cause (timeout, dns, tls) two sources deep
fn describe_error(error: &reqwest::Error) -> String {
    match error.source() {
        Some(e) => match e.source() {
            Some(e) => e.to_string(),
            None => e.to_string(),
        },
        None => error.to_string(),
    }
}

/// Fetch a page body within the configured timeout and redirect budget.
/// One attempt only: scrape failures are terminal for the job, so there is
/// no retry loop here.
pub fn fetch_page(url: &str, config: &ScrapeConfig) -> Result<String, FetchError> {
    let mut url = url.to_string();

    if url.starts_with("//") {
        url = format!("https:{url}");
    }

    let url_parsed = reqwest::Url::parse(&url).map_err(|err| FetchError::InvalidUrl {
        url: url.clone(),
        reason: err.to_string(),
    })?;

    if let Err(reason) = validate_url_policy(&url_parsed, config) {
        log::warn!("{url}: {reason}");
        return Err(FetchError::PolicyDenied { url, reason });
    }

    let client = reqwest::blocking::Client::builder()
        .user_agent(&config.user_agent)
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .danger_accept_invalid_hostnames(config.accept_invalid_certs)
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .redirect(redirect::Policy::limited(config.max_redirects))
        .pool_idle_timeout(Duration::from_secs(10))
        .build()
        .map_err(|err| FetchError::Http {
            url: url.clone(),
            reason: err.to_string(),
        })?;

    log::debug!("{url}: requesting");

    let resp = client.get(&url).send().map_err(|err| FetchError::Http {
        url: url.clone(),
        reason: describe_error(&err),
    })?;

    let status = resp.status();

    if !status.is_success() {
        log::debug!("{url}: {:?}", status.to_string());
        return Err(FetchError::Status { url, status });
    }

    // we might get OK with a non-text body; lossy decode is good enough for
    // metadata extraction
    let bytes = resp.bytes().map_err(|err| FetchError::Http {
        url: url.clone(),
        reason: describe_error(&err),
    })?;

    Ok(String::from_utf8_lossy(&bytes).to_string())
}

/// Extract the preview image URL from a page's head metadata. `og:image`
/// wins; `twitter:image` is accepted as a fallback.
pub fn preview_image_from_page(html: &str, page_url: &str) -> Option<String> {
    let document = scraper::Html::parse_document(html);
    let head_selector = scraper::Selector::parse("head").unwrap();
    let meta_selector = scraper::Selector::parse("meta").unwrap();

    let head = document.select(&head_selector).next()?;

    let mut og_image = None;
    let mut twitter_image = None;

    for element in head.select(&meta_selector) {
        let meta_prop = element.attr("property").unwrap_or_default();

        let meta_key = element.attr("name").or(Some(meta_prop)).unwrap_or_default();
        let meta_value = element.attr("content").unwrap_or_default();

        if meta_value.is_empty() {
            continue;
        }

        if og_image.is_none() && meta_key == "og:image" {
            og_image = Some(meta_value.to_string());
        }

        if twitter_image.is_none() && meta_key == "twitter:image" {
            twitter_image = Some(meta_value.to_string());
        }
    }

    og_image
        .or(twitter_image)
        .map(|img| resolve_image_url(img, page_url))
}

// pages routinely emit protocol-relative or page-relative image urls
fn resolve_image_url(img: String, page_url: &str) -> String {
    let mut img = img;

    if img.starts_with("//") {
        img = format!("https:{img}");
    }

    if !img.starts_with("http") {
        if let Ok(base) = reqwest::Url::parse(page_url) {
            if let Ok(joined) = base.join(&img) {
                img = joined.to_string();
            }
        }
    }

    img
}
