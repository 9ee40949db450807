//! Feed source client with security measures.
//!
//! This module fetches and parses RSS/Atom/JSON feeds with SSRF protection
//! and resource limits. The refresher depends only on the [`FeedSource`]
//! trait so tests can script their own sources.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use feed_rs::model::{Entry, FeedType};
use feed_rs::parser;
use reqwest::Client;

use crate::config::RefresherConfig;
use crate::error::{Result, SemaphoreError};
use crate::feed::types::{Enclosure, FeedFormat, ParsedFeed, ParsedItem, Person};

/// Fetches and parses a feed by URL.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch `url` and parse it, giving up after `timeout`.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<ParsedFeed>;
}

/// HTTP feed source with security measures.
pub struct HttpFeedSource {
    client: Client,
    max_feed_size: u64,
    allow_private_hosts: bool,
}

impl HttpFeedSource {
    /// Create a new source from refresher settings.
    pub fn new(config: &RefresherConfig) -> Result<Self> {
        let max_redirects = config.max_redirects;
        let allow_private_hosts = config.allow_private_hosts;

        // Every hop is validated, not only the first URL
        let redirect_policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= max_redirects {
                return attempt.error(format!("too many redirects (max {max_redirects})"));
            }
            if !allow_private_hosts {
                if let Err(e) = validate_url(attempt.url().as_str()) {
                    return attempt.error(e.to_string());
                }
            }
            attempt.follow()
        });

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .redirect(redirect_policy)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| SemaphoreError::Feed(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_feed_size: config.max_feed_size_bytes,
            allow_private_hosts,
        })
    }

    async fn fetch_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        if !self.allow_private_hosts {
            validate_url(url)?;
        } else {
            validate_scheme(url)?;
        }

        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_request_error(url, e))?;

        if !response.status().is_success() {
            return Err(SemaphoreError::Feed(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        if let Some(content_length) = response.content_length() {
            if content_length > self.max_feed_size {
                return Err(SemaphoreError::Feed(format!(
                    "feed too large: {} bytes (max {} bytes)",
                    content_length, self.max_feed_size
                )));
            }
        }

        // Chunked bodies carry no length, so enforce the cap while reading
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| map_request_error(url, e))?
        {
            if (body.len() + chunk.len()) as u64 > self.max_feed_size {
                return Err(SemaphoreError::Feed(format!(
                    "feed too large: more than {} bytes",
                    self.max_feed_size
                )));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<ParsedFeed> {
        let bytes = self.fetch_bytes(url, timeout).await?;
        parse_feed(&bytes)
    }
}

fn map_request_error(url: &str, e: reqwest::Error) -> SemaphoreError {
    if e.is_timeout() {
        SemaphoreError::Timeout(format!("fetching {}", url))
    } else {
        SemaphoreError::Feed(format!("failed to fetch feed: {}", e))
    }
}

fn validate_scheme(url: &str) -> Result<url::Url> {
    let parsed =
        url::Url::parse(url).map_err(|e| SemaphoreError::Feed(format!("invalid URL: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(SemaphoreError::Feed(format!(
            "unsupported URL scheme: {}",
            scheme
        ))),
    }
}

/// Validate a URL for SSRF protection.
///
/// This function checks that:
/// - The URL uses http or https scheme
/// - The host is not a private/loopback address
/// - The host is not a reserved hostname
pub fn validate_url(url: &str) -> Result<()> {
    let parsed = validate_scheme(url)?;

    let host = parsed
        .host()
        .ok_or_else(|| SemaphoreError::Feed("URL has no host".to_string()))?;

    match host {
        url::Host::Domain(domain) => {
            if is_forbidden_hostname(domain) {
                return Err(SemaphoreError::Feed(format!("forbidden host: {}", domain)));
            }
        }
        url::Host::Ipv4(ipv4) => {
            let ip = IpAddr::V4(ipv4);
            if is_private_ip(&ip) {
                return Err(SemaphoreError::Feed(format!(
                    "private IP address not allowed: {}",
                    ip
                )));
            }
        }
        url::Host::Ipv6(ipv6) => {
            let ip = IpAddr::V6(ipv6);
            if is_private_ip(&ip) {
                return Err(SemaphoreError::Feed(format!(
                    "private IP address not allowed: {}",
                    ip
                )));
            }
        }
    }

    Ok(())
}

/// Check if a hostname is forbidden.
fn is_forbidden_hostname(host: &str) -> bool {
    let host_lower = host.to_lowercase();

    if host_lower == "localhost" {
        return true;
    }

    const FORBIDDEN_SUFFIXES: [&str; 7] = [
        ".local",
        ".localhost",
        ".internal",
        ".intranet",
        ".corp",
        ".home",
        ".lan",
    ];

    FORBIDDEN_SUFFIXES
        .iter()
        .any(|suffix| host_lower.ends_with(suffix))
}

/// Check if an IP address is private/reserved.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();
            ipv4.is_loopback()
                || ipv4.is_private()
                || ipv4.is_link_local()
                || ipv4.is_broadcast()
                || ipv4.is_unspecified()
                // Documentation: 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24
                || (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
                || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
                || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
                // Carrier-grade NAT: 100.64.0.0/10
                || (octets[0] == 100 && (64..=127).contains(&octets[1]))
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            if let Some(mapped) = ipv6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(mapped));
            }

            let segments = ipv6.segments();
            // Unique local: fc00::/7
            (segments[0] & 0xfe00) == 0xfc00
                // Link-local: fe80::/10
                || (segments[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Parse feed bytes into a ParsedFeed.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed> {
    let feed = parser::parse(bytes)
        .map_err(|e| SemaphoreError::Feed(format!("failed to parse feed: {}", e)))?;

    let (format, version) = match feed.feed_type {
        FeedType::Atom => (FeedFormat::Atom, "1.0"),
        FeedType::JSON => (FeedFormat::Json, "1.1"),
        FeedType::RSS0 => (FeedFormat::Rss, "0.9"),
        FeedType::RSS1 => (FeedFormat::Rss, "1.0"),
        FeedType::RSS2 => (FeedFormat::Rss, "2.0"),
    };

    let feed_link = feed
        .links
        .iter()
        .find(|l| l.rel.as_deref() == Some("self"))
        .map(|l| l.href.clone());
    let link = feed
        .links
        .iter()
        .find(|l| l.rel.as_deref() != Some("self"))
        .map(|l| l.href.clone())
        .unwrap_or_default();

    let items = feed
        .entries
        .iter()
        .map(|entry| parse_entry(entry, format))
        .collect();

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content).unwrap_or_default(),
        description: feed.description.map(|d| d.content).unwrap_or_default(),
        link,
        feed_link,
        image_url: feed.logo.or(feed.icon).map(|image| image.uri),
        language: feed.language,
        format,
        version: version.to_string(),
        pub_date: feed.published,
        pub_updated: feed.updated,
        items,
    })
}

fn parse_entry(entry: &Entry, format: FeedFormat) -> ParsedItem {
    let mut link = None;
    let mut alternate_links = Vec::new();
    let mut enclosures = Vec::new();

    for l in &entry.links {
        if l.href.trim().is_empty() {
            continue;
        }
        match l.rel.as_deref() {
            None | Some("") | Some("alternate") if link.is_none() => link = Some(l.href.clone()),
            Some("self") | Some("replies") => {}
            Some("enclosure") => enclosures.push(Enclosure {
                url: l.href.clone(),
                mime_type: l.media_type.clone(),
                length: l.length,
            }),
            _ => alternate_links.push(l.href.clone()),
        }
    }

    for media in &entry.media {
        for content in &media.content {
            if let Some(url) = content.url.as_ref() {
                let url = url.to_string();
                if enclosures.iter().any(|e| e.url == url) {
                    continue;
                }
                enclosures.push(Enclosure {
                    url,
                    mime_type: content.content_type.as_ref().map(|m| m.to_string()),
                    length: content.size,
                });
            }
        }
    }

    let image_url = entry
        .media
        .iter()
        .flat_map(|m| m.thumbnails.iter())
        .map(|t| t.image.uri.clone())
        .next();

    let guid = Some(entry.id.trim().to_string()).filter(|id| !id.is_empty());
    let guid_is_permalink = format == FeedFormat::Rss
        && guid
            .as_deref()
            .is_some_and(|g| g.starts_with("http://") || g.starts_with("https://"));

    ParsedItem {
        title: entry
            .title
            .as_ref()
            .map(|t| t.content.clone())
            .unwrap_or_default(),
        description: entry
            .summary
            .as_ref()
            .map(|t| t.content.clone())
            .unwrap_or_default(),
        content: entry
            .content
            .as_ref()
            .and_then(|c| c.body.clone())
            .unwrap_or_default(),
        link,
        alternate_links,
        guid,
        guid_is_permalink,
        published: entry.published,
        updated: entry.updated,
        authors: entry
            .authors
            .iter()
            .map(|a| Person {
                name: a.name.clone(),
                email: a.email.clone(),
            })
            .collect(),
        enclosures,
        categories: entry
            .categories
            .iter()
            .map(|c| c.label.clone().unwrap_or_else(|| c.term.clone()))
            .collect(),
        image_url,
    }
}
