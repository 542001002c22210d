use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use tandem_types::{FetchStatus, ReadResult};
use tokio::net::lookup_host;

use crate::profile::ResearchProfile;

const USER_AGENT: &str =
    "TandemResearchBot/1.0 (+https://github.com/frumu-ai/tandem; grounded-research-agent)";
const ACCEPT_HEADER: &str =
    "text/html,application/xhtml+xml,text/plain,text/markdown,text/csv,application/json,application/pdf,text/*;q=0.8,*/*;q=0.1";
const MAX_TEXT_RUNES: usize = 16_000;
const TITLE_MAX_RUNES: usize = 240;
const SNIPPET_MAX_RUNES: usize = 900;
const MAX_REDIRECTS: usize = 3;

/// Safe HTTP GET + content-type-aware extraction (`spec.md` §4.3).
#[async_trait]
pub trait Reader: Send + Sync {
    async fn read(&self, url: &str) -> ReadResult;
}

/// SSRF validation shared by the pre-request check and the secure dial path
/// (`spec.md` §4.3, §5, §9 "SSRF defense as a non-negotiable").
pub fn validate_url_shape(raw: &str) -> Result<url::Url, &'static str> {
    let parsed = url::Url::parse(raw).map_err(|_| "invalid url")?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err("unsupported scheme");
    }
    let Some(host) = parsed.host_str() else {
        return Err("missing host");
    };
    if is_blocked_hostname(host) {
        return Err("blocked hostname");
    }
    match parsed.port() {
        None => {}
        Some(80) | Some(443) => {}
        Some(_) => return Err("blocked port"),
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_blocked_ip(&ip) {
            return Err("blocked address");
        }
    }
    Ok(parsed)
}

fn is_blocked_hostname(host: &str) -> bool {
    let lowered = host.to_ascii_lowercase();
    lowered == "localhost"
        || lowered.ends_with(".localhost")
        || lowered.ends_with(".local")
        || lowered.ends_with(".internal")
}

fn is_blocked_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unspecified()
                || is_unique_local_v6(v6)
                || is_unicast_link_local_v6(v6)
        }
    }
}

fn is_unique_local_v6(v6: &std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}

fn is_unicast_link_local_v6(v6: &std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xffc0) == 0xfe80
}

/// Re-validates every hop's destination address after DNS resolution, since
/// a hostname can look fine and still resolve to a private address
/// (`spec.md` §5, §9).
#[derive(Debug, Clone)]
struct SecureResolver;

impl Resolve for SecureResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        Box::pin(async move {
            let addrs = lookup_host((host.as_str(), 0))
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
            let filtered: Vec<SocketAddr> = addrs
                .filter(|addr| !is_blocked_ip(&addr.ip()))
                .collect();
            if filtered.is_empty() {
                return Err(
                    Box::<dyn std::error::Error + Send + Sync>::from("no permitted address")
                );
            }
            Ok(Box::new(filtered.into_iter()) as Addrs)
        })
    }
}

pub struct HttpReader {
    client: Client,
    max_bytes: usize,
    max_text_runes: usize,
}

impl HttpReader {
    pub fn new(profile: &ResearchProfile) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(profile.source_fetch_timeout)
            .redirect(Policy::custom(|attempt| {
                if attempt.previous().len() >= MAX_REDIRECTS {
                    return attempt.error("too many redirects");
                }
                match validate_url_shape(attempt.url().as_str()) {
                    Ok(_) => attempt.follow(),
                    Err(_) => attempt.stop(),
                }
            }))
            .dns_resolver(Arc::new(SecureResolver))
            .build()
            .expect("reqwest client builds with static config");
        HttpReader {
            client,
            max_bytes: profile.source_max_bytes,
            max_text_runes: MAX_TEXT_RUNES,
        }
    }
}

#[async_trait]
impl Reader for HttpReader {
    async fn read(&self, url: &str) -> ReadResult {
        let now = Utc::now();
        let parsed = match validate_url_shape(url) {
            Ok(p) => p,
            Err(_) => {
                return blocked_result(url, now);
            }
        };

        let response = match self
            .client
            .get(parsed.clone())
            .header("Accept", ACCEPT_HEADER)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                let timed_out = err.is_timeout();
                tracing::warn!(url = %url, error = %err, timed_out, "reader request failed");
                return ReadResult {
                    requested_url: url.to_string(),
                    final_url: url.to_string(),
                    title: String::new(),
                    content_type: String::new(),
                    text: String::new(),
                    snippet: String::new(),
                    truncated: false,
                    fetched_at: now,
                    status: if timed_out {
                        FetchStatus::Timeout
                    } else {
                        FetchStatus::RequestFailed
                    },
                };
            }
        };

        let final_url = response.url().to_string();
        let status_code = response.status();
        if !status_code.is_success() {
            return ReadResult {
                requested_url: url.to_string(),
                final_url,
                title: String::new(),
                content_type: String::new(),
                text: String::new(),
                snippet: String::new(),
                truncated: false,
                fetched_at: now,
                status: FetchStatus::HttpError(status_code.as_u16()),
            };
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let media_type = parse_media_type(&content_type);

        let (body, truncated) = match read_body_capped(response, self.max_bytes).await {
            Ok(pair) => pair,
            Err(_) => {
                return ReadResult {
                    requested_url: url.to_string(),
                    final_url,
                    title: String::new(),
                    content_type: content_type.clone(),
                    text: String::new(),
                    snippet: String::new(),
                    truncated: false,
                    fetched_at: now,
                    status: FetchStatus::FetchFailed,
                };
            }
        };

        let text_body = String::from_utf8_lossy(&body).to_string();

        let extracted = match crate::extract::extract(&media_type, &text_body) {
            Some(extracted) => extracted,
            None => {
                return ReadResult {
                    requested_url: url.to_string(),
                    final_url,
                    title: String::new(),
                    content_type,
                    text: String::new(),
                    snippet: String::new(),
                    truncated,
                    fetched_at: now,
                    status: FetchStatus::UnsupportedContentType,
                };
            }
        };

        let normalized = crate::extract::normalize(&extracted.text);
        let bounded = truncate_runes(&normalized, self.max_text_runes);

        if bounded.trim().is_empty() {
            return ReadResult {
                requested_url: url.to_string(),
                final_url,
                title: truncate_runes(&extracted.title, TITLE_MAX_RUNES),
                content_type,
                text: String::new(),
                snippet: String::new(),
                truncated,
                fetched_at: now,
                status: FetchStatus::EmptyContent,
            };
        }

        ReadResult {
            requested_url: url.to_string(),
            final_url,
            title: truncate_runes(&extracted.title, TITLE_MAX_RUNES),
            content_type,
            snippet: truncate_runes(&bounded, SNIPPET_MAX_RUNES),
            text: bounded,
            truncated,
            fetched_at: now,
            status: FetchStatus::Ok,
        }
    }
}

fn blocked_result(url: &str, now: chrono::DateTime<Utc>) -> ReadResult {
    ReadResult {
        requested_url: url.to_string(),
        final_url: url.to_string(),
        title: String::new(),
        content_type: String::new(),
        text: String::new(),
        snippet: String::new(),
        truncated: false,
        fetched_at: now,
        status: FetchStatus::Blocked,
    }
}

fn truncate_runes(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn parse_media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

async fn read_body_capped(response: reqwest::Response, max_bytes: usize) -> anyhow::Result<(Vec<u8>, bool)> {
    use futures::StreamExt;
    let mut stream = response.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();
    let mut truncated = false;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buf.extend_from_slice(&chunk);
        if buf.len() > max_bytes {
            buf.truncate(max_bytes);
            truncated = true;
            break;
        }
    }
    Ok((buf, truncated))
}
