// Turning candidate payloads into oracle round trips.
//
// The caller owns everything between "two raw blocks" and "an HTTP
// response": payload encoding, marker substitution, the response cache,
// the request itself, bounded transport retries and the network counters.
// It never interprets responses; deciding what counts as a decryption
// success is the supplied predicate's job, down to the status code.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::CacheStore;
use crate::error::{Error, Result};
use crate::transform::PayloadTransform;

/// Token users place in the URL, a header or the body to mark where the
/// encoded payload goes. When absent everywhere, the payload is appended
/// to the URL.
pub const PAYLOAD_MARKER: &str = "{POPAYLOAD}";

const DEFAULT_USER_AGENT: &str = concat!("padoracle/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRIES: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Everything the decryption-success predicate gets to look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleResult {
    pub url: String,
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// `(OracleResult) -> bool`, true exactly when the crafted payload
/// decrypted with valid padding.
pub type SuccessPredicate<'a> = &'a (dyn Fn(&OracleResult) -> bool + Send + Sync);

/// Header argument forms accepted by the entrypoints: a single
/// `name: value` line, many lines, or a ready-made map.
#[derive(Debug, Clone)]
pub enum HeadersArg {
    Line(String),
    Lines(Vec<String>),
    Map(HashMap<String, String>),
}

impl HeadersArg {
    fn into_lines(self) -> Vec<String> {
        match self {
            HeadersArg::Line(line) => vec![line],
            HeadersArg::Lines(lines) => lines,
            HeadersArg::Map(map) => map
                .into_iter()
                .map(|(name, value)| format!("{name}: {value}"))
                .collect(),
        }
    }
}

/// Request shape forwarded verbatim to each oracle call.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Option<String>,
    pub headers: Option<HeadersArg>,
    pub body: Option<String>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
}

/// Cumulative network counters, bumped as calls complete. Byte counts are
/// derived from serialized request/response sizes since reqwest exposes no
/// socket-level numbers.
#[derive(Debug, Default)]
struct NetworkStats {
    requests: AtomicU64,
    last_request_ms: AtomicU64,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStatsSnapshot {
    pub requests: u64,
    pub last_request_ms: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,
}

impl NetworkStats {
    fn snapshot(&self) -> NetworkStatsSnapshot {
        NetworkStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            last_request_ms: self.last_request_ms.load(Ordering::Relaxed),
            bytes_up: self.bytes_up.load(Ordering::Relaxed),
            bytes_down: self.bytes_down.load(Ordering::Relaxed),
        }
    }
}

pub struct OracleCaller {
    client: reqwest::Client,
    url: String,
    method: reqwest::Method,
    /// Header name/value templates with the marker still unreplaced.
    headers: Vec<(String, String)>,
    body: Option<String>,
    transform: PayloadTransform,
    timeout: Duration,
    retries: u32,
    append_to_url: bool,
    cache: Option<Arc<dyn CacheStore>>,
    stats: NetworkStats,
}

impl OracleCaller {
    pub fn new(
        url: &str,
        options: RequestOptions,
        transform: PayloadTransform,
        cache: Option<Arc<dyn CacheStore>>,
    ) -> Result<Self> {
        let method = match &options.method {
            Some(name) => reqwest::Method::from_bytes(name.to_uppercase().as_bytes())
                .map_err(|_| Error::InvalidMethod {
                    method: name.clone(),
                })?,
            None => reqwest::Method::GET,
        };
        let headers =
            parse_header_lines(options.headers.map(HeadersArg::into_lines).unwrap_or_default())?;
        let body = options.body;
        let append_to_url = !url.contains(PAYLOAD_MARKER)
            && !headers
                .iter()
                .any(|(name, value)| name.contains(PAYLOAD_MARKER) || value.contains(PAYLOAD_MARKER))
            && !body.as_deref().unwrap_or_default().contains(PAYLOAD_MARKER);
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .map_err(|source| Error::Client { source })?;
        Ok(Self {
            client,
            url: url.to_string(),
            method,
            headers,
            body,
            transform,
            timeout: options.timeout.unwrap_or(DEFAULT_TIMEOUT),
            retries: options.retries.unwrap_or(DEFAULT_RETRIES),
            append_to_url,
            cache,
            stats: NetworkStats::default(),
        })
    }

    pub fn stats(&self) -> NetworkStatsSnapshot {
        self.stats.snapshot()
    }

    /// One oracle round trip for `payload`, served from the cache when a
    /// previous run already made the identical request.
    pub async fn call(&self, payload: &[u8]) -> Result<OracleResult> {
        let (url, headers, body) = self.build_request_parts(payload);

        let cache_key = cache_key(&url, &headers, body.as_deref());
        if let Some(cache) = &self.cache {
            if let Some(mut hit) = cache.get(&cache_key) {
                hit.url = url;
                return Ok(hit);
            }
        }

        let result = self.send_with_retries(url, &headers, body.as_deref()).await?;
        if let Some(cache) = &self.cache {
            cache.set(&cache_key, result.clone());
        }
        Ok(result)
    }

    /// Encode the payload and substitute it into the URL, headers and body.
    fn build_request_parts(
        &self,
        payload: &[u8],
    ) -> (String, Vec<(String, String)>, Option<String>) {
        let encoded = self.transform.encode(payload);
        let url = if self.append_to_url {
            format!("{}{encoded}", self.url)
        } else {
            inject(&self.url, &encoded)
        };
        let headers = self
            .headers
            .iter()
            .map(|(name, value)| (inject(name, &encoded), inject(value, &encoded)))
            .collect();
        let body = self.body.as_deref().map(|data| inject(data, &encoded));
        (url, headers, body)
    }

    async fn send_with_retries(
        &self,
        url: String,
        headers: &[(String, String)],
        body: Option<&str>,
    ) -> Result<OracleResult> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let started = Instant::now();
            match self.send_once(&url, headers, body).await {
                Ok((status_code, response_headers, response_body)) => {
                    self.record_stats(started, &url, headers, body, &response_headers, &response_body);
                    return Ok(OracleResult {
                        url,
                        status_code,
                        headers: response_headers,
                        body: response_body,
                    });
                }
                Err(err) if is_transport_error(&err) && attempts <= self.retries => {
                    debug!(attempts, error = %err, "transport error, retrying oracle request");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(source) => return Err(Error::Transport { attempts, source }),
            }
        }
    }

    async fn send_once(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Option<&str>,
    ) -> reqwest::Result<(u16, Vec<(String, String)>, String)> {
        let mut request = self
            .client
            .request(self.method.clone(), url)
            .timeout(self.timeout);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(data) = body {
            request = request.body(data.to_string());
        }
        let response = request.send().await?;
        let status_code = response.status().as_u16();
        let response_headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let response_body = response.text().await?;
        Ok((status_code, response_headers, response_body))
    }

    fn record_stats(
        &self,
        started: Instant,
        url: &str,
        headers: &[(String, String)],
        body: Option<&str>,
        response_headers: &[(String, String)],
        response_body: &str,
    ) {
        let header_bytes = |pairs: &[(String, String)]| {
            pairs
                .iter()
                .map(|(name, value)| name.len() + value.len() + 4)
                .sum::<usize>()
        };
        let bytes_up = self.method.as_str().len() + url.len() + header_bytes(headers)
            + body.map_or(0, str::len);
        let bytes_down = header_bytes(response_headers) + response_body.len();
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        self.stats
            .last_request_ms
            .store(started.elapsed().as_millis() as u64, Ordering::Relaxed);
        self.stats.bytes_up.fetch_add(bytes_up as u64, Ordering::Relaxed);
        self.stats
            .bytes_down
            .fetch_add(bytes_down as u64, Ordering::Relaxed);
    }
}

fn inject(template: &str, encoded: &str) -> String {
    template.replace(PAYLOAD_MARKER, encoded)
}

fn parse_header_lines(lines: Vec<String>) -> Result<Vec<(String, String)>> {
    lines
        .into_iter()
        .map(|line| match line.find(':') {
            Some(index) if index > 0 => {
                let name = line[..index].trim().to_string();
                let value = line[index + 1..].trim_start().to_string();
                Ok((name, value))
            }
            _ => Err(Error::MalformedHeader { header: line }),
        })
        .collect()
}

fn cache_key(url: &str, headers: &[(String, String)], body: Option<&str>) -> String {
    let headers = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{url}|{headers}|{}", body.unwrap_or_default())
}

fn is_transport_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}
