use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can end an attack run.
///
/// Configuration problems are surfaced before any network traffic; a failed
/// candidate probe is ordinary data and never appears here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid block size {block_size}: must be positive")]
    InvalidBlockSize { block_size: usize },

    #[error("invalid ciphertext: length {length} is not a multiple of the block size {block_size}")]
    MisalignedCiphertext { length: usize, block_size: usize },

    #[error("invalid last ciphertext block: length {length}, expected {block_size}")]
    MisalignedLastBlock { length: usize, block_size: usize },

    #[error("invalid already-found bytes: {length} bytes given but only {max} are recoverable")]
    AlreadyFoundTooLong { length: usize, max: usize },

    #[error("invalid header {header:?}: expected `name: value`")]
    MalformedHeader { header: String },

    #[error("invalid request method {method:?}")]
    InvalidMethod { method: String },

    #[error("unrecognized payload encoding {name:?}")]
    UnknownEncoding { name: String },

    #[error("invalid pkcs7 padding")]
    InvalidPadding,

    #[error("failed to construct the http client: {source}")]
    Client {
        #[source]
        source: reqwest::Error,
    },

    #[error("request failed after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error(
        "padding oracle failure at offset {offset:#x}; \
         try again or check the block size and the decryption success predicate"
    )]
    OracleFailure { offset: usize },

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}
