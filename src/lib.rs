mod analyze;
mod cache;
mod decrypt;
mod encrypt;
mod engine;
mod error;
mod oracle;
mod pkcs7;
mod probe;
mod progress;
pub mod server;
mod transform;
mod util;

pub use analyze::{analyze_responses, AnalysisOptions, AnalysisReport};
pub use cache::{CacheStore, FileCache, MemoryCache, DEFAULT_CACHE_PATH};
pub use decrypt::{decrypt, DecryptOptions, DecryptOutcome};
pub use encrypt::{encrypt, EncryptOptions, EncryptOutcome};
pub use engine::{Mode, DEFAULT_CONCURRENCY};
pub use error::{Error, Result};
pub use oracle::{
    HeadersArg, NetworkStatsSnapshot, OracleCaller, OracleResult, RequestOptions,
    SuccessPredicate, PAYLOAD_MARKER,
};
pub use pkcs7::{pkcs7_pad, pkcs7_unpad};
pub use probe::first_truthy;
pub use progress::{ByteAttempt, NoProgress, ProgressSink};
pub use transform::{PayloadEncoding, PayloadTransform};
pub use util::{to_printable, xor_bytes};
