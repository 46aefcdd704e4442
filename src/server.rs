// Reference vulnerable service: AES-128-CBC behind an HTTP endpoint that
// leaks padding validity through its status code. The attack tests spawn
// it in-process and point the entrypoints at it.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::Router;
use openssl::error::ErrorStack;
use openssl::symm::{Cipher, Crypter, Mode};
use rand::Rng;
use tokio::net::{TcpListener, ToSocketAddrs};

/// Key the reference service encrypts under, fixed so tests are
/// reproducible against known ciphertexts.
pub const TEST_KEY: [u8; 16] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66,
];

#[derive(Debug, Clone)]
struct OracleState {
    key: [u8; 16],
}

/// Bind the service on `address` (port 0 picks an ephemeral port) and
/// return its base URL.
pub async fn spawn_server(address: impl ToSocketAddrs, key: [u8; 16]) -> String {
    let app = router(key);
    let listener = TcpListener::bind(address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

pub fn router(key: [u8; 16]) -> Router {
    Router::new()
        .route("/encrypt", get(encrypt_handler))
        .route("/decrypt", any(decrypt_handler))
        .with_state(OracleState { key })
}

async fn encrypt_handler(
    State(state): State<OracleState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(plaintext) = params.get("plaintext") else {
        return (StatusCode::BAD_REQUEST, "missing 'plaintext' parameter").into_response();
    };
    let iv: [u8; 16] = rand::thread_rng().gen();
    match openssl::symm::encrypt(
        Cipher::aes_128_cbc(),
        &state.key,
        Some(&iv),
        plaintext.as_bytes(),
    ) {
        Ok(ciphertext) => format!("{}{}", hex::encode(iv), hex::encode(ciphertext)).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn decrypt_handler(
    State(state): State<OracleState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(ciphertext_hex) = params.get("ciphertext") else {
        return (StatusCode::BAD_REQUEST, "missing 'ciphertext' parameter".to_string())
            .into_response();
    };
    let bytes = match hex::decode(ciphertext_hex) {
        Ok(bytes) => bytes,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    if bytes.len() < 32 || bytes.len() % 16 != 0 {
        return (
            StatusCode::BAD_REQUEST,
            "ciphertext must be hex of an iv plus whole blocks".to_string(),
        )
            .into_response();
    }
    match cbc_decrypt(&state.key, &bytes[..16], &bytes[16..]) {
        Ok(_) => (StatusCode::OK, "OK".to_string()).into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

/// Decrypt and strip padding, as the service's legitimate consumer would;
/// invalid padding comes back as an error.
pub fn cbc_decrypt(key: &[u8; 16], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, ErrorStack> {
    openssl::symm::decrypt(Cipher::aes_128_cbc(), key, Some(iv), ciphertext)
}

/// Raw CBC decryption with the padding left in place: byte for byte what a
/// successful decrypt-mode attack recovers.
pub fn cbc_decrypt_keep_padding(
    key: &[u8; 16],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, ErrorStack> {
    let cipher = Cipher::aes_128_cbc();
    let mut crypter = Crypter::new(cipher, Mode::Decrypt, key, Some(iv))?;
    crypter.pad(false);
    let mut plaintext = vec![0u8; ciphertext.len() + cipher.block_size()];
    let mut written = crypter.update(ciphertext, &mut plaintext)?;
    written += crypter.finalize(&mut plaintext[written..])?;
    plaintext.truncate(written);
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn leaks_padding_validity_through_the_status_code() {
        let base = spawn_server("127.0.0.1:0", TEST_KEY).await;
        let client = reqwest::Client::new();

        let ciphertext_hex = client
            .get(format!("{base}/encrypt?plaintext=attack at dawn"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        let valid = client
            .get(format!("{base}/decrypt?ciphertext={}", ciphertext_hex.trim()))
            .send()
            .await
            .unwrap();
        assert_eq!(valid.status().as_u16(), 200);

        // "attack at dawn" pads with 0x02 0x02; flipping the low bit of the
        // IV byte feeding the final plaintext byte turns the tail into
        // 0x02 0x03, which no padding length accepts.
        let mut tampered = hex::decode(ciphertext_hex.trim()).unwrap();
        tampered[15] ^= 0x01;
        let invalid = client
            .get(format!("{base}/decrypt?ciphertext={}", hex::encode(tampered)))
            .send()
            .await
            .unwrap();
        assert_eq!(invalid.status().as_u16(), 400);
    }

    #[test]
    fn raw_decryption_keeps_the_padding_bytes() {
        let iv = [0x24u8; 16];
        let ciphertext =
            openssl::symm::encrypt(Cipher::aes_128_cbc(), &TEST_KEY, Some(&iv), b"attack at dawn")
                .unwrap();

        let padded = cbc_decrypt_keep_padding(&TEST_KEY, &iv, &ciphertext).unwrap();

        assert_eq!(padded, b"attack at dawn\x02\x02");
    }
}
