// Encodings for the payload injected into oracle requests.

use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::Error;

/// How the raw two-block payload is rendered into the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PayloadEncoding {
    #[default]
    Hex,
    HexUppercase,
    Base64,
    Base64UrlSafe,
    /// Standard base64 with substitute characters for `+`, `/` and `=`.
    /// A missing substitute strips the character instead.
    Base64Custom([Option<char>; 3]),
}

impl FromStr for PayloadEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "hex" => Ok(Self::Hex),
            "hex-uppercase" => Ok(Self::HexUppercase),
            "base64" => Ok(Self::Base64),
            "base64-urlsafe" => Ok(Self::Base64UrlSafe),
            other => match other.strip_prefix("base64(") {
                Some(rest) => {
                    let rest = rest.strip_suffix(')').unwrap_or(rest);
                    let mut substitutes = [None; 3];
                    for (slot, c) in substitutes.iter_mut().zip(rest.chars()) {
                        *slot = Some(c);
                    }
                    Ok(Self::Base64Custom(substitutes))
                }
                None => Err(Error::UnknownEncoding {
                    name: other.to_string(),
                }),
            },
        }
    }
}

/// Payload encoding plus the percent-encoding wrapper applied to the base64
/// family, whose output is not URL-safe by itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadTransform {
    pub encoding: PayloadEncoding,
    pub urlencode: bool,
}

impl Default for PayloadTransform {
    fn default() -> Self {
        Self::new(PayloadEncoding::default())
    }
}

impl PayloadTransform {
    pub fn new(encoding: PayloadEncoding) -> Self {
        Self {
            encoding,
            urlencode: true,
        }
    }

    pub fn without_urlencode(mut self) -> Self {
        self.urlencode = false;
        self
    }

    pub fn encode(&self, payload: &[u8]) -> String {
        match &self.encoding {
            PayloadEncoding::Hex => hex::encode(payload),
            PayloadEncoding::HexUppercase => hex::encode_upper(payload),
            PayloadEncoding::Base64 => self.maybe_urlencode(BASE64.encode(payload)),
            PayloadEncoding::Base64UrlSafe => {
                self.maybe_urlencode(substitute(&BASE64.encode(payload), &[Some('-'), Some('_'), None]))
            }
            PayloadEncoding::Base64Custom(substitutes) => {
                self.maybe_urlencode(substitute(&BASE64.encode(payload), substitutes))
            }
        }
    }

    fn maybe_urlencode(&self, encoded: String) -> String {
        if self.urlencode {
            urlencoding::encode(&encoded).into_owned()
        } else {
            encoded
        }
    }
}

fn substitute(b64: &str, substitutes: &[Option<char>; 3]) -> String {
    b64.chars()
        .filter_map(|c| match c {
            '+' => substitutes[0],
            '/' => substitutes[1],
            '=' => substitutes[2],
            other => Some(other),
        })
        .collect()
}
