//! OAuth 1.0a request signing (HMAC-SHA1)
//!
//! Twitter's user-context endpoints authenticate every request with an
//! `Authorization: OAuth ...` header whose signature covers the method,
//! the base URL, the query and form parameters and the `oauth_*`
//! parameters themselves. JSON bodies are not part of the signature.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Consumer and access-token credentials for one account
#[derive(Debug, Clone, Copy)]
pub struct OAuthCredentials<'a> {
    pub consumer_key: &'a str,
    pub consumer_secret: &'a str,
    pub token: &'a str,
    pub token_secret: &'a str,
}

/// RFC 3986 percent-encoding as OAuth requires (only `A-Za-z0-9-._~` kept)
pub fn percent_encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Random alphanumeric nonce
pub fn generate_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Build the `Authorization` header for a request
///
/// `url` must not contain a query string; pass query and form parameters
/// through `params` instead.
pub fn authorization_header(
    method: &str,
    url: &str,
    params: &[(&str, &str)],
    credentials: &OAuthCredentials<'_>,
) -> Option<String> {
    let nonce = generate_nonce();
    let timestamp = chrono::Utc::now().timestamp().to_string();
    authorization_header_with(method, url, params, credentials, &nonce, &timestamp)
}

/// Deterministic variant of [`authorization_header`]
pub fn authorization_header_with(
    method: &str,
    url: &str,
    params: &[(&str, &str)],
    credentials: &OAuthCredentials<'_>,
    nonce: &str,
    timestamp: &str,
) -> Option<String> {
    let oauth_params = [
        ("oauth_consumer_key", credentials.consumer_key),
        ("oauth_nonce", nonce),
        ("oauth_signature_method", "HMAC-SHA1"),
        ("oauth_timestamp", timestamp),
        ("oauth_token", credentials.token),
        ("oauth_version", "1.0"),
    ];

    let signature = sign(method, url, params, &oauth_params, credentials)?;

    let mut header_params: Vec<(&str, &str)> = oauth_params.to_vec();
    header_params.push(("oauth_signature", &signature));
    header_params.sort_by(|a, b| a.0.cmp(b.0));

    let fields = header_params
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join(", ");

    Some(format!("OAuth {}", fields))
}

fn sign(
    method: &str,
    url: &str,
    params: &[(&str, &str)],
    oauth_params: &[(&str, &str)],
    credentials: &OAuthCredentials<'_>,
) -> Option<String> {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .chain(oauth_params.iter())
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();

    let parameter_string = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let base_string = format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(url),
        percent_encode(&parameter_string)
    );

    let signing_key = format!(
        "{}&{}",
        percent_encode(credentials.consumer_secret),
        percent_encode(credentials.token_secret)
    );

    let mut mac = HmacSha1::new_from_slice(signing_key.as_bytes()).ok()?;
    mac.update(base_string.as_bytes());

    Some(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}
