//! Masking of credentials in logs and `Debug` output.
//!
//! The listener token grants write access to a project, so it must never end
//! up in a trace or a panic message.

use http::header::{HeaderMap, HeaderValue};

/// The mask string used to replace sensitive values.
const MASK: &str = "*****";

/// Header names to mask (case-insensitive comparison).
const SENSITIVE_HEADERS: &[&str] = &["authorization", "x-api-key", "cookie"];

/// Number of trailing token characters kept visible so tokens can be told apart.
const VISIBLE_SUFFIX: usize = 4;

/// Masks an access token, keeping only its last few characters.
///
/// ```
/// use orangebeard_core::masking::mask_token;
///
/// assert_eq!(mask_token("0f9c6c2e-1d2b-4a57-8d7e-9b1e2f3a4b5c"), "*****4b5c");
/// assert_eq!(mask_token("abc"), "*****");
/// assert_eq!(mask_token(""), "");
/// ```
pub fn mask_token(token: &str) -> String {
    if token.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= VISIBLE_SUFFIX * 2 {
        return MASK.to_string();
    }

    let suffix: String = chars[chars.len() - VISIBLE_SUFFIX..].iter().collect();
    format!("{MASK}{suffix}")
}

/// Masks sensitive header values in a HeaderMap.
///
/// ```
/// use http::header::HeaderMap;
/// use orangebeard_core::masking::mask_headers;
///
/// let mut headers = HeaderMap::new();
/// headers.insert("authorization", "Bearer secret".parse().unwrap());
/// headers.insert("content-type", "application/json".parse().unwrap());
///
/// let masked = mask_headers(&headers);
/// assert_eq!(masked.get("authorization").unwrap(), "*****");
/// assert_eq!(masked.get("content-type").unwrap(), "application/json");
/// ```
pub fn mask_headers(headers: &HeaderMap) -> HeaderMap {
    let mut masked = HeaderMap::new();

    for (name, value) in headers.iter() {
        let name_lower = name.as_str().to_lowercase();
        let masked_value = if SENSITIVE_HEADERS.iter().any(|&h| name_lower == h) {
            HeaderValue::from_static(MASK)
        } else {
            value.clone()
        };
        masked.append(name.clone(), masked_value);
    }

    masked
}
