use std::net::SocketAddr;

use axum::http::{HeaderMap, header::USER_AGENT};

use crate::error::AdmissionError;

pub const BLANK_CANDIDATE: i64 = 0;
const BLANK_LITERAL: &str = "00";
const FORWARDED_FOR: &str = "x-forwarded-for";

/// `"00"` is the blank ballot, anything else must be a plain integer.
pub fn parse_candidate(raw: &str) -> Result<i64, AdmissionError> {
    if raw == BLANK_LITERAL {
        return Ok(BLANK_CANDIDATE);
    }

    raw.parse()
        .map_err(|_| AdmissionError::Validation(raw.to_string()))
}

pub fn client_family(client_signature: &str) -> &'static str {
    if client_signature.is_empty() {
        return "";
    }

    // order matters, Chrome advertises Safari too
    ["Firefox", "Chrome", "Safari"]
        .into_iter()
        .find(|family| client_signature.contains(*family))
        .unwrap_or("Other")
}

/// First hop of `X-Forwarded-For` when the proxy sets it, otherwise the peer address.
pub fn client_address(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

pub fn header_string(headers: &HeaderMap, name: impl axum::http::header::AsHeaderName) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub fn client_signature(headers: &HeaderMap) -> String {
    header_string(headers, USER_AGENT)
}

/// Minimal escaping for text echoed into the result page.
pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());

    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }

    escaped
}
