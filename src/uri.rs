//! Endpoint identifier normalization.
//!
//! Two spellings of the same endpoint must resolve to the same stub, so every
//! identifier is reduced to a canonical form before it is stored or looked up.

use crate::error::ConfigurationError;

fn invalid(uri: &str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidEndpoint {
        uri: uri.to_string(),
        reason: reason.into(),
    }
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Canonical form of an endpoint identifier.
///
/// - the scheme is lower-cased and `scheme:rest` becomes `scheme://rest`
/// - query parameters are decoded, sorted by key and re-encoded
/// - identifiers without a scheme keep their path as given
///
/// Applying this to its own output returns the same string.
pub fn normalize(uri: &str) -> Result<String, ConfigurationError> {
    let trimmed = uri.trim();
    if trimmed.is_empty() {
        return Err(invalid(uri, "identifier is empty"));
    }
    if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid(uri, "identifier contains whitespace"));
    }

    let (base, query) = match trimmed.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (trimmed, None),
    };

    if base.is_empty() {
        return Err(invalid(uri, "identifier is empty"));
    }

    let mut normalized = match base.split_once(':') {
        Some(("", _)) => return Err(invalid(uri, "scheme is empty")),
        Some((scheme, rest)) if is_scheme(scheme) => {
            let rest = rest.trim_start_matches('/');
            if rest.is_empty() {
                return Err(invalid(uri, "nothing follows the scheme"));
            }
            format!("{}://{}", scheme.to_ascii_lowercase(), rest)
        }
        Some((scheme, _)) if !scheme.contains('/') => {
            return Err(invalid(uri, format!("invalid scheme '{}'", scheme)));
        }
        _ => base.to_string(),
    };

    if let Some(query) = query {
        let params = parse_query(uri, query)?;
        if !params.is_empty() {
            normalized.push('?');
            let encoded: Vec<String> = params
                .iter()
                .map(|(k, v)| match v {
                    Some(v) => format!("{}={}", encode(k), encode(v)),
                    None => encode(k),
                })
                .collect();
            normalized.push_str(&encoded.join("&"));
        }
    }

    Ok(normalized)
}

fn parse_query(
    uri: &str,
    query: &str,
) -> Result<Vec<(String, Option<String>)>, ConfigurationError> {
    let mut params = Vec::new();
    for part in query.split('&').filter(|p| !p.is_empty()) {
        let param = match part.split_once('=') {
            Some((key, value)) => (decode(uri, key)?, Some(decode(uri, value)?)),
            None => (decode(uri, part)?, None),
        };
        params.push(param);
    }
    // stable: repeated keys keep their relative order
    params.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(params)
}

fn decode(uri: &str, s: &str) -> Result<String, ConfigurationError> {
    let bytes = s.as_bytes();
    for (i, _) in s.match_indices('%') {
        let valid = bytes
            .get(i + 1..i + 3)
            .map(|h| h.iter().all(u8::is_ascii_hexdigit))
            .unwrap_or(false);
        if !valid {
            return Err(invalid(uri, "malformed percent escape"));
        }
    }
    urlencoding::decode(&s.replace('+', " "))
        .map(|decoded| decoded.into_owned())
        .map_err(|_| invalid(uri, "query is not valid UTF-8"))
}

fn encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Scheme of a normalized identifier, if it has one.
pub fn scheme(uri: &str) -> Option<&str> {
    uri.split_once("://").map(|(scheme, _)| scheme)
}
