//! URL identity and storage addressing.
//!
//! Two separate normalisations live here and must not be mixed up:
//!
//! - [`canonicalize_url`] yields the identity key of an article. Two URLs
//!   that canonicalize to the same string are the same article everywhere
//!   (dedup, merge matching, the removed-URL list).
//! - [`url_to_pathname`] yields a short filesystem-safe key for per-URL
//!   artifacts in object storage (fetched content, summaries).

use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

/// Longest pathname key before it is truncated and suffixed with a hash.
pub const MAX_PATHNAME_LEN: usize = 80;
const HASH_SUFFIX_LEN: usize = 12;

/// Normalise a URL to its scheme-free `host/path` identity.
///
/// Missing schemes are treated as `https`, the host is lower-cased and
/// stripped of `www.`, query and fragment are dropped, and trailing slashes
/// are removed (so the bare root collapses to just the host).
pub fn canonicalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let with_scheme = if has_scheme(trimmed) {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    match Url::parse(&with_scheme) {
        Ok(url) if url.host_str().is_some() => {
            let host = url.host_str().unwrap_or_default().to_lowercase();
            let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

            let mut out = host;
            // Default ports for either scheme are dropped so the result stays
            // stable when re-parsed as https.
            if let Some(port) = url.port() {
                if port != 80 && port != 443 {
                    out.push(':');
                    out.push_str(&port.to_string());
                }
            }
            out.push_str(url.path().trim_end_matches('/'));
            out
        }
        _ => canonicalize_fallback(trimmed),
    }
}

fn has_scheme(raw: &str) -> bool {
    match raw.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Best-effort normalisation for strings the URL parser rejects.
fn canonicalize_fallback(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let without_scheme = match lower.split_once("://") {
        Some((_, rest)) if has_scheme(&lower) => rest,
        _ => lower.as_str(),
    };
    let end = without_scheme
        .find(|c: char| c == '?' || c == '#')
        .unwrap_or(without_scheme.len());
    let stripped = without_scheme[..end].trim_end_matches('/');
    stripped.strip_prefix("www.").unwrap_or(stripped).to_string()
}

fn non_alphanumeric() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9]+").expect("static regex"))
}

/// Derive the object-storage key for a URL's artifacts.
///
/// Every run of non-alphanumeric characters in the canonical form becomes a
/// single hyphen. Keys longer than [`MAX_PATHNAME_LEN`] are cut and given a
/// SHA-256 suffix of the full canonical URL so distinct long URLs sharing a
/// prefix never collide.
pub fn url_to_pathname(raw: &str) -> String {
    let canonical = canonicalize_url(raw);
    let collapsed = non_alphanumeric().replace_all(&canonical, "-");
    let collapsed = collapsed.trim_matches('-');

    if collapsed.len() <= MAX_PATHNAME_LEN {
        return collapsed.to_string();
    }

    let digest = format!("{:x}", Sha256::digest(canonical.as_bytes()));
    let keep = MAX_PATHNAME_LEN - HASH_SUFFIX_LEN - 1;
    let prefix = collapsed[..keep].trim_end_matches('-');
    format!("{}-{}", prefix, &digest[..HASH_SUFFIX_LEN])
}
