//! Content translation between platforms
//!
//! Pure text transformations applied before publishing: repairing links the
//! source platform displayed truncated, linking bare domains, enforcing the
//! destination character limit, and the normalized-text similarity used by
//! the duplicate guard.

use regex::{NoExpand, Regex};
use std::collections::HashSet;

use crate::types::Link;

/// Remove HTML tags and decode the handful of entities the destination
/// platform emits in status bodies.
pub fn strip_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
}

/// Collapse whitespace and case-fold for comparison.
pub fn normalize_text(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Token-overlap similarity between two normalized texts.
///
/// The overlap of the word sets divided by the size of the larger set, in
/// [0, 1]. Empty input on either side compares as 0.
pub fn token_similarity(a: &str, b: &str) -> f64 {
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();

    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let common = words_a.intersection(&words_b).count();
    let max_words = words_a.len().max(words_b.len());
    common as f64 / max_words as f64
}

/// Replace truncated link fragments in `text` with the full URLs carried in
/// the post's link metadata.
///
/// For each link, the first token matching its domain (with or without a
/// scheme, ending in `...`, `…`, or running to the next whitespace) is
/// replaced wholesale by the full URL. Because the scheme is part of the
/// match, the replacement can never produce a doubled prefix like
/// `https://https://`.
pub fn repair_links(text: &str, links: &[Link]) -> String {
    let mut content = text.to_string();

    for link in links {
        if link.url.is_empty() {
            continue;
        }

        let domain = match domain_of(&link.url) {
            Some(d) if !d.is_empty() => d,
            _ => continue,
        };

        let pattern = format!(r"(?:https?://)?{}[^\s]*", regex::escape(&domain));
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                tracing::warn!("Skipping link repair for {}: {}", link.url, e);
                continue;
            }
        };

        if re.is_match(&content) {
            content = re.replacen(&content, 1, NoExpand(&link.url)).into_owned();
            tracing::debug!("Replaced link fragment with full URL: {}", link.url);
        }
    }

    content
}

/// Prefix bare domains (`example.com/page`) with `https://` so they stay
/// clickable on the destination. Domains already preceded by a scheme are
/// left alone because the pattern requires a leading boundary.
pub fn link_bare_domains(text: &str) -> String {
    let re = Regex::new(r"(^|\s)([a-zA-Z0-9][a-zA-Z0-9-]*\.[a-zA-Z]{2,}\b(?:/\S*)?)")
        .expect("bare-domain pattern is valid");
    re.replace_all(text, "${1}https://${2}").into_owned()
}

/// Enforce the destination character limit.
///
/// When truncation would damage the post's trailing full link, the text is
/// shortened further so the complete URL survives after the ellipsis and the
/// post stays navigable. Counts characters, not bytes.
pub fn apply_character_limit(text: &str, limit: usize, links: &[Link]) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }

    // Prefer keeping the last full link intact when it would be cut off.
    if let Some(url) = links.iter().rev().map(|l| l.url.as_str()).find(|u| !u.is_empty()) {
        if let Some(byte_pos) = text.find(url) {
            let prefix_chars = text[..byte_pos].chars().count();
            let url_chars = url.chars().count();

            let survives_plain_cut = prefix_chars + url_chars <= limit.saturating_sub(3);
            if !survives_plain_cut && url_chars + 4 <= limit {
                let budget = limit - url_chars - 4; // room for "... " + url
                let head = cut_at_word_boundary(text, budget);
                return format!("{}... {}", head, url);
            }
        }
    }

    format!("{}...", cut_at_word_boundary(text, limit.saturating_sub(3)))
}

/// Truncate to at most `max_chars` characters, then back off to the last
/// space so words are not split.
fn cut_at_word_boundary(text: &str, max_chars: usize) -> String {
    let cut: String = text.chars().take(max_chars).collect();
    match cut.rfind(' ') {
        Some(pos) if pos > 0 => cut[..pos].to_string(),
        _ => cut,
    }
}

/// The host part of a URL, without scheme or path.
fn domain_of(url: &str) -> Option<String> {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    without_scheme
        .split('/')
        .next()
        .map(|host| host.to_string())
}
