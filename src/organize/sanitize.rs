//! Filename and directory-component sanitization.

use std::path::{Component, Path};

use url::Url;

/// Makes a filename safe to join onto a directory.
///
/// Replaces `/ \ : * ? " < > |` and control characters with `_`. Names that
/// would still resolve to `.`/`..` have their dots rewritten. Leading dots
/// are replaced so the result is never hidden or a traversal.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if !is_safe_segment(&sanitized) {
        return sanitized.replace('.', "_");
    }

    match sanitized.strip_prefix('.') {
        Some(rest) => format!("_{rest}"),
        None => sanitized,
    }
}

/// Sanitizes a directory component (conference, year, session, bucket).
///
/// Runs of anything but alphanumerics, `-`, `_` and `.` collapse into a single
/// `_`; surrounding underscores and dots are trimmed. Returns `fallback` when
/// nothing usable remains.
#[must_use]
pub fn sanitize_component(value: &str, fallback: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
            prev_sep = ch == '_';
        } else if !prev_sep {
            out.push('_');
            prev_sep = true;
        }
    }
    let trimmed = out.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() || !is_safe_segment(trimmed) {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Last path segment of `url`, percent-decoded. `None` for URLs without one.
#[must_use]
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
    Some(decoded)
}

fn is_safe_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename_replaces_reserved_chars() {
        assert_eq!(sanitize_filename("a/b.pdf"), "a_b.pdf");
        assert_eq!(sanitize_filename("a\\b.pdf"), "a_b.pdf");
        assert_eq!(sanitize_filename("a:b*c?.pdf"), "a_b_c_.pdf");
        assert_eq!(sanitize_filename("x<y>|z\".pdf"), "x_y__z_.pdf");
        assert_eq!(sanitize_filename("tab\there.pdf"), "tab_here.pdf");
    }

    #[test]
    fn test_sanitize_filename_neutralizes_traversal() {
        assert_eq!(sanitize_filename(".."), "__");
        assert_eq!(sanitize_filename("."), "_");
        assert_eq!(sanitize_filename("../../etc/passwd"), "_._.._etc_passwd");
        assert_eq!(sanitize_filename(".hidden.pdf"), "_hidden.pdf");
        assert_eq!(sanitize_filename(""), "_");
    }

    #[test]
    fn test_sanitize_filename_preserves_valid_names() {
        assert_eq!(sanitize_filename("MOPA001.pdf"), "MOPA001.pdf");
        assert_eq!(sanitize_filename("file (1).pdf"), "file (1).pdf");
        assert_eq!(sanitize_filename("日本語.pdf"), "日本語.pdf");
    }

    #[test]
    fn test_sanitize_component_collapses_and_falls_back() {
        assert_eq!(sanitize_component("IPAC", "x"), "IPAC");
        assert_eq!(sanitize_component("NA-PAC 2019", "x"), "NA-PAC_2019");
        assert_eq!(sanitize_component("a // b", "x"), "a_b");
        assert_eq!(sanitize_component("..", "unknown"), "unknown");
        assert_eq!(sanitize_component("   ", "unknown"), "unknown");
        assert_eq!(sanitize_component("../secret", "unknown"), "secret");
    }

    #[test]
    fn test_filename_from_url_decodes_last_segment() {
        assert_eq!(
            filename_from_url("https://proceedings.jacow.org/ipac2023/pdf/MOPA001.pdf"),
            Some("MOPA001.pdf".to_string())
        );
        assert_eq!(
            filename_from_url("https://example.org/files/IPAC%2023%20volume.pdf"),
            Some("IPAC 23 volume.pdf".to_string())
        );
        assert_eq!(filename_from_url("https://example.org/dir/"), None);
        assert_eq!(filename_from_url("nope"), None);
    }
}
