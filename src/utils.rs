// src/utils.rs
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // A single enclosing ``` fence, optionally tagged with a language hint.
    static ref CODE_FENCE: Regex =
        Regex::new(r"(?s)^```(?:\w+)?\s*(.*?)\s*```$").expect("code fence regex");
}

const UPLOAD_MARKER_PREFIXES: [&str; 3] = [
    "uploaded airplane ticket:",
    "uploaded accommodation invoice:",
    "uploaded document:",
];

/// Strip one enclosing triple-backtick code fence from model output.
/// Idempotent: already-unfenced text passes through unchanged.
pub fn strip_code_fences(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return trimmed.to_string();
    }
    if let Some(caps) = CODE_FENCE.captures(trimmed) {
        if let Some(inner) = caps.get(1) {
            return inner.as_str().trim().to_string();
        }
    }
    content.to_string()
}

/// Synthetic messages recording a file upload block edit/regenerate.
pub fn is_upload_message(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    UPLOAD_MARKER_PREFIXES
        .iter()
        .any(|prefix| normalized.starts_with(prefix))
}

/// Trim free-text input, treating blank as absent.
pub fn normalize_optional(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tagged_fence() {
        assert_eq!(strip_code_fences("```html\n<p>hi</p>\n```"), "<p>hi</p>");
    }

    #[test]
    fn strips_untagged_fence() {
        assert_eq!(strip_code_fences("```\n<p>hi</p>\n```"), "<p>hi</p>");
    }

    #[test]
    fn unfenced_text_unchanged() {
        assert_eq!(strip_code_fences("<p>hi</p>"), "<p>hi</p>");
    }

    #[test]
    fn stripping_is_idempotent() {
        let once = strip_code_fences("```html\n<p>hi</p>\n```");
        assert_eq!(strip_code_fences(&once), once);
    }

    #[test]
    fn inner_fences_are_preserved() {
        // Only a single *enclosing* fence is removed.
        let text = "before\n```\ncode\n```\nafter";
        assert_eq!(strip_code_fences(text), text);
    }

    #[test]
    fn blank_input_stays_blank() {
        assert_eq!(strip_code_fences("   "), "");
    }

    #[test]
    fn detects_upload_markers() {
        assert!(is_upload_message("Uploaded airplane ticket: ba123.pdf"));
        assert!(is_upload_message("  UPLOADED ACCOMMODATION INVOICE: inv.pdf"));
        assert!(is_upload_message("Uploaded document: visa.png"));
        assert!(!is_upload_message("I uploaded a ticket yesterday"));
    }

    #[test]
    fn normalizes_blank_to_none() {
        assert_eq!(normalize_optional(Some("  Lisbon  ")), Some("Lisbon".to_string()));
        assert_eq!(normalize_optional(Some("   ")), None);
        assert_eq!(normalize_optional(None), None);
    }
}
