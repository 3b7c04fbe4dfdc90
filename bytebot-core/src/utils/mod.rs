//! Utility functions and helpers

/// Truncate a string to a maximum byte length, ensuring valid UTF-8 boundaries
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let mut end = max_len.saturating_sub(3);
        while !s.is_char_boundary(end) {
            end = end.saturating_sub(1);
        }
        format!("{}...", &s[..end])
    }
}

/// Lossy UTF-8 preview of a raw bus payload for log lines
pub fn payload_preview(payload: &[u8], max_len: usize) -> String {
    truncate(&String::from_utf8_lossy(payload), max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("test", 3), "...");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        // "é" is two bytes; cutting inside it must back off
        let s = "aé€bcdefgh";
        let out = truncate(s, 6);
        assert!(out.ends_with("..."));
        assert!(out.len() <= 6);
    }

    #[test]
    fn test_payload_preview_handles_invalid_utf8() {
        let preview = payload_preview(&[0xff, b'o', b'k'], 64);
        assert!(preview.ends_with("ok"));
    }
}
