/// Removes markup tags from a string.
///
/// Anything between `<` and the next `>` is dropped, matching how feed
/// descriptions embed presentation HTML around the text we want to keep.
/// An unterminated tag at the end of input is dropped entirely.
pub fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Trims and collapses runs of whitespace (including newlines) to single spaces.
pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = true; // leading whitespace is dropped
    for c in s.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Truncates a string to at most `max_chars` characters.
///
/// Operates on char boundaries, never bytes, so multi-byte text (the feed is
/// largely CJK) is cut cleanly. Returns the input unchanged when it fits.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte_end, _)) => s[..byte_end].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_tags_basic() {
        assert_eq!(strip_tags("<p>Hello <b>world</b></p>"), "Hello world");
        assert_eq!(strip_tags("no tags here"), "no tags here");
        assert_eq!(strip_tags(""), "");
    }

    #[test]
    fn test_strip_tags_unterminated() {
        assert_eq!(strip_tags("text <img src=\"x"), "text ");
    }

    #[test]
    fn test_strip_tags_attributes() {
        assert_eq!(
            strip_tags("<a href=\"https://example.com\">link</a> text"),
            "link text"
        );
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \n\t b   c  "), "a b c");
        assert_eq!(collapse_whitespace(""), "");
        assert_eq!(collapse_whitespace("   "), "");
        assert_eq!(collapse_whitespace("single"), "single");
    }

    #[test]
    fn test_truncate_chars_ascii() {
        assert_eq!(truncate_chars("hello world", 5), "hello");
        assert_eq!(truncate_chars("short", 500), "short");
        assert_eq!(truncate_chars("", 10), "");
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        // Each CJK char is 3 bytes; truncation must count chars, not bytes
        assert_eq!(truncate_chars("甲乙丙丁", 2), "甲乙");
        assert_eq!(truncate_chars("甲乙", 4), "甲乙");
    }

    #[test]
    fn test_truncate_chars_zero() {
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
