/// Rough token count: one token per four bytes of UTF-8.
pub fn estimate_tokens(text: &str) -> i64 {
    (text.len() / 4) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_uses_byte_length() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 0);
        assert_eq!(estimate_tokens("Hello world"), 2);
        // "é" is two bytes
        assert_eq!(estimate_tokens("éééé"), 2);
    }
}
