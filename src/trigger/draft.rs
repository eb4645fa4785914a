/// Number of leading chars two strings share.
pub fn common_prefix_chars(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

/// Chars `draft` adds beyond its common prefix with `previous`.
pub fn added_chars(previous: &str, draft: &str) -> usize {
    draft.chars().count() - common_prefix_chars(previous, draft)
}

/// An edit is significant when it adds at least `min_growth` chars past the
/// shared prefix with the previously improved draft.
pub fn is_significant_edit(previous: Option<&str>, draft: &str, min_growth: usize) -> bool {
    match previous {
        None => true,
        Some(previous) => added_chars(previous, draft) >= min_growth,
    }
}
