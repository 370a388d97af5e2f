//! # Utility Functions Module
//!
//! Helper minimali condivisi dal resto dell'applicazione.

/// Converts an iterable of string-like items to Vec<String>.
///
/// Eliminates repetitive `.to_string()` calls when building external
/// command argument vectors.
///
/// # Example
/// ```rust
/// use media_compressor::utils::to_string_vec;
///
/// let crf = 28.to_string();
/// let args = to_string_vec(["-crf", crf.as_str(), "-preset", "medium"]);
/// ```
pub fn to_string_vec<T, I>(items: I) -> Vec<String>
where
    T: ToString,
    I: IntoIterator<Item = T>,
{
    items.into_iter().map(|item| item.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_string_vec_string_literals() {
        let result = to_string_vec(["hello", "world"]);
        assert_eq!(result, vec!["hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn test_to_string_vec_mixed_types() {
        let crf = 28.to_string();
        let result = to_string_vec(["-crf", crf.as_str()]);
        assert_eq!(result, vec!["-crf".to_string(), "28".to_string()]);
    }

    #[test]
    fn test_to_string_vec_empty() {
        let result: Vec<String> = to_string_vec(Vec::<&str>::new());
        assert_eq!(result, Vec::<String>::new());
    }
}
