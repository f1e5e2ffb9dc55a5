//! Overlapping word-window chunking for document ingestion.
//!
//! Documents are split on whitespace and emitted as fixed-size word windows
//! that overlap by a configured number of words, so a sentence cut at one
//! chunk boundary is still intact in the next.

use crate::error::StoreError;

/// Splits `text` into overlapping word windows of `chunk_size` words.
///
/// Consecutive chunks share exactly `overlap` words; the final chunk may be
/// shorter. The union of all chunks covers every word of the input in the
/// original order. A non-positive stride (`overlap >= chunk_size`) is a
/// configuration error and fails fast instead of looping.
pub fn chunk(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>, StoreError> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(StoreError::Configuration { chunk_size, overlap });
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let n = words.len();
    let stride = chunk_size - overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < n {
        let end = (start + chunk_size).min(n);
        let piece = words[start..end].join(" ");
        if !piece.trim().is_empty() {
            chunks.push(piece);
        }
        start += stride;
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_coverage_and_overlap() {
        // 1000 words, chunk 512, overlap 50 -> stride 462 -> 3 chunks
        let text = words(1000);
        let chunks = chunk(&text, 512, 50).unwrap();
        assert_eq!(chunks.len(), 3);

        assert!(chunks[0].starts_with("w0 "));
        assert!(chunks[0].ends_with(" w511"));
        assert!(chunks[1].starts_with("w462 "));
        assert!(chunks[1].ends_with(" w973"));
        assert!(chunks[2].starts_with("w924 "));
        assert!(chunks[2].ends_with(" w999"));

        // consecutive chunks share exactly `overlap` words
        let first: Vec<&str> = chunks[0].split(' ').collect();
        let second: Vec<&str> = chunks[1].split(' ').collect();
        assert_eq!(&first[462..], &second[..50]);
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk("only a few words here", 512, 50).unwrap();
        assert_eq!(chunks, vec!["only a few words here".to_string()]);
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        assert!(chunk("", 8, 2).unwrap().is_empty());
        assert!(chunk("   \n\t  ", 8, 2).unwrap().is_empty());
    }

    #[test]
    fn test_non_positive_stride_fails_fast() {
        assert!(matches!(
            chunk("a b c", 4, 4),
            Err(StoreError::Configuration { .. })
        ));
        assert!(matches!(
            chunk("a b c", 4, 9),
            Err(StoreError::Configuration { .. })
        ));
        assert!(matches!(
            chunk("a b c", 0, 0),
            Err(StoreError::Configuration { .. })
        ));
    }

    #[test]
    fn test_exact_multiple_boundary() {
        // 10 words, chunk 5, overlap 0 -> two exact chunks, no empty tail
        let text = words(10);
        let chunks = chunk(&text, 5, 0).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].ends_with("w9"));
    }
}
