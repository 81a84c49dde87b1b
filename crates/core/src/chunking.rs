use crate::config::PipelineConfig;
use crate::error::IngestError;
use crate::models::{Chunk, Document};

/// Boundaries tried in order, largest first. The empty separator splits into
/// single characters and always succeeds.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl ChunkingConfig {
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self, IngestError> {
        if max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be greater than zero".to_string(),
            ));
        }
        if overlap_chars >= max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {overlap_chars} must be smaller than max size {max_chars}"
            )));
        }
        Ok(Self {
            max_chars,
            overlap_chars,
        })
    }
}

impl TryFrom<&PipelineConfig> for ChunkingConfig {
    type Error = IngestError;

    fn try_from(value: &PipelineConfig) -> Result<Self, Self::Error> {
        Self::new(value.chunk_size, value.chunk_overlap)
    }
}

/// Splits each document into overlapping windows, keeping document order and
/// the order of windows inside a document.
pub fn split_documents(documents: &[Document], config: ChunkingConfig) -> Vec<Chunk> {
    documents
        .iter()
        .flat_map(|document| {
            split_text(&document.content, config)
                .into_iter()
                .enumerate()
                .map(|(index, content)| Chunk::new(content, document.source.clone(), index))
                .collect::<Vec<_>>()
        })
        .collect()
}

pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    split_recursive(text, &DEFAULT_SEPARATORS, config)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn split_recursive(text: &str, separators: &[&str], config: ChunkingConfig) -> Vec<String> {
    // First separator that actually occurs; "" always does.
    let position = separators
        .iter()
        .position(|separator| separator.is_empty() || text.contains(separator))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(position).copied().unwrap_or("");
    let finer = separators.get(position + 1..).unwrap_or(&[]);

    let pieces: Vec<String> = if separator.is_empty() {
        text.chars().map(String::from).collect()
    } else {
        text.split(separator)
            .filter(|piece| !piece.is_empty())
            .map(str::to_string)
            .collect()
    };

    let mut chunks = Vec::new();
    let mut fitting: Vec<String> = Vec::new();

    for piece in pieces {
        if char_len(&piece) < config.max_chars {
            fitting.push(piece);
            continue;
        }

        if !fitting.is_empty() {
            chunks.extend(merge_pieces(&fitting, separator, config));
            fitting.clear();
        }

        if finer.is_empty() {
            chunks.push(piece);
        } else {
            chunks.extend(split_recursive(&piece, finer, config));
        }
    }

    if !fitting.is_empty() {
        chunks.extend(merge_pieces(&fitting, separator, config));
    }

    chunks
}

/// Greedily packs pieces into windows of at most `max_chars`, carrying the
/// trailing pieces (up to `overlap_chars`) into the next window.
fn merge_pieces(pieces: &[String], separator: &str, config: ChunkingConfig) -> Vec<String> {
    let separator_len = char_len(separator);
    let mut windows = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut total = 0usize;

    for piece in pieces {
        let piece_len = char_len(piece);
        let joiner = if current.is_empty() { 0 } else { separator_len };

        if total + piece_len + joiner > config.max_chars && !current.is_empty() {
            push_window(&mut windows, &current, separator);

            while total > config.overlap_chars
                || (total > 0
                    && total + piece_len + if current.is_empty() { 0 } else { separator_len }
                        > config.max_chars)
            {
                let Some(first) = current.first() else {
                    break;
                };
                let dropped = char_len(first) + if current.len() > 1 { separator_len } else { 0 };
                total = total.saturating_sub(dropped);
                current.remove(0);
            }
        }

        let joiner = if current.is_empty() { 0 } else { separator_len };
        current.push(piece);
        total += piece_len + joiner;
    }

    push_window(&mut windows, &current, separator);
    windows
}

fn push_window(windows: &mut Vec<String>, pieces: &[&str], separator: &str) {
    let joined = pieces.join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        windows.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig::new(max, overlap).expect("valid chunking config")
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        assert!(ChunkingConfig::new(10, 10).is_err());
        assert!(ChunkingConfig::new(0, 0).is_err());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = split_text("  A short requirement.  ", config(100, 10));
        assert_eq!(chunks, vec!["A short requirement.".to_string()]);
    }

    #[test]
    fn paragraphs_are_preferred_boundaries() {
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird paragraph here.";
        let chunks = split_text(text, config(50, 0));
        assert_eq!(
            chunks,
            vec![
                "First paragraph here.\n\nSecond paragraph here.".to_string(),
                "Third paragraph here.".to_string(),
            ]
        );
    }

    #[test]
    fn windows_respect_max_size_and_overlap() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";
        let chunks = split_text(text, config(20, 8));

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 20, "chunk too long: {chunk:?}");
        }
        for pair in chunks.windows(2) {
            let carried = pair[1].split(' ').next().unwrap_or_default();
            assert!(
                pair[0].split(' ').any(|word| word == carried),
                "expected {:?} to carry a word over from {:?}",
                pair[1],
                pair[0]
            );
        }
        assert_eq!(chunks[0], "alpha beta gamma");
        assert_eq!(chunks[1], "gamma delta epsilon");
    }

    #[test]
    fn unbroken_text_falls_back_to_characters() {
        let text = "x".repeat(45);
        let chunks = split_text(&text, config(20, 5));
        assert_eq!(
            chunks.iter().map(|chunk| chunk.len()).collect::<Vec<_>>(),
            vec![20, 20, 15]
        );
    }

    #[test]
    fn splitting_is_deterministic_and_ordered() {
        let documents = vec![
            Document::new("one two three four five six seven eight nine ten", "/data/a.txt"),
            Document::new("eleven twelve thirteen fourteen fifteen sixteen", "/data/b.txt"),
        ];
        let first = split_documents(&documents, config(18, 6));
        let second = split_documents(&documents, config(18, 6));

        assert_eq!(first, second);
        assert_eq!(first[0].source, "/data/a.txt");
        assert_eq!(first[0].chunk_index, 0);
        assert_eq!(first.last().map(|chunk| chunk.source.as_str()), Some("/data/b.txt"));
    }
}
