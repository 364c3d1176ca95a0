use crate::error::ChunkingError;
use crate::models::{Chunk, Document, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};

/// Boundaries tried in order when a window has to be cut. Within one level the
/// latest eligible boundary wins.
const BOUNDARY_LEVELS: [&[&str]; 4] = [&["\n\n"], &["\n"], &[". ", "! ", "? "], &[" "]];

/// Sizes are counted in chars, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_CHUNK_SIZE,
            overlap_chars: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self, ChunkingError> {
        let config = Self {
            max_chars,
            overlap_chars,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChunkingError> {
        if self.max_chars == 0 || self.overlap_chars >= self.max_chars {
            return Err(ChunkingError::InvalidConfig {
                max_chars: self.max_chars,
                overlap_chars: self.overlap_chars,
            });
        }
        Ok(())
    }

    /// Shortest chunk a boundary cut may produce. Always leaves at least one
    /// fresh char past the overlap so the walk moves forward.
    fn min_cut(&self) -> usize {
        (self.overlap_chars + 1).max(self.max_chars / 2)
    }
}

/// Tidies text coming out of PDF extraction without destroying the paragraph
/// structure the chunker cuts on.
pub fn normalize_extracted_text(text: &str) -> String {
    let mut lines = Vec::new();
    let mut blank_run = 0usize;

    for raw_line in text.replace("\r\n", "\n").replace('\r', "\n").split('\n') {
        let line = raw_line
            .split(|c: char| c == ' ' || c == '\t' || c == '\u{a0}')
            .filter(|word| !word.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if line.is_empty() {
            blank_run += 1;
            if blank_run == 1 {
                lines.push(line);
            }
        } else {
            blank_run = 0;
            lines.push(line);
        }
    }

    lines.join("\n").trim().to_string()
}

/// Splits `text` into windows of at most `max_chars`, each one starting
/// `overlap_chars` before the end of the previous window.
pub fn chunk_text(text: &str, config: ChunkingConfig) -> Result<Vec<String>, ChunkingError> {
    config.validate()?;

    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    if chars.is_empty() {
        return Ok(pieces);
    }

    let mut start = 0;
    loop {
        let hard_end = (start + config.max_chars).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            find_cut(&chars, start, hard_end, config)
        };

        pieces.push(chars[start..end].iter().collect::<String>());

        if end == chars.len() {
            break;
        }
        start = end - config.overlap_chars;
    }

    Ok(pieces)
}

pub fn chunk_document(
    document: &Document,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, ChunkingError> {
    let chunks = chunk_text(&document.text, config)?
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk {
            document_id: document.document_id.clone(),
            index,
            text,
        })
        .collect();
    Ok(chunks)
}

fn find_cut(chars: &[char], start: usize, hard_end: usize, config: ChunkingConfig) -> usize {
    let floor = start + config.min_cut();

    for level in BOUNDARY_LEVELS {
        let best = level
            .iter()
            .filter_map(|separator| last_boundary(chars, floor, hard_end, separator))
            .max();
        if let Some(cut) = best {
            return cut;
        }
    }

    hard_end
}

/// Latest position in `floor..=hard_end` that directly follows `separator`.
fn last_boundary(chars: &[char], floor: usize, hard_end: usize, separator: &str) -> Option<usize> {
    let separator: Vec<char> = separator.chars().collect();
    let width = separator.len();
    if hard_end < width {
        return None;
    }

    (floor.max(width)..=hard_end)
        .rev()
        .find(|&cut| chars[cut - width..cut] == separator[..])
}
