
use fancy_regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Default maximum chunk length, in characters
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1000;

const PARAGRAPH_SEPARATOR: &str = "\n\n";

static LEADING_META_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*<meta[^>]*/?>\s*").expect("valid regex"));

/// `[![alt](img)](link)`, `![alt](url "title")` and raw `<img>` tags, in removal order
static IMAGE_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\[!\[.*?\]\(.*?\)\]\(.*?\)").expect("valid regex"),
        Regex::new(r"!\[.*?\]\(.*?\)").expect("valid regex"),
        Regex::new(r"<img[^>]*>").expect("valid regex"),
    ]
});

static BLANK_LINES_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

static HEADING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s").expect("valid regex"));

static PARAGRAPH_BREAK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\n+").expect("valid regex"));

/// Splits markdown note text into ordered, bounded-size chunks.
///
/// Sizes are measured in characters. Sections are cut at headings, oversized
/// sections are re-cut at blank lines, oversized paragraphs are hard-cut, and
/// finally neighbouring small chunks are merged back together. No chunk is
/// longer than `max_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_size: usize,
}

impl Default for Chunker {
    #[inline]
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_SIZE)
    }
}

impl Chunker {
    #[inline]
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
        }
    }

    /// Chunk `text`; the position in the returned vector is the chunk index.
    #[inline]
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let cleaned = clean_markup(text);
        let mut chunks = Vec::new();

        for section in split_sections(&cleaned) {
            let section = section.trim();
            if section.is_empty() {
                continue;
            }

            if char_len(section) <= self.max_size {
                chunks.push(section.to_string());
            } else {
                chunks.extend(self.split_by_paragraph(section));
            }
        }

        let merged = self.merge_small(chunks);
        debug!(
            "Split {} chars into {} chunks (max {})",
            char_len(text),
            merged.len(),
            self.max_size
        );
        merged
    }

    fn split_by_paragraph(&self, section: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut buffer = String::new();

        for paragraph in split_on(&PARAGRAPH_BREAK_REGEX, section) {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }

            let paragraph_len = char_len(paragraph);

            if paragraph_len > self.max_size {
                if !buffer.is_empty() {
                    result.push(std::mem::take(&mut buffer));
                }
                result.extend(hard_split(paragraph, self.max_size));
                continue;
            }

            if !buffer.is_empty() && self.joined_len(&buffer, paragraph_len) > self.max_size {
                result.push(std::mem::take(&mut buffer));
            }

            if !buffer.is_empty() {
                buffer.push_str(PARAGRAPH_SEPARATOR);
            }
            buffer.push_str(paragraph);
        }

        if !buffer.is_empty() {
            result.push(buffer);
        }
        result
    }

    fn merge_small(&self, chunks: Vec<String>) -> Vec<String> {
        let mut result = Vec::with_capacity(chunks.len());
        let mut buffer = String::new();

        for chunk in chunks {
            if buffer.is_empty() {
                buffer = chunk;
            } else if self.joined_len(&buffer, char_len(&chunk)) <= self.max_size {
                buffer.push_str(PARAGRAPH_SEPARATOR);
                buffer.push_str(&chunk);
            } else {
                result.push(std::mem::replace(&mut buffer, chunk));
            }
        }

        if !buffer.is_empty() {
            result.push(buffer);
        }
        result
    }

    /// Length of `buffer` after appending a separator and `next_len` more chars
    fn joined_len(&self, buffer: &str, next_len: usize) -> usize {
        char_len(buffer) + PARAGRAPH_SEPARATOR.len() + next_len
    }
}

/// Chunk with the default maximum size
#[inline]
pub fn split(text: &str) -> Vec<String> {
    Chunker::default().split(text)
}

/// Strip image markup and collapse runs of blank lines.
#[inline]
pub fn clean_markup(text: &str) -> String {
    let mut cleaned = LEADING_META_REGEX.replace(text, "").into_owned();
    for regex in IMAGE_REGEXES.iter() {
        cleaned = regex.replace_all(&cleaned, "").into_owned();
    }
    cleaned = BLANK_LINES_REGEX
        .replace_all(&cleaned, PARAGRAPH_SEPARATOR)
        .into_owned();
    cleaned.trim().to_string()
}

/// Sections begin at each line that starts with 1 to 6 `#` followed by whitespace.
fn split_sections(text: &str) -> Vec<&str> {
    let mut boundaries: Vec<usize> = HEADING_REGEX
        .find_iter(text)
        .filter_map(|found| found.ok())
        .map(|found| found.start())
        .filter(|&start| start > 0)
        .collect();
    boundaries.push(text.len());

    let mut sections = Vec::with_capacity(boundaries.len());
    let mut start = 0;
    for end in boundaries {
        sections.push(text.get(start..end).unwrap_or_default());
        start = end;
    }
    sections
}

fn split_on<'t>(regex: &Regex, text: &'t str) -> Vec<&'t str> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for found in regex.find_iter(text).filter_map(|found| found.ok()) {
        pieces.push(text.get(last..found.start()).unwrap_or_default());
        last = found.end();
    }
    pieces.push(text.get(last..).unwrap_or_default());
    pieces
}

/// Cut into slices of exactly `size` chars (the last may be shorter).
fn hard_split(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|slice| slice.iter().collect())
        .collect()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
