//! Markdown chunking with structure awareness
//!
//! Splits a document into chunks of at most `max_chars` bytes while:
//! - Preferring heading, then paragraph, then sentence boundaries
//! - Never breaking inside a code block when another break exists
//! - Carrying the heading path that applies at each chunk start

use crate::config::ChunkConfig;
use blake3::Hasher;
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};

/// Priority levels for break points
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum BreakPriority {
    Sentence = 1,
    Paragraph = 2,
    Heading = 3,
}

#[derive(Debug, Clone, Copy)]
struct BreakPoint {
    position: usize,
    priority: BreakPriority,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Heading {
    level: usize,
    text: String,
    position: usize,
}

/// A chunk of a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    /// 0-based position within the document
    pub index: usize,
    /// Heading path in effect where the chunk starts
    pub headings: Vec<String>,
    /// Blake3 hash of `text`
    pub hash: String,
}

/// Split markdown into chunks
pub fn chunk_markdown(text: &str, config: &ChunkConfig) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let (headings, code_blocks) = scan_markdown(text);
    let break_points = find_break_points(text, &headings, &code_blocks);
    let max_chars = config.max_chars.max(1);

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let target = start + max_chars;
        let end = if target >= text.len() {
            text.len()
        } else {
            find_best_break(text, start, target, &break_points)
        };

        let chunk_text = text[start..end].trim();
        if !chunk_text.is_empty() {
            chunks.push(TextChunk {
                text: chunk_text.to_string(),
                index: chunks.len(),
                headings: headings_at(&headings, start),
                hash: compute_text_hash(chunk_text),
            });
        }

        if end >= text.len() {
            break;
        }

        let overlapped = floor_boundary(text, end.saturating_sub(config.overlap_chars));
        start = if overlapped > start { overlapped } else { end };
    }

    chunks
}

/// Compute a stable hash for a string
pub fn compute_text_hash(text: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(text.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Collect heading positions and code block spans as byte offsets
fn scan_markdown(text: &str) -> (Vec<Heading>, Vec<(usize, usize)>) {
    let mut headings = Vec::new();
    let mut code_blocks = Vec::new();
    let mut current: Option<(usize, usize, String)> = None;

    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
    for (event, range) in Parser::new_ext(text, options).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                current = Some((heading_level(level), range.start, String::new()));
            }
            Event::Text(t) | Event::Code(t) => {
                if let Some((_, _, buf)) = current.as_mut() {
                    buf.push_str(&t);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((level, position, buf)) = current.take() {
                    let text = buf.trim();
                    if !text.is_empty() {
                        headings.push(Heading {
                            level,
                            text: text.to_string(),
                            position,
                        });
                    }
                }
            }
            // Start events span the whole block
            Event::Start(Tag::CodeBlock(_)) => code_blocks.push((range.start, range.end)),
            _ => {}
        }
    }

    (headings, code_blocks)
}

fn heading_level(level: HeadingLevel) -> usize {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

fn headings_at(headings: &[Heading], position: usize) -> Vec<String> {
    let mut stack: Vec<&Heading> = Vec::new();
    for heading in headings.iter().take_while(|h| h.position <= position) {
        while stack.last().is_some_and(|top| top.level >= heading.level) {
            stack.pop();
        }
        stack.push(heading);
    }
    stack.into_iter().map(|h| h.text.clone()).collect()
}

fn in_code_block(position: usize, code_blocks: &[(usize, usize)]) -> bool {
    code_blocks
        .iter()
        .any(|(start, end)| position > *start && position < *end)
}

fn find_break_points(
    text: &str,
    headings: &[Heading],
    code_blocks: &[(usize, usize)],
) -> Vec<BreakPoint> {
    let mut points: Vec<BreakPoint> = headings
        .iter()
        .filter(|h| h.position > 0)
        .map(|h| BreakPoint {
            position: h.position,
            priority: BreakPriority::Heading,
        })
        .collect();

    for (i, _) in text.match_indices("\n\n") {
        points.push(BreakPoint {
            position: i + 2,
            priority: BreakPriority::Paragraph,
        });
    }

    for pattern in [". ", ".\n", "? ", "! "] {
        for (i, _) in text.match_indices(pattern) {
            points.push(BreakPoint {
                position: i + pattern.len(),
                priority: BreakPriority::Sentence,
            });
        }
    }

    points.retain(|p| p.position < text.len() && !in_code_block(p.position, code_blocks));
    points.sort_by_key(|p| (p.position, std::cmp::Reverse(p.priority)));
    points.dedup_by_key(|p| p.position);
    points
}

/// Pick the end of a chunk starting at `start`, never past `target`
fn find_best_break(text: &str, start: usize, target: usize, break_points: &[BreakPoint]) -> usize {
    let window_start = start + (target - start) * 3 / 5;

    let best = break_points
        .iter()
        .filter(|p| p.position > window_start && p.position <= target)
        .max_by_key(|p| (p.priority, p.position));
    if let Some(point) = best {
        return point.position;
    }

    let limit = floor_boundary(text, target);
    let from = floor_boundary(text, window_start.min(limit));
    if let Some(space) = text[from..limit].rfind(' ') {
        let pos = from + space + 1;
        if pos > start {
            return pos;
        }
    }

    if limit > start {
        limit
    } else {
        ceil_boundary(text, start + 1)
    }
}

fn floor_boundary(text: &str, pos: usize) -> usize {
    let mut pos = pos.min(text.len());
    while !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

fn ceil_boundary(text: &str, pos: usize) -> usize {
    let mut pos = pos.min(text.len());
    while !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_chars: usize, overlap_chars: usize) -> ChunkConfig {
        ChunkConfig {
            max_chars,
            overlap_chars,
        }
    }

    #[test]
    fn test_chunk_short_document() {
        let chunks = chunk_markdown("This is a short document.", &config(500, 50));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "This is a short document.");
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_empty_document_has_no_chunks() {
        assert!(chunk_markdown("  \n\n ", &config(500, 50)).is_empty());
    }

    #[test]
    fn test_chunk_long_document_respects_max() {
        let text = "Lorem ipsum dolor sit amet. ".repeat(100);
        let chunks = chunk_markdown(&text, &config(300, 40));

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(chunk.text.len() <= 300);
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn test_prefers_heading_boundary() {
        let intro = "Intro sentence here. ".repeat(4);
        let text = format!("# Title\n\n{}\n\n## Setup\n\nInstall it.", intro);
        let chunks = chunk_markdown(&text, &config(100, 0));

        assert_eq!(chunks.len(), 2);
        let setup = chunks
            .iter()
            .find(|c| c.text.starts_with("## Setup"))
            .expect("a chunk should start at the Setup heading");
        assert_eq!(setup.headings, vec!["Title", "Setup"]);
        assert_eq!(chunks[0].headings, vec!["Title"]);
    }

    #[test]
    fn test_heading_path_pops_siblings() {
        let (headings, _) = scan_markdown("# A\n## B\ntext\n## C\n### D\n# E\n");
        let pos_d = headings.iter().find(|h| h.text == "D").unwrap().position;
        let pos_e = headings.iter().find(|h| h.text == "E").unwrap().position;

        assert_eq!(headings_at(&headings, pos_d), vec!["A", "C", "D"]);
        assert_eq!(headings_at(&headings, pos_e), vec!["E"]);
    }

    #[test]
    fn test_hash_in_code_is_not_a_heading() {
        let (headings, blocks) = scan_markdown("# Real\n```sh\n# comment\n```\n");
        assert_eq!(headings.len(), 1);
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn test_setext_heading_and_indented_code() {
        let text = "Guide\n=====\n\nIntro text.\n\n    # not a heading, indented code\n\nSetup\n-----\n\nMore.\n";
        let (headings, blocks) = scan_markdown(text);

        let names: Vec<&str> = headings.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(names, vec!["Guide", "Setup"]);
        assert_eq!(headings[0].level, 1);
        assert_eq!(headings[1].level, 2);
        assert_eq!(headings[0].position, 0);
        assert_eq!(blocks.len(), 1);

        let indented = text.find("# not").unwrap();
        assert!(blocks[0].0 <= indented && indented < blocks[0].1);
    }

    #[test]
    fn test_inline_code_is_kept_in_heading_text() {
        let (headings, _) = scan_markdown("## The `sync` command ##\n\nBody.\n");
        assert_eq!(headings[0].text, "The sync command");
    }

    #[test]
    fn test_multibyte_text_is_split_on_char_boundaries() {
        let text = "日本語のテキスト".repeat(50);
        let chunks = chunk_markdown(&text, &config(100, 10));
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| !c.text.is_empty()));
    }

    #[test]
    fn test_chunk_hash_stability() {
        let a = chunk_markdown("Test content for hashing.", &config(500, 50));
        let b = chunk_markdown("Test content for hashing.", &config(500, 50));
        assert_eq!(a[0].hash, b[0].hash);
        assert_ne!(a[0].hash, compute_text_hash("different content"));
    }
}
