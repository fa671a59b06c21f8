//! Markdown chunking for long-form documentation.
//!
//! Block structure comes from `pulldown-cmark`. Cuts prefer heading
//! boundaries, then block starts, then sentence ends, then word starts,
//! choosing the candidate closest to the target size within the allowed band.
//! Code blocks (fenced or indented) are never cut. Sizes and offsets are in
//! bytes of the UTF-8 source.

use std::collections::BTreeMap;

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

use folio_core::config::ChunkingConfig;
use folio_graph::DocChunkNode;

const HEADING: u8 = 4;
const PARAGRAPH: u8 = 3;
const SENTENCE: u8 = 2;
const WORD: u8 = 1;

const MAX_TITLE_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub min_chars: usize,
    pub target_chars: usize,
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_chars: 300,
            target_chars: 800,
            max_chars: 1500,
            overlap_chars: 150,
        }
    }
}

impl From<&ChunkingConfig> for ChunkerConfig {
    fn from(c: &ChunkingConfig) -> Self {
        Self {
            min_chars: c.min_chars,
            target_chars: c.target_chars,
            max_chars: c.max_chars,
            overlap_chars: c.overlap_chars,
        }
    }
}

/// Provenance stamped on every chunk of one document.
#[derive(Debug, Clone)]
pub struct ChunkMetadata {
    pub source_uri: String,
    pub source_type: String,
    /// Raw key of the parent documentation node.
    pub parent_key: String,
}

/// Structural cut candidates of a document.
struct Layout {
    cuts: BTreeMap<usize, u8>,
    code_blocks: Vec<(usize, usize)>,
    headings: Vec<(usize, String)>,
}

impl Layout {
    fn scan(text: &str) -> Self {
        let mut cuts: BTreeMap<usize, u8> = BTreeMap::new();
        let mut code_blocks = Vec::new();
        let mut headings = Vec::new();
        let mut add = |pos: usize, score: u8| {
            let entry = cuts.entry(pos).or_insert(score);
            *entry = (*entry).max(score);
        };
        let mut heading: Option<(usize, String)> = None;

        for (event, range) in Parser::new_ext(text, Options::empty()).into_offset_iter() {
            match event {
                Event::Start(Tag::Heading { .. }) => {
                    let start = line_start(text, range.start);
                    add(start, HEADING);
                    heading = Some((start, String::new()));
                }
                Event::End(TagEnd::Heading(_)) => {
                    if let Some((start, title)) = heading.take() {
                        headings.push((start, title.trim().to_string()));
                    }
                }
                Event::Text(t) | Event::Code(t) => {
                    if let Some((_, title)) = heading.as_mut() {
                        title.push_str(&t);
                    }
                }
                Event::Start(Tag::CodeBlock(_)) => {
                    let start = line_start(text, range.start);
                    let end = past_newline(text, range.end);
                    add(start, PARAGRAPH);
                    add(end, PARAGRAPH);
                    code_blocks.push((start, end));
                }
                Event::Start(Tag::Paragraph) => {
                    add(line_start(text, range.start), PARAGRAPH);
                    let body = &text[range.clone()];
                    for (i, _) in body.match_indices('\n') {
                        if i + 1 < body.len() {
                            add(range.start + i + 1, SENTENCE);
                        }
                    }
                    for end in sentence_ends(body) {
                        add(range.start + end, SENTENCE);
                    }
                }
                Event::Start(Tag::Item | Tag::BlockQuote(_) | Tag::HtmlBlock) => {
                    add(line_start(text, range.start), PARAGRAPH);
                }
                _ => {}
            }
        }

        Self {
            cuts,
            code_blocks,
            headings,
        }
    }

    fn in_code(&self, pos: usize) -> bool {
        self.code_blocks.iter().any(|&(s, e)| s < pos && pos < e)
    }

    fn code_block_containing(&self, pos: usize) -> Option<(usize, usize)> {
        self.code_blocks.iter().copied().find(|&(s, e)| s < pos && pos < e)
    }

    /// Nearest heading at or before `pos`.
    fn heading_for(&self, pos: usize) -> Option<&str> {
        self.headings
            .iter()
            .take_while(|(start, _)| *start <= pos)
            .last()
            .map(|(_, title)| title.as_str())
    }
}

/// Start of the line holding `pos` when only indentation precedes it.
fn line_start(text: &str, pos: usize) -> usize {
    let start = text[..pos].rfind('\n').map_or(0, |i| i + 1);
    if text[start..pos].bytes().all(|b| b == b' ' || b == b'\t') {
        start
    } else {
        pos
    }
}

fn past_newline(text: &str, pos: usize) -> usize {
    if text[pos..].starts_with('\n') {
        pos + 1
    } else {
        pos
    }
}

/// Offsets within a paragraph where a new sentence starts.
fn sentence_ends(line: &str) -> Vec<usize> {
    let bytes = line.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if !matches!(bytes[i], b'.' | b'!' | b'?') {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < bytes.len() && matches!(bytes[j], b'"' | b'\'' | b')' | b']') {
            j += 1;
        }
        let ws_start = j;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        if j > ws_start && j < bytes.len() {
            out.push(j);
        }
        i = j.max(i + 1);
    }
    out
}

/// Splits markdown into overlapping, size-bounded chunks.
pub struct DocumentChunker {
    config: ChunkerConfig,
}

impl DocumentChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk a document. Blank input yields no chunks.
    ///
    /// Each chunk's content is `text[start_offset..end_offset]`. Chunk `i > 0`
    /// starts up to `overlap_chars` before the previous chunk's end, so dropping
    /// the first `prev.end_offset - start_offset` bytes of each chunk and
    /// concatenating reproduces `text`.
    pub fn chunk(&self, text: &str, meta: &ChunkMetadata) -> Vec<DocChunkNode> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let layout = Layout::scan(text);
        let bodies = self.split_bodies(text, &layout);

        let mut chunks = Vec::with_capacity(bodies.len());
        for (index, &(body_start, end)) in bodies.iter().enumerate() {
            let start = if index == 0 {
                body_start
            } else {
                self.overlap_start(text, body_start, bodies[index - 1].0)
            };
            let title = layout
                .heading_for(body_start)
                .map(str::to_string)
                .unwrap_or_else(|| infer_title(&text[start..end]));
            chunks.push(make_chunk(text, meta, index, start, end, title));
        }
        chunks
    }

    /// The whole document as a single chunk, for when chunking is disabled.
    pub fn single(&self, text: &str, meta: &ChunkMetadata) -> Vec<DocChunkNode> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let layout = Layout::scan(text);
        let title = layout
            .heading_for(0)
            .map(str::to_string)
            .unwrap_or_else(|| infer_title(text));
        vec![make_chunk(text, meta, 0, 0, text.len(), title)]
    }

    /// Non-overlapping body ranges that partition `text`.
    fn split_bodies(&self, text: &str, layout: &Layout) -> Vec<(usize, usize)> {
        let len = text.len();
        let c = &self.config;
        if len <= c.max_chars {
            return vec![(0, len)];
        }
        // Later chunks reserve room for the overlap prefix.
        let body_max = c.max_chars.saturating_sub(c.overlap_chars).max(c.min_chars);

        let mut bodies = Vec::new();
        let mut start = 0;
        while start < len {
            let limit = if bodies.is_empty() { c.max_chars } else { body_max };
            if len - start <= limit {
                bodies.push((start, len));
                break;
            }
            let cut = self.pick_cut(text, layout, start, limit);
            bodies.push((start, cut));
            start = cut;
        }
        bodies
    }

    fn pick_cut(&self, text: &str, layout: &Layout, start: usize, limit: usize) -> usize {
        let c = &self.config;
        let len = text.len();
        let bytes = text.as_bytes();

        let lo = start + c.min_chars.max(1);
        let mut hi = (start + limit).min(len.saturating_sub(c.min_chars));
        if hi < lo {
            hi = (start + limit).min(len - 1);
        }
        let target = (start + c.target_chars).clamp(lo, hi.max(lo));

        let better = |best: Option<(u8, usize)>, score: u8, pos: usize| match best {
            None => true,
            Some((s, p)) => score > s || (score == s && pos.abs_diff(target) < p.abs_diff(target)),
        };

        let mut best: Option<(u8, usize)> = None;
        for (&pos, &score) in layout.cuts.range(lo..=hi) {
            if !layout.in_code(pos) && better(best, score, pos) {
                best = Some((score, pos));
            }
        }
        if best.is_none() {
            for pos in lo..=hi {
                let word_start = bytes[pos - 1].is_ascii_whitespace()
                    && !bytes[pos].is_ascii_whitespace();
                if word_start && !layout.in_code(pos) && better(best, WORD, pos) {
                    best = Some((WORD, pos));
                }
            }
        }
        if let Some((_, pos)) = best {
            return pos;
        }

        // A code block spans the whole window: keep it intact.
        if let Some((_, block_end)) = layout.code_block_containing(lo) {
            return if len - block_end < c.min_chars {
                len
            } else {
                block_end
            };
        }

        // One unbroken token: cut at the nearest char boundary.
        let mut pos = target;
        while pos > start && (!text.is_char_boundary(pos) || layout.in_code(pos)) {
            pos -= 1;
        }
        if pos <= start {
            len
        } else {
            pos
        }
    }

    /// Start of the overlap prefix for a chunk whose body begins at `body_start`.
    fn overlap_start(&self, text: &str, body_start: usize, prev_body_start: usize) -> usize {
        let bytes = text.as_bytes();
        let lower = body_start
            .saturating_sub(self.config.overlap_chars)
            .max(prev_body_start);
        (lower..body_start)
            .find(|&p| {
                p > 0 && bytes[p - 1].is_ascii_whitespace() && !bytes[p].is_ascii_whitespace()
            })
            .unwrap_or(body_start)
    }
}

fn make_chunk(
    text: &str,
    meta: &ChunkMetadata,
    index: usize,
    start: usize,
    end: usize,
    title: String,
) -> DocChunkNode {
    DocChunkNode {
        content: text[start..end].to_string(),
        source_uri: meta.source_uri.clone(),
        source_type: meta.source_type.clone(),
        chunk_index: index,
        start_offset: start,
        end_offset: end,
        title,
        parent_key: meta.parent_key.clone(),
    }
}

/// First non-blank line, stripped of heading markers.
fn infer_title(content: &str) -> String {
    content
        .lines()
        .map(|l| l.trim().trim_start_matches('#').trim())
        .find(|l| !l.is_empty())
        .map(|l| l.chars().take(MAX_TITLE_CHARS).collect())
        .unwrap_or_default()
}
