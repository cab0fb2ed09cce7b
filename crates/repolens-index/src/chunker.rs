//! Heuristic structural chunking with overlap and size bounds.
//!
//! Boundaries come from per-language line patterns checked against a naive
//! nesting depth (brace counting, or indentation for Python). Delimiters inside
//! strings and comments are counted too; the depth is an approximation.
//! Regions between boundaries are accumulated up to `max_chunk_size`; regions
//! that are too large on their own are re-split on control-flow cues and, as a
//! last resort, cut into line-aligned fixed-size windows.

use std::path::Path;

use repolens_memory::types::UnitType;
use serde::{Deserialize, Serialize};

use crate::languages::{self, DepthModel, Lang, Scope};

/// Re-split recursion limit before falling back to fixed windows.
const MAX_SPLIT_DEPTH: usize = 8;
const DEFAULT_INDENT_UNIT: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Upper bound on chunk content length, in characters.
    pub max_chunk_size: usize,
    /// Non-final chunks shorter than this are merged or dropped.
    pub min_chunk_size: usize,
    /// Fraction of a flushed chunk's trailing lines repeated at the start of the next.
    pub overlap_percent: f64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 4000,
            min_chunk_size: 200,
            overlap_percent: 0.08,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDescriptor {
    pub content: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub unit_type: UnitType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_name: Option<String>,
    pub chunk_index: usize,
    pub chunk_count: usize,
}

impl ChunkDescriptor {
    #[must_use]
    pub fn content_hash(&self) -> String {
        blake3_hex(&self.content)
    }
}

/// Split `source` into bounded chunks using the strategy for `path`'s extension.
#[must_use]
pub fn chunk_file(source: &str, path: &Path, config: &ChunkerConfig) -> Vec<ChunkDescriptor> {
    if source.trim().is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<&str> = source.split('\n').collect();
    // A trailing newline terminates the last line rather than opening a new one.
    if source.ends_with('\n') {
        lines.pop();
    }
    if source.chars().count() <= config.max_chunk_size {
        return vec![ChunkDescriptor {
            content: source.to_owned(),
            start_line: 1,
            end_line: lines.len(),
            unit_type: UnitType::Full,
            unit_name: None,
            chunk_index: 0,
            chunk_count: 1,
        }];
    }

    let lang = languages::detect_language(path);
    let mut builder = Builder::new(&lines, config, lang);
    match lang {
        Some(lang) => {
            for region in builder.regions(lang) {
                builder.push_region(region, 0);
            }
            builder.flush(true);
        }
        None => builder.fixed_windows(Draft::new(0, lines.len(), UnitType::Block, None)),
    }
    let drafts = builder.finish();
    tracing::debug!(
        path = %path.display(),
        language = lang.map_or("unknown", Lang::id),
        chunks = drafts.len(),
        "chunked file"
    );

    let count = drafts.len();
    drafts
        .into_iter()
        .enumerate()
        .map(|(i, d)| ChunkDescriptor {
            content: d.content.unwrap_or_else(|| lines[d.start..d.end].join("\n")),
            start_line: d.start + 1,
            end_line: d.end,
            unit_type: d.unit,
            unit_name: d.name,
            chunk_index: i,
            chunk_count: count,
        })
        .collect()
}

/// Half-open line range `[start, end)` awaiting emission.
#[derive(Debug, Clone)]
struct Draft {
    start: usize,
    end: usize,
    unit: UnitType,
    name: Option<String>,
    /// Set for slices of a single over-long line.
    content: Option<String>,
}

impl Draft {
    fn new(start: usize, end: usize, unit: UnitType, name: Option<String>) -> Self {
        Self {
            start,
            end,
            unit,
            name,
            content: None,
        }
    }
}

struct Builder<'a> {
    lines: &'a [&'a str],
    config: &'a ChunkerConfig,
    /// `prefix[i]` is the total char count of `lines[..i]`.
    prefix: Vec<usize>,
    /// Nesting depth at the start of each line; `None` for blank lines.
    depth: Vec<Option<usize>>,
    current: Option<Draft>,
    out: Vec<Draft>,
}

impl<'a> Builder<'a> {
    fn new(lines: &'a [&'a str], config: &'a ChunkerConfig, lang: Option<Lang>) -> Self {
        let mut prefix = Vec::with_capacity(lines.len() + 1);
        prefix.push(0);
        for line in lines {
            let last = prefix.last().copied().unwrap_or(0);
            prefix.push(last + line.chars().count());
        }
        let depth = match lang.map(Lang::depth_model) {
            Some(DepthModel::Indentation) => indentation_depths(lines),
            Some(DepthModel::Braces) | None => brace_depths(lines),
        };
        Self {
            lines,
            config,
            prefix,
            depth,
            current: None,
            out: Vec::new(),
        }
    }

    /// Character length of `lines[start..end]` joined with newlines.
    fn span(&self, start: usize, end: usize) -> usize {
        if end <= start {
            return 0;
        }
        self.prefix[end] - self.prefix[start] + (end - start - 1)
    }

    fn draft_len(&self, d: &Draft) -> usize {
        d.content
            .as_ref()
            .map_or_else(|| self.span(d.start, d.end), |c| c.chars().count())
    }

    fn max(&self) -> usize {
        self.config.max_chunk_size.max(1)
    }

    fn overlap_lines(&self, len: usize) -> usize {
        if len < 2 || self.config.overlap_percent <= 0.0 {
            return 0;
        }
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let n = (len as f64 * self.config.overlap_percent).ceil() as usize;
        n.min(len - 1)
    }

    /// Boundary-delimited regions covering every line of the file.
    fn regions(&self, lang: Lang) -> Vec<Draft> {
        let patterns = lang.boundary_patterns();
        let mut marks: Vec<(usize, UnitType, Option<String>)> = Vec::new();
        let mut in_type = false;

        for (i, line) in self.lines.iter().enumerate() {
            let Some(depth) = self.depth[i] else {
                continue;
            };
            let hit = patterns.iter().find_map(|p| {
                let allowed = match p.scope {
                    Scope::TopLevel => depth == 0,
                    Scope::InsideType => depth == 1 && in_type,
                };
                if allowed {
                    p.capture_name(line).map(|name| (p.unit, name))
                } else {
                    None
                }
            });
            if depth == 0 && !languages::is_attribute_line(line) {
                in_type = matches!(hit, Some((UnitType::Class, _)));
            }
            if let Some((unit, name)) = hit {
                let floor = marks.last().map_or(0, |m| m.0 + 1);
                marks.push((self.attribute_start(i, depth).max(floor), unit, name));
            }
        }

        if marks.first().is_none_or(|m| m.0 > 0) {
            marks.insert(0, (0, UnitType::Block, None));
        }
        marks.dedup_by_key(|m| m.0);

        let mut regions = Vec::with_capacity(marks.len());
        for (idx, (start, unit, name)) in marks.iter().enumerate() {
            let end = marks.get(idx + 1).map_or(self.lines.len(), |m| m.0);
            if end > *start {
                regions.push(Draft::new(*start, end, *unit, name.clone()));
            }
        }
        regions
    }

    /// Walk back over decorator/attribute lines directly above a boundary.
    fn attribute_start(&self, line: usize, depth: usize) -> usize {
        let mut start = line;
        while start > 0
            && self.depth[start - 1] == Some(depth)
            && languages::is_attribute_line(self.lines[start - 1])
        {
            start -= 1;
        }
        start
    }

    fn push_region(&mut self, region: Draft, level: usize) {
        if self.span(region.start, region.end) > self.max() {
            self.flush(false);
            self.split_oversized(region, level);
            return;
        }
        let Some(mut current) = self.current.take() else {
            self.current = Some(region);
            return;
        };
        if self.span(current.start, region.end) <= self.max() {
            current.end = region.end;
            if current.name.is_none() {
                current.name = region.name;
            }
            self.current = Some(current);
            return;
        }
        let mut seed = self.overlap_lines(current.end - current.start);
        while seed > 0 && self.span(current.end - seed, region.end) > self.max() {
            seed -= 1;
        }
        let seed_start = current.end - seed;
        self.emit(current, false);
        self.current = Some(Draft::new(seed_start, region.end, region.unit, region.name));
    }

    fn flush(&mut self, last: bool) {
        if let Some(current) = self.current.take() {
            self.emit(current, last);
        }
    }

    fn emit(&mut self, draft: Draft, last: bool) {
        let len = self.draft_len(&draft);
        if len == 0 || (!last && len < self.config.min_chunk_size) {
            tracing::trace!(start = draft.start, len, "dropping undersized chunk");
            return;
        }
        self.out.push(draft);
    }

    fn split_oversized(&mut self, region: Draft, level: usize) {
        if level >= MAX_SPLIT_DEPTH {
            self.fixed_windows(region);
            return;
        }
        let cuts = self.secondary_cuts(&region);
        if cuts.is_empty() {
            self.fixed_windows(region);
            return;
        }
        let mut bounds = Vec::with_capacity(cuts.len() + 2);
        bounds.push(region.start);
        bounds.extend(cuts);
        bounds.push(region.end);
        for (i, pair) in bounds.windows(2).enumerate() {
            let unit = if i == 0 { region.unit } else { UnitType::Block };
            self.push_region(
                Draft::new(pair[0], pair[1], unit, region.name.clone()),
                level + 1,
            );
        }
    }

    /// Cue lines at the shallowest nesting level that has any, excluding the
    /// region's first line.
    fn secondary_cuts(&self, region: &Draft) -> Vec<usize> {
        let inner = region.start + 1..region.end;
        let Some(top) = inner.clone().filter_map(|i| self.depth[i]).min() else {
            return Vec::new();
        };
        let deepest = inner.clone().filter_map(|i| self.depth[i]).max().unwrap_or(top);
        for level in top..=deepest {
            let cuts: Vec<usize> = inner
                .clone()
                .filter(|&i| {
                    self.depth[i] == Some(level) && languages::is_secondary_cue(self.lines[i])
                })
                .collect();
            if !cuts.is_empty() {
                return cuts;
            }
        }
        Vec::new()
    }

    /// Line-aligned windows of at most `max_chunk_size` with trailing overlap.
    fn fixed_windows(&mut self, region: Draft) {
        self.flush(false);
        let max = self.max();
        let mut start = region.start;
        let mut first = true;
        while start < region.end {
            if self.span(start, start + 1) > max {
                self.cut_long_line(start, &region);
                start += 1;
                first = false;
                continue;
            }
            let mut end = start + 1;
            while end < region.end && self.span(start, end + 1) <= max {
                end += 1;
            }
            if end == region.end && !first && self.span(start, end) < self.config.min_chunk_size {
                while start > region.start && self.span(start - 1, end) <= max {
                    start -= 1;
                }
            }
            let unit = if first { region.unit } else { UnitType::Block };
            self.out
                .push(Draft::new(start, end, unit, region.name.clone()));
            if end >= region.end {
                break;
            }
            let mut seed = self.overlap_lines(end - start);
            while seed > 0 && self.span(end - seed, end + 1) > max {
                seed -= 1;
            }
            start = end - seed;
            first = false;
        }
    }

    fn cut_long_line(&mut self, line: usize, region: &Draft) {
        let max = self.max();
        let chars: Vec<char> = self.lines[line].chars().collect();
        for piece in chars.chunks(max) {
            self.out.push(Draft {
                start: line,
                end: line + 1,
                unit: UnitType::Block,
                name: region.name.clone(),
                content: Some(piece.iter().collect()),
            });
        }
    }

    /// Drop blank drafts, then fold undersized non-final drafts into a neighbour.
    fn finish(mut self) -> Vec<Draft> {
        let mut drafts = std::mem::take(&mut self.out);
        drafts.retain(|d| match &d.content {
            Some(c) => !c.trim().is_empty(),
            None => self.lines[d.start..d.end].iter().any(|l| !l.trim().is_empty()),
        });

        let min = self.config.min_chunk_size;
        let max = self.max();
        let mut i = 0;
        while i + 1 < drafts.len() {
            if self.draft_len(&drafts[i]) >= min {
                i += 1;
                continue;
            }
            if let Some(merged) = self.merge(&drafts[i], &drafts[i + 1], max) {
                drafts[i + 1] = merged;
                drafts.remove(i);
                continue;
            }
            if i > 0
                && let Some(merged) = self.merge(&drafts[i - 1], &drafts[i], max)
            {
                drafts[i - 1] = merged;
            }
            drafts.remove(i);
        }
        drafts
    }

    fn merge(&self, a: &Draft, b: &Draft, max: usize) -> Option<Draft> {
        if a.content.is_some() || b.content.is_some() {
            return None;
        }
        let start = a.start.min(b.start);
        let end = a.end.max(b.end);
        if self.span(start, end) > max {
            return None;
        }
        let (unit, name) = if a.start <= b.start {
            (a.unit, a.name.clone().or_else(|| b.name.clone()))
        } else {
            (b.unit, b.name.clone().or_else(|| a.name.clone()))
        };
        Some(Draft::new(start, end, unit, name))
    }
}

fn brace_depths(lines: &[&str]) -> Vec<Option<usize>> {
    let mut depth: usize = 0;
    lines
        .iter()
        .map(|line| {
            let at_start = depth;
            for c in line.chars() {
                match c {
                    '{' => depth += 1,
                    '}' => depth = depth.saturating_sub(1),
                    _ => {}
                }
            }
            (!line.trim().is_empty()).then_some(at_start)
        })
        .collect()
}

fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { DEFAULT_INDENT_UNIT } else { 1 })
        .sum()
}

fn indentation_depths(lines: &[&str]) -> Vec<Option<usize>> {
    let unit = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| indent_width(l))
        .find(|&w| w > 0)
        .unwrap_or(DEFAULT_INDENT_UNIT);
    lines
        .iter()
        .map(|line| (!line.trim().is_empty()).then(|| indent_width(line) / unit))
        .collect()
}

pub(crate) fn blake3_hex(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use std::fmt::Write as _;

    use super::*;
    use proptest::prelude::*;

    fn config(max: usize, min: usize) -> ChunkerConfig {
        ChunkerConfig {
            max_chunk_size: max,
            min_chunk_size: min,
            overlap_percent: 0.08,
        }
    }

    fn rust_source(functions: usize, body_lines: usize) -> String {
        let mut s = String::from("use std::collections::HashMap;\n\n");
        for f in 0..functions {
            let _ = writeln!(s, "pub fn function_{f}(input: &str) -> usize {{");
            for l in 0..body_lines {
                let _ = writeln!(s, "    let value_{l} = input.len() * {l} + {f};");
            }
            s.push_str("    0\n}\n\n");
        }
        s
    }

    fn assert_dense(chunks: &[ChunkDescriptor]) {
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.chunk_count, chunks.len());
        }
    }

    fn assert_bounded(chunks: &[ChunkDescriptor], cfg: &ChunkerConfig) {
        let last = chunks.len().saturating_sub(1);
        for (i, c) in chunks.iter().enumerate() {
            let len = c.content.chars().count();
            assert!(len <= cfg.max_chunk_size, "chunk {i} has {len} chars");
            if i != last {
                assert!(len >= cfg.min_chunk_size, "chunk {i} has only {len} chars");
            }
        }
    }

    #[test]
    fn whitespace_only_file_yields_nothing() {
        assert!(chunk_file("  \n\t\n", Path::new("a.rs"), &ChunkerConfig::default()).is_empty());
        assert!(chunk_file("", Path::new("a.rs"), &ChunkerConfig::default()).is_empty());
    }

    #[test]
    fn small_file_is_single_full_chunk() {
        let source = "fn main() {\n    println!(\"hi\");\n}\n";
        let chunks = chunk_file(source, Path::new("src/main.rs"), &ChunkerConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, source);
        assert_eq!(chunks[0].unit_type, UnitType::Full);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].chunk_count, 1);
    }

    #[test]
    fn trailing_newline_does_not_add_a_line() {
        let source = "fn a() {}\nfn b() {}\nfn c() {}\n";
        let chunks = chunk_file(source, Path::new("src/abc.rs"), &ChunkerConfig::default());
        assert_eq!(chunks[0].end_line, 3);

        let source = rust_source(12, 20);
        let chunks = chunk_file(&source, Path::new("src/lib.rs"), &config(2000, 200));
        assert!(source.ends_with('\n'));
        assert_eq!(chunks.last().unwrap().end_line, source.lines().count());
    }

    #[test]
    fn rust_file_splits_on_functions() {
        let source = rust_source(12, 20);
        let cfg = config(2000, 200);
        let chunks = chunk_file(&source, Path::new("src/lib.rs"), &cfg);
        assert!(chunks.len() > 1);
        assert_dense(&chunks);
        assert_bounded(&chunks, &cfg);
        assert!(chunks.iter().any(|c| c.unit_name.as_deref() == Some("function_0")));
        assert!(chunks[1..].iter().all(|c| c.unit_type == UnitType::Function));
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let source = rust_source(12, 20);
        let cfg = config(2000, 200);
        let chunks = chunk_file(&source, Path::new("src/lib.rs"), &cfg);
        for pair in chunks.windows(2) {
            assert!(pair[1].start_line <= pair[0].end_line + 1);
        }
        assert!(
            chunks
                .windows(2)
                .any(|p| p[1].start_line <= p[0].end_line)
        );
    }

    #[test]
    fn line_numbers_match_content() {
        let source = rust_source(10, 15);
        let lines: Vec<&str> = source.split('\n').collect();
        let chunks = chunk_file(&source, Path::new("src/lib.rs"), &config(1500, 100));
        for c in &chunks {
            assert_eq!(c.content, lines[c.start_line - 1..c.end_line].join("\n"));
        }
    }

    #[test]
    fn python_methods_are_detected() {
        let mut source = String::from("import os\n\n\nclass Service:\n");
        for m in 0..8 {
            let _ = writeln!(source, "    def method_{m}(self, value):");
            for l in 0..10 {
                let _ = writeln!(source, "        total_{l} = value * {l} + {m}");
            }
            source.push_str("        return value\n\n");
        }
        let cfg = config(1200, 100);
        let chunks = chunk_file(&source, Path::new("svc.py"), &cfg);
        assert!(chunks.len() > 1);
        assert_bounded(&chunks, &cfg);
        assert_eq!(chunks[0].unit_type, UnitType::Block);
        assert!(chunks.iter().any(|c| c.unit_type == UnitType::Method));
    }

    #[test]
    fn oversized_function_resplits_on_control_flow() {
        let mut source = String::from("fn huge(x: u32) -> u32 {\n");
        for b in 0..30 {
            let _ = writeln!(source, "    if x == {b} {{");
            for l in 0..6 {
                let _ = writeln!(source, "        println!(\"branch {b} line {l}\");");
            }
            source.push_str("    }\n");
        }
        source.push_str("    x\n}\n");
        let cfg = config(1000, 100);
        let chunks = chunk_file(&source, Path::new("huge.rs"), &cfg);
        assert!(chunks.len() >= 3);
        assert_bounded(&chunks, &cfg);
        assert_eq!(chunks[0].unit_type, UnitType::Function);
        for c in &chunks {
            assert_eq!(c.unit_name.as_deref(), Some("huge"));
        }
        assert!(chunks[1..].iter().all(|c| c.unit_type == UnitType::Block));
    }

    #[test]
    fn unknown_extension_uses_fixed_windows() {
        let source: String = (0..400).map(|i| format!("line number {i}\n")).collect();
        let cfg = config(1000, 200);
        let chunks = chunk_file(&source, Path::new("notes.txt"), &cfg);
        assert!(chunks.len() >= 5);
        assert_dense(&chunks);
        assert_bounded(&chunks, &cfg);
        assert!(chunks.iter().all(|c| c.unit_type == UnitType::Block));
    }

    #[test]
    fn short_tail_window_extends_backwards() {
        let source: String = (0..101).map(|i| format!("{i:09}\n")).collect();
        let cfg = config(500, 200);
        let chunks = chunk_file(&source, Path::new("data.txt"), &cfg);
        let last = chunks.last().unwrap();
        assert!(last.content.chars().count() >= 200);
        assert!(last.content.chars().count() <= 500);
    }

    #[test]
    fn single_long_line_is_cut_by_characters() {
        let source = "x".repeat(10_000);
        let cfg = ChunkerConfig::default();
        let chunks = chunk_file(&source, Path::new("blob.min.js"), &cfg);
        assert_eq!(chunks.len(), 3);
        assert_dense(&chunks);
        assert_bounded(&chunks, &cfg);
        assert!(chunks.iter().all(|c| c.start_line == 1 && c.end_line == 1));
        let total: usize = chunks.iter().map(|c| c.content.len()).sum();
        assert_eq!(total, 10_000);
    }

    #[test]
    fn ten_thousand_char_file_gives_dense_bounded_chunks() {
        let mut source = String::new();
        let mut i = 0;
        while source.len() < 10_000 {
            let _ = writeln!(source, "function handler{i}(req, res) {{\n  return res.send({i});\n}}\n");
            i += 1;
        }
        source.truncate(10_000);
        let cfg = ChunkerConfig::default();
        let chunks = chunk_file(&source, Path::new("routes.js"), &cfg);
        assert!(chunks.len() >= 3);
        assert_dense(&chunks);
        assert_bounded(&chunks, &cfg);
    }

    #[test]
    fn braces_inside_strings_still_count() {
        let lines = ["let s = \"{\";", "fn inner() {}", "}"];
        let depths = brace_depths(&lines);
        assert_eq!(depths, vec![Some(0), Some(1), Some(1)]);
    }

    #[test]
    fn indentation_unit_is_inferred() {
        let lines = ["class A:", "  def f(self):", "    pass", "", "x = 1"];
        assert_eq!(
            indentation_depths(&lines),
            vec![Some(0), Some(1), Some(2), None, Some(0)]
        );
    }

    #[test]
    fn content_hash_is_stable() {
        let c = chunk_file("fn a() {}", Path::new("a.rs"), &ChunkerConfig::default());
        assert_eq!(c[0].content_hash(), blake3_hex("fn a() {}"));
        assert_eq!(c[0].content_hash().len(), 64);
    }

    proptest! {
        #[test]
        fn chunks_are_bounded_and_dense(
            lines in proptest::collection::vec("[ a-z{}():=;]{0,120}", 1..200),
            ext in prop_oneof![Just("rs"), Just("py"), Just("ts"), Just("txt")],
        ) {
            let source = lines.join("\n");
            let cfg = config(600, 60);
            let path = format!("file.{ext}");
            let chunks = chunk_file(&source, Path::new(&path), &cfg);
            if source.trim().is_empty() {
                prop_assert!(chunks.is_empty());
            } else if source.chars().count() <= cfg.max_chunk_size {
                prop_assert_eq!(chunks.len(), 1);
                prop_assert_eq!(&chunks[0].content, &source);
            }
            let last = chunks.len().saturating_sub(1);
            for (i, c) in chunks.iter().enumerate() {
                prop_assert_eq!(c.chunk_index, i);
                prop_assert_eq!(c.chunk_count, chunks.len());
                prop_assert!(c.content.chars().count() <= cfg.max_chunk_size);
                if i != last {
                    prop_assert!(c.content.chars().count() >= cfg.min_chunk_size);
                }
            }
        }
    }
}
