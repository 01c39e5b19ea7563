//! Structural pattern extraction
//!
//! A small declarative set of line-based matchers. Each matcher recognizes a
//! header line and the extractor works out the block extent from either
//! braces or indentation, so new shapes only need a new header pattern.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::store::PatternKind;

static FUNCTION_HEADERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        // def / fn / function / func, optionally pub/export/async, Go receivers
        r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:export\s+)?(?:async\s+)?(?:def|fn|function|func)\s+(?:\([^)]*\)\s*)?(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s*[(<]",
        // const handler = async (req) =>
        r"^\s*(?:export\s+)?(?:const|let)\s+(?P<name>[A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*(?:async\s*)?\([^)]*\)\s*=>",
    ])
});

static TYPE_HEADERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:export\s+)?(?:abstract\s+)?(?:class|struct|enum|trait|interface)\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)",
        r"^\s*type\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s+(?:struct|interface)\b",
    ])
});

static ERROR_HANDLING_HEADERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"^\s*try\s*(?::|\{|$)",
        r"^\s*if\s+let\s+Err\(",
        r"^\s*if\s+err\s*!=\s*nil\s*\{",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("structural matcher regex should compile"))
        .collect()
}

/// Coarse structural complexity of a fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityBucket {
    Low,
    Medium,
    High,
}

const BRANCH_KEYWORDS: &[&str] = &[
    "if", "elif", "else", "for", "while", "loop", "match", "case", "switch", "catch", "except",
];

impl ComplexityBucket {
    /// Branch count plus maximum nesting depth: ≤ 3 low, ≤ 8 medium.
    pub fn classify(body: &str) -> Self {
        let score = branch_count(body) + max_nesting(body);
        match score {
            0..=3 => Self::Low,
            4..=8 => Self::Medium,
            _ => Self::High,
        }
    }
}

impl std::fmt::Display for ComplexityBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

fn branch_count(body: &str) -> usize {
    let keywords = body
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|word| BRANCH_KEYWORDS.contains(word))
        .count();
    keywords + body.matches("&&").count() + body.matches("||").count()
}

fn indent_of(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// Deepest nesting below the fragment's own level, by braces or indentation
fn max_nesting(body: &str) -> usize {
    let mut depth: usize = 0;
    let mut max_brace: usize = 0;
    for c in body.chars() {
        match c {
            '{' => {
                depth += 1;
                max_brace = max_brace.max(depth);
            }
            '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }

    let indents: Vec<usize> = body
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(indent_of)
        .collect();
    let base = indents.iter().copied().min().unwrap_or(0);
    let max_indent = indents
        .iter()
        .map(|i| (i - base) / 4)
        .max()
        .unwrap_or(0);

    // The fragment's own body block is not nesting
    max_brace.saturating_sub(1).max(max_indent.saturating_sub(1))
}

/// A recognized block in source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub kind: PatternKind,
    pub name: String,
    pub body: String,
    /// Zero-based line index of the header
    pub start_line: usize,
}

/// Recognizes one structural shape
pub trait StructuralMatcher: Send + Sync {
    fn kind(&self) -> PatternKind;

    fn find(&self, lines: &[&str]) -> Vec<Fragment>;
}

/// Header regexes plus block-extent detection
pub struct HeaderMatcher {
    kind: PatternKind,
    headers: &'static [Regex],
}

impl HeaderMatcher {
    pub fn functions() -> Self {
        Self {
            kind: PatternKind::Function,
            headers: &FUNCTION_HEADERS,
        }
    }

    pub fn types() -> Self {
        Self {
            kind: PatternKind::Type,
            headers: &TYPE_HEADERS,
        }
    }

    pub fn error_handling() -> Self {
        Self {
            kind: PatternKind::ErrorHandling,
            headers: &ERROR_HANDLING_HEADERS,
        }
    }
}

impl StructuralMatcher for HeaderMatcher {
    fn kind(&self) -> PatternKind {
        self.kind
    }

    fn find(&self, lines: &[&str]) -> Vec<Fragment> {
        let mut fragments = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            let Some(caps) = self.headers.iter().find_map(|re| re.captures(line)) else {
                continue;
            };
            let name = caps
                .name("name")
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| format!("{}_line_{}", self.kind, index + 1));
            let end = block_end(lines, index);
            fragments.push(Fragment {
                kind: self.kind,
                name,
                body: lines[index..end].join("\n"),
                start_line: index,
            });
        }
        fragments
    }
}

const HEADER_LOOKAHEAD: usize = 5;

/// Exclusive end line of the block whose header is at `start`
fn block_end(lines: &[&str], start: usize) -> usize {
    let limit = (start + HEADER_LOOKAHEAD).min(lines.len());
    for i in start..limit {
        let line = lines[i];
        if line.contains('{') {
            return brace_block_end(lines, i);
        }
        if line.trim_end().ends_with(':') {
            return indent_block_end(lines, start, i);
        }
    }
    start + 1
}

fn brace_block_end(lines: &[&str], from: usize) -> usize {
    let mut depth: i64 = 0;
    for (i, line) in lines.iter().enumerate().skip(from) {
        for c in line.chars() {
            match c {
                '{' => depth += 1,
                '}' => depth -= 1,
                _ => {}
            }
        }
        if depth <= 0 {
            return i + 1;
        }
    }
    lines.len()
}

/// Indented body, plus sibling `except`/`finally`/`else`/`elif` clauses
fn indent_block_end(lines: &[&str], header: usize, colon_line: usize) -> usize {
    let base = indent_of(lines[header]);
    let mut end = colon_line + 1;
    let mut i = colon_line + 1;
    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();
        if trimmed.is_empty() {
            i += 1;
            continue;
        }
        let indent = indent_of(line);
        let is_clause = indent == base
            && ["except", "finally", "else", "elif"]
                .iter()
                .any(|kw| trimmed.starts_with(kw));
        if indent > base || is_clause {
            end = i + 1;
            i += 1;
        } else {
            break;
        }
    }
    end
}

/// A fragment classified and ready for storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPattern {
    pub kind: PatternKind,
    pub name: String,
    pub content: String,
    pub complexity: ComplexityBucket,
}

/// Runs every registered matcher over a piece of content
pub struct PatternExtractor {
    matchers: Vec<Box<dyn StructuralMatcher>>,
    /// Fragments shorter than this are ignored
    min_chars: usize,
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self {
            matchers: vec![
                Box::new(HeaderMatcher::functions()),
                Box::new(HeaderMatcher::types()),
                Box::new(HeaderMatcher::error_handling()),
            ],
            min_chars: 50,
        }
    }
}

impl PatternExtractor {
    pub fn new(matchers: Vec<Box<dyn StructuralMatcher>>, min_chars: usize) -> Self {
        Self {
            matchers,
            min_chars,
        }
    }

    pub fn with_matcher(mut self, matcher: Box<dyn StructuralMatcher>) -> Self {
        self.matchers.push(matcher);
        self
    }

    /// Zero or more patterns in source order
    pub fn extract(&self, content: &str) -> Vec<ExtractedPattern> {
        let lines: Vec<&str> = content.lines().collect();
        let mut fragments: Vec<Fragment> = self
            .matchers
            .iter()
            .flat_map(|m| m.find(&lines))
            .filter(|f| f.body.trim().len() >= self.min_chars)
            .collect();
        fragments.sort_by(|a, b| a.start_line.cmp(&b.start_line).then(a.kind.cmp(&b.kind)));
        fragments.dedup_by(|a, b| a.start_line == b.start_line && a.kind == b.kind);

        fragments
            .into_iter()
            .map(|f| ExtractedPattern {
                kind: f.kind,
                complexity: ComplexityBucket::classify(&f.body),
                name: f.name,
                content: f.body,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTHON: &str = r#"
import json

class ConfigLoader:
    def __init__(self, path):
        self.path = path

    def load(self):
        try:
            with open(self.path) as fh:
                return json.load(fh)
        except FileNotFoundError:
            return {}
        finally:
            self.loaded = True

def main():
    print(ConfigLoader("config.json").load())
"#;

    const RUST: &str = r#"
pub struct Bucket {
    tokens: u32,
    capacity: u32,
}

pub fn refill(bucket: &mut Bucket, amount: u32) -> u32 {
    if bucket.tokens + amount > bucket.capacity {
        bucket.tokens = bucket.capacity;
    } else {
        bucket.tokens += amount;
    }
    bucket.tokens
}
"#;

    #[test]
    fn test_python_shapes() {
        let found = PatternExtractor::default().extract(PYTHON);
        let names: Vec<(PatternKind, &str)> =
            found.iter().map(|p| (p.kind, p.name.as_str())).collect();

        assert!(names.contains(&(PatternKind::Type, "ConfigLoader")));
        assert!(names.contains(&(PatternKind::Function, "load")));
        assert!(names.contains(&(PatternKind::Function, "main")));

        let try_block = found
            .iter()
            .find(|p| p.kind == PatternKind::ErrorHandling)
            .unwrap();
        assert!(try_block.content.contains("except FileNotFoundError"));
        assert!(try_block.content.contains("finally"));
        assert!(!try_block.content.contains("def main"));
    }

    #[test]
    fn test_brace_shapes() {
        let found = PatternExtractor::default().extract(RUST);
        let refill = found.iter().find(|p| p.name == "refill").unwrap();
        assert_eq!(refill.kind, PatternKind::Function);
        assert!(refill.content.ends_with('}'));
        assert!(refill.content.contains("bucket.tokens\n}"));

        let bucket = found.iter().find(|p| p.name == "Bucket").unwrap();
        assert_eq!(bucket.kind, PatternKind::Type);
        assert!(!bucket.content.contains("refill"));
    }

    #[test]
    fn test_short_fragments_ignored() {
        let found = PatternExtractor::default().extract("fn a() {}\n");
        assert!(found.is_empty());
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let extractor = PatternExtractor::default();
        assert_eq!(extractor.extract(PYTHON), extractor.extract(PYTHON));
    }

    #[test]
    fn test_complexity_buckets() {
        assert_eq!(ComplexityBucket::classify("fn a() {\n    1\n}"), ComplexityBucket::Low);

        let medium = "fn a(x: i32) {\n    if x > 0 {\n        for i in 0..x {\n            if i % 2 == 0 && i > 2 {\n            }\n        }\n    }\n}";
        assert_eq!(ComplexityBucket::classify(medium), ComplexityBucket::Medium);

        let high = "def f(x):\n".to_string()
            + &"    if x:\n        if x:\n            if x:\n                while x:\n                    x -= 1\n".repeat(2);
        assert_eq!(ComplexityBucket::classify(&high), ComplexityBucket::High);
    }
}
