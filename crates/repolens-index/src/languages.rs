//! Language detection and per-language boundary patterns for the heuristic chunker.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use repolens_memory::types::UnitType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
}

/// How nesting depth is tracked for a language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthModel {
    Braces,
    Indentation,
}

/// Where a boundary pattern is allowed to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only at nesting depth 0.
    TopLevel,
    /// Only at depth 1 while inside a type-level unit.
    InsideType,
}

#[derive(Debug)]
pub struct BoundaryPattern {
    pub regex: Regex,
    pub unit: UnitType,
    pub scope: Scope,
}

impl BoundaryPattern {
    fn new(regex: &str, unit: UnitType, scope: Scope) -> Self {
        Self {
            regex: Regex::new(regex).unwrap(),
            unit,
            scope,
        }
    }

    /// Unit name from the first capture group, unless it is a control keyword.
    #[must_use]
    pub fn capture_name(&self, line: &str) -> Option<Option<String>> {
        let caps = self.regex.captures(line)?;
        let name = caps
            .get(1)
            .map(|m| m.as_str())
            .filter(|n| !n.is_empty());
        if name.is_some_and(|n| CONTROL_WORDS.contains(&n)) {
            return None;
        }
        if line
            .split_whitespace()
            .next()
            .is_some_and(|w| CONTROL_WORDS.contains(&w))
        {
            return None;
        }
        Some(name.map(str::to_owned))
    }
}

const CONTROL_WORDS: &[&str] = &[
    "if", "else", "for", "while", "switch", "catch", "return", "new", "throw", "do", "try",
];

static RUST_PATTERNS: LazyLock<Vec<BoundaryPattern>> = LazyLock::new(|| {
    let vis = r"(?:pub(?:\([^)]*\))?\s+)?";
    let func = format!(
        r#"^\s*{vis}(?:default\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+(\w+)"#
    );
    vec![
        BoundaryPattern::new(
            &format!(r"^\s*{vis}(?:unsafe\s+)?(?:struct|enum|trait|union)\s+(\w+)"),
            UnitType::Class,
            Scope::TopLevel,
        ),
        BoundaryPattern::new(
            r"^\s*(?:unsafe\s+)?impl\b(?:<[^>]*>)?\s+(?:[\w:<>, ]+\s+for\s+)?([\w:]+)",
            UnitType::Class,
            Scope::TopLevel,
        ),
        BoundaryPattern::new(&func, UnitType::Function, Scope::TopLevel),
        BoundaryPattern::new(&func, UnitType::Method, Scope::InsideType),
    ]
});

static PYTHON_PATTERNS: LazyLock<Vec<BoundaryPattern>> = LazyLock::new(|| {
    vec![
        BoundaryPattern::new(r"^class\s+(\w+)", UnitType::Class, Scope::TopLevel),
        BoundaryPattern::new(
            r"^(?:async\s+)?def\s+(\w+)",
            UnitType::Function,
            Scope::TopLevel,
        ),
        BoundaryPattern::new(
            r"^\s+(?:async\s+)?def\s+(\w+)",
            UnitType::Method,
            Scope::InsideType,
        ),
    ]
});

static SCRIPT_PATTERNS: LazyLock<Vec<BoundaryPattern>> = LazyLock::new(|| {
    vec![
        BoundaryPattern::new(
            r"^(?:export\s+)?(?:default\s+)?(?:declare\s+)?(?:abstract\s+)?(?:class|interface|enum)\s+(\w+)",
            UnitType::Class,
            Scope::TopLevel,
        ),
        BoundaryPattern::new(
            r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(\w*)",
            UnitType::Function,
            Scope::TopLevel,
        ),
        BoundaryPattern::new(
            r"^(?:export\s+)?(?:const|let|var)\s+(\w+)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\([^)]*\)|\w+)\s*(?::[^=]+)?=>",
            UnitType::Function,
            Scope::TopLevel,
        ),
        BoundaryPattern::new(
            r"^\s+(?:(?:public|private|protected|static|async|readonly|override|abstract|get|set)\s+)*\*?(\w+)\s*(?:<[^>]*>)?\s*\([^)]*\)\s*(?::\s*[^{]+)?\{",
            UnitType::Method,
            Scope::InsideType,
        ),
        BoundaryPattern::new(
            r"^(?:export\s+default|module\.exports\s*=)()",
            UnitType::Block,
            Scope::TopLevel,
        ),
    ]
});

static GO_PATTERNS: LazyLock<Vec<BoundaryPattern>> = LazyLock::new(|| {
    vec![
        BoundaryPattern::new(
            r"^type\s+(\w+)\s+(?:struct|interface)\b",
            UnitType::Class,
            Scope::TopLevel,
        ),
        BoundaryPattern::new(
            r"^func\s+\([^)]*\)\s+(\w+)",
            UnitType::Method,
            Scope::TopLevel,
        ),
        BoundaryPattern::new(r"^func\s+(\w+)", UnitType::Function, Scope::TopLevel),
    ]
});

static JAVA_PATTERNS: LazyLock<Vec<BoundaryPattern>> = LazyLock::new(|| {
    vec![
        BoundaryPattern::new(
            r"^\s*(?:(?:public|private|protected|abstract|final|static|sealed|non-sealed)\s+)*(?:class|interface|enum|record|@interface)\s+(\w+)",
            UnitType::Class,
            Scope::TopLevel,
        ),
        BoundaryPattern::new(
            r"^\s+(?:(?:public|private|protected|static|final|abstract|synchronized|native|default)\s+)*(?:<[^>]+>\s+)?[\w<>\[\],.? ]+\s+(\w+)\s*\(",
            UnitType::Method,
            Scope::InsideType,
        ),
    ]
});

/// Decorators and attributes that belong to the unit on the following line.
static ATTRIBUTE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:#\[|@[A-Za-z_])").unwrap());

/// Lines that open a conditional, loop, exception or switch block.
static SECONDARY_CUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:\}\s*)?(?:if|else|elif|for|foreach|while|loop|do|switch|match|select|case|try|catch|except|finally|with)\b",
    )
    .unwrap()
});

impl Lang {
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
            Self::Java => "java",
        }
    }

    #[must_use]
    pub fn depth_model(self) -> DepthModel {
        match self {
            Self::Python => DepthModel::Indentation,
            _ => DepthModel::Braces,
        }
    }

    /// Ordered boundary patterns; the first match on a line wins.
    #[must_use]
    pub fn boundary_patterns(self) -> &'static [BoundaryPattern] {
        match self {
            Self::Rust => &RUST_PATTERNS,
            Self::Python => &PYTHON_PATTERNS,
            Self::JavaScript | Self::TypeScript => &SCRIPT_PATTERNS,
            Self::Go => &GO_PATTERNS,
            Self::Java => &JAVA_PATTERNS,
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[must_use]
pub fn is_attribute_line(line: &str) -> bool {
    ATTRIBUTE_LINE.is_match(line)
}

#[must_use]
pub fn is_secondary_cue(line: &str) -> bool {
    SECONDARY_CUE.is_match(line)
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "rs" => Some(Lang::Rust),
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "tsx" | "mts" | "cts" => Some(Lang::TypeScript),
        "go" => Some(Lang::Go),
        "java" => Some(Lang::Java),
        _ => None,
    }
}
