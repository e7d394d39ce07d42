//! Resolve the source location an instruction originates from.

use crate::extraction_config::ExtractionConfig;
use crate::il::Instruction;

/// An in-scope source location: a file (reduced to its final path component) and a line.
///
/// Ordered by file, then numerically by line.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

impl std::fmt::Debug for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

impl serde::Serialize for SourceLocation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The outcome of resolving an instruction's location.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Resolution {
    /// A usable location
    InScope(SourceLocation),
    /// No debug entry, an empty file, or line `0`
    Undefined,
    /// The instruction originates from a library-internal file. Treated like
    /// [`Resolution::Undefined`] by every table and graph node, but kept apart since such
    /// instructions do not originate data-flow edges either.
    LibraryInternal,
}

impl Resolution {
    pub fn in_scope(&self) -> Option<&SourceLocation> {
        match self {
            Resolution::InScope(loc) => Some(loc),
            Resolution::Undefined | Resolution::LibraryInternal => None,
        }
    }

    pub fn is_library_internal(&self) -> bool {
        matches!(self, Resolution::LibraryInternal)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Resolution::InScope(loc) => write!(f, "{}", loc),
            Resolution::Undefined | Resolution::LibraryInternal => write!(f, "undefined"),
        }
    }
}

/// The final component of `path`, split on either kind of path separator
fn basename(path: &str) -> &str {
    match path.rfind(|c| c == '/' || c == '\\') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Resolves instruction locations. A pure function of the instruction's own debug entry, plus its
/// inlining parent when its own file is empty.
pub struct LocationResolver<'a> {
    config: &'a ExtractionConfig,
}

impl<'a> LocationResolver<'a> {
    pub fn new(config: &'a ExtractionConfig) -> Self {
        Self { config }
    }

    pub fn resolve(&self, insn: &Instruction) -> Resolution {
        let loc = match &insn.loc {
            Some(loc) => loc,
            None => return Resolution::Undefined,
        };
        let (file, line) = match &loc.inlined_at {
            Some(parent) if loc.file.is_empty() => (parent.file.as_str(), parent.line),
            _ => (loc.file.as_str(), loc.line),
        };
        if self.config.is_system_path(file) {
            return Resolution::LibraryInternal;
        }
        let file = basename(file);
        if file.is_empty() || line == 0 {
            Resolution::Undefined
        } else {
            Resolution::InScope(SourceLocation::new(file, line))
        }
    }
}
