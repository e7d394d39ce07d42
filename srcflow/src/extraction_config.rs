//! Flags that can impact extraction.
//!
//! The configuration is owned by an [`ExtractionSession`](crate::session::ExtractionSession), so
//! two sessions in the same process may run with different settings.

/// What to do with basic blocks that contain no in-scope source line.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnnamedBlockPolicy {
    /// Leave the block unnamed and keep it out of the CFG. Edges through it are bridged, so that
    /// reachability between named blocks is preserved.
    Exclude,
    /// Name the block `<function>:%<index>` and keep it in the CFG.
    Fallback,
}

/// The configuration store for a single extraction session.
#[derive(Clone, Debug)]
pub struct ExtractionConfig {
    /// Path prefixes marking library-internal source files. Instructions located in such files are
    /// excluded from every table and from graph nodes.
    pub system_prefixes: Vec<String>,
    /// Function-name prefixes of runtime/sanitizer/allocator support functions; such functions are
    /// skipped entirely, including as call targets.
    pub blacklist_prefixes: Vec<String>,
    /// Suffixes the compiler appends to a parameter's name for its stack shadow. Stripped from
    /// variable names in emitted def-use tables.
    pub storage_shadow_suffixes: Vec<String>,
    pub unnamed_block_policy: UnnamedBlockPolicy,
    /// Cap on the length of a producer chain followed by the forward search.
    pub max_search_depth: usize,
    /// Describe the def/use of each line inside CFG node labels.
    pub cfg_node_descriptions: bool,
    /// Append the comma-joined operand variable names to DFG node labels.
    pub dfg_operand_names: bool,
    /// Overlay instruction-level control edges on the DFG.
    pub dfg_control_edges: bool,
    /// Append to `linecalls.txt` rather than truncating it.
    pub append_linecalls: bool,
}

impl ExtractionConfig {
    /// Whether the function named `name` is a runtime/sanitizer/allocator support function
    pub fn is_blacklisted(&self, name: &str) -> bool {
        self.blacklist_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }

    /// Whether `path` (as recorded by the compiler, before truncation) is a library-internal file
    pub fn is_system_path(&self, path: &str) -> bool {
        self.system_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// `name` with a storage-shadow suffix stripped, if it has one
    pub fn normalize_variable_name<'a>(&self, name: &'a str) -> &'a str {
        self.storage_shadow_suffixes
            .iter()
            .find_map(|suffix| name.strip_suffix(suffix.as_str()))
            .filter(|base| !base.is_empty())
            .unwrap_or(name)
    }
}

#[derive(clap::ArgEnum, Clone, Debug)]
/// Extraction configuration parameters
pub enum CommandLineExtractionConfig {
    ExcludeUnnamedBlocks,
    FallbackNameUnnamedBlocks,
    DisableCfgNodeDescriptions,
    EnableDfgOperandNames,
    EnableDfgControlEdges,
    TruncateLinecalls,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        ExtractionConfig {
            system_prefixes: vec!["/usr/".into()],
            blacklist_prefixes: [
                "asan.",
                "llvm.",
                "sancov.",
                "__ubsan_handle_",
                "free",
                "malloc",
                "calloc",
                "realloc",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            storage_shadow_suffixes: vec![".addr".into()],
            unnamed_block_policy: UnnamedBlockPolicy::Exclude,
            max_search_depth: 64,
            cfg_node_descriptions: true,
            dfg_operand_names: false,
            dfg_control_edges: false,
            append_linecalls: true,
        }
    }
}

impl From<Vec<CommandLineExtractionConfig>> for ExtractionConfig {
    fn from(v: Vec<CommandLineExtractionConfig>) -> Self {
        use CommandLineExtractionConfig::*;
        let mut r = ExtractionConfig::default();
        for v in v {
            match v {
                ExcludeUnnamedBlocks => {
                    r.unnamed_block_policy = UnnamedBlockPolicy::Exclude;
                }
                FallbackNameUnnamedBlocks => {
                    r.unnamed_block_policy = UnnamedBlockPolicy::Fallback;
                }
                DisableCfgNodeDescriptions => {
                    r.cfg_node_descriptions = false;
                }
                EnableDfgOperandNames => {
                    r.dfg_operand_names = true;
                }
                EnableDfgControlEdges => {
                    r.dfg_control_edges = true;
                }
                TruncateLinecalls => {
                    r.append_linecalls = false;
                }
            }
        }
        r
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn blacklist_matches_prefixes() {
        let c = ExtractionConfig::default();
        assert!(c.is_blacklisted("llvm.dbg.declare"));
        assert!(c.is_blacklisted("__ubsan_handle_add_overflow"));
        assert!(c.is_blacklisted("malloc"));
        // Prefix match, like the runtime list intends
        assert!(c.is_blacklisted("freeaddrinfo"));
        assert!(!c.is_blacklisted("main"));
        assert!(!c.is_blacklisted("func1"));
    }

    #[test]
    fn shadow_suffix_is_stripped() {
        let c = ExtractionConfig::default();
        assert_eq!(c.normalize_variable_name("p.addr"), "p");
        assert_eq!(c.normalize_variable_name("p"), "p");
        assert_eq!(c.normalize_variable_name(".addr"), ".addr");
    }

    #[test]
    fn command_line_toggles() {
        let c: ExtractionConfig = vec![
            CommandLineExtractionConfig::FallbackNameUnnamedBlocks,
            CommandLineExtractionConfig::EnableDfgOperandNames,
            CommandLineExtractionConfig::TruncateLinecalls,
        ]
        .into();
        assert_eq!(c.unnamed_block_policy, UnnamedBlockPolicy::Fallback);
        assert!(c.dfg_operand_names);
        assert!(!c.append_linecalls);
        assert!(c.cfg_node_descriptions);
    }
}
