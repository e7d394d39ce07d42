//! Source-level flow graph extraction.
//!
//! Given a module in SSA form with per-instruction source locations, an [`ExtractionSession`]
//! recovers, for every function, a control-flow graph over source-line-named blocks, an
//! instruction-level data-flow graph, a def-use table keyed by source line, and a table
//! correlating callee formal parameters with the source variables feeding each call.
//!
//! [`ExtractionSession`]: session::ExtractionSession

pub mod block_naming;
pub mod call_correlation;
pub mod containers;
pub mod control_flow;
pub mod data_flow_graph;
pub mod def_use;
pub mod emit;
pub mod extraction_config;
pub mod il;
pub mod json_lifter;
pub mod location;
pub mod session;
pub mod variable_names;

pub mod log {
    pub use slog_scope::{crit, debug, error, info, trace, warn};

    use sloggers::types::{Format, OverflowStrategy, Severity};
    use sloggers::Build;

    /// Verbosity `0..=3` as a severity threshold; anything higher is trace
    fn severity(debug_level: usize) -> Severity {
        match debug_level {
            0 => Severity::Warning,
            1 => Severity::Info,
            2 => Severity::Debug,
            _ => Severity::Trace,
        }
    }

    /// Sends records to the terminal (stderr), and additionally as JSON to a file if one is given.
    /// With a file, only errors reach the terminal.
    pub struct FileAndTermDrain {
        file_drain: Option<slog::Logger>,
        term_drain: slog::Logger,
    }

    impl FileAndTermDrain {
        pub fn new(
            debug_level: usize,
            disable_terminal_logging: bool,
            force_block: bool,
            path: Option<std::path::PathBuf>,
        ) -> Result<slog::Logger, sloggers::Error> {
            let level = severity(debug_level);

            let term_drain = if disable_terminal_logging {
                sloggers::null::NullLoggerBuilder.build()?
            } else {
                sloggers::terminal::TerminalLoggerBuilder::new()
                    .destination(sloggers::terminal::Destination::Stderr)
                    .level(if path.is_none() { level } else { Severity::Error })
                    .overflow_strategy(if force_block || path.is_none() {
                        OverflowStrategy::Block
                    } else {
                        OverflowStrategy::DropAndReport
                    })
                    .format(Format::Compact)
                    .build()?
            };

            let file_drain = match path {
                Some(path) => Some(
                    sloggers::file::FileLoggerBuilder::new(path)
                        .truncate()
                        .level(level)
                        .overflow_strategy(OverflowStrategy::Block)
                        .format(Format::Json)
                        .build()?,
                ),
                None => None,
            };

            Ok(slog::Logger::root(
                Self {
                    file_drain,
                    term_drain,
                },
                slog::o!(),
            ))
        }
    }

    impl slog::Drain for FileAndTermDrain {
        type Ok = ();
        type Err = slog::Never;
        fn log(&self, r: &slog::Record<'_>, kv: &slog::OwnedKVList) -> Result<(), slog::Never> {
            if let Some(f) = &self.file_drain {
                <slog::Logger as slog::Drain>::log(f, r, kv)?;
            }
            <slog::Logger as slog::Drain>::log(&self.term_drain, r, kv)
        }
    }
}
