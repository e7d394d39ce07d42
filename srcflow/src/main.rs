use srcflow::*;

use std::path::{Path, PathBuf};

use clap::Parser;

/// Extract source-level flow graphs from compiled modules
#[derive(Parser, Debug)]
#[clap(about, version, author)]
enum Args {
    /// Extract graphs and tables from a JSON module export
    Extract {
        /// Path to the module export, produced by the compiler driver
        module: PathBuf,
        /// Directory to write the graphs and tables into; created if missing
        #[clap(short, long, default_value = "./out-files")]
        output_dir: PathBuf,
        /// Disable terminal logging, even for high severity alerts. Strongly discouraged for normal
        /// use.
        #[clap(long)]
        debug_disable_terminal_logging: bool,
        /// Force blocking for terminal logging. If too many messages are being spewed the logger,
        /// by default, does not block, but instead dumps a dropped-messages alert. This option
        /// forces it to block and dump even if too many are being sent.
        #[clap(long)]
        debug_forced_blocking_terminal_logging: bool,
        /// Path to send log (as JSON) to
        ///
        /// Error or higher severity alerts will still continue being shown at stderr (in addition
        /// to being added to the log)
        #[clap(long = "--log")]
        log_file: Option<PathBuf>,
        /// Debug level (repeat for more: 0-warn, 1-info, 2-debug, 3-trace)
        #[clap(short, long, parse(from_occurrences))]
        debug: usize,
        /// Advanced configuration options to tweak the extraction behavior
        #[clap(short = 'Z', long, arg_enum)]
        advanced_config: Vec<extraction_config::CommandLineExtractionConfig>,
    },
}

/// Lift `module`, run one extraction pass over it, and emit everything into `output_dir`.
/// Artifacts that could not be written are logged but do not make this fail.
fn extract(
    module: &Path,
    output_dir: &Path,
    config: extraction_config::ExtractionConfig,
) -> Result<(), String> {
    let exported = std::fs::read_to_string(module)
        .map_err(|e| format!("Module export {} could not be read: {}", module.display(), e))?;
    let module = json_lifter::lift_from(&exported)?;

    let mut session = session::ExtractionSession::new(config);
    session.run(&module);
    let report = session.emit(output_dir);
    if !report.is_complete() {
        log::warn!("Some artifacts were not written"; "failed" => report.failed.len());
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    match args {
        Args::Extract {
            module,
            output_dir,
            debug_disable_terminal_logging,
            debug_forced_blocking_terminal_logging,
            log_file,
            debug,
            advanced_config,
        } => {
            let logger = match crate::log::FileAndTermDrain::new(
                debug,
                debug_disable_terminal_logging,
                debug_forced_blocking_terminal_logging,
                log_file,
            ) {
                Ok(logger) => logger,
                Err(e) => {
                    eprintln!("Could not set up logging: {}", e);
                    std::process::exit(2);
                }
            };

            let result = {
                let _log_guard = slog_scope::set_global_logger(logger);
                let result = extract(&module, &output_dir, advanced_config.into());
                if let Err(e) = &result {
                    log::crit!("Extraction failed"; "error" => e);
                }
                log::trace!("Done");
                result
            };
            if result.is_err() {
                std::process::exit(1);
            }
        }
    }
}
