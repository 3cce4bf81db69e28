use mutator_prep::cancel::CancelToken;
use mutator_prep::checker::{CheckerLauncher, PassthroughLauncher, ProcessLauncher};
use mutator_prep::input::InputFiles;
use mutator_prep::instrumenter::{MutatorDescriptor, SwitchInstrumenter};
use mutator_prep::logging;
use mutator_prep::output;
use mutator_prep::pipeline::{self, PrepareError, PrepareOptions};
use mutator_prep::state::{self, PrepareSummary};

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use tracing::warn;

/// Exit code for a run stopped by Ctrl-C or SIGTERM.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "mutator-prep", version, about = "Prepare a project for mutation testing")]
struct Cli {
    /// Verbose logging (overridden by MUTATOR_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Instrument files, build the sandbox and start the checker pool
    Prepare {
        /// Project root
        #[arg(default_value = ".")]
        project: PathBuf,
        /// Files to mutate, relative to the project root
        #[arg(short, long, required = true, num_args = 1..)]
        mutate: Vec<Utf8PathBuf>,
        /// Checker command; it must print `ready` and answer JSON lines
        #[arg(long, env = "MUTATOR_CHECKER_CMD")]
        checker_cmd: Option<String>,
        /// Core count to size the checker pool from (default: detected)
        #[arg(long, env = "MUTATOR_CONCURRENCY")]
        concurrency: Option<usize>,
        /// Cores held back for test runners
        #[arg(long, default_value_t = mutator_prep::concurrency::DEFAULT_RESERVED_EXECUTION_CORES)]
        reserved_cores: usize,
        /// Directory sandboxes are created in, relative to the project root
        #[arg(long, env = "MUTATOR_TEMP_DIR", default_value = ".mutator-tmp")]
        temp_dir: PathBuf,
        /// Mutator families to enable (default: all)
        #[arg(long, value_delimiter = ',')]
        plugins: Vec<String>,
        /// Mutator names to skip
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,
        /// Seconds a checker has to report ready
        #[arg(long, default_value = "10")]
        handshake_timeout: u64,
        /// Do not link node_modules into the sandbox
        #[arg(long)]
        no_symlink: bool,
        /// Leave the sandbox on disk after the run
        #[arg(long)]
        keep_sandbox: bool,
        /// Session ID used in the sandbox directory name (default: auto-generated)
        #[arg(long)]
        session: Option<String>,
        /// Output JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
    /// Summary of the last prepare run
    Status {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let exit_code = match cli.command {
        Commands::Prepare {
            project,
            mutate,
            checker_cmd,
            concurrency,
            reserved_cores,
            temp_dir,
            plugins,
            exclude,
            handshake_timeout,
            no_symlink,
            keep_sandbox,
            session,
            json,
        } => {
            let project = match project.canonicalize() {
                Ok(p) if p.is_dir() => p,
                _ => {
                    output::print_error(&format!(
                        "Project directory not found: {}. Check the path and try again.",
                        project.display()
                    ));
                    process::exit(2);
                }
            };
            let descriptor = MutatorDescriptor {
                plugins,
                excluded_mutations: exclude,
            };
            let temp_dir = project.join(temp_dir);
            let temp_dir = temp_dir.canonicalize().unwrap_or(temp_dir);
            let mut options = PrepareOptions::new(temp_dir);
            options.concurrency = concurrency;
            options.reserved_cores = reserved_cores;
            options.sandbox.project_root = Some(project.clone());
            options.sandbox.symlink_node_modules = !no_symlink;
            if let Some(session) = session {
                options.sandbox.session = session;
            }
            let launcher: Arc<dyn CheckerLauncher> = match checker_cmd.as_deref().and_then(ProcessLauncher::from_command_line) {
                Some(l) => Arc::new(
                    l.working_dir(&project)
                        .handshake_timeout(Duration::from_secs(handshake_timeout)),
                ),
                None => Arc::new(PassthroughLauncher),
            };
            cmd_prepare(project, mutate, descriptor, launcher, options, keep_sandbox, json)
        }
        Commands::Status { json } => cmd_status(json),
    };

    process::exit(exit_code);
}

fn cmd_prepare(
    project: PathBuf,
    mutate: Vec<Utf8PathBuf>,
    descriptor: MutatorDescriptor,
    launcher: Arc<dyn CheckerLauncher>,
    options: PrepareOptions,
    keep_sandbox: bool,
    json_mode: bool,
) -> i32 {
    let cancel = CancelToken::new();
    install_interrupt_handler(&cancel);

    let skip_dirs = [options.sandbox.temp_dir.clone()];
    let input = match InputFiles::discover(&project, mutate, &skip_dirs) {
        Ok(i) => i,
        Err(e) => {
            output::print_error(&e.to_string());
            return 2;
        }
    };

    let start = Instant::now();
    let ctx = match pipeline::prepare(&input, &descriptor, &SwitchInstrumenter, launcher, &options, &cancel) {
        Ok(ctx) => ctx,
        Err(PrepareError::Cancelled) => {
            output::print_error("Interrupted; sandbox and checkers were cleaned up.");
            return EXIT_INTERRUPTED;
        }
        Err(e) => {
            output::print_prepare_error(&e);
            return 3;
        }
    };

    let mut summary = PrepareSummary::from_context(&ctx, &options.sandbox.session, start.elapsed().as_millis() as u64);

    if keep_sandbox {
        let (sandbox, _mutants, pool) = ctx.into_parts();
        pool.dispose();
        summary.sandbox = sandbox.persist().display().to_string();
        summary.sandbox_kept = true;
    } else if let Err(e) = ctx.dispose() {
        output::print_error(&e.to_string());
    }

    state::save_last_run(&summary);

    if json_mode {
        match serde_json::to_string(&summary) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                output::print_error(&format!("Failed to encode summary: {e}"));
                return 3;
            }
        }
    } else if summary.mutants == 0 {
        output::print_success("No mutable code found.");
    } else {
        output::print_summary(&summary);
    }
    0
}

/// The first interrupt cancels the run so it can clean up; a second one exits at once.
fn install_interrupt_handler(cancel: &CancelToken) {
    let cancel = cancel.clone();
    let installed = ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            process::exit(EXIT_INTERRUPTED);
        }
        warn!("interrupted, cleaning up");
        cancel.cancel();
    });
    if let Err(e) = installed {
        warn!(error = %e, "could not install the interrupt handler");
    }
}

fn cmd_status(json_mode: bool) -> i32 {
    match state::load_last_run() {
        Some(summary) => {
            if json_mode {
                match serde_json::to_string(&summary) {
                    Ok(s) => println!("{s}"),
                    Err(e) => {
                        output::print_error(&format!("Failed to encode summary: {e}"));
                        return 3;
                    }
                }
            } else {
                output::print_status(&summary);
            }
            0
        }
        None => {
            output::print_error("No previous run found. Run `mutator-prep prepare` first.");
            2
        }
    }
}
