//! certlane CLI
//!
//! Entry point for the `certlane` command-line tool.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use certlane::config::{user_config_path, EffectiveConfig, EngineConfig, PROJECT_CONFIG_FILE};
use certlane::model::{load_catalog_file, IoStream, JobDefinition, JobResult, Outcome};
use certlane::qualifier::CompositeQualifier;
use certlane::run::report;
use certlane::runner::{JobRunner, LineSink, OperatorDelegate, OperatorVerdict};
use certlane::signal::{SignalHandler, SignalState, EXIT_CODE_INTERRUPTED};
use certlane::{
    Error, FsProvider, MemoryProvider, ProviderRegistry, Qualifier, Result, SessionDriver,
    SessionState, SessionStorage, WhiteList,
};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Exit code when any job failed or crashed
const EXIT_CODE_FAILURES: i32 = 1;

/// Exit code for usage and setup errors
const EXIT_CODE_ERROR: i32 = 2;

#[derive(Parser)]
#[command(name = "certlane")]
#[command(about = "Hardware certification test lane", version)]
struct Cli {
    /// Provider directory (jobs/, data/whitelists/, scripts/); repeatable
    #[arg(long, short = 'p', global = true)]
    provider: Vec<PathBuf>,

    /// Extra job catalog file; repeatable
    #[arg(long, global = true)]
    jobs: Vec<PathBuf>,

    /// Project config file (default: ./certlane.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every known job
    List {
        /// Also print plugin and checksum
        #[arg(long, short = 'v')]
        verbose: bool,
    },

    /// Resolve a selection and report on it without running tests
    Analyze {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Run local jobs first so that the jobs they generate are known
        #[arg(long, short = 'l', conflicts_with = "skip_local")]
        run_local: bool,

        /// Do not run local jobs (default)
        #[arg(long, short = 'L')]
        skip_local: bool,

        /// Print general statistics
        #[arg(long, short = 's')]
        print_stats: bool,

        /// Print the dependency report
        #[arg(long, short = 'd')]
        print_dependency_report: bool,

        /// Print the interactivity report
        #[arg(long, short = 't')]
        print_interactivity_report: bool,

        /// Print the run list
        #[arg(long, short = 'r')]
        print_run_list: bool,
    },

    /// Execute the selected jobs
    Run {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Session title
        #[arg(long)]
        title: Option<String>,

        /// Resume the session stored in this directory
        #[arg(long, conflicts_with = "title")]
        resume: Option<PathBuf>,

        /// Do not echo job output to the terminal
        #[arg(long, short = 'q')]
        quiet: bool,
    },
}

#[derive(Args, Default)]
struct SelectionArgs {
    /// Include jobs matching the pattern; repeatable
    #[arg(long = "include-pattern", short = 'i', value_name = "PATTERN")]
    include: Vec<String>,

    /// Exclude jobs matching the pattern; repeatable
    #[arg(long = "exclude-pattern", short = 'x', value_name = "PATTERN")]
    exclude: Vec<String>,

    /// Include jobs listed in a whitelist (provider whitelist name or file)
    #[arg(long, short = 'w', value_name = "WHITELIST")]
    whitelist: Vec<String>,
}

impl SelectionArgs {
    fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty() && self.whitelist.is_empty()
    }

    /// Everything when no inclusive pattern or whitelist is given.
    fn qualifier(&self, registry: &ProviderRegistry) -> Result<Qualifier> {
        let mut inclusive = Vec::new();
        for pattern in &self.include {
            inclusive.push(Qualifier::regex(pattern)?);
        }
        for name in &self.whitelist {
            inclusive.push(Qualifier::from(find_whitelist(registry, name)?));
        }
        if inclusive.is_empty() {
            inclusive.push(Qualifier::regex(".*")?);
        }
        let exclusive = self
            .exclude
            .iter()
            .map(Qualifier::regex)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Qualifier::from(CompositeQualifier::new(inclusive, exclusive)))
    }
}

fn find_whitelist(registry: &ProviderRegistry, name: &str) -> Result<WhiteList> {
    if let Some(list) = registry.find_whitelist(name)? {
        return Ok(list);
    }
    let path = Path::new(name);
    if path.is_file() {
        return Ok(WhiteList::from_file(path)?);
    }
    Err(Error::Usage(format!("unknown whitelist '{}'", name)))
}

fn main() {
    let cli = Cli::parse();

    let overrides = cli
        .log_level
        .as_ref()
        .map(|level| serde_json::json!({ "log_level": level }));
    let project = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    let user = user_config_path();
    let effective = match EffectiveConfig::build(user.as_deref(), Some(project.as_path()), overrides)
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(EXIT_CODE_ERROR);
        }
    };
    let config = match effective.engine() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(EXIT_CODE_ERROR);
        }
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let result = match &cli.command {
        Commands::List { verbose } => run_list(&cli, &config, *verbose),
        Commands::Analyze {
            selection,
            run_local,
            skip_local: _,
            print_stats,
            print_dependency_report,
            print_interactivity_report,
            print_run_list,
        } => {
            let everything = !(*print_stats
                || *print_dependency_report
                || *print_interactivity_report
                || *print_run_list);
            run_analyze(
                &cli,
                &config,
                selection,
                *run_local,
                AnalyzeReports {
                    stats: everything || *print_stats,
                    dependencies: everything || *print_dependency_report,
                    interactivity: everything || *print_interactivity_report,
                    run_list: *print_run_list,
                },
            )
        }
        Commands::Run {
            selection,
            title,
            resume,
            quiet,
        } => run_session(
            &cli,
            &config,
            &effective,
            selection,
            title.clone(),
            resume.as_deref(),
            *quiet,
        ),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(EXIT_CODE_ERROR);
        }
    }
}

fn build_registry(cli: &Cli, config: &EngineConfig) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    for dir in config.provider_dirs.iter().chain(&cli.provider) {
        registry.add(FsProvider::open(dir)?);
    }
    for file in &cli.jobs {
        let jobs = load_catalog_file(file)?;
        registry.add(MemoryProvider::new(file.display().to_string()).with_jobs(jobs));
    }
    if registry.is_empty() {
        return Err(Error::Usage(
            "no job catalog given; use --provider DIR or --jobs FILE".to_string(),
        ));
    }
    Ok(registry)
}

fn new_session(registry: &ProviderRegistry, config: &EngineConfig) -> Result<SessionState> {
    let jobs = registry.load_jobs()?;
    Ok(SessionState::new(jobs)?.with_orphan_policy(config.orphan_policy))
}

fn runner(config: &EngineConfig, registry: &ProviderRegistry, io_log_dir: PathBuf) -> JobRunner {
    let mut runner_config = config.runner_config(io_log_dir);
    runner_config.path_prepend = registry.extra_path();
    runner_config.share_dir = registry.share_dir();
    JobRunner::new(runner_config)
}

fn run_list(cli: &Cli, config: &EngineConfig, verbose: bool) -> Result<i32> {
    let registry = build_registry(cli, config)?;
    let session = new_session(&registry, config)?;
    for job in session.job_list() {
        if verbose {
            println!(
                "{} ({}) {}",
                job.name(),
                job.plugin(),
                &job.checksum()[..12]
            );
        } else {
            println!("{}", job.name());
        }
    }
    Ok(0)
}

struct AnalyzeReports {
    stats: bool,
    dependencies: bool,
    interactivity: bool,
    run_list: bool,
}

fn run_analyze(
    cli: &Cli,
    config: &EngineConfig,
    selection: &SelectionArgs,
    run_local: bool,
    reports: AnalyzeReports,
) -> Result<i32> {
    let registry = build_registry(cli, config)?;
    let mut session = new_session(&registry, config)?;
    session.select(selection.qualifier(&registry)?);

    if run_local {
        let io_log_dir = std::env::temp_dir()
            .join("certlane-analyze")
            .join(session.session_id());
        std::fs::create_dir_all(&io_log_dir)?;
        let mut driver = SessionDriver::new(session, runner(config, &registry, io_log_dir));
        let summary = driver.run_local_jobs()?;
        info!(local_jobs = summary.results.len(), "local jobs finished");
        session = driver.into_session();
    }

    if reports.stats {
        print!("{}", report::general_stats(&session));
    }
    if reports.dependencies {
        print!("{}", report::dependency_report(session.problems()));
    }
    if reports.interactivity {
        print!("{}", report::interactivity_report(&session));
    }
    if reports.run_list {
        print!("{}", report::run_list_report(&session));
    }
    Ok(0)
}

fn run_session(
    cli: &Cli,
    config: &EngineConfig,
    effective: &EffectiveConfig,
    selection: &SelectionArgs,
    title: Option<String>,
    resume: Option<&Path>,
    quiet: bool,
) -> Result<i32> {
    let registry = build_registry(cli, config)?;
    let mut session = new_session(&registry, config)?;

    let storage = match resume {
        Some(dir) => {
            if !selection.is_empty() {
                warn!("selection options are ignored when resuming");
            }
            let storage = SessionStorage::open(dir)?;
            let snapshot = storage.load()?;
            let problems = session.resume(&snapshot)?;
            for problem in &problems {
                eprintln!(" * {}", problem);
            }
            info!(session = %session.session_id(), "session resumed");
            storage
        }
        None => {
            session.select(selection.qualifier(&registry)?);
            session.metadata_mut().title = title;
            let storage = SessionStorage::create(&config.session_root, session.session_id())?;
            info!(
                session = %session.session_id(),
                dir = %storage.dir().display(),
                "session created"
            );
            storage
        }
    };
    effective.write_to_file(&storage.dir().join("effective_config.json"))?;

    if !session.problems().is_empty() {
        print!("{}", report::dependency_report(session.problems()));
    }

    let signals = Arc::new(SignalState::new());
    SignalHandler::with_state(Arc::clone(&signals))
        .install()
        .map_err(|e| Error::Usage(format!("cannot install signal handler: {}", e)))?;

    let mut runner = runner(config, &registry, storage.io_log_dir())
        .with_cancel_flag(signals.cancel_flag())
        .with_delegate(Arc::new(ConsoleOperator));
    if !quiet {
        runner = runner.with_sink(Arc::new(ConsoleSink));
    }

    let session_dir = storage.dir().to_path_buf();
    let mut driver = SessionDriver::new(session, runner)
        .with_storage(storage)
        .with_signals(signals);
    let summary = driver.run_all()?;

    println!();
    print!("{}", summary);
    println!("Session directory: {}", session_dir.display());

    if summary.interrupted {
        Ok(EXIT_CODE_INTERRUPTED)
    } else if summary.is_success() {
        Ok(0)
    } else {
        Ok(EXIT_CODE_FAILURES)
    }
}

/// Echoes job output to the terminal.
struct ConsoleSink;

impl LineSink for ConsoleSink {
    fn line(&self, job: &str, stream: IoStream, line: &str) {
        match stream {
            IoStream::Stdout => println!("[{}] {}", job, line),
            IoStream::Stderr => eprintln!("[{}] {}", job, line),
        }
    }
}

/// Asks the operator on stdin.
struct ConsoleOperator;

impl ConsoleOperator {
    fn ask(prompt: &str) -> String {
        print!("{} ", prompt);
        let _ = io::stdout().flush();
        let mut answer = String::new();
        let _ = io::stdin().lock().read_line(&mut answer);
        answer.trim().to_lowercase()
    }

    fn describe(job: &JobDefinition) {
        println!();
        println!("=== {} ===", job.name());
        if let Some(description) = job.description() {
            println!("{}", description);
        }
    }

    fn verdict() -> OperatorVerdict {
        loop {
            match Self::ask("Outcome? [p]ass / [f]ail / [s]kip:").as_str() {
                "p" | "pass" => return OperatorVerdict::new(Outcome::Pass),
                "f" | "fail" => return OperatorVerdict::new(Outcome::Fail),
                "s" | "skip" | "" => return OperatorVerdict::new(Outcome::Skip),
                _ => continue,
            }
        }
    }
}

impl OperatorDelegate for ConsoleOperator {
    fn perform(&self, job: &JobDefinition) -> OperatorVerdict {
        Self::describe(job);
        Self::verdict()
    }

    fn interact(&self, job: &JobDefinition) -> bool {
        Self::describe(job);
        !matches!(Self::ask("Press enter to start, 's' to skip:").as_str(), "s" | "skip")
    }

    fn verify(&self, job: &JobDefinition, command_result: &JobResult) -> OperatorVerdict {
        Self::describe(job);
        println!("Command finished with outcome {}", command_result.outcome);
        Self::verdict()
    }
}
