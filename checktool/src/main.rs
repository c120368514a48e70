use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use checktool::io::report_writer::JsonDestination;
use checktool::io::shell::PackageManagerChoice;
use checktool::io::target::Target;
use checktool::run::{CheckSource, Overrides};
use checktool::{cli, exit_codes, logging};

#[derive(Parser, Debug)]
#[command(
    name = "checktool",
    version,
    about = "Verify the state of a host against declarative checks"
)]
struct Cli {
    /// Debug-level tracing on stderr (RUST_LOG still wins).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate checks against a target and report.
    Run(RunArgs),
    /// Parse and validate checks without contacting a target.
    Validate(SourceArgs),
    /// Print the checks that would run.
    List(SourceArgs),
    /// Print the names of the built-in profiles.
    Profiles,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// TOML check file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Built-in profile (see `checktool profiles`).
    #[arg(short, long)]
    profile: Option<String>,
}

impl SourceArgs {
    fn source(&self) -> CheckSource {
        match (&self.config, &self.profile) {
            (Some(path), _) => CheckSource::Config(path.clone()),
            (None, Some(name)) => CheckSource::Profile(name.clone()),
            // clap's group guarantees one of the two.
            (None, None) => CheckSource::Profile(String::new()),
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// `local`, `ssh://[user@]host[:port]` or `container:<id>`.
    #[arg(short, long, default_value = "local")]
    target: Target,

    /// Write a JSON report to this path (`-` for stdout).
    #[arg(long)]
    json: Option<String>,

    /// Worker threads (0 = automatic).
    #[arg(long)]
    workers: Option<usize>,

    /// Per-assertion timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Whole-run timeout in seconds.
    #[arg(long)]
    run_timeout: Option<u64>,

    /// Retries for transient transport failures.
    #[arg(long)]
    retries: Option<u32>,

    /// Package manager on the target: auto, rpm or dpkg.
    #[arg(long, value_parser = parse_package_manager)]
    package_manager: Option<PackageManagerChoice>,

    /// Container client for `container:` targets (docker, podman).
    #[arg(long)]
    container_cli: Option<String>,
}

impl RunArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            workers: self.workers,
            assertion_timeout_secs: self.timeout,
            run_timeout_secs: self.run_timeout,
            retries: self.retries,
            package_manager: self.package_manager,
            container_cli: self.container_cli.clone(),
        }
    }
}

fn parse_package_manager(raw: &str) -> Result<PackageManagerChoice, String> {
    match raw {
        "auto" => Ok(PackageManagerChoice::Auto),
        "rpm" => Ok(PackageManagerChoice::Rpm),
        "dpkg" => Ok(PackageManagerChoice::Dpkg),
        other => Err(format!("expected auto, rpm or dpkg, got '{other}'")),
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match dispatch(cli.command) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(exit_codes::SETUP);
        }
    }
}

fn dispatch(command: Command) -> Result<i32> {
    match command {
        Command::Run(args) => {
            let json = args.json.as_deref().map(JsonDestination::parse);
            cli::run_target(
                &args.source.source(),
                &args.target,
                &args.overrides(),
                json.as_ref(),
            )
        }
        Command::Validate(args) => cli::validate(&args.source()).map(|()| exit_codes::OK),
        Command::List(args) => cli::list(&args.source()).map(|()| exit_codes::OK),
        Command::Profiles => {
            cli::list_profiles();
            Ok(exit_codes::OK)
        }
    }
}
