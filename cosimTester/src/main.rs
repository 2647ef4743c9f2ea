use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use cosim_tests::{
    BackendSelector, HarnessConfig, Selection, Suite, TestError, TestRegistry, print_summary,
    suites,
};

#[derive(Parser, Debug)]
#[command(
    name = "runtests",
    version,
    about = "Build fixtures, run them on the simulator or emulator, and check the results"
)]
struct Cli {
    /// Tests to run; all registered tests when omitted.
    names: Vec<String>,
    /// Print the registered test names and exit.
    #[arg(short, long)]
    list: bool,
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    #[arg(long, value_name = "DIR")]
    bin_dir: Option<PathBuf>,
    #[arg(long, value_name = "DIR")]
    fixture_dir: Option<PathBuf>,
    #[arg(long, value_name = "DIR")]
    work_dir: Option<PathBuf>,
    /// Backend timeout in seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            log::error!("{err}");
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, TestError> {
    let mut config = HarnessConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.bin_dir {
        config.bin_dir = dir;
    }
    if let Some(dir) = cli.fixture_dir {
        config.fixture_dir = dir;
    }
    if let Some(dir) = cli.work_dir {
        config.work_dir = dir;
    }
    if let Some(secs) = cli.timeout {
        config.timeout_secs = secs;
    }

    let mut registry = TestRegistry::new();
    suites::register_all(&mut registry, &config)?;

    if cli.list {
        for case in registry.cases() {
            println!("{}", case.name);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let backends = BackendSelector::from_config(&config);
    let suite = Suite {
        registry: &registry,
        config: &config,
        backends: &backends,
    };
    let report = suite.run(&Selection::from_names(cli.names))?;
    print_summary(&report);
    Ok(ExitCode::from(report.exit_code() as u8))
}
