use crate::bench::{BenchmarkOpt, RunOpt};
use crate::stats::RunReport;
use crate::stores::StoreOpt;
use crate::workload::{KeyDistribution, WorkloadOpt};
use crate::Error;
use clap::ValueHint::FilePath;
use clap::{Args, Parser, Subcommand};
use figment::providers::Serialized;
use figment::Figment;
use log::{debug, error, warn};
use std::fs::read_to_string;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

/// Raised by Ctrl-C to end population or the measured window early.
static STOP: AtomicBool = AtomicBool::new(false);

#[derive(Args, Debug, Default)]
struct BenchArgs {
    #[arg(short = 'c')]
    #[arg(value_hint = FilePath)]
    #[arg(help = "Path to the run's TOML config file")]
    config: Option<String>,

    #[arg(long, help = "Registered name of the store")]
    store: Option<String>,

    #[arg(long, help = "Store host")]
    host: Option<String>,

    #[arg(long, help = "Store port")]
    port: Option<u16>,

    #[arg(long, help = "Logical database")]
    db: Option<i64>,

    #[arg(long, help = "Size of the key space")]
    n_keys: Option<usize>,

    #[arg(long, help = "Size of written values, in bytes")]
    value_size: Option<usize>,

    #[arg(long, help = "Probability that an operation is a read")]
    read_p: Option<f64>,

    #[arg(long, value_enum, help = "Key distribution")]
    distribution: Option<KeyDistribution>,

    #[arg(long, help = "Skew of the zipfian distribution")]
    zipf_s: Option<f64>,

    #[arg(long, conflicts_with = "ops", help = "Length of the measured window, in seconds")]
    duration: Option<f64>,

    #[arg(long, help = "Operations per worker, instead of a duration")]
    ops: Option<u64>,

    #[arg(long, help = "Pipeline depth")]
    pipeline: Option<usize>,

    #[arg(long, help = "Number of workers")]
    threads: Option<usize>,

    #[arg(long, help = "Populate even if the store looks warm (also FORCE_POPULATE=1)")]
    force_populate: bool,

    #[arg(long, help = "Seed of the random number generators")]
    seed: Option<u64>,

    #[arg(long, help = "Include the latency CDF in the report")]
    cdf: bool,

    #[arg(long, help = "Pretty-print the report")]
    pretty: bool,
}

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run a benchmark")]
    Bench(BenchArgs),
    #[command(about = "List all registered stores")]
    List,
}

impl BenchArgs {
    /// Options given on the command line. Absent ones are not serialized, so they do not
    /// override the file or the environment.
    fn overrides(&self) -> RunOpt {
        let force_env = std::env::var("FORCE_POPULATE").is_ok_and(|v| v == "1");
        RunOpt {
            store: StoreOpt {
                name: self.store.clone(),
                host: self.host.clone(),
                port: self.port,
                db: self.db,
                password: None,
                opt: toml::Table::new(),
            },
            benchmark: BenchmarkOpt {
                duration: self.duration,
                ops: self.ops,
                pipeline: self.pipeline,
                threads: self.threads,
                force_populate: (self.force_populate || force_env).then_some(true),
                populate_batch: None,
                seed: self.seed,
                cdf: self.cdf.then_some(true),
                workload: WorkloadOpt {
                    n_keys: self.n_keys,
                    value_size: self.value_size,
                    read_p: self.read_p,
                    distribution: self.distribution,
                    zipf_s: self.zipf_s,
                },
            },
        }
    }

    fn figment(&self) -> Result<Figment, Error> {
        let text = match self.config {
            Some(ref path) => read_to_string(path)?,
            None => String::new(),
        };
        Ok(crate::bench::figment(&text).merge(Serialized::defaults(self.overrides())))
    }
}

fn report_json(report: &RunReport, pretty: bool) -> Result<String, Error> {
    let json = match pretty {
        true => serde_json::to_string_pretty(report)?,
        false => serde_json::to_string(report)?,
    };
    Ok(json)
}

fn bench_cli(args: &BenchArgs) -> Result<(), Error> {
    let (store, config) = crate::bench::init(&args.figment()?)?;

    if let Err(e) = ctrlc::set_handler(|| {
        STOP.store(true, Ordering::Relaxed);
        debug!("SIGINT received, ending the run");
    }) {
        warn!("Cannot set Ctrl-C handler: {}", e);
    }

    let report = crate::bench::run(&*store, &config, &STOP)?;
    println!("{}", report_json(&report, args.pretty)?);
    Ok(())
}

fn list_cli() {
    for name in crate::stores::registered() {
        println!("Registered store: {}", name);
    }
}

/// The default command line interface.
///
/// This function is public and can be called in a different crate. For example, one can
/// integrate their own store by registering its constructor, then call this function from
/// `main` to get a binary with the same usage as the one in this crate.
///
/// ## Usage
///
/// ```bash
/// kvload -h
/// ```
///
/// The interface supports two modes, `bench` and `list`.
///
/// ### Benchmark Mode
///
/// Usage:
///
/// ```bash
/// kvload bench [-c <CONFIG>] [--host <HOST>] [--port <PORT>] [--n-keys <N>] ...
/// ```
///
/// Where `CONFIG` is the path to a TOML file, whose format is documented in [`crate::bench`].
/// Every option can also be given on the command line, which takes precedence over both the file
/// and the environment. Without any option, one minute of zipfian traffic is sent to a Redis
/// server on `127.0.0.1:6379`. The report is printed to stdout as JSON, see [`crate::stats`].
///
/// Pressing Ctrl-C ends population or the measured window early; the report is still printed.
///
/// ### List mode
///
/// Usage:
/// ``` bash
/// kvload list
/// ```
///
/// This command lists all registered stores' names.
///
/// ## Exit Status
///
/// 0 on success, 1 if the configuration is invalid or the store cannot be reached.
pub fn cmdline() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    debug!("Starting kvload with args: {:?}", cli);
    let result = match cli.command {
        Commands::Bench(args) => bench_cli(&args),
        Commands::List => {
            list_cli();
            Ok(())
        }
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
