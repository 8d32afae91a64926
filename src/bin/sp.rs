//! The station-process launcher: forks one OS process per station id (the
//! reference's `fork()`-per-SP model) and runs each station's command file
//! against the switch until it quits.

use argh::FromArgs;
use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult};
use std::fs::File;
use std::io::{BufRead, BufReader};
use switchsim::error::SpError;
use switchsim::sp::Station;

#[derive(FromArgs)]
/// station process launcher
struct CliArgs {
    /// switch address, host:port
    #[argh(positional)]
    addr: String,

    /// number of stations to launch
    #[argh(option, short = 'n', default = "1")]
    count: u32,

    /// command-file prefix; station id is appended (e.g. `commands` -> `commands0`).
    /// omit only when --count is 1, in which case station 0 reads stdin interactively.
    #[argh(option, long = "in")]
    input_prefix: Option<String>,

    /// log-file prefix; station id and `.log` are appended. Defaults to stdout.
    #[argh(option, long = "out")]
    output_prefix: Option<String>,

    /// enable verbose (debug-level) tracing
    #[argh(switch, short = 'd')]
    debugging: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: CliArgs = argh::from_env();

    if args.count == 0 {
        return Err("--count must be at least 1".into());
    }
    if args.input_prefix.is_none() && args.count != 1 {
        return Err("interactive input (no --in) is only valid with --count 1".into());
    }

    if args.count == 1 {
        return run_station(0, &args);
    }

    let mut children = Vec::with_capacity(args.count as usize);
    for id in 0..args.count {
        // Safety: no additional threads or tokio runtimes exist in this
        // process yet, so forking here is sound; each child immediately
        // builds its own single-threaded view of the world.
        match unsafe { fork() }? {
            ForkResult::Parent { child } => children.push(child),
            ForkResult::Child => {
                let result = run_station(id, &args);
                std::process::exit(if result.is_ok() { 0 } else { 1 });
            }
        }
    }
    for child in children {
        waitpid(child, None)?;
    }
    Ok(())
}

fn run_station(id: u32, args: &CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(id, args)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_station_async(id, args))
}

async fn run_station_async(id: u32, args: &CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let commands: Box<dyn BufRead + Send> = match &args.input_prefix {
        Some(prefix) => {
            let path = format!("{prefix}{id}");
            let file = File::open(&path).map_err(|e| SpError::CommandFileUnavailable(path, e))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    let station = Station::connect(args.addr.as_str(), id, args.count, commands).await?;
    station.run().await?;
    Ok(())
}

fn init_tracing(id: u32, args: &CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let level = if args.debugging {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    match &args.output_prefix {
        Some(prefix) => {
            let path = format!("{prefix}{id}.log");
            let file = File::create(&path).map_err(|e| SpError::LogFileUnavailable(path, e))?;
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(move || file.try_clone().expect("log file handle"))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_max_level(level).init();
        }
    }
    Ok(())
}
