//! The switch binary: listens for stations and arbitrates traffic between
//! them until every station has quit.

use argh::FromArgs;
use std::fs::File;
use switchsim::csp::Switch;
use switchsim::queue::{DATAQUEUESIZE, REQUESTQUEUESIZE};

#[derive(FromArgs)]
/// Communication switch process
struct CliArgs {
    /// TCP port to listen on
    #[argh(option, short = 'p')]
    port: u16,

    /// request queue capacity
    #[argh(option, default = "REQUESTQUEUESIZE")]
    request_queue_size: usize,

    /// data queue capacity
    #[argh(option, default = "DATAQUEUESIZE")]
    data_queue_size: usize,

    /// log-file path. Defaults to stdout.
    #[argh(option, long = "out")]
    out: Option<String>,

    /// enable verbose (debug-level) tracing
    #[argh(switch, short = 'd')]
    debugging: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: CliArgs = argh::from_env();

    let level = if args.debugging {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    match &args.out {
        Some(path) => {
            let file = File::create(path)?;
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(move || file.try_clone().expect("log file handle"))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_max_level(level).init();
        }
    }

    let switch = Switch::bind(
        ("0.0.0.0", args.port),
        args.request_queue_size,
        args.data_queue_size,
    )
    .await?;
    tracing::info!(addr = ?switch.local_addr()?, "listening");

    switch.run().await?;
    tracing::info!("simulation complete");
    Ok(())
}
