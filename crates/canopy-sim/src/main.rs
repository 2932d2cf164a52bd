mod radio;
mod report;
mod scenario;

use std::path::PathBuf;
use std::time::Duration;

use canopy_protocol::EvaluationPolicy;
use clap::{Parser, ValueEnum};
use scenario::{Failure, Ramp, Scenario};

#[derive(Parser)]
#[command(name = "canopy-sim", about = "Simulate a Canopy sensor mesh on a virtual clock")]
struct Cli {
    /// Number of nodes. Node 1 is the gateway.
    #[arg(short, long, default_value = "9")]
    nodes: u16,

    /// Grid width; nodes are laid out row by row.
    #[arg(long, default_value = "3")]
    columns: u16,

    /// Distance between grid neighbors.
    #[arg(long, default_value = "10.0")]
    spacing: f64,

    /// Radio range, same unit as spacing.
    #[arg(long, default_value = "15.0")]
    range: f64,

    /// Per-frame loss probability (0.0 to 1.0).
    #[arg(long, default_value = "0.0")]
    loss: f64,

    /// RNG seed for jitter, sensors and radio loss.
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Simulated duration in seconds.
    #[arg(short, long, default_value = "600")]
    duration: u64,

    /// Nodes running child aggregation (comma-separated ids).
    #[arg(long, value_delimiter = ',')]
    aggregators: Vec<u16>,

    /// Readings per child window on aggregating nodes.
    #[arg(long, default_value = "5")]
    window: usize,

    /// When aggregating nodes decide.
    #[arg(long, value_enum, default_value = "every-reading")]
    evaluation: Evaluation,

    /// Node whose readings start climbing (anomaly injection).
    #[arg(long)]
    ramp_node: Option<u16>,

    /// Seconds before the ramp starts.
    #[arg(long, default_value = "300")]
    ramp_after: u64,

    /// Node failures as NODE@SECONDS (comma-separated).
    #[arg(long, value_delimiter = ',')]
    fail: Vec<Failure>,

    /// Write the JSON report here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Compact JSON.
    #[arg(long)]
    compact: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Evaluation {
    EveryReading,
    Maintenance,
}

impl From<Evaluation> for EvaluationPolicy {
    fn from(e: Evaluation) -> Self {
        match e {
            Evaluation::EveryReading => EvaluationPolicy::EveryReading,
            Evaluation::Maintenance => EvaluationPolicy::Maintenance,
        }
    }
}

impl Cli {
    fn scenario(&self) -> Scenario {
        Scenario {
            nodes: self.nodes,
            columns: self.columns,
            spacing: self.spacing,
            range: self.range,
            loss: self.loss,
            seed: self.seed,
            duration: Duration::from_secs(self.duration),
            aggregators: self.aggregators.clone(),
            window_len: self.window,
            evaluation: self.evaluation.into(),
            ramp: self.ramp_node.map(|node| Ramp {
                node,
                after: Duration::from_secs(self.ramp_after),
            }),
            failures: self.fail.clone(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let scenario = cli.scenario();

    eprintln!("canopy-sim v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "{} nodes, {}s simulated, seed {}",
        scenario.nodes,
        scenario.duration.as_secs(),
        scenario.seed
    );

    // Virtual clock: timers fire as soon as every node is idle.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()?;
    let report = runtime.block_on(scenario::run(&scenario))?;

    let json = if cli.compact {
        serde_json::to_string(&report)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    match &cli.output {
        Some(path) => {
            std::fs::write(path, json)?;
            eprintln!("report written to {}", path.display());
        }
        None => println!("{json}"),
    }
    eprintln!("{}", report.summary());
    Ok(())
}
