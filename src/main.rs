//! Command-line driver running one sample through the analysis pipeline.
//! Run with `mutau -s DYJets -n ZTT -p /path/to/ntuples`.

use clap::Parser;
use indicatif::ProgressBar;
use mutau::{
    read_parquet,
    weights::{cross_section, CorrectionSet, LUMINOSITY},
    Pipeline, Process, SelectionCascade, Stage, WeightCalculator,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Events handed to the pipeline between progress updates.
const PROGRESS_STRIDE: usize = 8192;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Sample file stem to analyze; stems containing `Data` run unweighted.
    #[arg(short, long)]
    sample: String,
    /// Process name selecting the veto, stitching, and reweighting branches.
    #[arg(short, long)]
    name: String,
    /// Directory holding the input Parquet files.
    #[arg(short, long)]
    path: String,
    /// Systematic-shift label folded into the output name.
    #[arg(short = 'u', long)]
    syst: Option<String>,
    /// Suffix appended to the sample stem before the extension.
    #[arg(short = 'P', long, default_value = "")]
    postfix: String,
    /// Directory the run artifact is written to.
    #[arg(short, long, default_value = "output")]
    output_dir: String,
    /// JSON correction tables layered over the unit defaults.
    #[arg(short, long)]
    corrections: Option<String>,
    /// Cross section override in pb (defaults to the registered value).
    #[arg(long)]
    cross_section: Option<f64>,
    /// Generated-event count override (defaults to the file metadata).
    #[arg(long)]
    gen_count: Option<f64>,
    /// Number of worker threads (defaults to every available core).
    #[cfg(feature = "rayon")]
    #[arg(short, long)]
    threads: Option<usize>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mutau=info".parse()?))
        .init();
    #[cfg(feature = "rayon")]
    rayon::ThreadPoolBuilder::new()
        .num_threads(cli.threads.unwrap_or_else(num_cpus::get))
        .build_global()?;

    let is_data = cli.sample.contains("Data");
    let process = cli.name.parse::<Process>()?;

    let input = format!("{}/{}{}.parquet", cli.path, cli.sample, cli.postfix);
    info!("Loading {input}");
    let dataset = read_parquet(&input)?;
    info!("Read {} events", dataset.n_events());

    let norm = if is_data {
        1.0
    } else {
        let xs = match cli.cross_section {
            Some(xs) => xs,
            None => cross_section(&cli.sample)?,
        };
        let gen_count = match cli.gen_count {
            Some(count) => count,
            None => dataset.require_gen_count()?,
        };
        LUMINOSITY * xs / gen_count
    };

    let mut weights = if is_data {
        WeightCalculator::for_data()
    } else {
        WeightCalculator::for_simulation(process, norm)
    };
    if let Some(corrections) = &cli.corrections {
        weights = weights.with_corrections(&CorrectionSet::load(corrections)?)?;
    }

    let mut pipeline = Pipeline::new(SelectionCascade::new(process), weights);
    let progress = ProgressBar::new(dataset.n_events() as u64);
    for chunk in dataset.events.chunks(PROGRESS_STRIDE) {
        pipeline.run(chunk)?;
        progress.inc(chunk.len() as u64);
    }
    progress.finish_and_clear();

    let artifact = pipeline.finish()?;
    info!(
        "Selected {} events ({} in the control region)",
        artifact.cutflow.count(Stage::Separation),
        artifact.control_events
    );
    println!("{}", artifact.cutflow);

    std::fs::create_dir_all(&cli.output_dir)?;
    let systname = match cli.syst.as_deref() {
        Some(syst) if !syst.is_empty() => format!("_{syst}"),
        _ => String::new(),
    };
    let stem = if cli.name == cli.sample {
        format!("{}{}", cli.name, systname)
    } else {
        format!("{}_{}{}", cli.sample, cli.name, systname)
    };
    let output = format!("{}/{}_output.json", cli.output_dir, stem);
    artifact.save_as(&output)?;
    info!("Wrote {output}");
    Ok(())
}
