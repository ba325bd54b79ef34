use anyhow::Context;
use clap::{Parser, ValueEnum};
use generator::profile::{write_synthetic_session, GeneratorConfig};
use lidarcore::config::AtmosphereSource;
use std::path::PathBuf;
use workflow::config::WorkflowConfig;
use workflow::runner::Runner;

mod generator;
mod handoff;
mod workflow;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Atmosphere {
    Standard,
    Sounding,
}

impl From<Atmosphere> for AtmosphereSource {
    fn from(value: Atmosphere) -> Self {
        match value {
            Atmosphere::Standard => AtmosphereSource::Standard,
            Atmosphere::Sounding => AtmosphereSource::Sounding,
        }
    }
}

#[derive(Parser)]
#[command(author, version, about = "Batch driver for the lidar processing chain")]
struct Args {
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    /// Folder holding one sub-folder per organized session [default: data]
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// [default: output]
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Molecular atmosphere source, overriding the workflow file
    #[arg(long, value_enum)]
    atmosphere: Option<Atmosphere>,
    #[arg(long)]
    sounding_dir: Option<PathBuf>,
    /// Parallel sessions, overriding the workflow file [default: 4]
    #[arg(long)]
    workers: Option<usize>,
    /// Generate one synthetic session into the data folder before processing
    #[arg(long, default_value_t = false)]
    synthetic: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut workflow_config = match args.workflow {
        Some(path) => WorkflowConfig::load(path)?,
        None => WorkflowConfig::default(),
    }
    .with_overrides(args.data_dir, args.output_dir, args.workers);
    if let Some(atmosphere) = args.atmosphere {
        workflow_config = workflow_config.with_atmosphere(atmosphere.into(), args.sounding_dir);
    } else if let Some(dir) = args.sounding_dir {
        workflow_config.pipeline.molecular.sounding_dir = dir;
    }

    if args.synthetic {
        let session = write_synthetic_session(
            &GeneratorConfig::default(),
            &workflow_config.pipeline.decoder,
            &workflow_config.data_dir,
        )
        .context("generating synthetic session")?;
        log::info!("synthetic session written to {}", session.display());
    }

    let summary = Runner::new(workflow_config).run()?;
    for report in &summary.sessions {
        println!(
            "{} -> frames {}, quarantined {}, rejected {}, glued {:?}, hand-offs {}",
            report.id,
            report.accepted_frames,
            report.quarantined_frames,
            report.rejected_frames,
            report.glued,
            report.handoffs.len()
        );
        for (wavelength, reason) in &report.wavelength_failures {
            println!("  {} nm skipped: {}", wavelength, reason);
        }
    }
    for (id, reason) in &summary.failures {
        println!("{} -> failed: {}", id, reason);
    }
    let metrics = summary.metrics;
    println!(
        "sessions processed {}, failed {}; frames corrected {}, quarantined {}",
        metrics.processed_sessions,
        metrics.failed_sessions,
        metrics.corrected_frames,
        metrics.quarantined_frames
    );
    Ok(())
}
