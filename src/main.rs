use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;

mod classify;
mod convert;
mod exec;
mod modality;
mod report;
mod stages;

use exec::ShellRunner;
use stages::{FsMarkerStore, StageState};

#[derive(Parser)]
#[command(name = "mri-motion")]
#[command(about = "Convert raw MRI scanner output to NIfTI and extract subject motion parameters")]
#[command(version = "0.2.1")]
struct Cli {
    /// Data directory (defaults to the current directory)
    #[arg(short, long, default_value = ".")]
    directory: PathBuf,

    /// Skip the motion graph
    #[arg(long)]
    no_graph: bool,

    /// Treat the staging area as one series instead of per-modality subdirectories
    #[arg(short, long)]
    one_level_only: bool,

    /// Location of the dcm2nii converter binary
    #[arg(long, default_value = "/ccnc_bin/mricron/dcm2nii")]
    dcm2nii: PathBuf,

    /// Echo constructed external commands
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    run(&cli)
}

fn run(cli: &Cli) -> Result<()> {
    let root = cli.directory.as_path();
    if !root.is_dir() {
        bail!("Data directory does not exist: {:?}", root);
    }

    let runner = ShellRunner;
    let markers = FsMarkerStore;

    if classify::has_converted_volumes(root, cli.one_level_only)? {
        println!("✅ NIfTI volumes already present, skipping rearrange and conversion");
    } else {
        println!("📁 Dcm2nii conversion");
        classify::stage_raw_input(root)?;
        let groups = modality::resolve_groups(root, cli.one_level_only)?;
        let jobs = convert::build_jobs(&groups, &cli.dcm2nii);
        convert::convert_all(&jobs, &runner, cli.verbose)?;
    }

    let rest_dir = root.join(modality::DESIGNATED_MODALITY);
    let chain = stages::run_stage_chain(&rest_dir, &runner, &markers, cli.verbose);
    let failures = chain
        .iter()
        .filter(|execution| execution.state == StageState::Failed)
        .count();
    if failures > 0 {
        eprintln!("❌ {} correction stage(s) failed", failures);
    }

    if !cli.no_graph {
        println!("📈 Motion graph");
        let subject = report::derive_subject_id(root);
        match report::build_report(&rest_dir, &subject) {
            Ok(path) => println!("📄 Motion graph saved to {:?}", path),
            Err(e) => eprintln!("❌ Failed to build the motion graph: {:#}", e),
        }
    }

    Ok(())
}
