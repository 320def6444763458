use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::exec::CommandRunner;
use crate::modality::{ModalityGroup, first_raw_file};

/// The unit of parallelism: one converter invocation with its own output
/// directory, safe to execute with zero coordination between jobs.
pub struct ConversionJob {
    pub group: String,
    pub out_dir: PathBuf,
    pub input: PathBuf,
    pub command: String,
}

pub fn build_jobs(groups: &[ModalityGroup], converter: &Path) -> Vec<ConversionJob> {
    let mut jobs = Vec::new();

    for group in groups {
        if let Err(e) = fs::create_dir_all(&group.out_dir) {
            eprintln!("❌ Failed to create output directory {:?}: {}", group.out_dir, e);
            continue;
        }
        let Some(input) = first_raw_file(&group.source) else {
            eprintln!("❌ No raw series files under {:?}, skipping {}", group.source, group.name);
            continue;
        };
        let command = format!(
            "{} -o {} {}",
            converter.display(),
            group.out_dir.display(),
            input.display()
        );
        jobs.push(ConversionJob {
            group: group.name.clone(),
            out_dir: group.out_dir.clone(),
            input,
            command,
        });
    }

    jobs
}

pub fn convert_all(jobs: &[ConversionJob], runner: &dyn CommandRunner, verbose: bool) -> Result<()> {
    if jobs.is_empty() {
        println!("\tNothing to convert");
        return Ok(());
    }

    let progress_bar = ProgressBar::new(jobs.len() as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );

    // One pool per run; dropping it after the barrier shuts the workers down.
    let pool = rayon::ThreadPoolBuilder::new()
        .build()
        .context("Failed to start the conversion worker pool")?;

    pool.install(|| {
        jobs.par_iter().for_each(|job| {
            if verbose {
                println!("\t{}", job.command);
            }
            match runner.run(&job.command) {
                Ok(output) if output.success => {}
                Ok(_) => eprintln!(
                    "❌ Converter exited with an error for {} (output in {:?})",
                    job.group, job.out_dir
                ),
                Err(e) => eprintln!("❌ Failed to convert {:?} for {}: {}", job.input, job.group, e),
            }
            progress_bar.inc(1);
        });
    });

    progress_bar.finish_with_message("✅ Conversion complete");
    Ok(())
}
