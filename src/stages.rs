use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::exec::CommandRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FormatBridge,
    SliceTiming,
    MotionCorrection,
}

/// Applied in this order to the designated modality's output directory.
pub const STAGE_CHAIN: [Stage; 3] =
    [Stage::FormatBridge, Stage::SliceTiming, Stage::MotionCorrection];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Pending,
    Skipped,
    Running,
    Done,
    Failed,
}

/// Marker presence is the only persisted completion state; everything else
/// lives in the returned execution records.
pub trait MarkerStore {
    fn exists(&self, marker: &Path) -> bool;
}

pub struct FsMarkerStore;

impl MarkerStore for FsMarkerStore {
    fn exists(&self, marker: &Path) -> bool {
        marker.is_file()
    }
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::FormatBridge => "NIfTI to AFNI brick",
            Stage::SliceTiming => "Slice time correction",
            Stage::MotionCorrection => "Motion parameter calculation",
        }
    }

    pub fn marker(self, dir: &Path) -> PathBuf {
        match self {
            Stage::FormatBridge => dir.join("rest+orig.BRIK"),
            Stage::SliceTiming => dir.join("tShift_rest.BRIK"),
            Stage::MotionCorrection => dir.join("maxDisp.txt"),
        }
    }

    fn commands(self, dir: &Path) -> Vec<String> {
        match self {
            Stage::FormatBridge => WalkDir::new(dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| {
                    e.file_type().is_file()
                        && e.file_name()
                            .to_string_lossy()
                            .to_ascii_lowercase()
                            .ends_with(".nii.gz")
                })
                .map(|e| format!("3dcopy {} {}", e.path().display(), dir.join("rest").display()))
                .collect(),
            Stage::SliceTiming => vec![format!(
                "3dTshift -verbose -TR 3.5s -tzero 0 -prefix {} -tpattern alt+z '{}[4..115]'",
                dir.join("tShift_rest").display(),
                dir.join("rest+orig").display()
            )],
            Stage::MotionCorrection => vec![format!(
                "3dvolreg -verbose -prefix {} -dfile {} -maxdisp1D {} {}",
                dir.join("reg").display(),
                dir.join("reg_param.txt").display(),
                dir.join("maxDisp.txt").display(),
                dir.join("tShift_rest+orig").display()
            )],
        }
    }
}

pub struct StageExecution {
    pub stage: Stage,
    pub state: StageState,
}

impl StageExecution {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            state: StageState::Pending,
        }
    }

    fn advance(
        &mut self,
        dir: &Path,
        runner: &dyn CommandRunner,
        markers: &dyn MarkerStore,
        verbose: bool,
    ) {
        if markers.exists(&self.stage.marker(dir)) {
            println!("\tAlready done");
            self.state = StageState::Skipped;
            return;
        }

        self.state = StageState::Running;
        let commands = self.stage.commands(dir);
        if commands.is_empty() {
            // No input volumes yet; the marker stays absent and the next run
            // tries again.
            println!("\tNo input volumes found under {:?}", dir);
        }

        let mut failed = false;
        for command in &commands {
            if verbose {
                println!("\t{}", command);
            }
            match runner.run(command) {
                Ok(output) if output.success => {}
                Ok(output) => {
                    eprintln!("❌ {} exited with an error", self.stage.label());
                    if verbose && !output.combined.is_empty() {
                        eprintln!("{}", output.combined.trim_end());
                    }
                    failed = true;
                }
                Err(e) => {
                    eprintln!("❌ {} failed to launch: {}", self.stage.label(), e);
                    failed = true;
                }
            }
        }

        self.state = if failed {
            StageState::Failed
        } else {
            StageState::Done
        };
    }
}

pub fn run_stage_chain(
    dir: &Path,
    runner: &dyn CommandRunner,
    markers: &dyn MarkerStore,
    verbose: bool,
) -> Vec<StageExecution> {
    let mut chain: Vec<StageExecution> =
        STAGE_CHAIN.iter().map(|&stage| StageExecution::new(stage)).collect();

    // Strictly sequential: a failed stage is still followed by the next one,
    // whose own tool invocation surfaces the missing input.
    for execution in &mut chain {
        println!("🔧 {}", execution.stage.label());
        execution.advance(dir, runner, markers, verbose);
    }

    chain
}
