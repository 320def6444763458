use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::modality::STAGING_DIR;

const CONVERTED_SUFFIX: &str = ".nii.gz";

// Never staged: the staging directory itself, the conversion log, and the
// FreeSurfer artifacts that live beside the raw data.
const EXCLUDED_NAMES: [&str; 6] = [
    STAGING_DIR,
    "log.txt",
    "FREESURFER",
    "fsaverage",
    "lh.EC_average",
    "rh.EC_average",
];

pub fn has_converted_volumes(root: &Path, one_level_only: bool) -> Result<bool> {
    if one_level_only {
        for entry in
            fs::read_dir(root).with_context(|| format!("Failed to list directory: {:?}", root))?
        {
            let entry =
                entry.with_context(|| format!("Failed to read an entry in {:?}", root))?;
            if is_converted_name(&entry.file_name().to_string_lossy()) {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() && is_converted_name(&entry.file_name().to_string_lossy()) {
            return Ok(true);
        }
    }

    Ok(false)
}

fn is_converted_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(CONVERTED_SUFFIX)
}

pub fn stage_raw_input(root: &Path) -> Result<()> {
    let staging = root.join(STAGING_DIR);
    if let Err(e) = fs::create_dir(&staging) {
        if e.kind() != ErrorKind::AlreadyExists {
            return Err(e)
                .with_context(|| format!("Failed to create staging directory: {:?}", staging));
        }
    }

    for entry in
        fs::read_dir(root).with_context(|| format!("Failed to list directory: {:?}", root))?
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                eprintln!("❌ Unreadable entry in {:?}: {}", root, e);
                continue;
            }
        };
        let name = entry.file_name();
        if EXCLUDED_NAMES.iter().any(|excluded| name.to_string_lossy() == *excluded) {
            continue;
        }
        // A failed move leaves the file behind for the next run; keep going.
        if let Err(e) = fs::rename(entry.path(), staging.join(&name)) {
            eprintln!("❌ Failed to move {:?} into {:?}: {}", entry.path(), staging, e);
        }
    }

    Ok(())
}
