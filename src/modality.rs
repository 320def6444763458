use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

pub const STAGING_DIR: &str = "dicom";
pub const DESIGNATED_MODALITY: &str = "REST";

const EXACT_MODALITIES: [&str; 4] = ["T1", "REST", "DTI", "DKI"];
const SERIES_MARKERS: [&str; 2] = ["EP2D_BOLD", "RUN"];

/// A named subset of the staged raw tree, paired with the directory its
/// converted volumes are written to.
#[derive(Debug, Clone)]
pub struct ModalityGroup {
    pub name: String,
    pub source: PathBuf,
    pub out_dir: PathBuf,
}

pub fn resolve_groups(root: &Path, one_level_only: bool) -> Result<Vec<ModalityGroup>> {
    let staging = root.join(STAGING_DIR);

    if one_level_only {
        // The whole staging area is one series; converted volumes land beside it.
        return Ok(vec![ModalityGroup {
            name: STAGING_DIR.to_string(),
            source: staging.clone(),
            out_dir: staging,
        }]);
    }

    let mut groups = Vec::new();
    for entry in fs::read_dir(&staging)
        .with_context(|| format!("Failed to list staging directory: {:?}", staging))?
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                eprintln!("❌ Unreadable entry in {:?}: {}", staging, e);
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_modality_name(&name) {
            groups.push(ModalityGroup {
                source: staging.join(&name),
                out_dir: root.join(&name),
                name,
            });
        }
    }

    Ok(groups)
}

fn is_modality_name(name: &str) -> bool {
    EXACT_MODALITIES.contains(&name) || SERIES_MARKERS.iter().any(|marker| name.contains(marker))
}

/// One raw slice is enough for the converter to pick up the whole series.
pub fn first_raw_file(group_dir: &Path) -> Option<PathBuf> {
    WalkDir::new(group_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && is_raw_series_file(e.path()))
        .map(|e| e.into_path())
}

fn is_raw_series_file(path: &Path) -> bool {
    if let Some(ext) = path.extension() {
        let ext = ext.to_string_lossy();
        if ext.eq_ignore_ascii_case("ima") || ext.eq_ignore_ascii_case("dcm") {
            return true;
        }
    }

    // Some scanner exports drop the extension; check for the DICM preamble
    if let Ok(mut file) = File::open(path) {
        let mut buffer = [0u8; 132];
        if file.read_exact(&mut buffer).is_ok() {
            return &buffer[128..132] == b"DICM";
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn keeps_recognized_modality_directories_only() {
        let root = TempDir::new().unwrap();
        let staging = root.path().join(STAGING_DIR);
        for name in ["REST", "DTI", "DKI", "T1", "EP2D_BOLD_MOCO", "RUN2", "localizer"] {
            fs::create_dir_all(staging.join(name)).unwrap();
        }
        touch(&staging.join("RUN_notes.txt"));

        let groups = resolve_groups(root.path(), false).unwrap();
        let names: HashSet<String> = groups.iter().map(|g| g.name.clone()).collect();
        let expected: HashSet<String> = ["REST", "DTI", "DKI", "T1", "EP2D_BOLD_MOCO", "RUN2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn group_output_directories_are_disjoint() {
        let root = TempDir::new().unwrap();
        let staging = root.path().join(STAGING_DIR);
        for name in ["REST", "DTI", "RUN1"] {
            fs::create_dir_all(staging.join(name)).unwrap();
        }

        let groups = resolve_groups(root.path(), false).unwrap();
        let out_dirs: HashSet<&Path> = groups.iter().map(|g| g.out_dir.as_path()).collect();
        assert_eq!(out_dirs.len(), groups.len());
        for group in &groups {
            assert!(group.out_dir.starts_with(root.path()));
            assert_ne!(group.out_dir, staging);
        }
    }

    #[test]
    fn one_level_mode_is_a_single_staging_group() {
        let root = TempDir::new().unwrap();
        let groups = resolve_groups(root.path(), true).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, STAGING_DIR);
        assert_eq!(groups[0].out_dir, root.path().join(STAGING_DIR));
        assert_eq!(groups[0].source, groups[0].out_dir);
    }

    #[test]
    fn finds_first_raw_file_in_nested_series() {
        let group = TempDir::new().unwrap();
        let nested = group.path().join("series").join("deep");
        fs::create_dir_all(&nested).unwrap();
        touch(&nested.join("slice-0001.IMA"));

        let found = first_raw_file(group.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "slice-0001.IMA");
    }

    #[test]
    fn accepts_dcm_extension_case_insensitively() {
        let group = TempDir::new().unwrap();
        touch(&group.path().join("scan.DcM"));
        assert!(first_raw_file(group.path()).is_some());
    }

    #[test]
    fn accepts_extensionless_files_with_dicm_preamble() {
        let group = TempDir::new().unwrap();
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"DICM");
        fs::write(group.path().join("0001"), &bytes).unwrap();

        let found = first_raw_file(group.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "0001");
    }

    #[test]
    fn reports_no_raw_file_for_empty_group() {
        let group = TempDir::new().unwrap();
        touch(&group.path().join("README.txt"));
        assert!(first_raw_file(group.path()).is_none());
    }
}
