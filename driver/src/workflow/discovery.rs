use anyhow::Context;
use lidarcore::prelude::AcquisitionPeriod;
use std::fs;
use std::path::{Path, PathBuf};

pub const MEASUREMENTS_DIR: &str = "measurements";
pub const DARK_CURRENT_DIR: &str = "dark_current";

/// File groups of one organized session folder, e.g. `20210616nt/`.
#[derive(Debug, Clone)]
pub struct SessionSource {
    pub id: String,
    pub period: Option<AcquisitionPeriod>,
    pub measurements: Vec<PathBuf>,
    pub dark_current: Vec<PathBuf>,
}

/// Every sub-folder of `data_dir` holding a `measurements/` directory, sorted by name.
pub fn discover_sessions(data_dir: &Path) -> anyhow::Result<Vec<SessionSource>> {
    let entries = fs::read_dir(data_dir)
        .with_context(|| format!("listing session folders in {}", data_dir.display()))?;
    let mut sessions = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("reading {}", data_dir.display()))?;
        let path = entry.path();
        if !path.join(MEASUREMENTS_DIR).is_dir() {
            if path.is_dir() {
                log::warn!("skipping {}: no {} folder", path.display(), MEASUREMENTS_DIR);
            }
            continue;
        }
        let id = entry.file_name().to_string_lossy().into_owned();
        sessions.push(SessionSource {
            period: AcquisitionPeriod::from_suffix(&id),
            measurements: list_files(&path.join(MEASUREMENTS_DIR))?,
            dark_current: list_files(&path.join(DARK_CURRENT_DIR))?,
            id,
        });
    }
    sessions.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(sessions)
}

fn list_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry.with_context(|| format!("reading {}", dir.display()))?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn finds_sessions_with_their_file_groups() {
        let root = tempdir().unwrap();
        let night = root.path().join("20210616nt");
        fs::create_dir_all(night.join(MEASUREMENTS_DIR)).unwrap();
        fs::create_dir_all(night.join(DARK_CURRENT_DIR)).unwrap();
        fs::write(night.join(MEASUREMENTS_DIR).join("RM2161621.000002"), b"").unwrap();
        fs::write(night.join(MEASUREMENTS_DIR).join("RM2161621.000001"), b"").unwrap();
        fs::write(night.join(DARK_CURRENT_DIR).join("RM2161620.590000"), b"").unwrap();
        let morning = root.path().join("20210617am");
        fs::create_dir_all(morning.join(MEASUREMENTS_DIR)).unwrap();
        fs::create_dir_all(root.path().join("notes")).unwrap();

        let sessions = discover_sessions(root.path()).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, "20210616nt");
        assert_eq!(sessions[0].period, Some(AcquisitionPeriod::Night));
        assert_eq!(sessions[0].measurements.len(), 2);
        assert!(sessions[0].measurements[0].ends_with("RM2161621.000001"));
        assert_eq!(sessions[0].dark_current.len(), 1);
        assert_eq!(sessions[1].period, Some(AcquisitionPeriod::Morning));
        assert!(sessions[1].dark_current.is_empty());
    }

    #[test]
    fn missing_data_dir_is_an_error() {
        let root = tempdir().unwrap();
        assert!(discover_sessions(&root.path().join("absent")).is_err());
    }
}
