//! Detection content loading
//!
//! Content lives under `<repo_path>/detections` as one YAML file per
//! detection. Under `selected` mode only the listed files are loaded.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{is_yaml_file, DetectionTestingMode, RunConfig};
use crate::models::Detection;

/// Directory below `repo_path` holding detection files
pub const DETECTIONS_DIR: &str = "detections";

/// Produces the ordered list of detections a run should test
pub trait ContentLoader {
    fn load(&self, config: &RunConfig) -> Result<Vec<Detection>>;
}

/// Loads detection YAML files from the repository on disk
#[derive(Debug, Default)]
pub struct DirectoryLoader;

impl DirectoryLoader {
    pub fn new() -> Self {
        Self
    }

    fn load_file(path: &Path) -> Result<Detection> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read detection: {}", path.display()))?;
        let mut detection: Detection = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse detection: {}", path.display()))?;
        detection.path = path.to_path_buf();
        Ok(detection)
    }

    /// Every detection file under the content directory, in path order
    fn discover(repo: &Path) -> Result<Vec<PathBuf>> {
        let root = repo.join(DETECTIONS_DIR);
        if !root.is_dir() {
            bail!("Content directory not found: {}", root.display());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&root).follow_links(true).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };
            if entry.file_type().is_file() && is_yaml_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    /// Listed files resolved against the repository, all of which must exist
    fn selected(repo: &Path, list: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let files: Vec<PathBuf> = list.iter().map(|p| repo.join(p)).collect();
        let missing: Vec<String> = files
            .iter()
            .filter(|p| !p.is_file())
            .map(|p| p.display().to_string())
            .collect();

        if !missing.is_empty() {
            bail!(
                "The following detections_list entries do not exist:\n  {}",
                missing.join("\n  ")
            );
        }
        Ok(files)
    }
}

impl ContentLoader for DirectoryLoader {
    fn load(&self, config: &RunConfig) -> Result<Vec<Detection>> {
        let files = match (config.mode, config.detections_list.as_deref()) {
            (DetectionTestingMode::Selected, Some(list)) => Self::selected(&config.repo_path, list)?,
            (DetectionTestingMode::Selected, None) => {
                bail!("mode is 'selected' but detections_list was not provided")
            }
            (DetectionTestingMode::All, _) => Self::discover(&config.repo_path)?,
        };

        let detections = files
            .iter()
            .map(|path| Self::load_file(path))
            .collect::<Result<Vec<_>>>()?;

        let untested = detections.iter().filter(|d| !d.has_tests()).count();
        if untested > 0 {
            debug!("{} detections have no unit tests and will be skipped", untested);
        }
        info!("Loaded {} detections ({} mode)", detections.len(), config.mode);
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn write(dir: &Path, relative: &str, name: &str) {
        let path = dir.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            path,
            format!("name: {name}\nid: {name}-id\nsearch: '| tstats count'\ntests:\n  - name: true positive\n"),
        )
        .unwrap();
    }

    fn repo() -> TempDir {
        let dir = tempdir().unwrap();
        write(dir.path(), "detections/endpoint/b.yml", "b");
        write(dir.path(), "detections/endpoint/a.yml", "a");
        write(dir.path(), "detections/network/c.yaml", "c");
        std::fs::write(dir.path().join("detections/README.md"), "ignored").unwrap();
        dir
    }

    fn config(repo: &TempDir) -> RunConfig {
        RunConfig {
            repo_path: repo.path().to_path_buf(),
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_load_all_in_path_order() {
        let repo = repo();
        let detections = DirectoryLoader::new().load(&config(&repo)).unwrap();

        let names: Vec<_> = detections.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(detections[0].path.ends_with("detections/endpoint/a.yml"));
        assert_eq!(detections[0].id, "a-id");
        assert!(detections.iter().all(Detection::has_tests));
    }

    #[test]
    fn test_load_selected() {
        let repo = repo();
        let config = config(&repo).with_selected(vec![PathBuf::from("detections/network/c.yaml")]);
        let detections = DirectoryLoader::new().load(&config).unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].name, "c");
    }

    #[test]
    fn test_selected_reports_every_missing_file() {
        let repo = repo();
        let config = config(&repo).with_selected(vec![
            PathBuf::from("detections/nope.yml"),
            PathBuf::from("detections/endpoint/a.yml"),
            PathBuf::from("detections/gone.yml"),
        ]);

        let err = DirectoryLoader::new().load(&config).unwrap_err().to_string();
        assert!(err.contains("nope.yml"));
        assert!(err.contains("gone.yml"));
        assert!(!err.contains("a.yml"));
    }

    #[test]
    fn test_missing_content_directory() {
        let dir = tempdir().unwrap();
        let err = DirectoryLoader::new().load(&config(&dir)).unwrap_err();
        assert!(err.to_string().contains("Content directory not found"));
    }

    #[test]
    fn test_invalid_yaml_names_file() {
        let repo = repo();
        std::fs::write(repo.path().join("detections/broken.yml"), "tests: [").unwrap();
        let err = DirectoryLoader::new().load(&config(&repo)).unwrap_err();
        assert!(format!("{err:#}").contains("broken.yml"));
    }
}
