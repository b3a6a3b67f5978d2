//! File-based storage for integrator state
//!
//! Everything lives in `.integrator/` in the project root:
//! - `operations/{name}/operation.json` - Operation documents
//! - `operations/{name}/events.jsonl` - Append-only transition log
//! - `merge-queue.json` - The merge queue document
//! - `*.lock`, `*.pid` - Runtime files (gitignored)
//! - `scratch/` - Temporary worktrees used during rebases (gitignored)

pub mod operations;
pub mod queue;

use std::fs;
use std::path::{Path, PathBuf};

/// Common file operations result type
pub type FileResult<T> = Result<T, String>;

/// Get the .integrator directory for a project
pub fn get_integrator_dir(project_path: &Path) -> PathBuf {
    project_path.join(".integrator")
}

/// Get the global .integrator directory in user home
pub fn get_global_integrator_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".integrator")
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> FileResult<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| format!("Failed to create directory {:?}: {}", path, e))?;
    }
    Ok(())
}

/// Write data to a file atomically (temp file + rename)
///
/// Readers see either the old or the new document, never a partial one.
pub fn atomic_write(path: &Path, content: &str) -> FileResult<()> {
    // Unique per process so two writers never share a temp file
    let temp_path = path.with_extension(format!("{}.tmp", std::process::id()));

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    fs::write(&temp_path, content)
        .map_err(|e| format!("Failed to write temp file {:?}: {}", temp_path, e))?;

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(format!("Failed to rename {:?} to {:?}: {}", temp_path, path, e));
    }

    Ok(())
}

/// Read a JSON file and deserialize it
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> FileResult<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read file {:?}: {}", path, e))?;

    serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse JSON from {:?}: {}", path, e))
}

/// Write data as pretty-printed JSON atomically
pub fn write_json<T: serde::Serialize>(path: &Path, data: &T) -> FileResult<()> {
    let content = serde_json::to_string_pretty(data)
        .map_err(|e| format!("Failed to serialize to JSON: {}", e))?;

    atomic_write(path, &content)
}

/// Initialize the .integrator directory for a project with .gitignore
pub fn init_integrator_dir(project_path: &Path) -> FileResult<PathBuf> {
    let integrator_dir = get_integrator_dir(project_path);
    ensure_dir(&integrator_dir)?;
    ensure_dir(&integrator_dir.join("operations"))?;

    let gitignore_path = integrator_dir.join(".gitignore");
    if !gitignore_path.exists() {
        let gitignore_content = r#"# Runtime files (not for sharing)
*.lock
*.pid
*.tmp
scratch/
"#;
        fs::write(&gitignore_path, gitignore_content)
            .map_err(|e| format!("Failed to write .gitignore: {}", e))?;
    }

    Ok(integrator_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_get_integrator_dir() {
        let project_path = Path::new("/home/user/my-project");
        assert_eq!(
            get_integrator_dir(project_path),
            PathBuf::from("/home/user/my-project/.integrator")
        );
    }

    #[test]
    fn test_ensure_dir() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("a").join("b").join("c");

        assert!(!nested_path.exists());
        ensure_dir(&nested_path).unwrap();
        assert!(nested_path.exists());
    }

    #[test]
    fn test_atomic_write_replaces_and_leaves_no_temp() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("doc.json");

        atomic_write(&file_path, "first").unwrap();
        atomic_write(&file_path, "second").unwrap();

        assert_eq!(fs::read_to_string(&file_path).unwrap(), "second");
        let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_read_write_json() {
        use serde::{Deserialize, Serialize};

        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
        struct TestData {
            name: String,
            value: i32,
        }

        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.json");

        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };

        write_json(&file_path, &data).unwrap();
        let read_data: TestData = read_json(&file_path).unwrap();

        assert_eq!(data, read_data);
    }

    #[test]
    fn test_init_integrator_dir() {
        let temp_dir = TempDir::new().unwrap();

        let dir = init_integrator_dir(temp_dir.path()).unwrap();

        assert!(dir.join("operations").exists());
        let gitignore = fs::read_to_string(dir.join(".gitignore")).unwrap();
        assert!(gitignore.contains("*.lock"));
        assert!(gitignore.contains("scratch/"));
    }
}
