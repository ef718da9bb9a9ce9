use anyhow::{Context, Result, anyhow};
use std::fs;
use std::path::{Path, PathBuf};

/// Joins a relative path onto `base`; absolute paths pass through
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn stamp(file_name: &str) -> String {
    format!("Batch program successfully read {}. Hurray!", file_name)
}

/// Reads the input and writes `{output_dir}/{file name}` with its stamp.
///
/// Returns the path of the written file.
pub fn run(cwd: &Path, input: &Path, output_dir: &Path) -> Result<PathBuf> {
    let input = resolve(cwd, input);
    let file_name = input
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("Input path {} has no file name", input.display()))?
        .to_string();

    // Only readability matters; the content is not used
    fs::read(&input).with_context(|| format!("Failed to read input {}", input.display()))?;

    let output_dir = resolve(cwd, output_dir);
    fs::create_dir_all(&output_dir).with_context(|| {
        format!("Failed to create output directory {}", output_dir.display())
    })?;

    let output = output_dir.join(&file_name);
    fs::write(&output, stamp(&file_name))
        .with_context(|| format!("Failed to write output {}", output.display()))?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_writes_stamped_output() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let written = run(dir.path(), Path::new("a.txt"), Path::new("output/")).unwrap();

        assert_eq!(written, dir.path().join("output").join("a.txt"));
        assert_eq!(
            fs::read_to_string(&written).unwrap(),
            "Batch program successfully read a.txt. Hurray!"
        );
    }

    #[test]
    fn test_nested_output_dir_is_created() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("in/x")).unwrap();
        fs::write(dir.path().join("in/x/b.txt"), "").unwrap();

        let written = run(dir.path(), Path::new("in/x/b.txt"), Path::new("output/x")).unwrap();

        assert_eq!(written, dir.path().join("output/x/b.txt"));
        assert!(written.is_file());
    }

    #[test]
    fn test_absolute_paths_are_kept() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("c.txt");
        fs::write(&input, "data").unwrap();
        let out = dir.path().join("abs-out");

        let written = run(Path::new("/nonexistent"), &input, &out).unwrap();

        assert_eq!(written, out.join("c.txt"));
    }

    #[test]
    fn test_missing_input_fails() {
        let dir = tempdir().unwrap();

        let err = run(dir.path(), Path::new("missing.txt"), Path::new("output")).unwrap_err();

        assert!(err.to_string().contains("Failed to read input"));
        assert!(!dir.path().join("output").exists());
    }

    #[test]
    fn test_resolve() {
        let base = Path::new("/work");
        assert_eq!(resolve(base, Path::new("a/b")), PathBuf::from("/work/a/b"));
        assert_eq!(resolve(base, Path::new("/etc/x")), PathBuf::from("/etc/x"));
    }
}
