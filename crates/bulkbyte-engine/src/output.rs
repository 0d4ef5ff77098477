//! Policy for an output artifact that already exists.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bulkbyte_types::error::StepError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// What to do when the output path is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfExists {
    /// Configuration-level failure before any row is read.
    #[default]
    Fail,
    /// Leave the file alone and report success without writing.
    Skip,
    /// Write to a timestamped sibling instead.
    Rename,
}

/// Where (and whether) to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputDecision {
    Write(PathBuf),
    Skip(PathBuf),
}

/// Output file opened for writing, or the existing path left untouched.
#[derive(Debug)]
pub enum OutputClaim {
    Created(PathBuf, tokio::fs::File),
    Skipped(PathBuf),
}

/// `out.txt` -> `out_20240131_235959.txt`; extension-less names get a plain
/// suffix. Hidden files such as `.env` are treated as having no extension.
pub fn timestamped_path(path: &Path, at: DateTime<Local>) -> PathBuf {
    let stamp = at.format(TIMESTAMP_FORMAT).to_string();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{stamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{stamp}"),
    };
    path.with_file_name(name)
}

/// Apply `policy` to `path`, using `now` for the rename suffix.
///
/// This only inspects the filesystem; [`claim_output_path`] is what the
/// runtime uses to create the file.
///
/// # Errors
///
/// Returns a `config` error when the path exists and the policy is `Fail`,
/// or a `resource` error when no free renamed path can be found.
pub fn resolve_output_path(
    path: &Path,
    policy: IfExists,
    now: DateTime<Local>,
) -> Result<OutputDecision, StepError> {
    if !path.exists() {
        return Ok(OutputDecision::Write(path.to_path_buf()));
    }
    match policy {
        IfExists::Fail => Err(exists_error(path)),
        IfExists::Skip => Ok(OutputDecision::Skip(path.to_path_buf())),
        IfExists::Rename => rename_candidates(path, now)
            .find(|candidate| !candidate.exists())
            .map(OutputDecision::Write)
            .ok_or_else(|| rename_exhausted(path)),
    }
}

/// Apply `policy` and create the chosen file in one step. Files are opened
/// with `create_new`, so an existing file is never truncated even if it
/// appears after the policy was checked.
///
/// # Errors
///
/// Same as [`resolve_output_path`], plus a `resource` error if the file
/// cannot be created.
pub async fn claim_output_path(
    path: &Path,
    policy: IfExists,
    now: DateTime<Local>,
) -> Result<OutputClaim, StepError> {
    if let Some(file) = create_new(path).await? {
        return Ok(OutputClaim::Created(path.to_path_buf(), file));
    }
    match policy {
        IfExists::Fail => Err(exists_error(path)),
        IfExists::Skip => Ok(OutputClaim::Skipped(path.to_path_buf())),
        IfExists::Rename => {
            for candidate in rename_candidates(path, now) {
                if let Some(file) = create_new(&candidate).await? {
                    return Ok(OutputClaim::Created(candidate, file));
                }
            }
            Err(rename_exhausted(path))
        }
    }
}

/// `None` when something already exists at `path`.
async fn create_new(path: &Path) -> Result<Option<tokio::fs::File>, StepError> {
    match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(StepError::resource(
            "OUTPUT_CREATE",
            format!("cannot create {}: {e}", path.display()),
        )),
    }
}

/// Timestamped name first, then `_1` through `_999`.
fn rename_candidates(path: &Path, now: DateTime<Local>) -> impl Iterator<Item = PathBuf> {
    let base = timestamped_path(path, now);
    std::iter::once(base.clone()).chain((1..1000u32).map(move |n| with_counter(&base, n)))
}

fn exists_error(path: &Path) -> StepError {
    StepError::config(
        "OUTPUT_EXISTS",
        format!("output file {} already exists", path.display()),
    )
}

fn rename_exhausted(path: &Path) -> StepError {
    StepError::resource(
        "OUTPUT_RENAME",
        format!("no free renamed path for {}", path.display()),
    )
}

fn with_counter(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    };
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 31, 23, 59, 58).unwrap()
    }

    #[rstest]
    #[case("out.txt", "out_20240131_235958.txt")]
    #[case("archive.tar.gz", "archive.tar_20240131_235958.gz")]
    #[case("README", "README_20240131_235958")]
    #[case("a.b", "a_20240131_235958.b")]
    #[case(".env", ".env_20240131_235958")]
    fn timestamp_suffix(#[case] input: &str, #[case] expected: &str) {
        let dir = Path::new("/data");
        assert_eq!(timestamped_path(&dir.join(input), at()), dir.join(expected));
    }

    #[test]
    fn absent_file_is_written_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        assert_eq!(
            resolve_output_path(&path, IfExists::Fail, at()).unwrap(),
            OutputDecision::Write(path)
        );
    }

    #[test]
    fn existing_file_per_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "original").unwrap();

        let err = resolve_output_path(&path, IfExists::Fail, at()).unwrap_err();
        assert_eq!(err.code, "OUTPUT_EXISTS");

        assert_eq!(
            resolve_output_path(&path, IfExists::Skip, at()).unwrap(),
            OutputDecision::Skip(path.clone())
        );

        let OutputDecision::Write(renamed) = resolve_output_path(&path, IfExists::Rename, at()).unwrap()
        else {
            panic!("rename should write");
        };
        assert_eq!(renamed, dir.path().join("out_20240131_235958.txt"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "original");
    }

    #[test]
    fn rename_collision_appends_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "a").unwrap();
        std::fs::write(timestamped_path(&path, at()), "b").unwrap();
        assert_eq!(
            resolve_output_path(&path, IfExists::Rename, at()).unwrap(),
            OutputDecision::Write(dir.path().join("out_20240131_235958_1.txt"))
        );
    }

    #[tokio::test]
    async fn claim_never_truncates_a_file_created_after_the_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        assert_eq!(
            resolve_output_path(&path, IfExists::Fail, at()).unwrap(),
            OutputDecision::Write(path.clone())
        );
        std::fs::write(&path, "late writer").unwrap();

        let err = claim_output_path(&path, IfExists::Fail, at()).await.unwrap_err();
        assert_eq!(err.code, "OUTPUT_EXISTS");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "late writer");
    }

    #[tokio::test]
    async fn claim_under_rename_moves_past_a_late_collision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "a").unwrap();
        let OutputDecision::Write(planned) = resolve_output_path(&path, IfExists::Rename, at()).unwrap()
        else {
            panic!("rename should write");
        };
        std::fs::write(&planned, "late writer").unwrap();

        let OutputClaim::Created(claimed, _file) =
            claim_output_path(&path, IfExists::Rename, at()).await.unwrap()
        else {
            panic!("rename should create a file");
        };
        assert_eq!(claimed, dir.path().join("out_20240131_235958_1.txt"));
        assert_eq!(std::fs::read_to_string(&planned).unwrap(), "late writer");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a");
    }

    #[tokio::test]
    async fn claim_skip_leaves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "a").unwrap();
        assert!(matches!(
            claim_output_path(&path, IfExists::Skip, at()).await.unwrap(),
            OutputClaim::Skipped(p) if p == path
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a");
    }
}
