use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::thread;

use anyhow::{bail, Context, Result};

use crate::dicom::read_instance_record;
use crate::study::{organize, InstanceRecord, Study};

/// Expands files and directories into a sorted list of candidate files.
///
/// Directories are walked recursively. Hidden entries are skipped. There is
/// no extension filter: DICOM files are often stored without `.dcm`.
pub fn collect_dicom_paths(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let meta = fs::metadata(input)
            .with_context(|| format!("Could not access {}", input.display()))?;
        if meta.is_dir() {
            walk_directory(input, &mut files)?;
        } else {
            files.push(input.clone());
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn walk_directory(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Could not list {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("Could not read entry in {}", dir.display()))?;
        let path = entry.path();
        if is_hidden(&path) {
            continue;
        }
        let file_type = entry
            .file_type()
            .with_context(|| format!("Could not stat {}", path.display()))?;
        if file_type.is_dir() {
            walk_directory(&path, files)?;
        } else if file_type.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

/// Reads every file and organizes the image instances into studies.
///
/// Unreadable files are skipped with a warning. Fails only when no file
/// produced an image instance.
pub fn parse_dicom_files(paths: &[PathBuf]) -> Result<Vec<Study>> {
    let records = read_records_parallel(paths);
    if records.is_empty() {
        bail!("No valid DICOM files found in the selected files/folder");
    }

    let studies = organize(records);
    let series_count: usize = studies.iter().map(|study| study.series.len()).sum();
    let instance_count: usize = studies.iter().map(Study::instance_count).sum();
    log::info!(
        "Loaded {} studies, {} series, {} instances from {} files",
        studies.len(),
        series_count,
        instance_count,
        paths.len()
    );
    Ok(studies)
}

/// Loads a selection of files and/or folders end to end.
pub fn load_inputs(inputs: &[PathBuf]) -> Result<Vec<Study>> {
    let paths = collect_dicom_paths(inputs)?;
    if paths.is_empty() {
        bail!("The selection contains no files");
    }
    parse_dicom_files(&paths)
}

/// Parses in input order across a small pool of scoped workers.
fn read_records_parallel(paths: &[PathBuf]) -> Vec<InstanceRecord> {
    let worker_count = parse_worker_count(paths.len());
    let next_index = AtomicUsize::new(0);
    let mut slots: Vec<Option<InstanceRecord>> = (0..paths.len()).map(|_| None).collect();

    thread::scope(|scope| {
        let workers = (0..worker_count)
            .map(|_| {
                let next_index = &next_index;
                scope.spawn(move || {
                    let mut parsed = Vec::new();
                    loop {
                        let index = next_index.fetch_add(1, Ordering::Relaxed);
                        let Some(path) = paths.get(index) else {
                            break;
                        };
                        match read_instance_record(path) {
                            Ok(Some(record)) => parsed.push((index, record)),
                            Ok(None) => {}
                            Err(err) => log::warn!("Skipping {}: {err:#}", path.display()),
                        }
                    }
                    parsed
                })
            })
            .collect::<Vec<_>>();

        for worker in workers {
            match worker.join() {
                Ok(parsed) => {
                    for (index, record) in parsed {
                        slots[index] = Some(record);
                    }
                }
                Err(_) => log::error!("DICOM parse worker panicked"),
            }
        }
    });

    slots.into_iter().flatten().collect()
}

fn parse_worker_count(file_count: usize) -> usize {
    let auto_workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .clamp(1, 8);

    let configured = configured_parse_workers().unwrap_or(auto_workers);
    configured.clamp(1, 32).min(file_count.max(1))
}

fn configured_parse_workers() -> Option<usize> {
    static CONFIG: OnceLock<Option<usize>> = OnceLock::new();

    *CONFIG.get_or_init(|| {
        let raw = std::env::var("OPENSCANS_PARSE_WORKERS").ok()?;
        raw.trim().parse::<usize>().ok().filter(|value| *value > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_nested_files_and_skips_hidden() {
        let dir = tempfile::tempdir().expect("temp dir");
        let nested = dir.path().join("series1");
        fs::create_dir(&nested).expect("nested dir");
        fs::write(nested.join("IM0001"), b"x").expect("write");
        fs::write(nested.join("IM0002.dcm"), b"x").expect("write");
        fs::write(dir.path().join(".DS_Store"), b"x").expect("write");
        fs::create_dir(dir.path().join(".cache")).expect("hidden dir");
        fs::write(dir.path().join(".cache").join("IM9"), b"x").expect("write");

        let files = collect_dicom_paths(&[dir.path().to_path_buf()]).expect("collect");
        assert_eq!(
            files,
            vec![nested.join("IM0001"), nested.join("IM0002.dcm")]
        );
    }

    #[test]
    fn explicit_files_are_kept_and_deduplicated() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = dir.path().join("a.dcm");
        fs::write(&file, b"x").expect("write");

        let files = collect_dicom_paths(&[file.clone(), file.clone()]).expect("collect");
        assert_eq!(files, vec![file]);
    }

    #[test]
    fn missing_input_is_an_error() {
        let err = collect_dicom_paths(&[PathBuf::from("/nonexistent/openscans")])
            .expect_err("missing path should fail");
        assert!(format!("{err:#}").contains("Could not access"));
    }

    #[test]
    fn non_dicom_files_yield_no_studies() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("notes.txt"), b"not a dicom file").expect("write");

        let err = load_inputs(&[dir.path().to_path_buf()]).expect_err("should fail");
        assert!(format!("{err:#}").contains("No valid DICOM files"));
    }

    #[test]
    fn worker_count_never_exceeds_file_count() {
        assert_eq!(parse_worker_count(1), 1);
        assert!(parse_worker_count(100) >= 1);
        assert_eq!(parse_worker_count(0), 1);
    }
}
