//! Dataset sweep: impute every eligible CSV in a directory.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::pipeline::impute_file;
use crate::profile::ProfileSet;
use crate::smooth::SmoothingPrimitive;
use crate::{ImputeError, ImputeParams};

#[derive(Clone, Debug)]
pub struct SweepConfig {
    pub source_dir: PathBuf,
    /// Defaults to `source_dir`.
    pub output_dir: Option<PathBuf>,
    pub marker: String,
    /// Re-process files whose output already exists.
    pub force: bool,
    pub write_reports: bool,
    pub profiles: ProfileSet,
    pub params: ImputeParams,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("processed_data"),
            output_dir: None,
            marker: "_imputed".to_string(),
            force: false,
            write_reports: true,
            profiles: ProfileSet::default(),
            params: ImputeParams::default(),
        }
    }
}

impl SweepConfig {
    fn output_dir(&self) -> &Path {
        self.output_dir.as_deref().unwrap_or(&self.source_dir)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NotCsv,
    AlreadyImputed,
    Denied,
    OutputExists,
    Unclassifiable(String),
}

#[derive(Clone, Debug, Default)]
pub struct SweepSummary {
    pub processed: Vec<PathBuf>,
    pub skipped: Vec<(PathBuf, SkipReason)>,
    pub failed: Vec<(PathBuf, String)>,
}

/// `<dir>/<stem><marker>.<ext>` for `input`.
pub fn output_path_for(input: &Path, dir: &Path, marker: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{}{}.{}", stem, marker, ext.to_string_lossy()),
        None => format!("{}{}", stem, marker),
    };
    dir.join(name)
}

fn report_path_for(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!("{}.report.json", stem))
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

/// Decide whether `path` is eligible. Returns the dataset name or why it is
/// skipped.
fn classify(path: &Path, config: &SweepConfig) -> Result<String, SkipReason> {
    let hidden = path
        .file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(true);
    if hidden || !is_csv(path) {
        return Err(SkipReason::NotCsv);
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !config.marker.is_empty() && stem.contains(&config.marker) {
        return Err(SkipReason::AlreadyImputed);
    }
    Ok(stem)
}

/// Impute every eligible CSV under `config.source_dir`. Only a missing or
/// unreadable source directory is fatal; per-file failures land in the
/// summary.
pub fn run_sweep(
    config: &SweepConfig,
    primitive: &dyn SmoothingPrimitive,
) -> Result<SweepSummary, ImputeError> {
    if !config.source_dir.is_dir() {
        return Err(ImputeError::MissingDirectory(config.source_dir.clone()));
    }
    let out_dir = config.output_dir();
    fs::create_dir_all(out_dir).map_err(|e| ImputeError::io(out_dir, e))?;

    let mut entries: Vec<PathBuf> = fs::read_dir(&config.source_dir)
        .map_err(|e| ImputeError::io(&config.source_dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    let mut summary = SweepSummary::default();
    for path in entries {
        let dataset = match classify(&path, config) {
            Ok(dataset) => dataset,
            Err(reason) => {
                debug!("Skipping {} ({:?})", path.display(), reason);
                summary.skipped.push((path, reason));
                continue;
            }
        };
        let Some(profile) = config.profiles.resolve(&dataset) else {
            info!("Skipping {}: dataset '{}' is excluded", path.display(), dataset);
            summary.skipped.push((path, SkipReason::Denied));
            continue;
        };
        let output = output_path_for(&path, out_dir, &config.marker);
        if output.exists() && !config.force {
            info!("Skipping {}: {} exists", path.display(), output.display());
            summary.skipped.push((path, SkipReason::OutputExists));
            continue;
        }

        info!("Imputing {}", path.display());
        match impute_file(&path, &output, profile, &config.params, primitive) {
            Ok(report) => {
                if config.write_reports {
                    let report_path = report_path_for(&output);
                    if let Err(err) = report.write_json(&report_path) {
                        warn!("Could not write report {}: {}", report_path.display(), err);
                    }
                }
                summary.processed.push(output);
            }
            Err(ImputeError::SchemaMismatch(msg)) => {
                warn!("Skipping {}: {}", path.display(), msg);
                summary
                    .skipped
                    .push((path, SkipReason::Unclassifiable(msg)));
            }
            Err(err) => {
                warn!("Failed to impute {}: {}", path.display(), err);
                summary.failed.push((path, err.to_string()));
            }
        }
    }

    info!(
        "Sweep finished: {} imputed, {} skipped, {} failed",
        summary.processed.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smooth::GridSmoother;
    use crate::DatasetReport;

    const DATA: &str = "date,id,CGM,heartrate,bolus,is_test\n\
2018-01-01 00:00:00,1,100,70,,False\n\
2018-01-01 00:05:00,1,,,,False\n\
2018-01-01 00:10:00,1,104,72,1.5,False\n";

    fn config(dir: &Path) -> SweepConfig {
        SweepConfig {
            source_dir: dir.to_path_buf(),
            ..SweepConfig::default()
        }
    }

    #[test]
    fn output_name_appends_marker_before_extension() {
        assert_eq!(
            output_path_for(Path::new("data/ohio.csv"), Path::new("out"), "_imputed"),
            PathBuf::from("out/ohio_imputed.csv")
        );
        assert_eq!(
            output_path_for(Path::new("raw"), Path::new("out"), "_imputed"),
            PathBuf::from("out/raw_imputed")
        );
    }

    #[test]
    fn sweep_imputes_and_never_touches_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("ohio.csv");
        fs::write(&source, DATA).unwrap();

        let summary = run_sweep(&config(dir.path()), &GridSmoother::default()).unwrap();
        assert_eq!(summary.processed, vec![dir.path().join("ohio_imputed.csv")]);
        assert!(summary.failed.is_empty());
        assert_eq!(fs::read_to_string(&source).unwrap(), DATA);

        let out = fs::read_to_string(dir.path().join("ohio_imputed.csv")).unwrap();
        assert!(out.starts_with("date,id,CGM,heartrate,bolus,is_test,CGM_smoothed\n"));
        assert!(out.contains("2018-01-01 00:05:00,1,,70.0,0.0,False,"));

        let report: DatasetReport = serde_json::from_str(
            &fs::read_to_string(dir.path().join("ohio_imputed.report.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(report.dataset, "ohio");
        assert_eq!(report.partitions.len(), 1);
    }

    #[test]
    fn imputed_file_produces_no_new_output() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ohio_imputed.csv"), DATA).unwrap();

        let summary = run_sweep(&config(dir.path()), &GridSmoother::default()).unwrap();
        assert!(summary.processed.is_empty());
        assert_eq!(summary.skipped[0].1, SkipReason::AlreadyImputed);
        assert!(!dir.path().join("ohio_imputed_imputed.csv").exists());
    }

    #[test]
    fn marker_anywhere_in_stem_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ohio_imputed_v2.csv"), DATA).unwrap();

        let summary = run_sweep(&config(dir.path()), &GridSmoother::default()).unwrap();
        assert!(summary.processed.is_empty());
        assert_eq!(summary.skipped[0].1, SkipReason::AlreadyImputed);
        assert!(!dir.path().join("ohio_imputed_v2_imputed.csv").exists());
    }

    #[test]
    fn second_sweep_skips_existing_output_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ohio.csv"), DATA).unwrap();
        let mut cfg = config(dir.path());
        cfg.write_reports = false;

        run_sweep(&cfg, &GridSmoother::default()).unwrap();
        let again = run_sweep(&cfg, &GridSmoother::default()).unwrap();
        assert!(again.processed.is_empty());
        assert!(again
            .skipped
            .iter()
            .any(|(_, reason)| *reason == SkipReason::OutputExists));

        cfg.force = true;
        let forced = run_sweep(&cfg, &GridSmoother::default()).unwrap();
        assert_eq!(forced.processed.len(), 1);
        assert!(!dir.path().join("ohio_imputed.report.json").exists());
    }

    #[test]
    fn denied_and_malformed_files_do_not_stop_the_sweep() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a_bad.csv"), "date,id\n2018-01-01 00:00:00,1\n").unwrap();
        fs::write(dir.path().join("b_denied.csv"), DATA).unwrap();
        fs::write(dir.path().join("c_good.csv"), DATA).unwrap();
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        let mut cfg = config(dir.path());
        cfg.profiles.denylist.insert("b_denied".to_string());

        let summary = run_sweep(&cfg, &GridSmoother::default()).unwrap();
        assert_eq!(summary.processed, vec![dir.path().join("c_good_imputed.csv")]);
        let reasons: Vec<&SkipReason> = summary.skipped.iter().map(|(_, r)| r).collect();
        assert!(matches!(reasons[0], SkipReason::Unclassifiable(_)));
        assert_eq!(reasons[1], &SkipReason::Denied);
        assert_eq!(reasons[2], &SkipReason::NotCsv);
        assert!(!dir.path().join("a_bad_imputed.csv").exists());
    }

    #[test]
    fn separate_output_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ohio.csv"), DATA).unwrap();
        let out = dir.path().join("imputed");
        let cfg = SweepConfig {
            output_dir: Some(out.clone()),
            ..config(dir.path())
        };
        let summary = run_sweep(&cfg, &GridSmoother::default()).unwrap();
        assert_eq!(summary.processed, vec![out.join("ohio_imputed.csv")]);
    }

    #[test]
    fn missing_source_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir.path().join("absent"));
        assert!(matches!(
            run_sweep(&cfg, &GridSmoother::default()),
            Err(ImputeError::MissingDirectory(_))
        ));
    }
}
