use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use cgm_impute::{
    gap_profile, impute_file, output_path_for, run_sweep, Frame, GridSmoother, ImputeParams,
    ProfileSet, SweepConfig,
};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "CGM gap-bounded imputation and smoothing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Impute every eligible dataset CSV in a directory
    Sweep(SweepArgs),
    /// Impute a single dataset CSV
    Impute(ImputeArgs),
    /// Report raw gap statistics per subject/split for dataset CSVs
    Diagnose(DiagnoseArgs),
}

#[derive(Args, Debug, Clone, Default)]
struct LimitArgs {
    /// Longest run forward-filled in biosignal columns (samples)
    #[arg(long)]
    ffill_limit: Option<usize>,

    /// Longest run zero-filled in event/dose columns (samples)
    #[arg(long)]
    zero_fill_limit: Option<usize>,

    /// Missing glucose run length that clears the smoothed estimate (samples)
    #[arg(long)]
    invalidation_window: Option<usize>,

    /// Smoothing grid cadence in seconds
    #[arg(long)]
    cadence: Option<i64>,

    /// Treat literal zeros as observations instead of missing values
    #[arg(long, action = ArgAction::SetTrue)]
    keep_zeros: bool,
}

#[derive(Parser, Debug)]
struct SweepArgs {
    /// Directory holding the per-dataset CSVs
    #[arg(long, default_value = "processed_data", value_hint = ValueHint::DirPath)]
    source_dir: PathBuf,

    /// Where imputed files go (defaults to the source directory)
    #[arg(long, value_hint = ValueHint::DirPath)]
    output_dir: Option<PathBuf>,

    /// Dataset profiles JSON
    #[arg(long, value_hint = ValueHint::FilePath)]
    profiles: Option<PathBuf>,

    /// Filename marker of imputed outputs
    #[arg(long, default_value = "_imputed")]
    marker: String,

    /// Re-impute datasets whose output already exists
    #[arg(long, action = ArgAction::SetTrue)]
    force: bool,

    /// Skip the per-dataset JSON report
    #[arg(long, action = ArgAction::SetTrue)]
    no_report: bool,

    #[command(flatten)]
    limits: LimitArgs,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct ImputeArgs {
    /// Dataset CSV to impute
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Output CSV path (defaults to `<stem>_imputed.csv` next to the input)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Dataset profiles JSON
    #[arg(long, value_hint = ValueHint::FilePath)]
    profiles: Option<PathBuf>,

    #[command(flatten)]
    limits: LimitArgs,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct DiagnoseArgs {
    /// Dataset CSVs to inspect
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output report path
    #[arg(short, long, default_value = "gap_diagnostics.txt", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Dataset profiles JSON
    #[arg(long, value_hint = ValueHint::FilePath)]
    profiles: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Sweep(args) => args.verbose,
        Command::Impute(args) => args.verbose,
        Command::Diagnose(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Sweep(args) => handle_sweep(args),
        Command::Impute(args) => handle_impute(args),
        Command::Diagnose(args) => handle_diagnose(args),
    }
}

fn build_params(limits: &LimitArgs) -> Result<ImputeParams> {
    let mut params = ImputeParams::default();
    if let Some(limit) = limits.ffill_limit {
        params.forward_fill_limit = limit;
    }
    if let Some(limit) = limits.zero_fill_limit {
        params.zero_fill_limit = limit;
    }
    if let Some(window) = limits.invalidation_window {
        params.invalidation_window = window;
    }
    if let Some(cadence) = limits.cadence {
        params.smoothing.cadence_s = cadence;
    }
    if limits.keep_zeros {
        params.zero_as_missing.forward_fill = false;
        params.zero_as_missing.zero_fill = false;
    }
    params.validate()?;
    Ok(params)
}

fn load_profiles(path: Option<&Path>) -> Result<ProfileSet> {
    match path {
        Some(path) => ProfileSet::load(path)
            .with_context(|| format!("failed to load profiles {}", path.display())),
        None => Ok(ProfileSet::default()),
    }
}

fn dataset_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn handle_sweep(args: SweepArgs) -> Result<()> {
    let params = build_params(&args.limits)?;
    let config = SweepConfig {
        source_dir: args.source_dir,
        output_dir: args.output_dir,
        marker: args.marker,
        force: args.force,
        write_reports: !args.no_report,
        profiles: load_profiles(args.profiles.as_deref())?,
        params: params.clone(),
    };
    let smoother = GridSmoother::new(params.smoothing);
    let summary = run_sweep(&config, &smoother)
        .with_context(|| format!("sweep of {} failed", config.source_dir.display()))?;

    for (path, reason) in &summary.failed {
        warn!("Failed: {} ({})", path.display(), reason);
    }
    info!(
        "Imputed {} file(s), skipped {}, failed {}",
        summary.processed.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    Ok(())
}

fn handle_impute(args: ImputeArgs) -> Result<()> {
    let params = build_params(&args.limits)?;
    let profiles = load_profiles(args.profiles.as_deref())?;
    let dataset = dataset_name(&args.input);
    let profile = profiles
        .resolve(&dataset)
        .ok_or_else(|| anyhow!("dataset '{}' is excluded by the profile set", dataset))?;

    let output = match args.output {
        Some(path) => path,
        None => {
            let dir = args.input.parent().unwrap_or_else(|| Path::new(""));
            output_path_for(&args.input, dir, "_imputed")
        }
    };
    if output == args.input {
        return Err(anyhow!("refusing to overwrite source {}", args.input.display()));
    }

    let smoother = GridSmoother::new(params.smoothing.clone());
    let report = impute_file(&args.input, &output, profile, &params, &smoother)
        .with_context(|| format!("failed to impute {}", args.input.display()))?;
    for (column, fill) in report.totals() {
        info!(
            "{}: filled={} left_missing={} zero_sentinels={}",
            column, fill.filled, fill.left_missing, fill.sentinel_zeros
        );
    }
    if report.alignment_failures > 0 {
        warn!(
            "{} partition(s) lost the smoothed column in alignment",
            report.alignment_failures
        );
    }
    info!("Wrote imputed CSV: {}", output.display());
    Ok(())
}

fn handle_diagnose(args: DiagnoseArgs) -> Result<()> {
    let profiles = load_profiles(args.profiles.as_deref())?;
    let params = ImputeParams::default();
    let mut report = String::new();

    for path in &args.inputs {
        let dataset = dataset_name(path);
        let Some(profile) = profiles.resolve(&dataset) else {
            warn!("Skipping {}: dataset is excluded", path.display());
            continue;
        };
        let frame =
            Frame::read_csv(path).with_context(|| format!("failed to read {}", path.display()))?;
        let partitions = gap_profile(&frame, profile, &params)
            .with_context(|| format!("failed to profile {}", path.display()))?;

        report.push_str(&format!("FILE: {}\n", path.display()));
        report.push_str(&format!("  rows: {}\n", frame.len()));
        report.push_str(&format!("  partitions: {}\n", partitions.len()));
        for partition in &partitions {
            report.push_str(&format!(
                "  {} (rows={}):\n",
                partition.key,
                partition
                    .columns
                    .values()
                    .next()
                    .map_or(0, |summary| summary.samples)
            ));
            for (column, summary) in &partition.columns {
                report.push_str(&format!(
                    "    - {}: missing={}, gaps={}, longest={}, over_limit={}\n",
                    column,
                    summary.missing,
                    summary.gaps,
                    summary.longest_gap,
                    summary.gaps_over_limit
                ));
            }
        }
        report.push('\n');
    }

    fs::write(&args.output, report)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!("Gap report written: {}", args.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_needs_no_arguments() {
        let cli = Cli::try_parse_from(["cgm-impute", "sweep"]).unwrap();
        let Command::Sweep(args) = cli.command else {
            panic!("expected sweep");
        };
        assert_eq!(args.source_dir, PathBuf::from("processed_data"));
        assert_eq!(args.marker, "_imputed");
        assert!(!args.force);
        let params = build_params(&args.limits).unwrap();
        assert_eq!(params, ImputeParams::default());
    }

    #[test]
    fn limit_flags_override_params() {
        let cli = Cli::try_parse_from([
            "cgm-impute",
            "impute",
            "data.csv",
            "--ffill-limit",
            "6",
            "--invalidation-window",
            "12",
            "--cadence",
            "60",
            "--keep-zeros",
        ])
        .unwrap();
        let Command::Impute(args) = cli.command else {
            panic!("expected impute");
        };
        let params = build_params(&args.limits).unwrap();
        assert_eq!(params.forward_fill_limit, 6);
        assert_eq!(params.zero_fill_limit, 288);
        assert_eq!(params.invalidation_window, 12);
        assert_eq!(params.smoothing.cadence_s, 60);
        assert!(!params.zero_as_missing.forward_fill);
        assert!(!params.zero_as_missing.zero_fill);
    }

    #[test]
    fn zero_limit_is_rejected() {
        let limits = LimitArgs {
            zero_fill_limit: Some(0),
            ..LimitArgs::default()
        };
        assert!(build_params(&limits).is_err());
    }

    #[test]
    fn diagnose_requires_inputs() {
        assert!(Cli::try_parse_from(["cgm-impute", "diagnose"]).is_err());
    }

    #[test]
    fn diagnose_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ohio.csv");
        fs::write(
            &input,
            "date,id,CGM,heartrate,is_test\n\
2018-01-01 00:00:00,1,100,,False\n\
2018-01-01 00:05:00,1,,,False\n",
        )
        .unwrap();
        let output = dir.path().join("gaps.txt");
        handle_diagnose(DiagnoseArgs {
            inputs: vec![input],
            output: output.clone(),
            profiles: None,
            verbose: false,
        })
        .unwrap();
        let text = fs::read_to_string(output).unwrap();
        assert!(text.contains("1/train (rows=2):"));
        assert!(text.contains("- CGM: missing=1, gaps=1, longest=1, over_limit=0"));
        assert!(text.contains("- heartrate: missing=2, gaps=1, longest=2, over_limit=0"));
    }
}
