use anyhow::Context;
use clap::{Parser, Subcommand};
use common::{AnalyzerConfig, Verdict};
use halting::Analyzer;
use memmap2::Mmap;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable naming a default config file.
const CONFIG_ENV: &str = "HALT_CONFIG";

#[derive(Parser)]
#[command(name = "halt")]
#[command(about = "Best-effort halting analysis for Python programs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze Python files (directories are searched for `.py` files).
    Analyze {
        /// Files or directories to analyze.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Emit one JSON object per line instead of text.
        #[arg(long)]
        json: bool,
        /// JSON config file; overrides `HALT_CONFIG`.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration as JSON.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// One line of `--json` output.
#[derive(Debug, Serialize)]
struct Report<'a> {
    path: String,
    outcome: &'a str,
    reason: &'a str,
}

fn main() -> anyhow::Result<()> {
    // Missing .env is the common case.
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: .env: {}", e);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Analyze { paths, json, config } => {
            cmd_analyze(paths, *json, load_config(config.as_deref())?)?
        }
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// analyze
// ---------------------------------------------------------------------------

fn cmd_analyze(paths: &[PathBuf], json: bool, config: AnalyzerConfig) -> anyhow::Result<()> {
    let mut files = Vec::new();
    for path in paths {
        files.extend(collect_py_files(path)?);
    }
    if files.is_empty() {
        println!("No Python files found.");
        return Ok(());
    }

    let analyzer = Analyzer::new(config);
    for file in &files {
        let display = display_path(file);
        let verdict = analyze_file(&analyzer, file)?;
        if json {
            println!("{}", serde_json::to_string(&report(&display, &verdict))?);
        } else {
            println!("{display}: {}", verdict.outcome);
            println!("    {}", verdict.reason);
        }
    }
    Ok(())
}

fn analyze_file(analyzer: &Analyzer, path: &Path) -> anyhow::Result<Verdict> {
    let source = read_source(path)?;
    debug!(path = %path.display(), bytes = source.len(), "analyzing");
    analyzer
        .analyze(&source)
        .with_context(|| format!("analysis of {} failed", path.display()))
}

fn report<'a>(path: &str, verdict: &'a Verdict) -> Report<'a> {
    Report {
        path: path.to_string(),
        outcome: verdict.outcome.as_str(),
        reason: &verdict.reason,
    }
}

/// Reads a source file through a read-only mapping.
fn read_source(path: &Path) -> anyhow::Result<String> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    if file.metadata()?.len() == 0 {
        return Ok(String::new());
    }
    // SAFETY: mmap is read-only and copied out before the file handle drops.
    let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("cannot map {}", path.display()))?;
    let text = std::str::from_utf8(&mmap).with_context(|| format!("{} is not UTF-8", path.display()))?;
    Ok(text.to_string())
}

fn display_path(path: &Path) -> String {
    dunce::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

fn collect_py_files(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    use walkdir::WalkDir;
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.exists() {
        anyhow::bail!("no such file or directory: {}", path.display());
    }
    let files = WalkDir::new(path)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                None
            }
        })
        .filter(|e| {
            e.file_type().is_file() && e.path().extension().and_then(|x| x.to_str()) == Some("py")
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    Ok(files)
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn load_config(explicit: Option<&Path>) -> anyhow::Result<AnalyzerConfig> {
    let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    match explicit.map(Path::to_path_buf).or(from_env) {
        Some(path) => AnalyzerConfig::from_json_file(&path)
            .with_context(|| format!("cannot load config {}", path.display())),
        None => Ok(AnalyzerConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Outcome;
    use std::fs;

    #[test]
    fn test_collect_py_files_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "x = 1\n").unwrap();
        fs::create_dir(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg").join("c.py"), "x = 1\n").unwrap();

        let names: Vec<String> = collect_py_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.py", "b.py", "c.py"]);
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_py_files(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn test_read_source_handles_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.py");
        fs::write(&path, "").unwrap();
        assert_eq!(read_source(&path).unwrap(), "");
    }

    #[test]
    fn test_analyze_file_reports_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loop.py");
        fs::write(&path, "while True:\n    pass\n").unwrap();
        let verdict = analyze_file(&Analyzer::default(), &path).unwrap();
        assert_eq!(verdict.outcome, Outcome::DoesNotHalt);

        let line = serde_json::to_value(report("loop.py", &verdict)).unwrap();
        assert_eq!(line["outcome"], "does not halt");
        assert_eq!(line["path"], "loop.py");
    }

    #[test]
    fn test_explicit_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("halt.json");
        fs::write(&path, r#"{"solver_timeout_ms": 750}"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.solver_timeout_ms, 750);

        fs::write(&path, r#"{"solver_timeout_ms": 0}"#).unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
