//! Markdown job report and result export.

use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use log::info;

use crate::schema::{Configuration, RoundRecord, SearchConfig};

/// Report writing errors.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot serialize results: {0}")]
    Json(#[from] serde_json::Error),
}

/// Widest title shown in the ranking table.
const TITLE_WIDTH: usize = 50;

/// Markdown report of a tuning job, rewritten by [`JobReport::begin`] and
/// appended to after every round.
#[derive(Debug, Clone)]
pub struct JobReport {
    path: PathBuf,
}

impl JobReport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Report next to a job file: `job.json` becomes `job.report.md`.
    pub fn for_job(job_file: &Path) -> Self {
        Self::new(sibling(job_file, "report.md"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a new report, discarding any previous content.
    pub fn begin(&self, title: &str, job_file: &Path, search: &SearchConfig) -> Result<(), ReportError> {
        let text = format!(
            "# Report for Job {title}\n\n\
             - File: {}\n\
             - Rounds: {}\n\
             - Population: {}\n\
             - Offspring: {}\n\n",
            job_file.display(),
            search.rounds,
            search.population,
            search.offspring,
        );
        fs::write(&self.path, text).map_err(|source| self.io(source))
    }

    /// Append the ranking and summary of a round.
    pub fn append_round(&self, record: &RoundRecord, population: usize) -> Result<(), ReportError> {
        let finished = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let text = render_round(record, population, &finished);
        info!("{text}");
        self.append(&text)
    }

    /// Append the accuracy trend over all rounds.
    pub fn append_history(&self, history: &[RoundRecord]) -> Result<(), ReportError> {
        let text = render_history(history);
        info!("{text}");
        self.append(&text)
    }

    /// Store the final configurations as a JSON array next to the job file.
    pub fn write_results(job_file: &Path, configs: &[Configuration]) -> Result<PathBuf, ReportError> {
        let path = sibling(job_file, "result.json");
        let json = serde_json::to_string_pretty(configs)?;
        fs::write(&path, json).map_err(|source| ReportError::Io {
            path: path.clone(),
            source,
        })?;
        info!("Saved results to {}", path.display());
        Ok(path)
    }

    fn append(&self, text: &str) -> Result<(), ReportError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io(source))?;
        file.write_all(text.as_bytes()).map_err(|source| self.io(source))
    }

    fn io(&self, source: std::io::Error) -> ReportError {
        ReportError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// `dir/name.json` -> `dir/name.<extension>`.
fn sibling(job_file: &Path, extension: &str) -> PathBuf {
    let stem = job_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    job_file.with_file_name(format!("{stem}.{extension}"))
}

/// Whole seconds as `H:MM:SS`.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}:{:02}", total / 3600, total / 60 % 60, total % 60)
}

/// Markdown section of one round.
pub fn render_round(record: &RoundRecord, population: usize, finished: &str) -> String {
    let mut rows = String::new();
    for (i, member) in record.ranked.iter().enumerate() {
        let title: String = member.title.chars().take(TITLE_WIDTH).collect();
        let time = format_duration(member.result.train_time + member.result.predict_time);
        let _ = writeln!(
            rows,
            "| {:4} | {title:width$} |  {:7.5}  | {time} |",
            i + 1,
            member.result.accuracy(),
            width = TITLE_WIDTH,
        );
    }

    format!(
        "\n## Round {round}\n\n\
         - Finished at: {finished}\n\
         - Time: {time}\n\
         - Interrupted: {interrupted}\n\n\
         ### Best {population} Classifiers\n\n\
         | Nr.  | {header:width$} | Test acc. | Time    |\n\
         |------|{rule}|-----------|---------|\n\
         {rows}\n\
         ### Summary\n\n\
         Accuracy:\n\
         - Best: {best:.5}\n\
         - Mean: {mean:.5}\n",
        round = record.round,
        time = format_duration(record.wall_time),
        interrupted = record.interrupted,
        header = "Title",
        width = TITLE_WIDTH,
        rule = "-".repeat(TITLE_WIDTH + 2),
        best = record.best_accuracy,
        mean = record.mean_accuracy,
    )
}

/// Markdown table of best and mean accuracy per round.
pub fn render_history(history: &[RoundRecord]) -> String {
    let mut text = String::from(
        "## History\n\n\
         | Round | Time    | Best Acc. | Mean Acc. |\n\
         |-------|---------|-----------|-----------|\n",
    );
    for record in history {
        let _ = writeln!(
            text,
            "| {:5} | {} | {:9.7} | {:9.7} |",
            record.round,
            format_duration(record.wall_time),
            record.best_accuracy,
            record.mean_accuracy
        );
    }
    text
}
