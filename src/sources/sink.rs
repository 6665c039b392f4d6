//! Result sinks

use super::ResultSink;
use crate::advisor::{AdvisorReport, AdvisorWarning};
use crate::error::Result;
use std::io::Write;

/// Output format for [`WriterSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid output format: {}. Use 'text' or 'json'.", s)),
        }
    }
}

/// Keeps every report it receives
#[derive(Debug, Default)]
pub struct VecSink {
    reports: Vec<AdvisorReport>,
}

impl VecSink {
    pub fn reports(&self) -> &[AdvisorReport] {
        &self.reports
    }

    pub fn into_reports(self) -> Vec<AdvisorReport> {
        self.reports
    }
}

impl ResultSink for VecSink {
    fn accept(&mut self, report: &AdvisorReport) -> Result<()> {
        self.reports.push(report.clone());
        Ok(())
    }
}

/// Renders reports to a writer as a text table or pretty JSON
pub struct WriterSink<W> {
    writer: W,
    format: OutputFormat,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self { writer, format }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_text(&mut self, report: &AdvisorReport) -> Result<()> {
        let summary = &report.summary;
        let out = &mut self.writer;

        writeln!(
            out,
            "Index recommendations for {} ({} queries, {} shapes, sample of {} documents)",
            if summary.namespace.is_empty() { "<all namespaces>" } else { summary.namespace.as_str() },
            summary.supported,
            summary.entries,
            summary.sample_size
        )?;

        if report.recommendations.is_empty() {
            writeln!(out, "No recommendations.")?;
        } else {
            writeln!(
                out,
                "{:>4}  {:<40} {:>10} {:>12} {:>8} {:>5} {:>8} {:>10}",
                "#", "index", "score", "selectivity", "queries", "sort", "covered", "est. docs"
            )?;
            for rec in &report.recommendations {
                let c = &rec.candidate;
                let estimated = c
                    .estimated_documents
                    .map_or_else(|| "-".to_string(), |n| n.to_string());
                writeln!(
                    out,
                    "{:>4}  {:<40} {:>10.3} {:>12.6} {:>8} {:>5} {:>8} {:>10}",
                    rec.rank,
                    rec.key.to_string(),
                    c.score,
                    c.selectivity,
                    c.frequency,
                    c.sort_supported_entries,
                    c.covered_entries,
                    estimated
                )?;
            }
        }

        if !summary.skipped.is_empty() {
            let skipped: Vec<String> = summary
                .skipped
                .iter()
                .map(|(reason, count)| format!("{reason}={count}"))
                .collect();
            writeln!(out, "Skipped: {}", skipped.join(", "))?;
        }
        for warning in &summary.warnings {
            let message = match warning {
                AdvisorWarning::EmptySample => {
                    "sample is empty, ranking reflects query frequency only".to_string()
                }
                AdvisorWarning::SkippedQueries { count } => format!("{count} queries could not be analyzed"),
                AdvisorWarning::UnreadableRecords { count } => {
                    format!("{count} workload records could not be read")
                }
                AdvisorWarning::UnknownEstimates { count } => {
                    format!("{count} prefix estimates fell back to worst case")
                }
            };
            writeln!(out, "Warning: {message}")?;
        }
        Ok(())
    }
}

impl<W: Write> ResultSink for WriterSink<W> {
    fn accept(&mut self, report: &AdvisorReport) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_writer_pretty(&mut self.writer, report)?;
                writeln!(self.writer)?;
            }
            OutputFormat::Text => self.write_text(report)?,
        }
        self.writer.flush()?;
        Ok(())
    }
}
