use std::io::{self, Write};

use serde::Serialize;

use crate::pipeline::{
    DryRunReport, ItemStatus, ProgressEvent, ProgressSink, RunOutcome, RunSummary,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_outcome(outcome: &RunOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress lines on stderr for interactive runs.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("[{:>6.1}s] {}", elapsed.as_secs_f64(), event.message),
            None => eprintln!("{}", event.message),
        }
    }
}

pub fn print_outcome_summary(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::DryRun(report) => print_dry_run(report),
        RunOutcome::Completed(summary) => print_run_summary(summary),
    }
}

fn print_dry_run(report: &DryRunReport) {
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}geoduck dry run{reset}");
    if let Some(term) = &report.term {
        println!("term: {term}");
    }
    println!("pages: {}", report.pages);
    println!("planned targets: {}", report.targets.len());
    for target in &report.targets {
        println!("  {} {}{}", target.id, target.directory, target.filename);
    }
}

fn print_run_summary(summary: &RunSummary) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}geoduck summary{reset}");
    println!("{green}processed: {}{reset}", summary.succeeded);
    println!("{yellow}failed: {}{reset}", summary.failed);
    if summary.cancelled {
        println!("{yellow}run was cancelled before completion{reset}");
    }

    for item in &summary.items {
        match &item.status {
            ItemStatus::Saved { stage, paths } => {
                println!("{green}  {} ({stage}){reset}", item.id);
                for path in paths {
                    println!("{green}    {path}{reset}");
                }
            }
            ItemStatus::InMemory {
                columns,
                rows,
                samples_with_links,
            } => println!(
                "{cyan}  {} ({columns} columns, {rows} rows, {samples_with_links} linked samples){reset}",
                item.id
            ),
            ItemStatus::Failed { error } => {
                println!(
                    "{red}  {} {}{}: {error}{reset}",
                    item.id, item.directory, item.filename
                )
            }
        }
    }
}
