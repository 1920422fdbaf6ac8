//! `callflow test`: run a batch locally and report it as TAP.

use std::path::Path;

use callflow_batch::coverage::Coverage;
use callflow_batch::persist::load_results;
use callflow_batch::{BatchError, LineStatus, TestResult};
use callflow_storage::{BatchRecord, BatchSelection, BatchStatus};

use crate::config::CliConfig;
use crate::runtime::Runtime;
use crate::{report_error, OutputFormat};

pub(crate) struct TestOptions<'a> {
    pub rules: &'a Path,
    pub tests: &'a Path,
    pub ids: Vec<String>,
    pub folder: Option<String>,
    pub recursive: bool,
}

impl TestOptions<'_> {
    /// Explicit ids, else a folder, else every enabled test.
    fn selection(&self) -> BatchSelection {
        if !self.ids.is_empty() {
            return BatchSelection::Ids {
                test_ids: self.ids.clone(),
            };
        }
        match &self.folder {
            Some(folder) => BatchSelection::Folder {
                folder: folder.clone(),
                recursive: self.recursive,
            },
            None => BatchSelection::Folder {
                folder: String::new(),
                recursive: true,
            },
        }
    }
}

/// Returns the process exit code.
pub(crate) fn cmd_test(
    opts: TestOptions<'_>,
    config: &CliConfig,
    output: OutputFormat,
    quiet: bool,
) -> i32 {
    let runtime = match Runtime::load(opts.rules, Some(opts.tests), config) {
        Ok(r) => r,
        Err(msg) => {
            report_error(&msg, output, quiet);
            return 1;
        }
    };
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("failed to start runtime: {}", e), output, quiet);
            return 1;
        }
    };

    let selection = opts.selection();
    let outcome = rt.block_on(async {
        let record = runtime.coordinator.run_selection("cli", selection).await?;
        let results = load_results(runtime.coordinator.blobs().as_ref(), &record).await?;
        Ok::<_, BatchError>((record, results))
    });
    let (record, results) = match outcome {
        Ok(r) => r,
        Err(e) => {
            report_error(&format!("batch failed: {}", e), output, quiet);
            return 1;
        }
    };

    match output {
        OutputFormat::Json => {
            let json = serde_json::json!({ "batch": record, "results": results });
            println!(
                "{}",
                serde_json::to_string_pretty(&json).unwrap_or_else(|e| format!(
                    "{{\"error\": \"serialization error: {}\"}}",
                    e
                ))
            );
        }
        OutputFormat::Text => {
            if record.status == BatchStatus::Error {
                report_error(
                    &format!(
                        "batch {} failed: {}",
                        record.batch_id,
                        record.error.as_deref().unwrap_or("unknown error")
                    ),
                    output,
                    quiet,
                );
            } else if !quiet {
                print_tap(&record, &results);
            }
        }
    }

    if record.status == BatchStatus::Complete && record.success {
        0
    } else {
        1
    }
}

fn status_label(status: LineStatus) -> &'static str {
    match status {
        LineStatus::NotExecuted => "not executed",
        LineStatus::Passed => "passed",
        LineStatus::Warning => "warning",
        LineStatus::Failed => "failed",
    }
}

/// TAP v14 with a YAML diagnostic block for failing or warning tests.
fn print_tap(record: &BatchRecord, results: &[TestResult]) {
    println!("TAP version 14");
    println!("1..{}", results.len());

    for (i, result) in results.iter().enumerate() {
        let n = i + 1;
        if result.success {
            println!("ok {} - {}", n, result.name);
        } else {
            println!("not ok {} - {}", n, result.name);
        }
        if result.success && !result.warning {
            continue;
        }
        println!("  ---");
        println!("  test_id: {}", result.test_id);
        if let Some(err) = &result.error {
            println!("  error: {}", err);
        }
        if let Some(end) = &result.end {
            println!("  end: {:?}", end);
        }
        println!("  lines:");
        for line in result
            .lines
            .iter()
            .filter(|l| l.status != LineStatus::Passed)
        {
            println!("    - line: {}", line.line);
            println!("      text: {}", line.text);
            println!("      status: {}", status_label(line.status));
            for info in &line.info {
                println!("      info: {}", info);
            }
            for warning in &line.warnings {
                println!("      warning: {}", warning);
            }
        }
        println!("  ...");
    }

    let passed = results.iter().filter(|r| r.success).count();
    println!("# {} of {} passed", passed, results.len());
    if let Ok(coverage) = serde_json::from_value::<Coverage>(record.coverage.clone()) {
        println!("# coverage {}%", coverage.overall);
        for rs in &coverage.rule_sets {
            println!("#   {} {}%", rs.name, rs.coverage);
        }
    }
}
