use std::path::Path;

use callflow_batch::script::parse_script;

use crate::{report_error, OutputFormat};

/// `callflow check`: parse a test script. Returns the process exit code.
pub(crate) fn cmd_check(file: &Path, output: OutputFormat, quiet: bool) -> i32 {
    let source = match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("error reading file '{}': {}", file.display(), e);
            report_error(&msg, output, quiet);
            return 1;
        }
    };

    let lines = match parse_script(&source) {
        Ok(l) => l,
        Err(e) => {
            match output {
                OutputFormat::Json => {
                    eprintln!(
                        "{}",
                        serde_json::json!({ "valid": false, "error": e.to_string() })
                    );
                }
                OutputFormat::Text => {
                    if !quiet {
                        eprintln!("invalid script: {}", e);
                    }
                }
            }
            return 1;
        }
    };

    if quiet {
        return 0;
    }
    match output {
        OutputFormat::Json => {
            let json = serde_json::json!({ "valid": true, "lines": lines });
            println!(
                "{}",
                serde_json::to_string_pretty(&json).unwrap_or_default()
            );
        }
        OutputFormat::Text => {
            for line in &lines {
                println!("{:>4}  {:<15} {}", line.line, line.directive.kind(), line.text);
            }
            println!("valid ({} directives)", lines.len());
        }
    }
    0
}
