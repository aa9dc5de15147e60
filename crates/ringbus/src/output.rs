use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Print one subcommand report.
///
/// `rows` drive the table and pretty renderings; `raw` is the single value
/// scripts get with `--format raw`.
pub fn print_report<T: Serialize>(
    report: &T,
    rows: &[(&str, String)],
    raw: &str,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (label, value) in rows {
                table.add_row(vec![label.to_string(), value.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (label, value) in rows {
                println!("{label}: {value}");
            }
        }
        OutputFormat::Raw => println!("{raw}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        records: u64,
    }

    #[test]
    fn sample_report_serializes() {
        let json = serde_json::to_string(&Sample { records: 3 }).expect("should serialize");
        assert!(json.contains("\"records\":3"));
    }
}
