use anyhow::Result;
use clap::ValueEnum;
use colored::{Color, Colorize};
use comfy_table::{Attribute, Cell, Color as TableColor, Table};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::io::Write;

/// Status line colors.
struct Palette {
    success: Color,
    error: Color,
    warning: Color,
    info: Color,
    progress: Color,
    muted: Color,
    heading: Color,
}

static PALETTE: Lazy<Palette> = Lazy::new(|| Palette {
    success: Color::Green,
    error: Color::Red,
    warning: Color::Yellow,
    info: Color::Blue,
    progress: Color::Cyan,
    muted: Color::BrightBlack,
    heading: Color::BrightBlue,
});

const ICON_SUCCESS: &str = "✓";
const ICON_ERROR: &str = "✗";
const ICON_WARNING: &str = "⚠";
const ICON_INFO: &str = "ℹ";
const ICON_DETAIL: &str = "→";
const ICON_PROGRESS: &str = "⟳";

/// Output format options for CLI commands
#[derive(Clone, Debug, ValueEnum, Default, PartialEq)]
pub enum OutputFormat {
    /// Formatted table output (default)
    #[default]
    Table,
    /// JSON output for scripting
    Json,
}

/// Global CLI options that affect output and behavior
#[derive(Clone, Debug, Default)]
pub struct GlobalOptions {
    pub output_format: OutputFormat,
    pub quiet: bool,
    pub verbose: bool,
    pub no_color: bool,
}

/// Data that renders as a table in `--output table` mode
pub trait TableDisplay {
    fn to_table(&self, output: &OutputManager) -> Table;
}

pub struct OutputManager {
    pub options: GlobalOptions,
}

impl OutputManager {
    pub fn new(options: GlobalOptions) -> Self {
        Self { options }
    }

    pub fn is_json(&self) -> bool {
        self.options.output_format == OutputFormat::Json
    }

    /// Display data according to the configured output format
    pub fn display<T>(&self, data: &T) -> Result<()>
    where
        T: Serialize + TableDisplay,
    {
        if self.options.quiet {
            return Ok(());
        }

        match self.options.output_format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                println!("{json}");
            }
            OutputFormat::Table => {
                let table = data.to_table(self);
                println!("{table}");
            }
        }
        Ok(())
    }

    fn message(&self, icon: &str, message: &str, color: Color) -> String {
        if self.options.no_color {
            format!("{icon} {message}")
        } else {
            format!("{} {}", icon.color(color), message.color(color))
        }
    }

    pub fn success(&self, message: &str) {
        if !self.options.quiet && !self.is_json() {
            println!("{}", self.message(ICON_SUCCESS, message, PALETTE.success));
        }
    }

    /// Errors are shown even in quiet mode
    pub fn error(&self, message: &str) {
        eprintln!("{}", self.message(ICON_ERROR, message, PALETTE.error));
    }

    pub fn warning(&self, message: &str) {
        if !self.options.quiet {
            eprintln!("{}", self.message(ICON_WARNING, message, PALETTE.warning));
        }
    }

    pub fn info(&self, message: &str) {
        if !self.options.quiet && !self.is_json() {
            println!("{}", self.message(ICON_INFO, message, PALETTE.info));
        }
    }

    /// Only shown with `--verbose`
    pub fn verbose(&self, message: &str) {
        if self.options.verbose && !self.options.quiet {
            eprintln!("{}", self.message(ICON_DETAIL, message, PALETTE.muted));
        }
    }

    pub fn heading(&self, text: &str) {
        if self.options.quiet || self.is_json() {
            return;
        }
        let output = if self.options.no_color {
            format!("\n{text}\n{}", "=".repeat(text.len()))
        } else {
            format!("\n{}", text.color(PALETTE.heading).bold())
        };
        println!("{output}");
    }

    pub fn create_table(&self) -> Table {
        let mut table = Table::new();
        if self.options.no_color {
            table.load_preset(comfy_table::presets::ASCII_FULL);
        } else {
            table.load_preset(comfy_table::presets::UTF8_FULL_CONDENSED);
        }
        table
    }

    pub fn add_table_header(&self, table: &mut Table, headers: &[&str]) {
        let header_cells: Vec<Cell> = headers
            .iter()
            .map(|h| {
                let cell = Cell::new(h).add_attribute(Attribute::Bold);
                if self.options.no_color { cell } else { cell.fg(TableColor::Cyan) }
            })
            .collect();
        table.set_header(header_cells);
    }

    pub fn progress(&self, message: &str) {
        if self.options.quiet || self.is_json() {
            return;
        }
        let output = if self.options.no_color {
            format!("{ICON_PROGRESS} {message}...")
        } else {
            format!(
                "{} {}...",
                ICON_PROGRESS.color(PALETTE.progress).bold(),
                message.color(PALETTE.progress)
            )
        };
        print!("\r{output}");
        std::io::stdout().flush().ok();
    }

    pub fn clear_line(&self) {
        if self.options.quiet || self.is_json() {
            return;
        }
        print!("\r{}\r", " ".repeat(80));
        std::io::stdout().flush().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Row {
        name: String,
        count: usize,
    }

    impl TableDisplay for Row {
        fn to_table(&self, output: &OutputManager) -> Table {
            let mut table = output.create_table();
            output.add_table_header(&mut table, &["Name", "Count"]);
            table.add_row(vec![Cell::new(&self.name), Cell::new(self.count)]);
            table
        }
    }

    fn row() -> Row {
        Row {
            name: "orders".to_string(),
            count: 2,
        }
    }

    #[test]
    fn json_output_serializes() {
        let output = OutputManager::new(GlobalOptions {
            output_format: OutputFormat::Json,
            ..Default::default()
        });
        assert!(output.is_json());
        assert!(output.display(&row()).is_ok());
    }

    #[test]
    fn quiet_output_is_silent() {
        let output = OutputManager::new(GlobalOptions {
            quiet: true,
            ..Default::default()
        });
        assert!(output.display(&row()).is_ok());
    }

    #[test]
    fn plain_messages_carry_no_escape_codes() {
        let output = OutputManager::new(GlobalOptions {
            no_color: true,
            ..Default::default()
        });
        assert_eq!(output.message(ICON_SUCCESS, "linked orders", PALETTE.success), "✓ linked orders");
        assert_eq!(output.message(ICON_WARNING, "skipped", PALETTE.warning), "⚠ skipped");
    }

    #[test]
    fn plain_tables_use_ascii() {
        let output = OutputManager::new(GlobalOptions {
            no_color: true,
            ..Default::default()
        });
        let rendered = row().to_table(&output).to_string();
        assert!(rendered.contains("orders"));
        assert!(rendered.contains('+'));
    }
}
