#![forbid(unsafe_code)]
//! Inspect blocks in a local chain database

use blockscope::config::{load_config_from, DEFAULT_CONFIG_PATH};
use blockscope::persistence::Database;
use blockscope::resolver::{BlockResolver, BlockSummary, IdentifierSpec};
use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Color as TableColor;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "blockscope", about = "Look up block summaries in a local chain database")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Override the configured database path
    #[arg(long)]
    database: Option<String>,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find one block by hash or height. Negative heights count back from the head.
    Block {
        #[arg(allow_hyphen_values = true)]
        search: String,
    },
    /// List consecutive blocks starting at a height
    Blocks {
        #[arg(long, allow_hyphen_values = true)]
        height: i64,
        #[arg(short, long, default_value_t = 10)]
        number: u64,
    },
    /// Show the current head block
    Head,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{} {}", "❌ Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config_from(&cli.config)?;
    let db_path = cli.database.unwrap_or(config.database.path);
    let resolver = BlockResolver::new(Arc::new(Database::open_existing(&db_path)?));

    let summaries = match cli.command {
        Command::Block { search } => vec![resolver.resolve_one(&IdentifierSpec::search(search))?],
        Command::Blocks { height, number } => resolver.resolve_range(height, number)?,
        Command::Head => vec![resolver.resolve_latest()?],
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("{}", "📭 No blocks requested".yellow());
        return Ok(());
    }

    println!("{}", render_table(&summaries));
    Ok(())
}

fn render_table(summaries: &[BlockSummary]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            ["Height", "Hash", "Difficulty", "Reward", "Time"]
                .into_iter()
                .map(|title| {
                    Cell::new(title)
                        .fg(TableColor::Cyan)
                        .add_attribute(Attribute::Bold)
                }),
        );

    for summary in summaries {
        table.add_row(vec![
            Cell::new(format!("#{}", summary.height)).fg(TableColor::White),
            Cell::new(&summary.block_hash).fg(TableColor::Green),
            Cell::new(&summary.difficulty).fg(TableColor::Yellow),
            Cell::new(&summary.reward).fg(TableColor::Magenta),
            Cell::new(format_timestamp(summary.timestamp)).fg(TableColor::Grey),
        ]);
    }
    table
}

fn format_timestamp(timestamp_ms: u64) -> String {
    use chrono::DateTime;

    match DateTime::from_timestamp_millis(timestamp_ms as i64) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "Invalid".to_string(),
    }
}
