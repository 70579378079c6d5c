//! Binary entry point for the pagekv administrative CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use pagekv::{
    admin::{inspect, verify, InspectReport, VerifyReport},
    init_logging, StorageConfig,
};

#[derive(Parser, Debug)]
#[command(
    name = "pagekv",
    version,
    about = "Inspect and verify pagekv store files",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        default_value = "warn",
        help = "Log filter (RUST_LOG syntax)"
    )]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Print the heading and page usage of a store")]
    Inspect {
        #[arg(value_name = "STORE")]
        path: PathBuf,
    },

    #[command(about = "Read back every page, index node and value of a store")]
    Verify {
        #[arg(value_name = "STORE")]
        path: PathBuf,
    },

    #[command(about = "Print a storage configuration as TOML")]
    Config {
        #[arg(long, value_name = "FILE", help = "Validate and echo this file instead of defaults")]
        file: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log)?;

    match cli.command {
        Command::Inspect { path } => {
            let report = inspect(&path)?;
            emit(cli.format, &report, || print_inspect_text(&report))?;
        }
        Command::Verify { path } => {
            let report = verify(&path)?;
            emit(cli.format, &report, || print_verify_text(&report))?;
            if !report.success {
                std::process::exit(2);
            }
        }
        Command::Config { file } => {
            let config = match file {
                Some(file) => StorageConfig::load(file)?,
                None => StorageConfig::default(),
            };
            let toml = config.to_toml_string()?;
            emit(cli.format, &config, || print!("{toml}"))?;
        }
    }
    Ok(())
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_inspect_text(report: &InspectReport) {
    let heading = &report.heading;
    println!("Store: {}", report.path);
    println!(
        "  file_bytes={} map_bytes={}",
        report.file_bytes, report.map_bytes
    );
    println!(
        "  access_method={} versioned={} page_size={} max_key_size={}",
        heading.access_method, heading.versioned, heading.page_size, heading.max_key_size
    );
    println!(
        "  key_type={} value_type={} flush_count={}",
        heading.key_type, heading.value_type, heading.flush_count
    );
    match heading.root {
        Some(root) => println!("  root={root}"),
        None => println!("  root=<none>"),
    }
    if let Some(inventory) = heading.inventory {
        println!("  transaction_inventory={inventory}");
    }
    println!();
    println!(
        "Pages: count={} on_disk={} released={} reclaimable={}",
        report.pages.page_count,
        report.pages.on_disk_pages,
        report.pages.released_pages,
        report.pages.reclaimable_pages
    );
    let kinds = &report.kinds;
    println!(
        "  heading={} fsm={} btree={} slotted={} multi_page={} unformatted={}",
        kinds.heading,
        kinds.free_space_map,
        kinds.bplus_tree_nodes,
        kinds.slotted,
        kinds.multi_page,
        kinds.unformatted
    );
}

fn print_verify_text(report: &VerifyReport) {
    println!(
        "Verify => success={} pages_checked={} keys_checked={}",
        report.success, report.pages_checked, report.keys_checked
    );
    if let Some(index) = &report.index {
        println!(
            "  index: ok={} nodes={} keys={} ({})",
            index.ok, index.nodes, index.keys, index.message
        );
    }
    for finding in &report.findings {
        println!("- {:?}: {}", finding.severity, finding.message);
    }
}
