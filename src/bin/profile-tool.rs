//! Walk-file inspection tool
//!
//! Parses recorded SNMP walk files the same way the simulator loads them,
//! so a profile can be checked before it is put in front of test runs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use snmpsim::mib::walk;

#[derive(Parser)]
#[command(name = "profile-tool")]
#[command(about = "Inspect recorded SNMP walk files")]
#[command(version = snmpsim::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a walk file and report entry counts by type
    Parse {
        /// Walk file path
        file: PathBuf,
    },
    /// Report lines the simulator would skip
    Lint {
        /// Walk file path
        file: PathBuf,
    },
    /// Print the parsed walk in canonical form
    Dump {
        /// Walk file path
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> snmpsim::Result<ExitCode> {
    match cli.command {
        Commands::Parse { file } => {
            let (entries, stats) = walk::parse_walk_file(&file)?;

            let mut by_type: BTreeMap<&'static str, usize> = BTreeMap::new();
            for entry in &entries {
                *by_type.entry(entry.value.type_name()).or_insert(0) += 1;
            }

            println!("{}", file.display());
            println!("  parsed:  {}", stats.parsed);
            println!("  skipped: {}", stats.skipped);
            for (type_name, count) in by_type {
                println!("  {:12} {}", type_name, count);
            }
            if let (Some(first), Some(last)) = (entries.first(), entries.last()) {
                println!("  first OID: {}", first.oid);
                println!("  last OID:  {}", last.oid);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Lint { file } => {
            let (_, stats) = walk::parse_walk_file(&file)?;
            if stats.skipped == 0 {
                println!("{}: clean ({} entries)", file.display(), stats.parsed);
                Ok(ExitCode::SUCCESS)
            } else {
                println!(
                    "{}: {} skipped lines out of {} records (see warnings above)",
                    file.display(),
                    stats.skipped,
                    stats.parsed + stats.skipped
                );
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Dump { file } => {
            let (entries, _) = walk::parse_walk_file(&file)?;
            for entry in entries {
                println!("{}", entry.to_line());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
