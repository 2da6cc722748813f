use clap::{Parser, Subcommand};
use prettytable::{Table, row};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use pfs::config::{DEFAULT_BLOCK_SIZE, EngineConfig};
use pfs::loader;
use pfs::storage::StorageEngine;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser)]
#[command(
    name = "pfs",
    about = "Block-structured single-file storage engine",
    version
)]
struct Cli {
    /// Container file
    #[arg(long, global = true, default_value = "pfs.db")]
    db: PathBuf,

    /// Block size used when creating a container
    #[arg(long, global = true, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: u32,

    /// Database name stored in a new container
    #[arg(long, global = true, default_value = "pfs")]
    name: String,

    #[command(subcommand)]
    command: Commands,
}

/// One line typed into the interactive shell
#[derive(Parser)]
#[command(no_binary_name = true, disable_version_flag = true)]
struct ShellLine {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new empty container
    Create,

    /// Import a CSV file, one record per data row
    Import {
        csv: PathBuf,

        /// Name to store the file under (defaults to the CSV file name)
        #[arg(long = "as")]
        as_name: Option<String>,
    },

    /// Look up one record by key
    Find { name: String, key: i32 },

    /// Print or write every record of a file
    Export {
        name: String,

        /// Write payloads to this file instead of standard output
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Delete a file and free its blocks
    Delete { name: String },

    /// List stored files
    List {
        #[arg(long)]
        json: bool,
    },

    /// Show container usage
    Info {
        #[arg(long)]
        json: bool,
    },

    /// Print the index tree of a file
    Tree {
        name: String,

        /// Show a single node by id
        #[arg(long)]
        node: Option<u32>,
    },

    /// Interactive shell over the same commands
    Shell,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let config = EngineConfig::builder().block_size(cli.block_size).build();

    match cli.command {
        Commands::Create => {
            let engine = StorageEngine::create(&cli.db, &cli.name, config)?;
            println!(
                "Created '{}' at {} ({} blocks of {} bytes)",
                engine.superblock().name,
                cli.db.display(),
                engine.superblock().total_blocks,
                engine.superblock().block_size
            );
            Ok(())
        }
        Commands::Shell => {
            let mut engine = StorageEngine::open_or_create(&cli.db, &cli.name, config)?;
            shell(&mut engine)
        }
        command => {
            let mut engine = StorageEngine::open(&cli.db, config)?;
            execute(&mut engine, command)?;
            engine.sync()?;
            Ok(())
        }
    }
}

fn shell(engine: &mut StorageEngine) -> CliResult<()> {
    let mut editor = DefaultEditor::new()?;
    println!(
        "Connected to '{}'. Type 'help' for commands, 'exit' to leave.",
        engine.superblock().name
    );

    loop {
        match editor.readline("pfs> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
                    break;
                }

                match ShellLine::try_parse_from(line.split_whitespace()) {
                    Ok(ShellLine {
                        command: Commands::Create | Commands::Shell,
                    }) => println!("Not available inside the shell"),
                    Ok(ShellLine { command }) => {
                        if let Err(err) = execute(engine, command) {
                            println!("Error: {}", err);
                        }
                    }
                    Err(err) => println!("{}", err),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }

    engine.sync()?;
    Ok(())
}

fn execute(engine: &mut StorageEngine, command: Commands) -> CliResult<()> {
    match command {
        Commands::Import { csv, as_name } => {
            let name = match as_name {
                Some(name) => name,
                None => default_name(&csv)?,
            };
            let records = loader::read_records(&csv)?;
            let fcb = engine.import(&name, records)?;
            println!(
                "Imported '{}': {} bytes in {} blocks starting at {}",
                fcb.name, fcb.file_size, fcb.used_blocks, fcb.start_block
            );
        }
        Commands::Find { name, key } => {
            let record = engine.find(&name, key)?;
            println!("{}: {}", record.key, record.payload);
        }
        Commands::Export { name, out } => {
            let records = engine.export(&name)?;
            match out {
                Some(path) => {
                    loader::write_payloads(BufWriter::new(File::create(&path)?), &records)?;
                    println!("Exported {} records to {}", records.len(), path.display());
                }
                None => loader::write_payloads(io::stdout().lock(), &records)?,
            }
        }
        Commands::Delete { name } => {
            engine.delete(&name)?;
            println!("Deleted '{}'", name);
        }
        Commands::List { json } => {
            let fcbs = engine.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&fcbs)?);
            } else {
                let mut table = Table::new();
                table.add_row(row!["Name", "Size", "Start", "Blocks", "Index", "Created"]);
                for fcb in &fcbs {
                    table.add_row(row![
                        fcb.name,
                        fcb.file_size,
                        fcb.start_block,
                        fcb.used_blocks,
                        format!("{}..{}", fcb.index_start, fcb.index_end),
                        fcb.created_at.format("%Y-%m-%d %H:%M:%S")
                    ]);
                }
                table.printstd();
            }
        }
        Commands::Info { json } => {
            let info = engine.info()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                let mut table = Table::new();
                table.add_row(row!["Name", info.name]);
                table.add_row(row!["Path", info.path.display()]);
                table.add_row(row![
                    "Created",
                    info.created_at.format("%Y-%m-%d %H:%M:%S")
                ]);
                table.add_row(row!["Total size", info.total_size]);
                table.add_row(row!["Block size", info.block_size]);
                table.add_row(row!["Header size", info.header_size]);
                table.add_row(row![
                    "Blocks",
                    format!("{} used / {} total", info.used_blocks, info.total_blocks)
                ]);
                table.add_row(row!["Remaining", format!("{} bytes", info.remaining_bytes)]);
                table.add_row(row!["Files", info.file_count]);
                table.add_row(row![
                    "Cache",
                    format!("{} hits / {} misses", info.cache_hits, info.cache_misses)
                ]);
                table.printstd();
            }
        }
        Commands::Tree { name, node } => match node {
            Some(id) => match engine.index_node(&name, id)? {
                Some(description) => println!("{}", description),
                None => println!("No node {} in the index of '{}'", id, name),
            },
            None => print!("{}", engine.index_dump(&name)?),
        },
        Commands::Create | Commands::Shell => {}
    }
    Ok(())
}

/// File name of `csv` used as the stored name
fn default_name(csv: &Path) -> CliResult<String> {
    csv.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| format!("cannot derive a name from {}", csv.display()).into())
}
