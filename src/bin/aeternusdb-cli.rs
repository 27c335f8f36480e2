//! Command-line front end for [`aeternusdb::engine::Engine`].
//!
//! ```text
//! aeternusdb-cli --db <path> put <key> <value>
//! aeternusdb-cli --db <path> get <key>
//! aeternusdb-cli --db <path> delete <key>
//! aeternusdb-cli --db <path> scan [--lo <key>] [--hi <key>] [--limit <n>]
//! aeternusdb-cli --db <path> flush
//! aeternusdb-cli --db <path> compact
//! aeternusdb-cli --db <path> info
//! ```
//!
//! Invoked with no subcommand, opens the database and drops into an
//! interactive REPL understanding the same verbs (`put`, `get`, `delete`,
//! `scan`, `flush`, `compact`, `info`, `exit`).

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use aeternusdb::engine::{Engine, EngineConfig, EngineError};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "aeternusdb-cli", version, about = "A tiny LSM-tree key-value store")]
struct Cli {
    /// Path to the database directory (created if absent).
    #[arg(global = true, short, long, default_value = "./aeternusdb-data")]
    db: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Insert or overwrite a key
    Put { key: String, value: String },
    /// Look up a key
    Get { key: String },
    /// Delete a key (writes a tombstone)
    Delete { key: String },
    /// Range scan over ascending keys
    Scan {
        #[arg(long)]
        lo: Option<String>,
        #[arg(long)]
        hi: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Force the active memtable out to a new L0 SSTable
    Flush,
    /// Run compaction until no level needs it
    Compact,
    /// Print per-level file counts/sizes and the memtable footprint
    Info,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let engine = match Engine::open(&cli.db, EngineConfig::default()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("error: failed to open database at {:?}: {e}", cli.db);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Some(command) => run_command(&engine, command),
        None => run_repl(&engine),
    };

    if let Err(e) = engine.close() {
        eprintln!("error: failed to close database: {e}");
        return ExitCode::FAILURE;
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_command(engine: &Engine, command: Command) -> Result<(), EngineError> {
    match command {
        Command::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Command::Get { key } => match engine.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Command::Delete { key } => {
            engine.delete(key.as_bytes())?;
            println!("OK");
        }
        Command::Scan { lo, hi, limit } => {
            let pairs = engine.scan(
                lo.as_deref().map(str::as_bytes),
                hi.as_deref().map(str::as_bytes),
                limit,
            )?;
            print_scan(&pairs);
        }
        Command::Flush => {
            engine.flush()?;
            println!("OK");
        }
        Command::Compact => {
            engine.compact()?;
            println!("OK");
        }
        Command::Info => print_info(engine)?,
    }
    Ok(())
}

fn print_scan(pairs: &[(Vec<u8>, Vec<u8>)]) {
    if pairs.is_empty() {
        println!("(empty)");
        return;
    }
    for (k, v) in pairs {
        println!("{} -> {}", String::from_utf8_lossy(k), String::from_utf8_lossy(v));
    }
    println!("({} entries)", pairs.len());
}

fn print_info(engine: &Engine) -> Result<(), EngineError> {
    let stats = engine.info()?;
    println!(
        "memtable: {} entries, {} bytes",
        stats.memtable_entries, stats.memtable_bytes
    );
    for (level, (count, bytes)) in stats
        .level_file_counts
        .iter()
        .zip(&stats.level_byte_sizes)
        .enumerate()
    {
        println!("L{level}: {count} files, {bytes} bytes");
    }
    Ok(())
}

fn run_repl(engine: &Engine) -> Result<(), EngineError> {
    println!("aeternusdb interactive shell. Commands: put get delete scan flush compact info exit");
    let stdin = io::stdin();
    print!("> ");
    io::stdout().flush().ok();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("put") => match (parts.next(), parts.next()) {
                (Some(k), Some(v)) => match engine.put(k.as_bytes(), v.as_bytes()) {
                    Ok(()) => println!("OK"),
                    Err(e) => println!("ERR {e}"),
                },
                _ => println!("usage: put <key> <value>"),
            },
            Some("get") => match parts.next() {
                Some(k) => match engine.get(k.as_bytes()) {
                    Ok(Some(v)) => println!("{}", String::from_utf8_lossy(&v)),
                    Ok(None) => println!("(nil)"),
                    Err(e) => println!("ERR {e}"),
                },
                None => println!("usage: get <key>"),
            },
            Some("delete") => match parts.next() {
                Some(k) => match engine.delete(k.as_bytes()) {
                    Ok(()) => println!("OK"),
                    Err(e) => println!("ERR {e}"),
                },
                None => println!("usage: delete <key>"),
            },
            Some("scan") => {
                let lo = parts.next().filter(|s| *s != "-");
                let hi = parts.next().filter(|s| *s != "-");
                match engine.scan(lo.map(str::as_bytes), hi.map(str::as_bytes), None) {
                    Ok(pairs) => print_scan(&pairs),
                    Err(e) => println!("ERR {e}"),
                }
            }
            Some("flush") => match engine.flush() {
                Ok(()) => println!("OK"),
                Err(e) => println!("ERR {e}"),
            },
            Some("compact") => match engine.compact() {
                Ok(()) => println!("OK"),
                Err(e) => println!("ERR {e}"),
            },
            Some("info") => {
                if let Err(e) = print_info(engine) {
                    println!("ERR {e}");
                }
            }
            Some("exit") | Some("quit") => {
                println!("bye");
                break;
            }
            Some(other) => println!("unknown command: {other}"),
            None => {}
        }
        print!("> ");
        io::stdout().flush().ok();
    }
    Ok(())
}
