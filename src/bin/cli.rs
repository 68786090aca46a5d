use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use cogstore::engine::{DocumentOptions, JsonLineStore, JsonStore, LineLogOptions};
use cogstore::{DocumentReader, DocumentWriter, Record, RecordReader, RecordWriter};
use serde_json::Value;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Inspect or edit a JSON document
    Doc {
        #[command(subcommand)]
        command: DocCommands,
    },
    /// Inspect or edit a JSON Lines log
    Log(LogArgs),
}

#[derive(Subcommand, Clone)]
enum DocCommands {
    Get { file: String, key: String },
    Set { file: String, key: String, value: String },
    Del { file: String, key: String },
    Keys { file: String },
    Dump { file: String },
    Clear { file: String },
}

#[derive(Args, Clone)]
struct LogArgs {
    /// Field records are keyed on
    #[arg(short, long, default_value = "id")]
    key: String,

    /// Refuse to add a record whose key is already present
    #[arg(short, long)]
    unique: bool,

    #[command(subcommand)]
    command: LogCommands,
}

#[derive(Subcommand, Clone)]
enum LogCommands {
    Read { file: String },
    Get {
        file: String,
        value: String,
        #[arg(short, long)]
        field: Option<String>,
        #[arg(short, long)]
        all: bool,
    },
    Add { file: String, record: String },
    Update {
        file: String,
        value: String,
        record: String,
        #[arg(short, long)]
        field: Option<String>,
    },
    Remove {
        file: String,
        value: String,
        #[arg(short, long)]
        field: Option<String>,
    },
    Clear { file: String },
}

fn parse_value(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

fn parse_record(raw: &str) -> anyhow::Result<Record> {
    match serde_json::from_str(raw)? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("record must be a JSON object, got {}", other),
    }
}

fn open_doc(data_dir: &Path, file: &str) -> anyhow::Result<JsonStore> {
    Ok(JsonStore::open_with(data_dir.join(file), DocumentOptions::default())?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Doc { command } => run_doc(&cli.data_dir, command).await,
        Commands::Log(args) => run_log(&cli.data_dir, args).await,
    }
}

async fn run_doc(data_dir: &Path, command: DocCommands) -> anyhow::Result<()> {
    match command {
        DocCommands::Get { file, key } => {
            let val = open_doc(data_dir, &file)?.get(&key).await?;
            println!("{}", serde_json::to_string_pretty(&val)?);
        }
        DocCommands::Set { file, key, value } => {
            open_doc(data_dir, &file)?.set(&key, parse_value(value)).await?;
            println!("OK");
        }
        DocCommands::Del { file, key } => {
            let removed = open_doc(data_dir, &file)?.delete(&key).await?;
            println!("{}", if removed.is_some() { "OK" } else { "NOT FOUND" });
        }
        DocCommands::Keys { file } => {
            let keys = open_doc(data_dir, &file)?.keys().await?;
            println!("{}", serde_json::to_string_pretty(&keys)?);
        }
        DocCommands::Dump { file } => {
            let doc = open_doc(data_dir, &file)?.snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        DocCommands::Clear { file } => {
            open_doc(data_dir, &file)?.clear(None).await?;
            println!("OK");
        }
    }
    Ok(())
}

async fn run_log(data_dir: &Path, args: LogArgs) -> anyhow::Result<()> {
    let mut options = LineLogOptions::new(args.key);
    if args.unique {
        options = options.unique_only();
    }
    let open = |file: &str| JsonLineStore::open(data_dir.join(file), options.clone());

    match args.command {
        LogCommands::Read { file } => {
            let records = open(&file)?.read_all().await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        LogCommands::Get { file, value, field, all } => {
            let log = open(&file)?;
            let value = parse_value(value);
            if all {
                let records = log.get_all(field.as_deref(), &value).await?;
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                let record = log.get(field.as_deref(), &value).await?;
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
        }
        LogCommands::Add { file, record } => {
            let added = open(&file)?.add(parse_record(&record)?).await?;
            println!("{}", if added { "OK" } else { "DUPLICATE" });
        }
        LogCommands::Update { file, value, record, field } => {
            let outcome = open(&file)?
                .update(field.as_deref(), &parse_value(value), parse_record(&record)?)
                .await?;
            println!("{:?}", outcome);
        }
        LogCommands::Remove { file, value, field } => {
            let removed = open(&file)?.remove(field.as_deref(), &parse_value(value)).await?;
            println!("Removed {}", removed);
        }
        LogCommands::Clear { file } => {
            open(&file)?.clear().await?;
            println!("OK");
        }
    }
    Ok(())
}
