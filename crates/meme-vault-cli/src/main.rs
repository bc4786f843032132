use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use meme_vault_api::{MemeVaultApi, StoreConfig};
use meme_vault_core::{MemeId, MemePatch};
use meme_vault_store_json::{FileStorage, DOCUMENT_FILE, SNAPSHOT_FILE};
use serde_json::Value;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "memes")]
#[command(about = "Meme Vault CLI")]
struct Cli {
    #[arg(long, env = "MEME_VAULT_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,
    #[arg(long, env = "MEME_VAULT_DOCUMENT")]
    document: Option<PathBuf>,
    #[arg(long, env = "MEME_VAULT_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    List,
    Show(ShowArgs),
    Update(UpdateArgs),
    Reset,
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommand,
    },
    Seed(SeedArgs),
}

#[derive(Debug, Subcommand)]
enum SnapshotCommand {
    Ensure,
    Status,
}

#[derive(Debug, Args)]
struct ShowArgs {
    id: String,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    id: String,
    /// JSON object with the fields to change.
    #[arg(long)]
    patch: String,
}

#[derive(Debug, Args)]
struct SeedArgs {
    #[arg(long)]
    from: PathBuf,
    /// Overwrite an existing document.
    #[arg(long, default_value_t = false)]
    force: bool,
}

impl Cli {
    fn store_config(&self) -> StoreConfig {
        StoreConfig {
            document_path: self.document.clone().unwrap_or_else(|| self.data_dir.join(DOCUMENT_FILE)),
            snapshot_path: self.snapshot.clone().unwrap_or_else(|| self.data_dir.join(SNAPSHOT_FILE)),
            serialize_writes: false,
        }
    }

    /// Seeding and snapshot inspection must not capture a snapshot as a side effect.
    fn open_api(&self) -> MemeVaultApi {
        let config = self.store_config();
        match self.command {
            Command::Seed(_) | Command::Snapshot { .. } => {
                let storage = FileStorage::new(config.document_path, config.snapshot_path);
                MemeVaultApi::unsnapshotted(Arc::new(storage), false)
            }
            _ => MemeVaultApi::open(&config),
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn parse_id(raw: &str) -> Result<MemeId> {
    MemeId::parse(raw).ok_or_else(|| anyhow!("meme id must be an integer, got {raw:?}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let api = cli.open_api();
    match cli.command {
        Command::List => {
            let records = api.list()?;
            emit_json(serde_json::json!({ "records": records }))
        }
        Command::Show(args) => {
            let record = api.get(parse_id(&args.id)?)?;
            emit_json(serde_json::to_value(&record).context("failed to serialize meme")?)
        }
        Command::Update(args) => {
            let id = parse_id(&args.id)?;
            let patch: MemePatch =
                serde_json::from_str(&args.patch).context("--patch must be a JSON object")?;
            let record = api.update(id, &patch)?;
            emit_json(serde_json::to_value(&record).context("failed to serialize meme")?)
        }
        Command::Reset => {
            let records = api.reset()?;
            emit_json(serde_json::json!({ "records": records }))
        }
        Command::Snapshot { command } => match command {
            SnapshotCommand::Ensure => {
                let created = api.ensure_snapshot()?;
                emit_json(serde_json::json!({ "created": created }))
            }
            SnapshotCommand::Status => {
                let status = api.snapshot_status()?;
                emit_json(serde_json::to_value(&status).context("failed to serialize status")?)
            }
        },
        Command::Seed(args) => {
            let result = api.seed_from_file(&args.from, args.force)?;
            emit_json(serde_json::to_value(&result).context("failed to serialize seed result")?)
        }
    }
}
