//! CardVault CLI - operator commands for wrapped storage instances
//!
//! Every command opens the instance without a rotation daemon and closes
//! it before exiting, so it must not run against an instance a service
//! currently holds open.

use anyhow::{Context, Result, bail};
use cardvault_common::StoreConfig;
use cardvault_store::labels;
use cardvault_store::metadata::unix_now;
use cardvault_store::{KvEngine, MetadataRecord, RedbEngine, Storage, StoreLayout};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "cardvault-ctl")]
#[command(about = "CardVault storage admin CLI")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long, env = "CARDVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory, overrides the configuration file
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new storage instance
    Create {
        name: String,
        /// Seconds between rotations
        #[arg(long)]
        interval_secs: Option<u64>,
        /// Number of backups kept
        #[arg(long)]
        retention: Option<usize>,
    },
    /// Show the metadata record and backups of an instance
    Status { name: String },
    /// Write a value
    Put {
        name: String,
        key: String,
        value: String,
    },
    /// Read a value
    Get { name: String, key: String },
    /// Rotate now, regardless of schedule
    Rotate { name: String },
}

fn store_config(args: &Args) -> Result<StoreConfig> {
    let mut config = match &args.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.data_dir.clone_from(dir);
    }
    config.rotation.daemon = false;
    config.log.echo_stderr = false;
    Ok(config)
}

fn run(args: &Args, out: &mut impl Write) -> Result<()> {
    let mut config = store_config(args)?;

    match &args.command {
        Commands::Create {
            name,
            interval_secs,
            retention,
        } => {
            if let Some(secs) = interval_secs {
                config.rotation.interval_secs = *secs;
            }
            if let Some(retention) = retention {
                config.rotation.retention = *retention;
            }
            let storage = Storage::create(&config, name)
                .with_context(|| format!("failed to create '{name}'"))?;
            writeln!(out, "created {}", storage.location().display())?;
            storage.close()?;
        }
        Commands::Status { name } => {
            labels::validate_name(name)?;
            let layout = StoreLayout::new(&config.data_dir, name, RedbEngine::EXTENSION);
            let meta = MetadataRecord::load(&layout.metadata_file(), name)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&meta)?)?;
            writeln!(out, "current label: {}", meta.current_label())?;
            writeln!(
                out,
                "next rotation in: {}s",
                (meta.next_rotation_due() - unix_now()).max(0)
            )?;
            for label in &meta.snapshot_names {
                let path = layout.backup(label);
                if let Ok(file) = std::fs::metadata(&path) {
                    writeln!(out, "backup {label}: {} bytes", file.len())?;
                }
            }
        }
        Commands::Put { name, key, value } => {
            let storage = Storage::reacquire(&config, name)?;
            storage.put(key.as_bytes(), value.as_bytes())?;
            storage.close()?;
        }
        Commands::Get { name, key } => {
            let storage = Storage::reacquire(&config, name)?;
            let value = storage.get(key.as_bytes())?;
            storage.close()?;
            match value {
                Some(value) => writeln!(out, "{}", String::from_utf8_lossy(&value))?,
                None => bail!("key '{key}' not found in '{name}'"),
            }
        }
        Commands::Rotate { name } => {
            let storage = Storage::reacquire(&config, name)?;
            let report = storage.rotate()?;
            // close saves the record again
            storage.close()?;
            info!("Rotated '{}' into {}", name, report.backup_path.display());
            writeln!(
                out,
                "rotated into {} ({} bytes, {} ms)",
                report.label,
                report.bytes_copied,
                report.duration.as_millis()
            )?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    run(&args, &mut std::io::stdout().lock())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exec(dir: &std::path::Path, argv: &[&str]) -> Result<String> {
        let mut full = vec!["cardvault-ctl", "--data-dir", dir.to_str().unwrap()];
        full.extend_from_slice(argv);
        let args = Args::try_parse_from(full)?;
        let mut out = Vec::new();
        run(&args, &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn test_create_put_get() {
        let dir = tempdir().unwrap();

        let out = exec(dir.path(), &["create", "users", "--retention", "3"]).unwrap();
        assert!(out.contains("users.redb"));

        exec(dir.path(), &["put", "users", "sam", "{\"cards\":3}"]).unwrap();
        let out = exec(dir.path(), &["get", "users", "sam"]).unwrap();
        assert_eq!(out.trim(), "{\"cards\":3}");

        assert!(exec(dir.path(), &["get", "users", "alex"]).is_err());
    }

    #[test]
    fn test_rotate_and_status() {
        let dir = tempdir().unwrap();
        exec(dir.path(), &["create", "users", "--interval-secs", "60"]).unwrap();
        exec(dir.path(), &["put", "users", "k", "v"]).unwrap();

        let out = exec(dir.path(), &["rotate", "users"]).unwrap();
        assert!(out.starts_with("rotated into beta"));

        let out = exec(dir.path(), &["status", "users"]).unwrap();
        assert!(out.contains("\"LastJournalSnapshot\": 1"));
        assert!(out.contains("current label: beta"));
        assert!(out.contains("backup beta:"));
        assert!(!out.contains("backup alpha:"));
    }

    #[test]
    fn test_create_twice_fails() {
        let dir = tempdir().unwrap();
        exec(dir.path(), &["create", "users"]).unwrap();
        let err = exec(dir.path(), &["create", "users"]).unwrap_err();
        assert!(err.to_string().contains("failed to create 'users'"));
    }

    #[test]
    fn test_status_unknown_instance() {
        let dir = tempdir().unwrap();
        assert!(exec(dir.path(), &["status", "nobody"]).is_err());
    }
}
