//! pvault: encrypted backup and restore of directory-service user pools
//!
//! Commands:
//!   backup            - collect matching pools and write a (sealed) archive or tree
//!   list              - list pools matching a pattern
//!   restore           - recreate pools and users from an archive or tree
//!   decrypt           - turn a sealed archive back into plain tar.gz
//!   generate-datakey  - create a KMS data key file for reuse across backups
//!   init-local-kms    - create a local key-encryption key file
//!   config show       - display the effective configuration

mod keys;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use pvault_backup::{
    sealer, ArchiveSource, BackupSource, Collector, Directory, RestoreOrchestrator, StoreSource,
};
use pvault_core::config::VaultConfig;
use pvault_crypto::{DataKeyFormat, DetectionPolicy, EnvelopeFrame, KeySpec, LocalKms};
use pvault_storage::{build_for_location, BackupLocation, BlobStore};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "pvault",
    version,
    about = "Encrypted backup and restore for user pools",
    long_about = "pvault: back up user pools and their users to S3 or local files, \
                  optionally sealed with KMS envelope encryption, and restore them"
)]
struct Cli {
    /// Path to config.toml
    #[arg(
        long,
        short = 'c',
        env = "PVAULT_CONFIG",
        default_value = "/etc/pvault/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides log.level
    #[arg(long, env = "PVAULT_LOG")]
    log: Option<String>,

    /// Log format; overrides log.format
    #[arg(long, env = "PVAULT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

/// Key-management flags shared by backup, restore, and decrypt
#[derive(Args, Debug, Default)]
struct KmsArgs {
    /// KMS key id (alias, ARN, or local:<name>); enables encryption
    #[arg(long)]
    kms_key_id: Option<String>,

    /// KMS region (default: the storage region)
    #[arg(long)]
    kms_region: Option<String>,

    /// Wrapped data key to reuse (file:///path or s3://bucket/key)
    #[arg(long)]
    data_key_path: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Back up user pools matching a pattern
    ///
    /// A URI ending in .tar.gz receives one archive (sealed when a KMS key is
    /// configured); any other URI receives a tree of <poolId>/<file> objects.
    Backup {
        /// Backup destination (s3://bucket/prefix/pools.tar.gz or file:///path/pools.tar.gz)
        #[arg(long)]
        uri: String,
        /// Regular expression matched against pool names (default: backup.pattern)
        #[arg(long)]
        pattern: Option<String>,
        /// Pools collected concurrently (default: backup.concurrency)
        #[arg(long)]
        concurrency: Option<usize>,
        #[command(flatten)]
        kms: KmsArgs,
    },

    /// List user pools matching a pattern
    List {
        /// Regular expression matched against pool names (default: backup.pattern)
        #[arg(long)]
        pattern: Option<String>,
    },

    /// Restore user pools from a backup
    Restore {
        /// Backup source: a .tar.gz archive or a tree prefix
        #[arg(long)]
        uri: String,
        /// Regular expression matched against backed-up pool ids (default: restore.pattern)
        #[arg(long)]
        pattern: Option<String>,
        #[command(flatten)]
        kms: KmsArgs,
    },

    /// Decrypt a sealed archive to plain tar.gz
    Decrypt {
        /// Sealed archive (s3:// or file://)
        #[arg(long)]
        input: String,
        /// Destination for the decrypted archive (s3:// or file://)
        #[arg(long)]
        output: String,
        #[command(flatten)]
        kms: KmsArgs,
    },

    /// Generate a data key through KMS and write it as a data-key file
    #[command(name = "generate-datakey")]
    GenerateDatakey {
        /// KMS key id used to wrap the data key
        #[arg(long)]
        kms_key_id: String,
        /// KMS region (default: the storage region)
        #[arg(long)]
        kms_region: Option<String>,
        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Output format (json, base64)
        #[arg(long, default_value = "json")]
        format: DataKeyFormat,
        /// Data key spec (AES_256, AES_128)
        #[arg(long, default_value = "AES_256")]
        spec: KeySpec,
        /// Produce random test material without calling KMS
        #[arg(long)]
        test: bool,
    },

    /// Create a local key-encryption key file
    #[command(name = "init-local-kms")]
    InitLocalKms {
        /// Key name; the key id becomes local:<name>
        #[arg(long, default_value = "pvault")]
        name: String,
        /// Key file to create
        #[arg(long, short = 'o')]
        output: PathBuf,
        /// Overwrite an existing key file
        #[arg(long)]
        force: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (defaults + config file + environment)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file_config = load_config(&cli.config).await?;
    let found = file_config.is_some();
    let mut config = file_config.unwrap_or_default();
    config.apply_env();

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.unwrap_or(if config.log.format == "json" {
        LogFormat::Json
    } else {
        LogFormat::Text
    });
    init_logging(&level, format);

    if !found {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    match cli.command {
        Commands::Backup {
            uri,
            pattern,
            concurrency,
            kms,
        } => {
            apply_kms_args(&mut config, kms);
            if let Some(p) = pattern {
                config.backup.pattern = p;
            }
            if let Some(n) = concurrency {
                config.backup.concurrency = n;
            }
            cmd_backup(&config, &uri).await
        }
        Commands::List { pattern } => {
            cmd_list(&config, pattern.as_deref().unwrap_or(&config.backup.pattern)).await
        }
        Commands::Restore { uri, pattern, kms } => {
            apply_kms_args(&mut config, kms);
            if let Some(p) = pattern {
                config.restore.pattern = p;
            }
            cmd_restore(&config, &uri).await
        }
        Commands::Decrypt { input, output, kms } => {
            apply_kms_args(&mut config, kms);
            cmd_decrypt(&config, &input, &output).await
        }
        Commands::GenerateDatakey {
            kms_key_id,
            kms_region,
            output,
            format,
            spec,
            test,
        } => {
            apply_kms_args(
                &mut config,
                KmsArgs {
                    kms_key_id: Some(kms_key_id),
                    kms_region,
                    data_key_path: None,
                },
            );
            cmd_generate_datakey(&config, output.as_deref(), format, spec, test).await
        }
        Commands::InitLocalKms {
            name,
            output,
            force,
        } => cmd_init_local_kms(&name, &output, force),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config, found),
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// Parse the config file, or `None` when it does not exist.
async fn load_config(path: &Path) -> Result<Option<VaultConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config: {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("parsing config: {}", path.display()))?;
    Ok(Some(config))
}

/// CLI flags win over the environment and the config file.
fn apply_kms_args(config: &mut VaultConfig, args: KmsArgs) {
    if let Some(key_id) = args.kms_key_id.filter(|k| !k.is_empty()) {
        config.kms.key_id = key_id;
        config.kms.enabled = true;
    }
    if let Some(region) = args.kms_region {
        config.kms.region = Some(region);
    }
    if let Some(path) = args.data_key_path {
        config.kms.data_key_path = Some(path);
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Shared plumbing ───────────────────────────────────────────────────────────

async fn open_directory(config: &VaultConfig) -> Result<Arc<dyn Directory>> {
    #[cfg(feature = "aws")]
    return Ok(Arc::new(
        pvault_aws::CognitoDirectory::new(&config.storage.region).await,
    ));
    #[cfg(not(feature = "aws"))]
    {
        let _ = config;
        anyhow::bail!(
            "user pool access requires the aws feature: cargo build -p pvault-cli --features aws"
        )
    }
}

fn open_store(config: &VaultConfig, location: &BackupLocation) -> Result<BlobStore> {
    let op = build_for_location(&config.storage, location)
        .with_context(|| format!("building storage operator for {location}"))?;
    Ok(BlobStore::new(op))
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("invalid pattern: {pattern}"))
}

fn detection_policy(config: &VaultConfig) -> Result<DetectionPolicy> {
    Ok(config.backup.detection.parse()?)
}

/// Token cancelled on SIGINT or SIGTERM.
fn cancel_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        warn!("cancelling: in-flight work will be discarded");
        trigger.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut sigterm), Ok(mut sigint)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        warn!("could not register signal handlers; Ctrl-C will not cancel cleanly");
        return std::future::pending().await;
    };
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("received Ctrl-C");
    }
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `pvault backup` ───────────────────────────────────────────────────────────

async fn cmd_backup(config: &VaultConfig, uri: &str) -> Result<()> {
    let pattern = compile_pattern(&config.backup.pattern)?;
    let location = BackupLocation::parse(uri)?;
    let store = open_store(config, &location)?;
    let cipher = keys::build_cipher(config).await?;
    let directory = open_directory(config).await?;
    let cancel = cancel_on_signal();

    let pb = make_spinner("backup");
    pb.set_message(format!("collecting pools matching {pattern}"));
    let collected = Collector::new(directory)
        .with_concurrency(config.backup.concurrency)
        .collect_all(&pattern, &cancel)
        .await;
    pb.finish_and_clear();
    let (result, archive) = collected.context("backup failed")?;

    println!("{result}");
    if archive.is_empty() {
        anyhow::bail!(
            "no pools were backed up: all {} matching pools failed",
            result.failures.len()
        );
    }

    if location.is_archive() {
        let bytes = sealer::seal_and_store(&archive, cipher.as_ref(), &store, &location.key(), &cancel)
            .await
            .with_context(|| format!("writing archive {location}"))?;
        println!("Archive written: {location} ({bytes} bytes)");
    } else {
        let blobs = sealer::store_tree(&archive, cipher.as_ref(), &store, &location.prefix(), &cancel)
            .await
            .with_context(|| format!("writing backup tree {location}"))?;
        println!("Backup tree written: {location} ({blobs} objects)");
    }
    if let Some(cipher) = &cipher {
        println!("  encrypted with KMS key {}", cipher.key_id());
    }

    if !result.is_complete() {
        anyhow::bail!(
            "{} of {} pools failed: {}",
            result.failures.len(),
            result.failures.len() + result.succeeded.len(),
            result.failed_ids().join(", ")
        );
    }
    Ok(())
}

// ── `pvault list` ─────────────────────────────────────────────────────────────

async fn cmd_list(config: &VaultConfig, pattern: &str) -> Result<()> {
    let pattern = compile_pattern(pattern)?;
    let directory = open_directory(config).await?;
    let pools = directory
        .list_resources(&pattern)
        .await
        .context("listing user pools")?;

    if pools.is_empty() {
        println!("No user pools match {pattern}");
        return Ok(());
    }
    println!("User pools (total: {})", pools.len());
    println!("----------------------------------------");
    for pool in &pools {
        println!("ID:   {}", pool.id);
        println!("Name: {}", pool.name);
        println!();
    }
    Ok(())
}

// ── `pvault restore` ──────────────────────────────────────────────────────────

async fn cmd_restore(config: &VaultConfig, uri: &str) -> Result<()> {
    let pattern = compile_pattern(&config.restore.pattern)?;
    let policy = detection_policy(config)?;
    let location = BackupLocation::parse(uri)?;
    let store = open_store(config, &location)?;
    let cipher = keys::build_cipher(config).await?;
    let directory = open_directory(config).await?;
    let cancel = cancel_on_signal();

    let source: Box<dyn BackupSource> = if location.is_archive() {
        let archive = ArchiveSource::load(&store, &location.key(), cipher.as_ref(), policy)
            .await
            .with_context(|| format!("opening archive {location}"))?;
        Box::new(archive)
    } else {
        let mut tree = StoreSource::new(store, location.prefix()).with_policy(policy);
        if let Some(cipher) = cipher {
            tree = tree.with_cipher(cipher);
        }
        Box::new(tree)
    };

    let pb = make_spinner("restore");
    pb.set_message(format!("restoring pools matching {pattern}"));
    let restored = RestoreOrchestrator::new(directory)
        .restore_all(source.as_ref(), &pattern, &cancel)
        .await;
    pb.finish_and_clear();
    let report = restored.context("restore failed")?;

    println!("{report}");
    if !report.is_success() {
        anyhow::bail!("restore finished with errors");
    }
    Ok(())
}

// ── `pvault decrypt` ──────────────────────────────────────────────────────────

async fn cmd_decrypt(config: &VaultConfig, input: &str, output: &str) -> Result<()> {
    let cipher = keys::build_cipher(config)
        .await?
        .context("decrypt needs a KMS key id (--kms-key-id or KMS_KEY_ID)")?;

    let input = BackupLocation::parse(input)?;
    let output = BackupLocation::parse(output)?;
    let sealed = open_store(config, &input)?
        .read_blob(&input.key())
        .await
        .with_context(|| format!("reading {input}"))?;
    let frame = EnvelopeFrame::from_bytes(&sealed)
        .with_context(|| format!("{input} is not a sealed archive"))?;

    if let Some(uri) = config.kms.data_key_path.as_deref() {
        let expected = keys::read_data_key(config, uri).await?;
        if expected != frame.wrapped_key {
            warn!(
                data_key = uri,
                "archive was sealed with a different data key; using the key stored in the archive"
            );
        }
    }

    let plaintext = cipher
        .decrypt(&frame)
        .await
        .with_context(|| format!("decrypting {input}"))?;
    let len = plaintext.len();
    keys::write_output(config, &output, plaintext).await?;

    println!("Decrypted {input} -> {output} ({len} bytes)");
    Ok(())
}

// ── `pvault generate-datakey` ─────────────────────────────────────────────────

async fn cmd_generate_datakey(
    config: &VaultConfig,
    output: Option<&Path>,
    format: DataKeyFormat,
    spec: KeySpec,
    test: bool,
) -> Result<()> {
    let (key_id, generated) = if test {
        let key_id = keys::test_key_id(&config.kms.key_id);
        (key_id, keys::test_data_key(spec))
    } else {
        let kms = keys::build_kms(config).await?;
        let key_id = keys::effective_key_id(config);
        let generated = kms
            .generate_data_key(&key_id, spec)
            .await
            .with_context(|| format!("generating data key under {key_id}"))?;
        (key_id, generated)
    };

    let rendered = pvault_crypto::datakey::render(&key_id, spec, &generated, format)?;
    drop(generated);

    match output {
        Some(path) => {
            keys::write_private_file(path, rendered.as_bytes())?;
            info!(key_id = %key_id, spec = %spec, test, "data key written");
            println!("Data key saved to {}", path.display());
        }
        None => print!("{}", rendered.as_str()),
    }
    Ok(())
}

// ── `pvault init-local-kms` ───────────────────────────────────────────────────

fn cmd_init_local_kms(name: &str, output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to replace it (backups sealed with the old key become unreadable)",
            output.display()
        );
    }
    let kms = LocalKms::generate(name);
    kms.save(output)
        .with_context(|| format!("writing key file {}", output.display()))?;

    println!("Local key written: {}", output.display());
    println!("  key id: {}", kms.key_id());
    println!();
    println!("Add to config.toml:");
    println!("  [kms]");
    println!("  enabled = true");
    println!("  backend = \"local\"");
    println!("  key_id = \"{}\"", kms.key_id());
    println!("  local_key_file = \"{}\"", output.display());
    Ok(())
}

// ── `pvault config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &VaultConfig, config_path: &Path, found: bool) -> Result<()> {
    if found {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
