//! # DOMP CLI
//!
//! Command-line interface for creating, mining, signing and validating
//! decentralized marketplace events.

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::*;
use domp_core::{
    config::{DompConfig, PowConfig},
    escrow::{EscrowManager, EscrowSummary},
    mine_pow_parallel,
    pow::MinedEvent,
    reputation::ReputationSummary,
    utils::*,
    CancelToken, Event, EventContent, EventValidator, Keys, MiningLimits, ProductListing,
    ReputationEngine, UnsignedEvent, PROTOCOL_VERSION,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "domp")]
#[command(about = "Decentralized marketplace protocol: events, anti-spam proofs and validation")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// More log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new key pair
    Keygen {
        /// Write the key pair to this file instead of printing the secret
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the public key of a key file
    ShowKey {
        /// Key file written by `keygen`
        key_file: PathBuf,
    },
    /// Create, mine and sign a product listing
    CreateListing {
        /// Key file of the seller
        #[arg(short, long)]
        key_file: PathBuf,
        /// Product name
        #[arg(short = 'n', long)]
        product_name: String,
        /// Product description
        #[arg(short, long)]
        description: String,
        /// Price in satoshis
        #[arg(short, long)]
        price: i64,
        /// Product category
        #[arg(long)]
        category: Option<String>,
        /// PoW difficulty in bits (defaults to the configured difficulty)
        #[arg(long)]
        difficulty: Option<u32>,
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Add a proof-of-work tag to an unsigned event
    Mine {
        /// Unsigned event JSON
        event_file: PathBuf,
        /// PoW difficulty in bits (defaults to the configured difficulty)
        #[arg(short, long)]
        difficulty: Option<u32>,
        /// Mining threads (defaults to the configured worker count)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Sign the mined event with this key file
        #[arg(short, long)]
        key_file: Option<PathBuf>,
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Sign an unsigned event that already carries its anti-spam tag
    Sign {
        /// Unsigned event JSON
        event_file: PathBuf,
        /// Key file of the author
        #[arg(short, long)]
        key_file: PathBuf,
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compute the id of an event
    Id {
        /// Signed or unsigned event JSON
        event_file: PathBuf,
    },
    /// Validate a single event
    Validate {
        /// Event JSON
        event_file: PathBuf,
        /// Skip id and signature verification
        #[arg(long)]
        skip_signature: bool,
    },
    /// Validate a complete transaction chain
    ValidateChain {
        /// JSON array of listing, bid, acceptance, payment and receipt
        events_file: PathBuf,
    },
    /// Aggregate seller reputation from receipt events
    Reputation {
        /// JSON array of events
        events_file: PathBuf,
        /// Only show these pubkeys
        #[arg(short, long)]
        pubkey: Vec<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Open an HTLC escrow for an accepted bid and show its terms
    Escrow {
        /// JSON array starting with listing, bid and acceptance
        events_file: PathBuf,
        /// Show the time remaining at this Unix time instead of now
        #[arg(long)]
        at: Option<u64>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

/// On-disk key pair.
#[derive(Serialize, Deserialize)]
struct KeyFile {
    private_key: String,
    public_key: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => DompConfig::from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => DompConfig::default(),
    };
    debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Keygen { output } => {
            let keys = Keys::generate();
            println!("{}", "Generated new key pair".green().bold());
            println!("{}: {}", "Public Key".yellow().bold(), keys.public_key_hex().cyan());
            match output {
                Some(path) => {
                    let file = KeyFile {
                        private_key: keys.secret_key_hex(),
                        public_key: keys.public_key_hex(),
                    };
                    write_json(&file, Some(&path))?;
                }
                None => {
                    println!("{}: {}", "Private Key".yellow().bold(), keys.secret_key_hex());
                    println!("{}", "Keep the private key secret.".bright_black());
                }
            }
        }

        Commands::ShowKey { key_file } => {
            let keys = load_keys(&key_file)?;
            println!("{}: {}", "Public Key".yellow().bold(), keys.public_key_hex().cyan());
        }

        Commands::CreateListing {
            key_file,
            product_name,
            description,
            price,
            category,
            difficulty,
            output,
        } => {
            let keys = load_keys(&key_file)?;
            let mut listing = ProductListing::new(&product_name, &description, price);
            listing.category = category;
            let content = EventContent::ProductListing(listing);
            EventValidator::from_config(&config.validation)?.check_content(&content)?;

            let difficulty = difficulty.unwrap_or(config.pow.default_difficulty);
            println!(
                "{}",
                format!("Generating proof-of-work (difficulty {difficulty})...").green()
            );
            let draft = UnsignedEvent::new(keys.public_key_hex(), &content)?;
            let mined = mine(draft, difficulty, &config.pow, config.pow.workers).await?;
            let event = mined.draft.sign(&keys)?;

            print_event_header(&event, mined.attempts);
            write_json(&event, output.as_deref())?;
        }

        Commands::Mine {
            event_file,
            difficulty,
            workers,
            key_file,
            output,
        } => {
            let draft: UnsignedEvent = read_json(&event_file)?;
            let difficulty = difficulty.unwrap_or(config.pow.default_difficulty);
            let workers = workers.unwrap_or(config.pow.workers);
            println!(
                "{}",
                format!("Mining kind {} at difficulty {difficulty} on {workers} worker(s)...", draft.kind)
                    .green()
            );
            let mined = mine(draft, difficulty, &config.pow, workers).await?;
            println!("{}: {}", "Nonce".yellow().bold(), mined.nonce);
            println!("{}: {}", "Attempts".yellow().bold(), mined.attempts);
            println!("{}: {}", "Event ID".cyan().bold(), mined.id);

            match key_file {
                Some(key_file) => {
                    let event = mined.draft.sign(&load_keys(&key_file)?)?;
                    write_json(&event, output.as_deref())?;
                }
                None => write_json(&mined.draft, output.as_deref())?,
            }
        }

        Commands::Sign {
            event_file,
            key_file,
            output,
        } => {
            let draft: UnsignedEvent = read_json(&event_file)?;
            let event = draft.sign(&load_keys(&key_file)?)?;
            println!("{}: {}", "Event ID".cyan().bold(), event.id);
            write_json(&event, output.as_deref())?;
        }

        Commands::Id { event_file } => {
            let draft: UnsignedEvent = read_json(&event_file)?;
            println!("{}: {}", "Event ID".green().bold(), draft.compute_id().cyan());
        }

        Commands::Validate {
            event_file,
            skip_signature,
        } => {
            let validator = EventValidator::from_config(&config.validation)?;
            let value: serde_json::Value = read_json(&event_file)?;
            match validator.validate_value(&value, !skip_signature) {
                Ok((event, content)) => {
                    println!("{}", "Event is valid".green().bold());
                    println!("{}: {}", "Event ID".yellow().bold(), event.id);
                    println!("{}: {}", "Kind".yellow().bold(), content.kind());
                    println!("{}: {}", "Author".yellow().bold(), short_key(&event.pubkey));
                    println!("{}: {}", "Created".yellow().bold(), format_timestamp(event.created_at));
                }
                Err(e) => {
                    println!("{} ({}): {}", "Invalid event".red().bold(), e.stage(), e);
                    bail!("validation failed");
                }
            }
        }

        Commands::ValidateChain { events_file } => {
            let validator = EventValidator::from_config(&config.validation)?;
            let events: Vec<Event> = read_json(&events_file)?;
            match validator.validate_chain(&events) {
                Ok(contents) => {
                    println!("{}", "Transaction chain is valid".green().bold());
                    println!("{}", "═".repeat(50).bright_black());
                    for (event, content) in events.iter().zip(&contents) {
                        println!(
                            "{:<24} {}",
                            content.kind().name().yellow(),
                            short_key(&event.id).cyan()
                        );
                    }
                    println!("{}", "═".repeat(50).bright_black());
                }
                Err(e) => {
                    println!("{} ({}): {}", "Invalid chain".red().bold(), e.stage(), e);
                    bail!("chain validation failed");
                }
            }
        }

        Commands::Reputation {
            events_file,
            pubkey,
            json,
        } => {
            let events: Vec<Event> = read_json(&events_file)?;
            let engine = ReputationEngine::new(config.reputation.clone());
            let added = engine.ingest_events(&events)?;
            info!(added, "receipts scored");

            let pubkeys = if pubkey.is_empty() { engine.pubkeys() } else { pubkey };
            let mut rows: Vec<(ReputationSummary, f64)> = pubkeys
                .iter()
                .map(|p| (engine.summary(p), engine.trust_score(p)))
                .collect();
            rows.sort_by(|a, b| b.0.overall_score.total_cmp(&a.0.overall_score));

            if json {
                let report: Vec<serde_json::Value> = rows
                    .iter()
                    .map(|(summary, trust)| {
                        serde_json::json!({ "summary": summary, "trust_score": trust })
                    })
                    .collect();
                write_json(&report, None)?;
            } else {
                print_reputation(&rows);
            }
        }

        Commands::Escrow {
            events_file,
            at,
            json,
        } => {
            let events: Vec<Event> = read_json(&events_file)?;
            let [listing, bid, acceptance, ..] = events.as_slice() else {
                bail!("expected at least a listing, a bid and an acceptance");
            };
            let validator = EventValidator::from_config(&config.validation)?;
            validator
                .validate_chain(&events[..3])
                .context("escrow events do not form a valid chain")?;

            let manager = EscrowManager::new(config.escrow.default_timeout_blocks);
            manager.create_from_events(listing, bid, acceptance)?;
            let Some(summary) = manager.summary(&listing.id, at.unwrap_or_else(now_unix)) else {
                bail!("escrow {} was not recorded", listing.id);
            };

            if json {
                write_json(&summary, None)?;
            } else {
                print_escrow(&summary);
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Mine on a blocking thread; the configured timeout trips the cancel token.
async fn mine(
    draft: UnsignedEvent,
    difficulty: u32,
    pow: &PowConfig,
    workers: usize,
) -> Result<MinedEvent> {
    let cancel = CancelToken::new();
    let limits = MiningLimits::with_max_attempts(pow.max_attempts);
    let worker_cancel = cancel.clone();
    let mut task = tokio::task::spawn_blocking(move || {
        mine_pow_parallel(&draft, difficulty, &limits, &worker_cancel, workers)
    });

    let mined = match pow.timeout() {
        Some(timeout) => match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => joined?,
            Err(_) => {
                cancel.cancel();
                let stopped = task.await?;
                bail!(
                    "mining timed out after {}s ({})",
                    timeout.as_secs(),
                    stopped.err().map(|e| e.to_string()).unwrap_or_default()
                );
            }
        },
        None => task.await?,
    };
    Ok(mined?)
}

fn load_keys(path: &Path) -> Result<Keys> {
    let file: KeyFile = read_json(path)?;
    let keys = Keys::from_secret_hex(&file.private_key)
        .with_context(|| format!("invalid private key in {}", path.display()))?;
    if keys.public_key_hex() != file.public_key {
        bail!("public key in {} does not match its private key", path.display());
    }
    Ok(keys)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            println!("{}: {}", "Written to".yellow().bold(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn print_event_header(event: &Event, attempts: u64) {
    println!();
    println!("{}", "Event Created Successfully!".green().bold());
    println!("{}", "═".repeat(50).bright_black());
    println!("{}: {}", "Event ID".yellow().bold(), event.id);
    println!("{}: {}", "Kind".yellow().bold(), event.kind);
    println!("{}: {}", "Author".yellow().bold(), short_key(&event.pubkey));
    println!("{}: {}", "Created".yellow().bold(), format_timestamp(event.created_at));
    println!("{}: {}", "PoW Attempts".yellow().bold(), attempts);
    println!("{}: {}", "Protocol".yellow().bold(), PROTOCOL_VERSION);
    println!("{}", "═".repeat(50).bright_black());
}

fn print_escrow(summary: &EscrowSummary) {
    println!("{}", "Escrow Created".green().bold());
    println!("{}", "═".repeat(50).bright_black());
    println!("{}: {}", "Transaction".yellow().bold(), short_key(&summary.transaction_id));
    println!("{}: {}", "State".yellow().bold(), summary.state);
    println!("{}: {}", "Payment Hash".yellow().bold(), summary.payment_hash.cyan());
    println!(
        "{}: {} sats ({} BTC)",
        "Purchase".yellow().bold(),
        summary.purchase_amount_sats,
        satoshi_to_btc(summary.purchase_amount_sats)
    );
    println!(
        "{}: {} / {} sats",
        "Collateral (buyer/seller)".yellow().bold(),
        summary.buyer_collateral_sats,
        summary.seller_collateral_sats
    );
    println!(
        "{}: {} sats ({} BTC)",
        "Total Locked".yellow().bold(),
        summary.total_locked_sats,
        satoshi_to_btc(summary.total_locked_sats)
    );
    println!("{}: {}", "Expires".yellow().bold(), format_timestamp(summary.expires_at));
    println!("{}: {}s", "Time Remaining".yellow().bold(), summary.time_remaining_secs);
    println!("{}", "═".repeat(50).bright_black());
}

fn print_reputation(rows: &[(ReputationSummary, f64)]) {
    if rows.is_empty() {
        println!("{}", "No reputation data".yellow());
        return;
    }
    println!(
        "{:<20} {:>6} {:<14} {:>5} {:>12} {:>6}",
        "Seller".bold(),
        "Score".bold(),
        "Reliability".bold(),
        "Txs".bold(),
        "Volume BTC".bold(),
        "Trust".bold()
    );
    println!("{}", "═".repeat(70).bright_black());
    for (summary, trust) in rows {
        println!(
            "{:<20} {:>6.2} {:<14} {:>5} {:>12.8} {:>6.3}",
            summary.pubkey,
            summary.overall_score,
            summary.reliability.to_string(),
            summary.total_transactions,
            summary.total_volume_btc,
            trust
        );
    }
}
