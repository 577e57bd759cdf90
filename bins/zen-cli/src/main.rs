//! zen-cli: command-line wallet for Horizen over a zend node.
//!
//! Every chain operation goes through the wallet engine connected to the
//! node named by the `[rpc]` config table. Multisig signing is offline.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bitcoin::bip32::DerivationPath;
use bitcoin::{PublicKey, ScriptBuf, Txid};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::info;

use zen_core::address::Network;
use zen_core::types::{format_zen, zen_to_zat, FeeLevel, FeeRate, TransactionInput, TransactionOutput};
use zen_rpc::{RpcClient, RpcConfig};
use zen_wallet::keys::generate_mnemonic;
use zen_wallet::{multisig, KeyPurpose, MasterKeys, PartialSignature, SigningKey, WalletConfig, ZenWallet};

/// Environment variable holding the wallet mnemonic.
const MNEMONIC_ENV: &str = "ZEN_MNEMONIC";

/// Horizen command-line wallet.
#[derive(Parser)]
#[command(name = "zen-cli")]
#[command(version, about = "Horizen wallet backed by a zend full node")]
struct Cli {
    /// TOML file with `[wallet]` and `[rpc]` tables.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Network override (mainnet, testnet or regtest).
    #[arg(short, long, global = true)]
    network: Option<Network>,

    /// File containing the wallet mnemonic. Falls back to $ZEN_MNEMONIC,
    /// then a prompt.
    #[arg(long, global = true)]
    mnemonic_file: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format: text or json.
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh 24-word mnemonic.
    NewMnemonic,
    /// Show the current receive address.
    Address {
        /// Ask the node for a fresh address instead.
        #[arg(long)]
        new: bool,
    },
    /// Show confirmed and unconfirmed balance.
    Balance,
    /// Show the chain tip.
    Tip,
    /// List wallet transactions.
    Transactions,
    /// Send ZEN to an address.
    Send(SendArgs),
    /// Show the fee a spend would pay.
    EstimateFee(EstimateArgs),
    /// Speed up an unconfirmed incoming transaction by spending its output.
    BumpFee {
        txid: Txid,
    },
    /// Rescan the wallet from the last block before a date.
    Resync {
        /// YYYY-MM-DD or RFC 3339 timestamp.
        from: String,
    },
    /// Two-party threshold spends.
    Multisig {
        #[command(subcommand)]
        action: MultisigAction,
    },
}

#[derive(Args)]
struct SendArgs {
    /// Recipient address.
    #[arg(short, long)]
    to: String,

    /// Amount in ZEN (e.g. 1.25).
    #[arg(short, long)]
    amount: f64,

    /// priority, normal or economic.
    #[arg(short = 'l', long, default_value = "normal")]
    fee_level: FeeLevel,
}

#[derive(Args)]
struct EstimateArgs {
    /// Amount in ZEN.
    #[arg(short, long)]
    amount: f64,

    #[arg(short = 'l', long, default_value = "normal")]
    fee_level: FeeLevel,
}

#[derive(Subcommand)]
enum MultisigAction {
    /// Build a redeem script and its P2SH address.
    Script {
        /// Hex public key; repeat once per signer.
        #[arg(short, long = "key", required = true)]
        keys: Vec<String>,

        #[arg(short, long)]
        threshold: usize,
    },
    /// Sign a spend request with one key.
    Sign {
        /// JSON spend request.
        request: PathBuf,

        /// Derive the signing key from the mnemonic at this path. Without it
        /// a WIF key is prompted for.
        #[arg(long)]
        path: Option<DerivationPath>,
    },
    /// Combine two signature sets into a final transaction.
    Combine {
        request: PathBuf,
        sigs_a: PathBuf,
        sigs_b: PathBuf,

        /// Broadcast the result through the node.
        #[arg(long)]
        broadcast: bool,
    },
}

/// Spend both parties agree on before signing.
#[derive(Debug, Serialize, Deserialize)]
struct MultisigRequest {
    inputs: Vec<TransactionInput>,
    outputs: Vec<TransactionOutput>,
    redeem_script: ScriptBuf,
    fee_per_kb: u64,
}

impl MultisigRequest {
    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid spend request {}", path.display()))
    }

    fn fee_rate(&self) -> FeeRate {
        FeeRate::from_per_kb(self.fee_per_kb)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, &cli.log_format);

    match &cli.command {
        Commands::NewMnemonic => {
            println!("{}", generate_mnemonic());
            Ok(())
        }
        Commands::Address { new } => show_address(&cli, *new).await,
        Commands::Balance => show_balance(&cli).await,
        Commands::Tip => show_tip(&cli).await,
        Commands::Transactions => list_transactions(&cli).await,
        Commands::Send(args) => send(&cli, args).await,
        Commands::EstimateFee(args) => estimate_fee(&cli, args).await,
        Commands::BumpFee { txid } => bump_fee(&cli, txid).await,
        Commands::Resync { from } => resync(&cli, from).await,
        Commands::Multisig { action } => match action {
            MultisigAction::Script { keys, threshold } => multisig_script(&cli, keys, *threshold).await,
            MultisigAction::Sign { request, path } => multisig_sign(&cli, request, path.as_ref()),
            MultisigAction::Combine { request, sigs_a, sigs_b, broadcast } => {
                multisig_combine(&cli, request, sigs_a, sigs_b, *broadcast).await
            }
        },
    }
}

/// Pass `format = "json"` for structured output; anything else is text.
fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if format == "json" {
        tracing_subscriber::registry().with(filter).with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init();
    }
}

fn wallet_config(cli: &Cli) -> Result<WalletConfig> {
    let mut cfg = WalletConfig::load(cli.config.as_deref()).context("Failed to load wallet config")?;
    if let Some(network) = cli.network {
        cfg.network = network;
    }
    Ok(cfg)
}

fn read_mnemonic(cli: &Cli) -> Result<String> {
    if let Some(path) = &cli.mnemonic_file {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read mnemonic from {}", path.display()));
    }
    if let Ok(phrase) = std::env::var(MNEMONIC_ENV) {
        return Ok(phrase);
    }
    rpassword::prompt_password("Mnemonic: ").context("Failed to read mnemonic")
}

/// Connect to the node and wait until it is ready.
async fn connect(cli: &Cli) -> Result<ZenWallet> {
    let cfg = wallet_config(cli)?;
    let rpc = RpcConfig::load(cli.config.as_deref()).context("Failed to load rpc config")?;
    let client = RpcClient::from_config(&rpc, cfg.network).context("Failed to set up node connection")?;
    info!(endpoint = client.endpoint(), network = %cfg.network, "connecting to node");

    let phrase = read_mnemonic(cli)?;
    let wallet = ZenWallet::from_mnemonic(&phrase, cfg, Arc::new(client)).context("Invalid mnemonic")?;
    wallet.bootstrap().await.context("Node did not become ready")?;
    Ok(wallet)
}

fn parse_amount(zen: f64) -> Result<u64> {
    let zat = zen_to_zat(zen);
    if zat <= 0 {
        bail!("Amount must be positive");
    }
    Ok(zat as u64)
}

fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("Invalid date {s}"))?;
    let midnight = day.and_hms_opt(0, 0, 0).context("Invalid date")?;
    Ok(midnight.and_utc())
}

async fn show_address(cli: &Cli, new: bool) -> Result<()> {
    let wallet = connect(cli).await?;
    let address = if new {
        wallet.new_address(KeyPurpose::External).await?
    } else {
        wallet.current_address(KeyPurpose::External).await?
    };
    println!("{address}");
    Ok(())
}

async fn show_balance(cli: &Cli) -> Result<()> {
    let wallet = connect(cli).await?;
    let balance = wallet.balance().await.context("Failed to query balance")?;
    let code = wallet.currency_code().to_uppercase();
    println!("Confirmed:   {} {code}", format_zen(balance.confirmed));
    println!("Unconfirmed: {} {code}", format_zen(balance.unconfirmed));
    Ok(())
}

async fn show_tip(cli: &Cli) -> Result<()> {
    let wallet = connect(cli).await?;
    let (height, hash) = wallet.chain_tip().await?;
    println!("Height: {height}");
    println!("Hash:   {hash}");
    Ok(())
}

async fn list_transactions(cli: &Cli) -> Result<()> {
    let wallet = connect(cli).await?;
    for tx in wallet.transactions().await? {
        let height = if tx.height == 0 { "pending".to_string() } else { tx.height.to_string() };
        println!("{} {:>18} {:>10} {}", tx.txid, format_zen(tx.value), height, tx.timestamp.to_rfc3339());
    }
    Ok(())
}

async fn send(cli: &Cli, args: &SendArgs) -> Result<()> {
    let wallet = connect(cli).await?;
    let to = wallet.decode_address(&args.to).context("Invalid recipient address")?;
    let amount = parse_amount(args.amount)?;
    let txid = wallet.spend(amount, &to, args.fee_level).await.context("Send failed")?;
    println!("TxID: {txid}");
    Ok(())
}

async fn estimate_fee(cli: &Cli, args: &EstimateArgs) -> Result<()> {
    let wallet = connect(cli).await?;
    let amount = parse_amount(args.amount)?;
    let fee = wallet.estimate_spend_fee(amount, args.fee_level).await?;
    println!("Fee: {} ({fee} zat)", format_zen(fee as i64));
    Ok(())
}

async fn bump_fee(cli: &Cli, txid: &Txid) -> Result<()> {
    let wallet = connect(cli).await?;
    let child = wallet.bump_fee(txid).await.context("Fee bump failed")?;
    println!("TxID: {child}");
    Ok(())
}

async fn resync(cli: &Cli, from: &str) -> Result<()> {
    let from = parse_date(from)?;
    let wallet = connect(cli).await?;
    let height = wallet.resync_from_date(from).await?;
    println!("Rescanning from height {height}");
    Ok(())
}

async fn multisig_script(cli: &Cli, keys: &[String], threshold: usize) -> Result<()> {
    let keys = keys
        .iter()
        .map(|k| PublicKey::from_str(k).with_context(|| format!("Invalid public key {k}")))
        .collect::<Result<Vec<_>>>()?;
    let wallet = connect(cli).await?;
    let script = wallet.generate_multisig_script(&keys, threshold, None).await?;
    println!("Address:       {}", script.address);
    println!("Redeem script: {}", hex::encode(script.redeem_script.as_bytes()));
    Ok(())
}

fn multisig_sign(cli: &Cli, request: &Path, path: Option<&DerivationPath>) -> Result<()> {
    let request = MultisigRequest::read(request)?;
    let network = wallet_config(cli)?.network;
    let key = match path {
        Some(path) => {
            let master = MasterKeys::from_mnemonic(&read_mnemonic(cli)?, network).context("Invalid mnemonic")?;
            master.derive(path, network)?
        }
        None => {
            let wif = rpassword::prompt_password("WIF key: ").context("Failed to read key")?;
            SigningKey::from_wif(wif.trim()).context("Invalid WIF key")?
        }
    };
    let sigs = multisig::partial_sign(
        &request.inputs,
        &request.outputs,
        &key,
        &request.redeem_script,
        request.fee_rate(),
    )?;
    println!("{}", serde_json::to_string_pretty(&sigs)?);
    Ok(())
}

fn read_signatures(path: &Path) -> Result<Vec<PartialSignature>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid signatures in {}", path.display()))
}

async fn multisig_combine(cli: &Cli, request: &Path, sigs_a: &Path, sigs_b: &Path, broadcast: bool) -> Result<()> {
    let request = MultisigRequest::read(request)?;
    let sigs_a = read_signatures(sigs_a)?;
    let sigs_b = read_signatures(sigs_b)?;

    let raw = if broadcast {
        let wallet = connect(cli).await?;
        wallet
            .multisign(
                &request.inputs,
                &request.outputs,
                &sigs_a,
                &sigs_b,
                &request.redeem_script,
                request.fee_rate(),
                true,
            )
            .await?
    } else {
        let tx = multisig::combine(
            &request.inputs,
            &request.outputs,
            &[sigs_a.as_slice(), sigs_b.as_slice()],
            &request.redeem_script,
            request.fee_rate(),
        )?;
        bitcoin::consensus::encode::serialize(&tx)
    };
    println!("{}", hex::encode(raw));
    Ok(())
}
