use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use ethers::signers::{LocalWallet, Signer};
use ethers_core::types::Address;
use ethers_core::utils::format_ether;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use anon_insurance::attestation::IdentityAttestation;
use anon_insurance::config::{AppConfig, PRIVATE_KEY_ENV};
use anon_insurance::contract::{evm, IssuePolicyCall};
use anon_insurance::policy::{Clock, PolicyLookup, SystemClock};
use anon_insurance::session::{entry_action, EntryAction, Navigator, Page, WalletSession};
use anon_insurance::store::{self, FileProofStore};
use anon_insurance::verifier::Verifier;
use anon_insurance::workflow::{PolicyWorkflow, WorkflowState};

#[derive(Parser)]
#[command(author, version, about = "Insurance policies gated by Anon Aadhaar proofs")]
struct Cli {
    #[arg(short, long, global = true, default_value = "config/insurance.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    InitConfig,
    /// Show the entry page: wallet gating and prover parameters
    Start {
        /// Ask the prover for a test Aadhaar proof
        #[arg(long, default_value_t = false)]
        test: bool,
    },
    /// Append a serialized proof to the proof store
    Import {
        /// File holding the serialized PCD
        file: PathBuf,
    },
    /// Load the latest proof and show its policy
    Policy,
    /// Issue a policy for the latest proof
    Issue {
        /// Print the issuePolicy arguments without sending
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// List the services a policy covers
    Services {
        #[arg(short, long)]
        policy_id: String,
    },
    /// Print the packed uint[8] proof of the latest attestation
    Pack,
    /// Verify the latest proof locally against a snarkjs verification key
    Verify {
        #[arg(long)]
        vkey: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::InitConfig => init_config(&cli.config)?,
        Commands::Start { test } => start(&cli.config, test).await?,
        Commands::Import { file } => import(&cli.config, &file)?,
        Commands::Policy => show_policy(&cli.config).await?,
        Commands::Issue { dry_run } => issue(&cli.config, dry_run).await?,
        Commands::Services { policy_id } => services(&cli.config, &policy_id).await?,
        Commands::Pack => pack(&cli.config)?,
        Commands::Verify { vkey } => verify(&cli.config, vkey)?,
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let mut config = if path.exists() {
        AppConfig::load(path).with_context(|| format!("loading {}", path.display()))?
    } else {
        warn!(?path, "configuration not found, using defaults");
        AppConfig::default()
    };
    config.apply_env();
    Ok(config)
}

fn private_key() -> Option<String> {
    std::env::var(PRIVATE_KEY_ENV).ok().filter(|key| !key.trim().is_empty())
}

/// Address of the configured wallet key, without touching the network.
fn local_address() -> Result<Option<Address>> {
    let Some(key) = private_key() else {
        return Ok(None);
    };
    let wallet = key
        .parse::<LocalWallet>()
        .map_err(|e| anyhow!("invalid {PRIVATE_KEY_ENV}: {e}"))?;
    Ok(Some(wallet.address()))
}

async fn connect_workflow(config: &AppConfig) -> Result<PolicyWorkflow> {
    let key = private_key();
    let (contract, wallet) = evm::connect(
        &config.rpc_url,
        config.contract_address()?,
        key.as_deref(),
        config.chain_id,
        config.confirmations,
    )
    .await
    .context("connecting to the insurance contract")?;

    Ok(PolicyWorkflow::new(contract, wallet).with_terms(config.policy.terms()?))
}

fn latest_attestation(config: &AppConfig) -> Result<IdentityAttestation> {
    let store = FileProofStore::new(&config.proof_store);
    let pcd = store::latest_pcd(&store, &config.proof_store_key)?
        .ok_or_else(|| anyhow!("no proof in {}", config.proof_store.display()))?;
    Ok(IdentityAttestation::deserialize(&pcd)?)
}

fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    AppConfig::default().save(path)?;
    info!(?path, "wrote default configuration");
    Ok(())
}

async fn start(config_path: &Path, test: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let use_test_aadhaar = test || config.use_test_aadhaar;

    let wallet = match local_address()? {
        Some(address) => WalletSession::connected(address),
        None => WalletSession::disconnected(),
    };

    match entry_action(&wallet, config.nullifier_seed()?, use_test_aadhaar) {
        EntryAction::ConnectWallet => {
            println!("Wallet not connected. Set {PRIVATE_KEY_ENV} to connect.");
            return Ok(());
        }
        EntryAction::Prove(request) => {
            println!("Prover parameters:");
            println!("{}", serde_json::to_string_pretty(&request)?);
        }
    }

    let store = FileProofStore::new(&config.proof_store);
    let status = store::read_session(&store, &config.proof_store_key)?
        .map(|session| session.status)
        .unwrap_or_default();

    let mut navigator = Navigator::new();
    if navigator.observe(status) == Some(Page::Policy) {
        show_policy(config_path).await?;
    } else {
        println!("Proof status: {}", serde_json::to_string(&status)?.trim_matches('"'));
    }
    Ok(())
}

fn import(config_path: &Path, file: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let pcd = fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let pcd = pcd.trim();

    let attestation = IdentityAttestation::deserialize(pcd).context("proof file is not an Anon Aadhaar PCD")?;
    let store = FileProofStore::new(&config.proof_store);
    let index = store::import_pcd(&store, &config.proof_store_key, pcd)?;

    info!(index = %index, nullifier = %attestation.nullifier_short(), "proof imported");
    Ok(())
}

fn print_attestation(attestation: &IdentityAttestation) {
    let attrs = &attestation.attributes;
    println!("Nullifier:    {}", attestation.nullifier);
    println!("Age above 18: {}", attrs.is_age_above_18());
    if let Some(gender) = attrs.gender_text() {
        println!("Gender:       {gender}");
    }
    if let Some(pincode) = attrs.pincode() {
        println!("Pincode:      {pincode}");
    }
    if let Some(state) = attrs.state_text() {
        println!("State:        {state}");
    }
}

fn print_lookup(lookup: &PolicyLookup) {
    match lookup {
        PolicyLookup::Absent => println!("No policy issued for this identity."),
        PolicyLookup::Exists(policy) => {
            let now = SystemClock.now_unix();
            println!("Policy ID:    {}", policy.policy_id);
            println!("Coverage:     {} ETH", format_ether(policy.coverage_amount));
            println!("Valid till:   {}", policy.valid_till);
            println!(
                "Active:       {}{}",
                policy.active,
                if policy.is_expired(now) { " (expired)" } else { "" }
            );
        }
    }
}

async fn show_policy(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let mut workflow = connect_workflow(&config).await?;
    let store = FileProofStore::new(&config.proof_store);

    let state = workflow.refresh(&store, &config.proof_store_key).await?.clone();
    match &state {
        WorkflowState::NoProof => println!("No proof stored. Run `start` and generate one first."),
        WorkflowState::PolicyChecked(lookup) => {
            if let Some(attestation) = workflow.attestation() {
                print_attestation(attestation);
            }
            print_lookup(lookup);
            if workflow.can_issue() {
                println!("Run `issue` to request a policy.");
            }
        }
        other => println!("Workflow stopped: {}", other.name()),
    }
    Ok(())
}

async fn issue(config_path: &Path, dry_run: bool) -> Result<()> {
    let config = load_config(config_path)?;

    if dry_run {
        let attestation = latest_attestation(&config)?;
        let recipient = local_address()?.unwrap_or_else(Address::zero);
        let call = IssuePolicyCall::new(&attestation, recipient, &config.policy.terms()?, SystemClock.now_unix())?;
        println!("{}", serde_json::to_string_pretty(&call.to_json_args())?);
        return Ok(());
    }

    let mut workflow = connect_workflow(&config).await?;
    if !workflow.wallet().is_connected() {
        bail!("wallet not connected; set {PRIVATE_KEY_ENV}");
    }

    let store = FileProofStore::new(&config.proof_store);
    if let WorkflowState::NoProof = workflow.refresh(&store, &config.proof_store_key).await? {
        bail!("no proof in {}", config.proof_store.display());
    }

    let outcome = workflow.issue_policy().await?;
    println!("Transaction:  {:?}", outcome.receipt.tx_hash);
    match outcome.lookup {
        Some(lookup) => print_lookup(&lookup),
        None => println!("Policy issued; run `policy` to view it."),
    }
    Ok(())
}

async fn services(config_path: &Path, policy_id: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let mut workflow = connect_workflow(&config).await?;

    let store = FileProofStore::new(&config.proof_store);
    if !workflow.load_latest(&store, &config.proof_store_key)? {
        bail!("no proof in {}", config.proof_store.display());
    }

    let services = workflow.services_covered(policy_id).await?;
    if services.is_empty() {
        println!("No services covered by policy {policy_id}.");
    }
    for service in services {
        println!("{service}");
    }
    Ok(())
}

fn pack(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let attestation = latest_attestation(&config)?;
    let packed: Vec<String> = attestation.packed_proof()?.iter().map(|v| v.to_string()).collect();
    println!("{}", serde_json::to_string_pretty(&packed)?);
    Ok(())
}

fn verify(config_path: &Path, vkey: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let vkey = vkey
        .or_else(|| config.verifying_key.clone())
        .ok_or_else(|| anyhow!("no verification key; pass --vkey or set verifying_key"))?;

    let verifier = Verifier::load(&vkey).with_context(|| format!("loading {}", vkey.display()))?;
    let attestation = latest_attestation(&config)?;

    if verifier.verify(&attestation)? {
        println!("Proof valid for nullifier {}", attestation.nullifier_short());
        Ok(())
    } else {
        bail!("proof verification failed")
    }
}
