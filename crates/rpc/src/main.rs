//! adbank CLI - master banker server plus operator commands

use adbank_banker::{
    BankerClient, BankerConfig, BudgetController, MasterBanker, PersistenceBackend,
};
use adbank_core::{AccountKey, Amount, Currency};
use adbank_ledger::AccountType;
use adbank_persistence::{
    BankerPersistence, NullBankerPersistence, PersistenceError, SqliteBankerPersistence,
};
use adbank_rpc::{router, HttpBankerClient};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "adbank")]
#[command(about = "RTB budget banker", long_about = None)]
struct Cli {
    /// Master base URL for operator commands
    #[arg(long, global = true, default_value = "http://127.0.0.1:9985")]
    master: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the master banker service
    Serve {
        /// HTTP listen address
        #[arg(long, default_value = "127.0.0.1:9985")]
        listen: String,
        /// Persistence backend: 'null' or 'sqlite:<url>'
        #[arg(long, default_value = "null")]
        persistence: String,
        /// Namespace for persisted records
        #[arg(long, default_value = "banker")]
        top_level_key: String,
        /// Seconds between snapshot saves
        #[arg(long, default_value_t = 10)]
        save_interval: u64,
        /// Seconds of slave silence before commitments are swept
        #[arg(long, default_value_t = 15)]
        staleness_timeout: u64,
    },

    /// Create an account
    CreateAccount {
        /// Colon-joined account key
        key: String,
        /// Account type: budget, spend or none
        #[arg(long, default_value = "budget")]
        account_type: String,
    },

    /// Set a top-level budget to an absolute amount
    SetBudget {
        key: String,
        /// Amount in micro-units
        micros: i64,
        #[arg(long, default_value = "USD")]
        currency: String,
    },

    /// Add to a top-level budget
    AddBudget {
        key: String,
        /// Amount in micro-units (negative returns budget)
        micros: i64,
        #[arg(long, default_value = "USD")]
        currency: String,
    },

    /// Transfer budget from a parent into a direct child
    Topup {
        parent: String,
        child: String,
        /// Amount in micro-units
        micros: i64,
        #[arg(long, default_value = "USD")]
        currency: String,
    },

    /// Read one account
    Account { key: String },

    /// Registry-wide totals
    Summary,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            listen,
            persistence,
            top_level_key,
            save_interval,
            staleness_timeout,
        } => {
            let backend: PersistenceBackend = persistence.parse()?;
            let config = BankerConfig {
                listen,
                top_level_key,
                save_interval_secs: save_interval,
                staleness_timeout_secs: staleness_timeout,
                persistence: backend.clone(),
                ..Default::default()
            };
            serve(config, backend).await?;
        }

        Commands::CreateAccount { key, account_type } => {
            let key: AccountKey = key.parse()?;
            let account_type: AccountType = account_type.parse()?;
            let client = HttpBankerClient::new(cli.master);
            let account = client.create_account(&key, account_type).await?;
            println!("{}", serde_json::to_string_pretty(&account)?);
        }

        Commands::SetBudget { key, micros, currency } => {
            let controller = BudgetController::new(Arc::new(HttpBankerClient::new(cli.master)));
            let account = controller
                .set_budget_sync(&key.parse()?, &amount(micros, &currency)?)
                .await?;
            println!("{}", serde_json::to_string_pretty(&account)?);
        }

        Commands::AddBudget { key, micros, currency } => {
            let controller = BudgetController::new(Arc::new(HttpBankerClient::new(cli.master)));
            let account = controller
                .add_budget_sync(&key.parse()?, &amount(micros, &currency)?)
                .await?;
            println!("{}", serde_json::to_string_pretty(&account)?);
        }

        Commands::Topup {
            parent,
            child,
            micros,
            currency,
        } => {
            let controller = BudgetController::new(Arc::new(HttpBankerClient::new(cli.master)));
            let account = controller
                .topup_transfer_sync(&parent.parse()?, &child.parse()?, &amount(micros, &currency)?)
                .await?;
            println!("{}", serde_json::to_string_pretty(&account)?);
        }

        Commands::Account { key } => {
            let client = HttpBankerClient::new(cli.master);
            let account = client.account(&key.parse()?).await?;
            println!("{}", serde_json::to_string_pretty(&account)?);
        }

        Commands::Summary => {
            let client = HttpBankerClient::new(cli.master);
            let summary = client.summary().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

fn amount(micros: i64, currency: &str) -> anyhow::Result<Amount> {
    let currency: Currency = currency.parse()?;
    Ok(Amount::new(currency, micros))
}

/// Exit codes: 1 load-time data inconsistency, 2 load-time backend error
/// (fail-fast), 3 invariant self-check failure.
async fn serve(config: BankerConfig, backend: PersistenceBackend) -> anyhow::Result<()> {
    let storage: Arc<dyn BankerPersistence> = match &backend {
        PersistenceBackend::Null => Arc::new(NullBankerPersistence),
        PersistenceBackend::Sqlite { url } => match SqliteBankerPersistence::connect(url).await {
            Ok(storage) => Arc::new(storage),
            Err(err) => {
                error!(error = %err, "persistence backend unreachable");
                std::process::exit(2);
            }
        },
    };

    let master = match MasterBanker::load(config.clone(), storage).await {
        Ok(master) => Arc::new(master),
        Err(PersistenceError::DataInconsistency(keys)) => {
            error!(?keys, "refusing to start: loaded state is inconsistent");
            std::process::exit(1);
        }
        Err(PersistenceError::Backend(info)) => {
            error!(info, "refusing to start: backend error during load");
            std::process::exit(2);
        }
    };

    let violations = master.accounts().check_invariants();
    if !violations.is_empty() {
        error!(?violations, "invariant self-check failed");
        std::process::exit(3);
    }

    let _loops = master.spawn_loops();

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!(listen = %config.listen, "master banker serving");
    axum::serve(listener, router(master)).await?;

    Ok(())
}
