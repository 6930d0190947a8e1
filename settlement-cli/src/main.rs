//! Settlement CLI
//!
//! Command-line interface for the Settlement API.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use settlement_client::SettlementClient;
use settlement_types::{Money, PaymentId, ResolveOutcome, SettleRequest};

#[derive(Parser)]
#[command(name = "settlement")]
#[command(author, version, about = "Settlement API CLI client", long_about = None)]
struct Cli {
    /// Base URL of the Settlement API
    #[arg(
        long,
        env = "SETTLEMENT_API_URL",
        default_value = "http://localhost:3000"
    )]
    api_url: String,

    /// Bearer token (JWT) for authentication
    #[arg(long, env = "SETTLEMENT_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pay every unpaid bill of an account for one period
    Settle {
        /// Ten-digit account number
        #[arg(long)]
        account: String,
        /// Billing period (YYYY-MM)
        #[arg(long)]
        period: String,
        /// Claimed total in currency units, e.g. 1500.00
        #[arg(long)]
        amount: Money,
        #[arg(long)]
        card_number: String,
        #[arg(long)]
        card_holder: String,
        /// Card expiration date (YYYY-MM-DD)
        #[arg(long)]
        card_expiration_date: String,
        #[arg(long)]
        card_cvv: String,
        /// Receiver tax id (12 digits)
        #[arg(long)]
        inn_receiver: String,
    },
    /// Show a payment attempt
    Payment {
        /// Payment ID (UUID)
        id: String,
    },
    /// Account read operations
    Account {
        #[command(subcommand)]
        action: AccountCommands,
    },
    /// Operator reconciliation
    Reconcile {
        #[command(subcommand)]
        action: ReconcileCommands,
    },
    /// Start a local listener for reconciliation alerts
    ListenAlerts {
        /// Port to listen on
        #[arg(long, default_value = "3100")]
        port: u16,
    },
    /// Check API health
    Health,
}

#[derive(Subcommand)]
enum AccountCommands {
    /// List bills with totals
    Bills {
        account: String,
        /// Restrict to one period (YYYY-MM)
        #[arg(long)]
        period: Option<String>,
    },
    /// List payment attempts, newest first
    Payments { account: String },
}

#[derive(Subcommand)]
enum ReconcileCommands {
    /// List payments awaiting reconciliation
    List,
    /// Flag stale pending payments now
    Sweep,
    /// Mark the bills of a flagged completed payment paid
    Commit {
        /// Payment ID (UUID)
        id: String,
    },
    /// Resolve a stale pending payment
    Resolve {
        /// Payment ID (UUID)
        id: String,
        /// What the processor reports for this charge
        #[arg(long, value_enum)]
        outcome: Outcome,
        /// Processor charge id, when known
        #[arg(long)]
        reference: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Outcome {
    Charged,
    NotCharged,
}

impl From<Outcome> for ResolveOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Charged => ResolveOutcome::Charged,
            Outcome::NotCharged => ResolveOutcome::NotCharged,
        }
    }
}

fn parse_payment_id(s: &str) -> Result<PaymentId> {
    s.parse()
        .map_err(|_| anyhow::anyhow!("Invalid payment ID: {}", s))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut client = SettlementClient::new(&cli.api_url);
    if let Some(token) = cli.token {
        client = client.with_token(token);
    }

    match cli.command {
        Commands::Health => {
            let healthy = client.health().await?;
            if healthy {
                println!("✓ API is healthy");
            } else {
                println!("✗ API is not healthy");
                std::process::exit(1);
            }
        }

        Commands::Settle {
            account,
            period,
            amount,
            card_number,
            card_holder,
            card_expiration_date,
            card_cvv,
            inn_receiver,
        } => {
            let req = SettleRequest {
                account_number: account,
                period,
                amount,
                card_number,
                card_holder,
                card_expiration_date,
                card_cvv,
                inn_receiver,
            };
            print_json(&client.settle(&req).await?)?;
        }

        Commands::Payment { id } => {
            let id = parse_payment_id(&id)?;
            print_json(&client.get_payment(id).await?)?;
        }

        Commands::Account { action } => match action {
            AccountCommands::Bills { account, period } => {
                print_json(&client.account_bills(&account, period.as_deref()).await?)?;
            }
            AccountCommands::Payments { account } => {
                print_json(&client.account_payments(&account).await?)?;
            }
        },

        Commands::Reconcile { action } => match action {
            ReconcileCommands::List => print_json(&client.list_flagged().await?)?,
            ReconcileCommands::Sweep => print_json(&client.sweep().await?)?,
            ReconcileCommands::Commit { id } => {
                let id = parse_payment_id(&id)?;
                print_json(&client.commit_flagged(id).await?)?;
            }
            ReconcileCommands::Resolve {
                id,
                outcome,
                reference,
            } => {
                let id = parse_payment_id(&id)?;
                print_json(&client.resolve_stale(id, outcome.into(), reference).await?)?;
            }
        },

        Commands::ListenAlerts { port } => {
            let app = axum::Router::new().route("/alerts", axum::routing::post(handle_alert));
            let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
            println!("Listening for alerts on http://{}/alerts", addr);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}

async fn handle_alert(
    headers: axum::http::HeaderMap,
    body: String,
) -> impl axum::response::IntoResponse {
    println!("POST /alerts HTTP/1.1");
    for (name, value) in &headers {
        println!("{}: {:?}", name, value);
    }
    println!();
    println!("{}", body);
    println!("----------------------------------------");
    axum::http::StatusCode::OK
}
