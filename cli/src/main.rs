mod commands;
mod util;

use clap::{Parser, Subcommand};

use commands::delta::DeltaCommands;
use commands::payment::PaymentCommands;
use commands::policy::PolicyCommands;
use commands::premium::PremiumCommands;
use commands::reminder::ReminderCommands;
use commands::score::ScoreCommands;

#[derive(Parser)]
#[command(
    name = "covrabl",
    version,
    about = "Covrabl CLI: track insurance policies, review detected changes and coverage scores"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "COVRABL_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Create an account and store its API key locally
    Register {
        #[arg(long)]
        email: String,
        /// At least 8 characters
        #[arg(long, env = "COVRABL_PASSWORD")]
        password: String,
        #[arg(long)]
        display_name: Option<String>,
    },
    /// Remove the locally stored API key
    Logout,
    /// Policy operations
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },
    /// Detected policy changes
    Delta {
        #[command(subcommand)]
        command: DeltaCommands,
    },
    /// Coverage scores
    Score {
        #[command(subcommand)]
        command: ScoreCommands,
    },
    /// Renewal reminders and alerts
    Reminder {
        #[command(subcommand)]
        command: ReminderCommands,
    },
    /// Premium history
    Premium {
        #[command(subcommand)]
        command: PremiumCommands,
    },
    /// Scheduled premium payments
    Payment {
        #[command(subcommand)]
        command: PaymentCommands,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "covrabl=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!(api_url = %cli.api_url, "resolved api url");

    let code = match cli.command {
        Commands::Health => commands::health::run(&cli.api_url).await,
        Commands::Register {
            email,
            password,
            display_name,
        } => match commands::auth::register(&cli.api_url, &email, &password, display_name.as_deref())
            .await
        {
            Ok(code) => code,
            Err(e) => util::exit_error(&e.to_string(), None),
        },
        Commands::Logout => match commands::auth::logout() {
            Ok(()) => 0,
            Err(e) => util::exit_error(&e.to_string(), None),
        },
        Commands::Policy { command } => {
            commands::policy::run(&cli.api_url, &util::require_token(), command).await
        }
        Commands::Delta { command } => {
            commands::delta::run(&cli.api_url, &util::require_token(), command).await
        }
        Commands::Score { command } => {
            commands::score::run(&cli.api_url, &util::require_token(), command).await
        }
        Commands::Reminder { command } => {
            commands::reminder::run(&cli.api_url, &util::require_token(), command).await
        }
        Commands::Premium { command } => {
            commands::premium::run(&cli.api_url, &util::require_token(), command).await
        }
        Commands::Payment { command } => {
            commands::payment::run(&cli.api_url, &util::require_token(), command).await
        }
    };

    std::process::exit(code);
}
