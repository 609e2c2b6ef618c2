use chrono::NaiveDate;
use clap::Subcommand;
use serde_json::json;

use crate::util::api_request;

#[derive(Subcommand)]
pub enum PremiumCommands {
    /// Premium history of a policy with change percentages
    List {
        #[arg(long)]
        policy_id: String,
    },
    /// Record a premium manually
    Add {
        #[arg(long)]
        policy_id: String,
        /// Annual premium in dollars, e.g. 1250.40
        #[arg(long)]
        amount: String,
        /// Effective date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        effective_date: Option<NaiveDate>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Remove a premium history entry
    Delete {
        #[arg(long)]
        policy_id: String,
        #[arg(long)]
        entry_id: String,
    },
}

pub async fn run(api_url: &str, token: &str, command: PremiumCommands) -> i32 {
    match command {
        PremiumCommands::List { policy_id } => {
            api_request(
                api_url,
                reqwest::Method::GET,
                &format!("/v1/policies/{policy_id}/premium-history"),
                Some(token),
                None,
                &[],
            )
            .await
        }
        PremiumCommands::Add {
            policy_id,
            amount,
            effective_date,
            notes,
        } => {
            let effective_date =
                effective_date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let body = json!({
                "amount": amount,
                "effective_date": effective_date,
                "notes": notes
            });
            api_request(
                api_url,
                reqwest::Method::POST,
                &format!("/v1/policies/{policy_id}/premium-history"),
                Some(token),
                Some(body),
                &[],
            )
            .await
        }
        PremiumCommands::Delete {
            policy_id,
            entry_id,
        } => {
            api_request(
                api_url,
                reqwest::Method::DELETE,
                &format!("/v1/policies/{policy_id}/premium-history/{entry_id}"),
                Some(token),
                None,
                &[],
            )
            .await
        }
    }
}
