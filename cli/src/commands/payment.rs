use chrono::NaiveDate;
use clap::{Subcommand, ValueEnum};
use serde_json::json;

use crate::util::api_request;

#[derive(Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum Frequency {
    Monthly,
    Quarterly,
    SemiAnnual,
    Annual,
}

impl Frequency {
    fn as_str(self) -> &'static str {
        match self {
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::SemiAnnual => "semi_annual",
            Frequency::Annual => "annual",
        }
    }
}

#[derive(Subcommand)]
pub enum PaymentCommands {
    /// Scheduled premium payments of a policy
    List {
        #[arg(long)]
        policy_id: String,
    },
    /// Schedule a premium payment
    Add {
        #[arg(long)]
        policy_id: String,
        /// Amount due in dollars, e.g. 120.50
        #[arg(long)]
        amount: String,
        #[arg(long, value_enum, default_value = "monthly")]
        frequency: Frequency,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due_date: NaiveDate,
        #[arg(long)]
        payment_method: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Mark a payment as paid
    Paid {
        #[arg(long)]
        policy_id: String,
        #[arg(long)]
        payment_id: String,
        /// Defaults to today on the server
        #[arg(long)]
        paid_date: Option<NaiveDate>,
        #[arg(long)]
        payment_method: Option<String>,
    },
    /// Remove a scheduled payment
    Delete {
        #[arg(long)]
        policy_id: String,
        #[arg(long)]
        payment_id: String,
    },
}

pub async fn run(api_url: &str, token: &str, command: PaymentCommands) -> i32 {
    let (method, path, body) = match command {
        PaymentCommands::List { policy_id } => (
            reqwest::Method::GET,
            format!("/v1/policies/{policy_id}/payments"),
            None,
        ),
        PaymentCommands::Add {
            policy_id,
            amount,
            frequency,
            due_date,
            payment_method,
            notes,
        } => (
            reqwest::Method::POST,
            format!("/v1/policies/{policy_id}/payments"),
            Some(json!({
                "amount": amount,
                "frequency": frequency.as_str(),
                "due_date": due_date,
                "payment_method": payment_method,
                "notes": notes
            })),
        ),
        PaymentCommands::Paid {
            policy_id,
            payment_id,
            paid_date,
            payment_method,
        } => (
            reqwest::Method::PUT,
            format!("/v1/policies/{policy_id}/payments/{payment_id}/paid"),
            Some(json!({
                "paid_date": paid_date,
                "payment_method": payment_method
            })),
        ),
        PaymentCommands::Delete {
            policy_id,
            payment_id,
        } => (
            reqwest::Method::DELETE,
            format!("/v1/policies/{policy_id}/payments/{payment_id}"),
            None,
        ),
    };
    api_request(api_url, method, &path, Some(token), body, &[]).await
}
