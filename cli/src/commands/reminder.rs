use clap::Subcommand;

use crate::util::api_request;

#[derive(Subcommand)]
pub enum ReminderCommands {
    /// Renewal reminders due today or earlier
    Active,
    /// Computed alerts: premium payments, renewals, possibly expired policies, annual reviews
    Smart,
    /// Dismiss a reminder
    Dismiss {
        #[arg(long)]
        id: String,
    },
}

pub async fn run(api_url: &str, token: &str, command: ReminderCommands) -> i32 {
    let (method, path) = match command {
        ReminderCommands::Active => (reqwest::Method::GET, "/v1/reminders/active".to_string()),
        ReminderCommands::Smart => (reqwest::Method::GET, "/v1/reminders/smart".to_string()),
        ReminderCommands::Dismiss { id } => {
            (reqwest::Method::PUT, format!("/v1/reminders/{id}/dismiss"))
        }
    };
    api_request(api_url, method, &path, Some(token), None, &[]).await
}
