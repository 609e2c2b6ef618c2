use clap::Subcommand;

use crate::util::api_request;

#[derive(Subcommand)]
pub enum ScoreCommands {
    /// Current overall and per-category coverage scores
    Get,
    /// Drop cached scores and rebuild them
    Recalculate,
}

pub async fn run(api_url: &str, token: &str, command: ScoreCommands) -> i32 {
    let (method, path) = match command {
        ScoreCommands::Get => (reqwest::Method::GET, "/v1/coverage-scores"),
        ScoreCommands::Recalculate => (reqwest::Method::POST, "/v1/coverage-scores/recalculate"),
    };
    api_request(api_url, method, path, Some(token), None, &[]).await
}
