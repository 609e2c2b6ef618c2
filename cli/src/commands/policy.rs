use clap::Subcommand;
use serde_json::json;

use crate::util::{api_request, exit_error, json_argument, parse_pair};

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// List your policies, newest first
    List,
    /// Get one policy with its details
    Get {
        #[arg(long)]
        id: String,
    },
    /// Create a policy
    Create {
        /// Display name (e.g. "Family car")
        #[arg(long)]
        nickname: Option<String>,
        /// Tracked fields as JSON (e.g. '{"policy_type":"auto","carrier":"Acme"}')
        #[arg(long, short = 'd')]
        data: Option<String>,
        /// Read tracked fields from file (use '-' for stdin)
        #[arg(long, short = 'f', conflicts_with = "data")]
        data_file: Option<String>,
        /// Free-form detail (repeatable: name=value)
        #[arg(long)]
        detail: Vec<String>,
    },
    /// Delete a policy and everything recorded for it
    Delete {
        #[arg(long)]
        id: String,
    },
    /// Apply a new extraction; prints the detected changes and the revised policy
    Extract {
        #[arg(long)]
        id: String,
        /// Source document id
        #[arg(long)]
        document_id: Option<String>,
        /// Extracted fields as JSON
        #[arg(long, short = 'd', required_unless_present = "data_file")]
        data: Option<String>,
        /// Read extracted fields from file (use '-' for stdin)
        #[arg(long, short = 'f', conflicts_with = "data")]
        data_file: Option<String>,
    },
}

pub async fn run(api_url: &str, token: &str, command: PolicyCommands) -> i32 {
    match command {
        PolicyCommands::List => {
            api_request(api_url, reqwest::Method::GET, "/v1/policies", Some(token), None, &[]).await
        }
        PolicyCommands::Get { id } => {
            api_request(
                api_url,
                reqwest::Method::GET,
                &format!("/v1/policies/{id}"),
                Some(token),
                None,
                &[],
            )
            .await
        }
        PolicyCommands::Create {
            nickname,
            data,
            data_file,
            detail,
        } => {
            let fields = json_argument(data.as_deref(), data_file.as_deref())
                .unwrap_or_else(|e| exit_error(&e, Some("Provide a JSON object of tracked fields")));
            let details: Vec<_> = detail
                .iter()
                .map(|raw| {
                    parse_pair(raw)
                        .map(|(name, value)| json!({"field_name": name, "field_value": value}))
                        .unwrap_or_else(|e| exit_error(&e, Some("Format: --detail coverage_type=Comprehensive")))
                })
                .collect();
            let body = json!({
                "nickname": nickname,
                "fields": fields,
                "details": details
            });
            api_request(api_url, reqwest::Method::POST, "/v1/policies", Some(token), Some(body), &[])
                .await
        }
        PolicyCommands::Delete { id } => {
            api_request(
                api_url,
                reqwest::Method::DELETE,
                &format!("/v1/policies/{id}"),
                Some(token),
                None,
                &[],
            )
            .await
        }
        PolicyCommands::Extract {
            id,
            document_id,
            data,
            data_file,
        } => {
            let fields = json_argument(data.as_deref(), data_file.as_deref())
                .unwrap_or_else(|e| exit_error(&e, Some("Provide a JSON object of extracted fields")));
            let body = json!({
                "document_id": document_id,
                "fields": fields
            });
            api_request(
                api_url,
                reqwest::Method::PUT,
                &format!("/v1/policies/{id}/extraction"),
                Some(token),
                Some(body),
                &[],
            )
            .await
        }
    }
}
