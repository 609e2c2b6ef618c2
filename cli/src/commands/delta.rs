use clap::Subcommand;

use crate::util::api_request;

#[derive(Subcommand)]
pub enum DeltaCommands {
    /// List detected changes across all policies, newest first
    List {
        /// Filter by acknowledgement state
        #[arg(long)]
        acknowledged: Option<bool>,
        /// Filter by severity (critical, warning, info)
        #[arg(long)]
        severity: Option<String>,
        #[arg(long)]
        page: Option<u32>,
        /// Page size (1-200)
        #[arg(long)]
        limit: Option<u32>,
    },
    /// List all changes of one policy
    Policy {
        #[arg(long)]
        policy_id: String,
    },
    /// Mark one change as seen
    Ack {
        #[arg(long)]
        id: String,
    },
    /// Mark every unacknowledged change as seen
    AckAll,
    /// Explain a change in plain language
    Explain {
        #[arg(long)]
        id: String,
    },
}

fn list_query(
    acknowledged: Option<bool>,
    severity: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
) -> Vec<(String, String)> {
    let mut query = Vec::new();
    if let Some(a) = acknowledged {
        query.push(("acknowledged".to_string(), a.to_string()));
    }
    if let Some(s) = severity {
        query.push(("severity".to_string(), s));
    }
    if let Some(p) = page {
        query.push(("page".to_string(), p.to_string()));
    }
    if let Some(l) = limit {
        query.push(("limit".to_string(), l.to_string()));
    }
    query
}

pub async fn run(api_url: &str, token: &str, command: DeltaCommands) -> i32 {
    let (method, path, query) = match command {
        DeltaCommands::List {
            acknowledged,
            severity,
            page,
            limit,
        } => (
            reqwest::Method::GET,
            "/v1/deltas".to_string(),
            list_query(acknowledged, severity, page, limit),
        ),
        DeltaCommands::Policy { policy_id } => (
            reqwest::Method::GET,
            format!("/v1/policies/{policy_id}/deltas"),
            Vec::new(),
        ),
        DeltaCommands::Ack { id } => (
            reqwest::Method::PUT,
            format!("/v1/deltas/{id}/acknowledge"),
            Vec::new(),
        ),
        DeltaCommands::AckAll => (
            reqwest::Method::PUT,
            "/v1/deltas/acknowledge-all".to_string(),
            Vec::new(),
        ),
        DeltaCommands::Explain { id } => (
            reqwest::Method::POST,
            format!("/v1/deltas/{id}/explain"),
            Vec::new(),
        ),
    };
    api_request(api_url, method, &path, Some(token), None, &query).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_query_skips_unset_filters() {
        assert!(list_query(None, None, None, None).is_empty());
        let query = list_query(Some(false), Some("critical".to_string()), None, Some(20));
        assert_eq!(
            query,
            vec![
                ("acknowledged".to_string(), "false".to_string()),
                ("severity".to_string(), "critical".to_string()),
                ("limit".to_string(), "20".to_string()),
            ]
        );
    }
}
