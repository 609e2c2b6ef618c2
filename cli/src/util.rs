use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Stored credentials for the CLI
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub api_url: String,
    pub api_key: String,
}

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", serde_json::to_string_pretty(&err).unwrap_or_else(|_| err.to_string()));
    std::process::exit(4);
}

pub fn config_path() -> std::path::PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("covrabl")
        .join("config.json")
}

pub fn load_credentials() -> Option<StoredCredentials> {
    let data = std::fs::read_to_string(config_path()).ok()?;
    serde_json::from_str(&data).ok()
}

pub fn save_credentials(creds: &StoredCredentials) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let data = serde_json::to_string_pretty(creds)?;

    // Write with restricted permissions (0o600)
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&path)?;
    file.write_all(data.as_bytes())?;

    Ok(())
}

/// Resolve the API key (priority order):
/// 1. COVRABL_API_KEY env var
/// 2. ~/.config/covrabl/config.json, written by `covrabl register`
pub fn resolve_token() -> Result<String, String> {
    if let Ok(key) = std::env::var("COVRABL_API_KEY") {
        if !key.trim().is_empty() {
            return Ok(key.trim().to_string());
        }
    }
    load_credentials()
        .map(|creds| creds.api_key)
        .ok_or_else(|| "No API key found. Run `covrabl register` or set COVRABL_API_KEY.".to_string())
}

/// Resolve the API key or exit with a usage error.
pub fn require_token() -> String {
    resolve_token().unwrap_or_else(|e| exit_error(&e, Some("Keys are issued once by POST /v1/auth/register.")))
}

/// Exit code for an HTTP status: 0=2xx, 1=4xx, 2=anything else.
pub fn exit_code_for(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

/// Execute an API request, print the JSON response, return a structured exit code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub async fn api_request(
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
    query: &[(String, String)],
) -> i32 {
    let mut url = match reqwest::Url::parse(&format!("{api_url}{path}")) {
        Ok(u) => u,
        Err(e) => {
            eprintln!(
                "{}",
                json!({"error": "cli_error", "message": format!("Invalid URL: {api_url}{path}: {e}")})
            );
            return 4;
        }
    };
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in query {
            pairs.append_pair(k, v);
        }
    }

    let mut req = client().request(method, url);
    if let Some(t) = token {
        req = req.header("Authorization", format!("Bearer {t}"));
    }
    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            let err = json!({
                "error": "connection_error",
                "message": format!("{e}"),
                "docs_hint": "Is the API server running? Check COVRABL_API_URL."
            });
            eprintln!("{err:#}");
            return 3;
        }
    };

    let status = resp.status().as_u16();
    let exit_code = exit_code_for(status);

    // 204 has no body
    let text = resp.text().await.unwrap_or_default();
    let output: serde_json::Value = if text.is_empty() {
        json!({"status": status})
    } else {
        serde_json::from_str(&text)
            .unwrap_or_else(|e| json!({"raw_error": format!("Failed to parse response as JSON: {e}")}))
    };

    if exit_code == 0 {
        println!("{output:#}");
    } else {
        eprintln!("{output:#}");
    }
    exit_code
}

/// Parse a JSON object given inline or read from a file (use '-' for stdin).
pub fn json_argument(
    data: Option<&str>,
    data_file: Option<&str>,
) -> Result<serde_json::Value, String> {
    let raw = match (data, data_file) {
        (Some(d), _) => d.to_string(),
        (None, Some("-")) => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("Failed to read stdin: {e}"))?;
            buf
        }
        (None, Some(path)) => std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read file '{path}': {e}"))?,
        (None, None) => return Ok(json!({})),
    };
    let value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| format!("Invalid JSON: {e}"))?;
    if !value.is_object() {
        return Err("Expected a JSON object".to_string());
    }
    Ok(value)
}

/// Split a repeatable `name=value` argument.
pub fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("Invalid pair '{raw}', expected name=value"))
}

// Unix-specific imports for file permissions
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

#[cfg(not(unix))]
trait OpenOptionsExt {
    fn mode(&mut self, _mode: u32) -> &mut Self;
}

#[cfg(not(unix))]
impl OpenOptionsExt for std::fs::OpenOptions {
    fn mode(&mut self, _mode: u32) -> &mut Self {
        self
    }
}
