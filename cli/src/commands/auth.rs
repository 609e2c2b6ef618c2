use serde_json::json;

use crate::util::{StoredCredentials, client, config_path, exit_code_for, save_credentials};

/// Register a user and store the returned API key locally.
pub async fn register(
    api_url: &str,
    email: &str,
    password: &str,
    display_name: Option<&str>,
) -> Result<i32, Box<dyn std::error::Error>> {
    let resp = client()
        .post(format!("{api_url}/v1/auth/register"))
        .json(&json!({
            "email": email,
            "password": password,
            "display_name": display_name
        }))
        .send()
        .await?;

    let status = resp.status().as_u16();
    let body: serde_json::Value = resp.json().await?;
    if !resp_ok(status) {
        eprintln!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(exit_code_for(status));
    }

    let api_key = body["api_key"]
        .as_str()
        .ok_or("Registration response did not contain an api_key")?
        .to_string();
    save_credentials(&StoredCredentials {
        api_url: api_url.to_string(),
        api_key,
    })?;

    let output = json!({
        "status": "registered",
        "user_id": body["user_id"],
        "email": body["email"],
        "key_prefix": body["key_prefix"],
        "config_path": config_path().to_string_lossy()
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(0)
}

fn resp_ok(status: u16) -> bool {
    exit_code_for(status) == 0
}

pub fn logout() -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path();
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    let output = json!({
        "status": "logged_out",
        "config_path": path.to_string_lossy()
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
