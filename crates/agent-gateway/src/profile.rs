//! Generated configuration files for the agent runtime.
//!
//! Written once at startup, before the gateway is launched:
//!
//! * `<state_dir>/openclaw.json`: default model, agent workspace, gateway
//!   port and token auth.
//! * `<state_dir>/agents/<id>/agent/auth-profiles.json`: a provider API-key
//!   profile, only when a provider key is present in the environment.

use crate::GatewayError;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4-5";

/// Provider key variables, checked in order.
const PROVIDER_KEYS: &[(&str, &str)] = &[
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("openai", "OPENAI_API_KEY"),
];

/// Settings rendered into the runtime's main config file.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub model: String,
    pub workspace: PathBuf,
    pub port: u16,
    pub token: String,
}

impl AgentProfile {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "agents": {
                "defaults": {
                    "model": { "primary": self.model },
                    "workspace": self.workspace,
                }
            },
            "gateway": {
                "mode": "local",
                "port": self.port,
                "bind": "loopback",
                "auth": { "mode": "token", "token": self.token }
            }
        })
    }
}

/// Write `<state_dir>/openclaw.json`, creating the directory if needed.
pub fn write_config(state_dir: &Path, profile: &AgentProfile) -> Result<PathBuf, GatewayError> {
    let path = state_dir.join("openclaw.json");
    write_json(&path, &profile.to_json())?;
    info!("Wrote agent config: {}", path.display());
    Ok(path)
}

/// Write an API-key auth profile for `agent_id`.
pub fn write_auth_profile(
    state_dir: &Path,
    agent_id: &str,
    provider: &str,
    api_key: &str,
) -> Result<PathBuf, GatewayError> {
    let path = state_dir
        .join("agents")
        .join(agent_id)
        .join("agent")
        .join("auth-profiles.json");
    let mut profiles = serde_json::Map::new();
    profiles.insert(
        format!("{provider}:default"),
        json!({ "type": "api_key", "provider": provider, "key": api_key }),
    );
    let body = json!({ "version": 1, "profiles": profiles });
    write_json(&path, &body)?;
    info!("Wrote {} auth profile: {}", provider, path.display());
    Ok(path)
}

/// First provider API key found in the environment, as `(provider, key)`.
pub fn provider_key_from_env() -> Option<(&'static str, String)> {
    PROVIDER_KEYS.iter().find_map(|(provider, var)| {
        std::env::var(var)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(|k| (*provider, k))
    })
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<(), GatewayError> {
    let write_err = |source| GatewayError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let body = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, body).map_err(write_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> AgentProfile {
        AgentProfile {
            model: "openai/gpt-4.1".into(),
            workspace: PathBuf::from("/srv/workspace"),
            port: 18789,
            token: "tok".into(),
        }
    }

    #[test]
    fn config_file_contains_model_workspace_and_auth() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &profile()).unwrap();
        assert_eq!(path, dir.path().join("openclaw.json"));

        let v: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(v["agents"]["defaults"]["model"]["primary"], "openai/gpt-4.1");
        assert_eq!(v["agents"]["defaults"]["workspace"], "/srv/workspace");
        assert_eq!(v["gateway"]["port"], 18789);
        assert_eq!(v["gateway"]["auth"]["token"], "tok");
    }

    #[test]
    fn auth_profile_lands_under_agent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("fresh");
        let path = write_auth_profile(&nested, "main", "anthropic", "sk-test").unwrap();
        assert!(path.ends_with("agents/main/agent/auth-profiles.json"));

        let v: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(v["profiles"]["anthropic:default"]["key"], "sk-test");
        assert_eq!(v["profiles"]["anthropic:default"]["type"], "api_key");
    }
}
