//! Ambient configuration (§1): environment-driven, no config-file parser.
//! `env_flag` is lifted directly from the reference `lib.rs` helper of the
//! same name; paths route through `shellexpand::tilde` the same way the
//! reference codebase expands a user-supplied vault path.

use std::path::PathBuf;

const DEFAULT_PORT: u16 = 4317;
const DEFAULT_DB_PATH: &str = "~/.agentctl/agentctl.db";
const DEFAULT_LOCK_PATH: &str = "~/.agentctl/agentctl.lock";

pub struct Config {
    pub db_path: String,
    pub lock_path: PathBuf,
    pub port: u16,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

impl Config {
    /// Reads `AGENTCTL_DB_PATH`, `AGENTCTL_LOCK_PATH`, and `AGENTCTL_PORT`
    /// from the environment, falling back to XDG-ish defaults under `~`.
    pub fn from_env() -> Self {
        let db_path = std::env::var("AGENTCTL_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
        let lock_path =
            std::env::var("AGENTCTL_LOCK_PATH").unwrap_or_else(|_| DEFAULT_LOCK_PATH.to_string());
        let port = std::env::var("AGENTCTL_PORT")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            db_path: shellexpand::tilde(&db_path).to_string(),
            lock_path: PathBuf::from(shellexpand::tilde(&lock_path).to_string()),
            port,
        }
    }

    pub fn verbose_logging() -> bool {
        env_flag("AGENTCTL_VERBOSE")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_expand_tilde_and_fall_back_to_default_port() {
        std::env::remove_var("AGENTCTL_DB_PATH");
        std::env::remove_var("AGENTCTL_LOCK_PATH");
        std::env::remove_var("AGENTCTL_PORT");

        let config = Config::from_env();
        assert!(!config.db_path.starts_with('~'));
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn env_flag_accepts_common_truthy_spellings() {
        std::env::set_var("AGENTCTL_VERBOSE", "YES");
        assert!(Config::verbose_logging());
        std::env::set_var("AGENTCTL_VERBOSE", "0");
        assert!(!Config::verbose_logging());
        std::env::remove_var("AGENTCTL_VERBOSE");
    }
}
