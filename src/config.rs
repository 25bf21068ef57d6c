//! Demo binary configuration, loaded from environment variables.

/// Settings of the loopback demo.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the demo session.
    pub session_name: String,
    /// Name of the user joined directly at the server.
    pub local_user: String,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults where unset.
    pub fn from_env() -> Self {
        Self {
            session_name: var_or("TANDEM_SESSION_NAME", "scratchpad"),
            local_user: var_or("TANDEM_LOCAL_USER", "server"),
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
