use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Load `.env` from the usual spots (best-effort). Variables already set in
/// the environment win.
pub fn load_dotenv() {
    // 1) current dir, 2) parent, 3) grandparent
    for path in [".env", "../.env", "../../.env"] {
        let _ = dotenvy::from_path(path);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub request_timeout: Duration,
    pub store_dir: PathBuf,
    pub openrouter_model: Option<String>,
}

/// Command-line values that take precedence over the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub store_dir: Option<PathBuf>,
    pub model: Option<String>,
}

impl Settings {
    pub fn from_env(overrides: Overrides) -> Result<Self> {
        Self::resolve(|key| std::env::var(key).ok(), overrides)
    }

    fn resolve(var: impl Fn(&str) -> Option<String>, overrides: Overrides) -> Result<Self> {
        let api_url = overrides
            .api_url
            .or_else(|| var("TRIAGE_API_URL"))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let timeout_secs = match overrides.timeout_secs {
            Some(secs) => secs,
            None => match var("TRIAGE_TIMEOUT_SECS") {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("TRIAGE_TIMEOUT_SECS must be a number of seconds, got {:?}", raw))?,
                None => DEFAULT_TIMEOUT_SECS,
            },
        };

        let store_dir = match overrides.store_dir.or_else(|| var("TRIAGE_STORE_DIR").map(PathBuf::from)) {
            Some(dir) => dir,
            None => default_store_dir()?,
        };

        Ok(Self {
            api_url,
            request_timeout: Duration::from_secs(timeout_secs),
            store_dir,
            openrouter_model: overrides.model.or_else(|| var("OPENROUTER_MODEL")),
        })
    }
}

fn default_store_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("no data directory for this platform; set TRIAGE_STORE_DIR")?;
    Ok(base.join("triage").join("messages"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let overrides = Overrides { store_dir: Some("/tmp/triage".into()), ..Default::default() };
        let s = Settings::resolve(vars(&[]), overrides).unwrap();
        assert_eq!(s.api_url, DEFAULT_API_URL);
        assert_eq!(s.request_timeout, Duration::from_secs(30));
        assert_eq!(s.openrouter_model, None);
    }

    #[test]
    fn test_env_then_flags() {
        let env = vars(&[
            ("TRIAGE_API_URL", "http://triage.internal/api"),
            ("TRIAGE_TIMEOUT_SECS", "5"),
            ("TRIAGE_STORE_DIR", "/var/lib/triage"),
            ("OPENROUTER_MODEL", "google/gemini-2.0-flash"),
        ]);
        let s = Settings::resolve(&env, Overrides::default()).unwrap();
        assert_eq!(s.api_url, "http://triage.internal/api");
        assert_eq!(s.request_timeout, Duration::from_secs(5));
        assert_eq!(s.store_dir, PathBuf::from("/var/lib/triage"));

        let flags = Overrides { api_url: Some("http://localhost:9000/api".into()), timeout_secs: Some(2), ..Default::default() };
        let s = Settings::resolve(&env, flags).unwrap();
        assert_eq!(s.api_url, "http://localhost:9000/api");
        assert_eq!(s.request_timeout, Duration::from_secs(2));
        assert_eq!(s.openrouter_model.as_deref(), Some("google/gemini-2.0-flash"));
    }

    #[test]
    fn test_bad_timeout_is_an_error() {
        let env = vars(&[("TRIAGE_TIMEOUT_SECS", "soon"), ("TRIAGE_STORE_DIR", "/tmp/x")]);
        let err = Settings::resolve(env, Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("TRIAGE_TIMEOUT_SECS"));
    }
}
