use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_TARGET_URL: &str = "https://www.aqi.in/in/real-time-most-polluted-city-ranking";
pub const DEFAULT_API_FRAGMENT: &str = "getAirQualityRanklistCountryAndCity";
pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";

const SIX_HOURS_SECS: u64 = 6 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Page rendered to trigger the API call.
    pub target_url: String,
    /// Substring that identifies the API response among the page's traffic.
    pub api_fragment: String,
    pub throttle_window_secs: u64,
    pub capture_timeout_secs: u64,
    pub port: u16,
    /// `*` allows any origin.
    pub cors_origins: Vec<String>,
    /// Holds `metadata.json` and the snapshot files.
    pub data_dir: PathBuf,
    pub browser_executable: Option<PathBuf>,
    pub browser_no_sandbox: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_url: DEFAULT_TARGET_URL.into(),
            api_fragment: DEFAULT_API_FRAGMENT.into(),
            throttle_window_secs: SIX_HOURS_SECS,
            capture_timeout_secs: 30,
            port: 3000,
            cors_origins: vec!["*".into()],
            data_dir: PathBuf::from("."),
            browser_executable: None,
            browser_no_sandbox: true,
        }
    }
}

impl Settings {
    /// Reads the JSON settings file (if any), then applies environment overrides.
    ///
    /// With no explicit path, `AQI_SETTINGS` is consulted and then
    /// `settings.json` in the working directory, which is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match env::var_os("AQI_SETTINGS") {
                Some(path) => (PathBuf::from(path), true),
                None => (PathBuf::from(DEFAULT_SETTINGS_FILE), false),
            },
        };

        let mut settings = if required || path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        settings.apply_overrides(|key| env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    /// Applies overrides from a key lookup; `Settings::load` passes the process env.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("AQI_TARGET_URL") {
            self.target_url = value;
        }
        if let Some(value) = lookup("AQI_API_FRAGMENT") {
            self.api_fragment = value;
        }
        if let Some(value) = lookup("AQI_THROTTLE_WINDOW_SECS") {
            self.throttle_window_secs = parse_var("AQI_THROTTLE_WINDOW_SECS", &value)?;
        }
        if let Some(value) = lookup("AQI_CAPTURE_TIMEOUT_SECS") {
            self.capture_timeout_secs = parse_var("AQI_CAPTURE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("PORT") {
            self.port = parse_var("PORT", &value)?;
        }
        if let Some(value) = lookup("CORS_ORIGIN") {
            self.cors_origins = value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(value) = lookup("AQI_DATA_DIR") {
            self.data_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("AQI_BROWSER_EXECUTABLE") {
            self.browser_executable = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("AQI_BROWSER_NO_SANDBOX") {
            self.browser_no_sandbox = value == "1" || value.eq_ignore_ascii_case("true");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_url.trim().is_empty() {
            bail!("target_url must not be empty");
        }
        if self.api_fragment.trim().is_empty() {
            bail!("api_fragment must not be empty");
        }
        if self.throttle_window_secs == 0 {
            bail!("throttle_window_secs must be greater than zero");
        }
        if self.capture_timeout_secs == 0 {
            bail!("capture_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn throttle_window(&self) -> Duration {
        Duration::from_secs(self.throttle_window_secs)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.is_empty() || self.cors_origins.iter().any(|origin| origin == "*")
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{key} has invalid value '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_six_hour_window_and_thirty_second_timeout() {
        let settings = Settings::default();
        assert_eq!(settings.throttle_window(), Duration::from_secs(21_600));
        assert_eq!(settings.capture_timeout(), Duration::from_secs(30));
        assert_eq!(settings.api_fragment, DEFAULT_API_FRAGMENT);
        assert!(settings.allows_any_origin());
        settings.validate().unwrap();
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut settings = Settings::default();
        settings
            .apply_overrides(lookup(&[
                ("PORT", "8080"),
                ("CORS_ORIGIN", "https://a.example, https://b.example"),
                ("AQI_THROTTLE_WINDOW_SECS", "60"),
                ("AQI_BROWSER_NO_SANDBOX", "false"),
            ]))
            .unwrap();

        assert_eq!(settings.port, 8080);
        assert_eq!(
            settings.cors_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert_eq!(settings.throttle_window_secs, 60);
        assert!(!settings.browser_no_sandbox);
        assert!(!settings.allows_any_origin());
    }

    #[test]
    fn invalid_numeric_override_is_an_error() {
        let mut settings = Settings::default();
        let err = settings
            .apply_overrides(lookup(&[("PORT", "not-a-port")]))
            .unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn file_with_partial_keys_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "capture_timeout_secs": 5, "data_dir": "/var/lib/aqi" }"#).unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.capture_timeout_secs, 5);
        assert_eq!(settings.data_dir, PathBuf::from("/var/lib/aqi"));
        assert_eq!(settings.target_url, DEFAULT_TARGET_URL);
    }

    #[test]
    fn zero_window_is_rejected() {
        let settings = Settings {
            throttle_window_secs: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
