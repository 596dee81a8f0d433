//! INI file configuration adapter.
//!
//! `configparser` lower-cases section and key names on load.

use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let mut config = Ini::new();
        config.load(path).map_err(std::io::Error::other)?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, String> {
        let mut config = Ini::new();
        config.read(content.to_string())?;
        Ok(Self { config })
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.config
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.config
            .get(section, key)
            .as_ref()
            .and_then(|v| Self::parse_bool(v))
            .unwrap_or(default)
    }

    /// Sorted, since the underlying map is unordered.
    fn keys(&self, section: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .config
            .get_map_ref()
            .get(&section.to_lowercase())
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn from_string_parses_config() {
        let content = r#"
[simulator]
asset = ETH
start = 2024-01-01T00:00:00

[backtest]
initial_capital = 10000.0
"#;
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        assert_eq!(
            adapter.get_string("simulator", "asset"),
            Some("ETH".to_string())
        );
        assert_eq!(
            adapter.get_string("simulator", "start"),
            Some("2024-01-01T00:00:00".to_string())
        );
    }

    #[test]
    fn get_string_returns_none_for_missing_key() {
        let adapter =
            FileConfigAdapter::from_string("[backtest]\ninitial_capital = 100\n").unwrap();
        assert_eq!(adapter.get_string("backtest", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
    }

    #[test]
    fn get_int_returns_value_or_default() {
        let adapter =
            FileConfigAdapter::from_string("[features]\nwindow = 48\nbad = abc\n").unwrap();
        assert_eq!(adapter.get_int("features", "window", 0), 48);
        assert_eq!(adapter.get_int("features", "bad", 24), 24);
        assert_eq!(adapter.get_int("features", "missing", 7), 7);
    }

    #[test]
    fn get_double_returns_value_or_default() {
        let adapter = FileConfigAdapter::from_string(
            "[risk]\nvar_budget = 0.03\ninventory = not_a_number\n",
        )
        .unwrap();
        assert_eq!(adapter.get_double("risk", "var_budget", 0.0), 0.03);
        assert_eq!(adapter.get_double("risk", "inventory", 99.9), 99.9);
        assert_eq!(adapter.get_double("risk", "missing", 1.5), 1.5);
    }

    #[test]
    fn get_bool_parses_common_spellings() {
        let adapter = FileConfigAdapter::from_string(
            "[forecast]\na = true\nb = yes\nc = 1\nd = false\ne = no\nf = 0\n",
        )
        .unwrap();
        assert!(adapter.get_bool("forecast", "a", false));
        assert!(adapter.get_bool("forecast", "b", false));
        assert!(adapter.get_bool("forecast", "c", false));
        assert!(!adapter.get_bool("forecast", "d", true));
        assert!(!adapter.get_bool("forecast", "e", true));
        assert!(!adapter.get_bool("forecast", "f", true));
        assert!(adapter.get_bool("forecast", "missing", true));
    }

    #[test]
    fn keys_lists_section_entries() {
        let adapter =
            FileConfigAdapter::from_string("[risk.leverage]\nETH = 5\nBTC = 10\n").unwrap();
        assert_eq!(adapter.keys("risk.leverage"), vec!["btc", "eth"]);
        assert!(adapter.has_section("risk.leverage"));
        assert!(adapter.keys("missing").is_empty());
        assert!(!adapter.has_section("missing"));
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[venue_a]\nfunding_mean = 0.0001\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(adapter.get_double("venue_a", "funding_mean", 0.0), 0.0001);
    }

    #[test]
    fn from_file_returns_error_for_missing_file() {
        let result = FileConfigAdapter::from_file("/nonexistent/path/config.ini");
        assert!(result.is_err());
    }
}
