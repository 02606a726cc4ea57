//! Configuration layer: built-in defaults, the legacy `/usr/etc/messip` file, and CLI
//! flags, layered lowest to highest precedence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTROL_PORT: u16 = 9200;
pub const DEFAULT_HTTP_PORT: u16 = 9201;
pub const LEGACY_CONFIG_PATH: &str = "/usr/etc/messip";

/// The manager's resolved configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub host: String,
    pub port: u16,
    pub http_port: u16,
    pub log_dir: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_CONTROL_PORT,
            http_port: DEFAULT_HTTP_PORT,
            log_dir: None,
        }
    }
}

/// One parsed line of the legacy `/usr/etc/messip` file: `<host> <port> <http_port> <path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyEntry {
    pub host: String,
    pub port: u16,
    pub http_port: u16,
    pub path: String,
}

/// Parses the legacy config file format. The reader itself is a small, single-purpose
/// collaborator (the generic config-file-format machinery was named out of scope), but the
/// one layout the manager and client library actually consume is implemented here so both can
/// honour a deployed `/usr/etc/messip` without external help.
pub fn parse_legacy_line(line: &str) -> Option<LegacyEntry> {
    let mut fields = line.split_whitespace();
    let host = fields.next()?.to_string();
    let port = fields.next()?.parse().ok()?;
    let http_port = fields.next()?.parse().ok()?;
    let path = fields.next().unwrap_or("/").to_string();
    Some(LegacyEntry {
        host,
        port,
        http_port,
        path,
    })
}

/// Reads and parses the first non-empty line of the legacy config file at `path`, if present.
pub fn read_legacy_file(path: &Path) -> Option<LegacyEntry> {
    let contents = std::fs::read_to_string(path).ok()?;
    contents.lines().find_map(parse_legacy_line)
}

impl ManagerConfig {
    /// Layers the legacy file (if present at the default location) over the built-in
    /// defaults, without yet applying any CLI overrides.
    pub fn with_legacy_file_defaults() -> Self {
        let mut cfg = Self::default();
        if let Some(entry) = read_legacy_file(Path::new(LEGACY_CONFIG_PATH)) {
            cfg.host = entry.host;
            cfg.port = entry.port;
            cfg.http_port = entry.http_port;
        }
        cfg
    }
}

/// Resolves the manager host a client should connect to, per the same three-source
/// precedence: explicit argument, else the legacy file, else `localhost`.
pub fn resolve_client_host(explicit: Option<&str>) -> String {
    if let Some(host) = explicit {
        return host.to_string();
    }
    if let Some(entry) = read_legacy_file(Path::new(LEGACY_CONFIG_PATH)) {
        return entry.host;
    }
    "localhost".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_legacy_line() {
        let entry = parse_legacy_line("messip-host 9200 9201 /var/messip").unwrap();
        assert_eq!(entry.host, "messip-host");
        assert_eq!(entry.port, 9200);
        assert_eq!(entry.http_port, 9201);
        assert_eq!(entry.path, "/var/messip");
    }

    #[test]
    fn legacy_line_defaults_missing_path() {
        let entry = parse_legacy_line("host 1 2").unwrap();
        assert_eq!(entry.path, "/");
    }

    #[test]
    fn rejects_malformed_line() {
        assert!(parse_legacy_line("only-one-field").is_none());
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = ManagerConfig::default();
        assert_eq!(cfg.port, DEFAULT_CONTROL_PORT);
        assert_eq!(cfg.http_port, DEFAULT_HTTP_PORT);
    }

    #[test]
    fn reads_legacy_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messip");
        std::fs::write(&path, "10.0.0.5 9300 9301 /var/run/messip\n").unwrap();

        let entry = read_legacy_file(&path).unwrap();
        assert_eq!(entry.host, "10.0.0.5");
        assert_eq!(entry.port, 9300);
        assert_eq!(entry.http_port, 9301);
    }

    #[test]
    fn missing_legacy_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_legacy_file(&dir.path().join("absent")).is_none());
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = ManagerConfig {
            host: "192.168.1.1".to_string(),
            port: 9200,
            http_port: 9201,
            log_dir: Some(PathBuf::from("/var/log/messip")),
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let restored: ManagerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.host, cfg.host);
        assert_eq!(restored.port, cfg.port);
        assert_eq!(restored.log_dir, cfg.log_dir);
    }
}
