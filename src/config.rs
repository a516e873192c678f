//! Relay configuration: the provider list file and runtime settings.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::error::RelayError;
use crate::provider::{ProviderRecord, SpecifierKind, repository_path, specifier_kind};
use crate::workspace::{absolute_root, normalize};

/// Env keys become inline shell assignments, so they must be plain identifiers.
fn env_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
}

fn repository_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").expect("valid regex"))
}

/// Strip an env var reference to its variable name.
///
/// Accepts `${VAR_NAME}` syntax only. Returns `None` if the value is not a
/// reference, in which case it is used literally.
pub fn parse_env_ref(value: &str) -> Option<&str> {
    value.strip_prefix("${").and_then(|s| s.strip_suffix('}'))
}

/// Resolve a single env value: `${VAR}` reads the relay's own environment
/// (unset resolves to the empty string), anything else is passed through.
pub fn resolve_env_value(value: &str) -> String {
    match parse_env_ref(value) {
        Some(var_name) => std::env::var(var_name).unwrap_or_default(),
        None => value.to_string(),
    }
}

/// The provider list file: `{ "servers": [...], "envs": [{...}, ...] }`.
///
/// `envs` is index-aligned with `servers` and may be shorter or absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub envs: Vec<BTreeMap<String, String>>,
}

impl RelayConfig {
    /// Read and parse a config file. `.toml` files are parsed as TOML,
    /// everything else as JSON.
    pub async fn load(path: &Path) -> crate::Result<Self> {
        let subject = path.display().to_string();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RelayError::InvalidConfig(subject.clone(), e.to_string()))?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            toml::from_str(&content).map_err(|e| RelayError::InvalidConfig(subject, e.to_string()))
        } else {
            serde_json::from_str(&content)
                .map_err(|e| RelayError::InvalidConfig(subject, e.to_string()))
        }
    }

    /// Validate the provider list, failing fast before anything is installed.
    pub fn validate(&self) -> crate::Result<()> {
        if self.envs.len() > self.servers.len() {
            return Err(RelayError::InvalidConfig(
                "envs".to_string(),
                format!(
                    "{} env mappings for {} servers; envs must be index-aligned with servers",
                    self.envs.len(),
                    self.servers.len()
                ),
            ));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut checkout_names: HashSet<&str> = HashSet::new();

        for (index, specifier) in self.servers.iter().enumerate() {
            if specifier.trim().is_empty() {
                return Err(RelayError::InvalidConfig(
                    format!("servers[{}]", index),
                    "specifier must not be empty".to_string(),
                ));
            }
            if !seen.insert(specifier.as_str()) {
                return Err(RelayError::DuplicateProvider(specifier.clone()));
            }

            if specifier_kind(specifier) == SpecifierKind::Repository {
                let path = repository_path(specifier).unwrap_or_default();
                if !repository_path_re().is_match(path) {
                    return Err(RelayError::InvalidConfig(
                        specifier.clone(),
                        "repository specifier must look like github:<owner>/<repo>".to_string(),
                    ));
                }
                // Each repository is cloned into packages/<repo>
                let name = checkout_name(path);
                if !checkout_names.insert(name) {
                    return Err(RelayError::InvalidConfig(
                        specifier.clone(),
                        format!("another repository already checks out into '{}'", name),
                    ));
                }
            }

            if let Some(env) = self.envs.get(index) {
                for key in env.keys() {
                    if !env_key_re().is_match(key) {
                        return Err(RelayError::InvalidConfig(
                            specifier.clone(),
                            format!("env key '{}' is not a valid variable name", key),
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    /// Zip specifiers with their env mappings, padding missing envs with
    /// empty maps. Order matches `servers`.
    pub fn providers(&self) -> Vec<ProviderRecord> {
        self.servers
            .iter()
            .enumerate()
            .map(|(index, specifier)| {
                ProviderRecord::with_env(
                    specifier.clone(),
                    self.envs.get(index).cloned().unwrap_or_default(),
                )
            })
            .collect()
    }
}

/// Directory name a repository is cloned into: the last path component,
/// without a trailing `.git`.
pub fn checkout_name(repository_path: &str) -> &str {
    let base = repository_path.rsplit('/').next().unwrap_or(repository_path);
    base.strip_suffix(".git").unwrap_or(base)
}

/// Runtime settings: listener, port range, workspace and external tools.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub host: String,
    pub port: u16,
    pub internal_port_start: u16,
    pub workspace_root: PathBuf,
    pub git_program: PathBuf,
    pub pnpm_program: PathBuf,
    pub adapter_program: PathBuf,
    pub repository_host: String,
    /// Zero disables readiness probing; adapters count as ready once spawned.
    pub readiness_timeout: Duration,
}

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_INTERNAL_PORT_START: u16 = 9000;
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(30);

impl RelaySettings {
    /// Settings with defaults for everything except the workspace location.
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            internal_port_start: DEFAULT_INTERNAL_PORT_START,
            workspace_root: workspace_root.into(),
            git_program: PathBuf::from("git"),
            pnpm_program: PathBuf::from("pnpm"),
            adapter_program: PathBuf::from("supergateway"),
            repository_host: "https://github.com".to_string(),
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
        }
    }

    /// Validate settings against the number of providers that will be run.
    pub fn validate(&self, provider_count: usize) -> crate::Result<()> {
        if !self.workspace_root_is_safe() {
            return Err(RelayError::InvalidConfig(
                "workspace".to_string(),
                format!(
                    "refusing to use '{}' as workspace root: it is wiped on every run",
                    self.workspace_root.display()
                ),
            ));
        }

        if provider_count > 0 {
            let last = self.internal_port_start as usize + provider_count - 1;
            if last > u16::MAX as usize {
                return Err(RelayError::InvalidConfig(
                    "internal_port_start".to_string(),
                    format!(
                        "{} providers starting at port {} exceed port {}",
                        provider_count,
                        self.internal_port_start,
                        u16::MAX
                    ),
                ));
            }
            if (self.internal_port_start as usize..=last).contains(&(self.port as usize)) {
                return Err(RelayError::InvalidConfig(
                    "port".to_string(),
                    format!(
                        "port {} overlaps internal port range {}-{}",
                        self.port, self.internal_port_start, last
                    ),
                ));
            }
        }

        Ok(())
    }

    /// The root is wiped on every run: it may not be a filesystem root, the
    /// current directory or one of its ancestors.
    fn workspace_root_is_safe(&self) -> bool {
        if self.workspace_root.as_os_str().is_empty() {
            return false;
        }
        let Ok(root) = absolute_root(&self.workspace_root) else {
            return false;
        };
        if root.parent().is_none() {
            return false;
        }
        std::env::current_dir()
            .map(|cwd| !normalize(&cwd).starts_with(&root))
            .unwrap_or(true)
    }

    /// Internal port for the provider at canonical `index`.
    ///
    /// Only valid after `validate` accepted the provider count.
    pub fn internal_port(&self, index: usize) -> Option<u16> {
        u16::try_from(index)
            .ok()
            .and_then(|offset| self.internal_port_start.checked_add(offset))
    }

    /// `host:port` for the front-door listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_json(json: &str) -> RelayConfig {
        serde_json::from_str(json).expect("valid JSON")
    }

    #[test]
    fn test_parse_env_ref() {
        assert_eq!(parse_env_ref("${FOO}"), Some("FOO"));
        assert_eq!(parse_env_ref("$FOO"), None);
        assert_eq!(parse_env_ref("literal"), None);
        assert_eq!(parse_env_ref("${"), None);
    }

    #[test]
    fn test_resolve_env_value() {
        // SAFETY: test-only, no concurrent threads depend on this env var.
        unsafe { std::env::set_var("RELAY_TEST_VAR", "resolved_value") };
        assert_eq!(resolve_env_value("${RELAY_TEST_VAR}"), "resolved_value");
        assert_eq!(resolve_env_value("plain"), "plain");
        assert_eq!(resolve_env_value("${RELAY_TEST_UNSET_VAR}"), "");
        // SAFETY: test-only cleanup.
        unsafe { std::env::remove_var("RELAY_TEST_VAR") };
    }

    #[test]
    fn test_envs_padded_to_server_count() {
        let config = parse_json(r#"{"servers": ["left-pad", "github:org/tool"]}"#);
        assert!(config.validate().is_ok());
        let providers = config.providers();
        assert_eq!(providers.len(), 2);
        assert!(providers.iter().all(|p| p.env.is_empty()));
    }

    #[test]
    fn test_envs_aligned_by_index() {
        let config = parse_json(
            r#"{"servers": ["a", "b", "c"], "envs": [{"A": "1"}, {"B": "2"}]}"#,
        );
        let providers = config.providers();
        assert_eq!(providers[0].env.get("A").map(String::as_str), Some("1"));
        assert_eq!(providers[1].env.get("B").map(String::as_str), Some("2"));
        assert!(providers[2].env.is_empty());
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = parse_json("{}");
        assert!(config.validate().is_ok());
        assert!(config.providers().is_empty());
    }

    #[test]
    fn test_more_envs_than_servers_rejected() {
        let config = parse_json(r#"{"servers": ["a"], "envs": [{}, {}]}"#);
        assert!(
            matches!(config.validate(), Err(RelayError::InvalidConfig(subject, _)) if subject == "envs")
        );
    }

    #[test]
    fn test_duplicate_specifier_rejected() {
        let config = parse_json(r#"{"servers": ["left-pad", "left-pad"]}"#);
        assert!(
            matches!(config.validate(), Err(RelayError::DuplicateProvider(s)) if s == "left-pad")
        );
    }

    #[test]
    fn test_empty_specifier_rejected() {
        let config = parse_json(r#"{"servers": ["  "]}"#);
        assert!(matches!(
            config.validate(),
            Err(RelayError::InvalidConfig(_, msg)) if msg.contains("empty")
        ));
    }

    #[test]
    fn test_malformed_repository_rejected() {
        let config = parse_json(r#"{"servers": ["github:just-a-name"]}"#);
        assert!(matches!(
            config.validate(),
            Err(RelayError::InvalidConfig(s, msg)) if s == "github:just-a-name" && msg.contains("owner")
        ));
    }

    #[test]
    fn test_repository_checkout_collision_rejected() {
        let config = parse_json(r#"{"servers": ["github:one/tool", "github:two/tool.git"]}"#);
        assert!(matches!(
            config.validate(),
            Err(RelayError::InvalidConfig(s, msg)) if s == "github:two/tool.git" && msg.contains("tool")
        ));
    }

    #[test]
    fn test_invalid_env_key_rejected() {
        let config = parse_json(r#"{"servers": ["a"], "envs": [{"BAD KEY": "x"}]}"#);
        assert!(matches!(
            config.validate(),
            Err(RelayError::InvalidConfig(s, msg)) if s == "a" && msg.contains("BAD KEY")
        ));
    }

    #[test]
    fn test_checkout_name() {
        assert_eq!(checkout_name("org/tool"), "tool");
        assert_eq!(checkout_name("org/tool.git"), "tool");
    }

    #[tokio::test]
    async fn test_load_json_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mcp-servers.json");
        std::fs::write(
            &path,
            r#"{"servers": ["left-pad"], "envs": [{"TOKEN": "${TOKEN}"}]}"#,
        )
        .expect("write config");
        let config = RelayConfig::load(&path).await.expect("load");
        assert_eq!(config.servers, vec!["left-pad".to_string()]);
        assert_eq!(config.envs[0].get("TOKEN").map(String::as_str), Some("${TOKEN}"));
    }

    #[tokio::test]
    async fn test_load_toml_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("relay.toml");
        std::fs::write(
            &path,
            r#"
            servers = ["left-pad", "github:org/tool"]

            [[envs]]
            PAD = "1"
            "#,
        )
        .expect("write config");
        let config = RelayConfig::load(&path).await.expect("load");
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.envs.len(), 1);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = RelayConfig::load(Path::new("/nonexistent/relay/servers.json")).await;
        assert!(matches!(result, Err(RelayError::InvalidConfig(_, _))));
    }

    #[tokio::test]
    async fn test_load_invalid_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("servers.json");
        std::fs::write(&path, "{ not json").expect("write config");
        assert!(RelayConfig::load(&path).await.is_err());
    }

    #[test]
    fn test_settings_defaults() {
        let settings = RelaySettings::new("/tmp/relay-workspace");
        assert_eq!(settings.port, 3000);
        assert_eq!(settings.internal_port_start, 9000);
        assert_eq!(settings.readiness_timeout, Duration::from_secs(30));
        assert!(settings.validate(2).is_ok());
    }

    #[test]
    fn test_internal_ports_unique_per_index() {
        let settings = RelaySettings::new("/tmp/relay-workspace");
        let ports: Vec<u16> = (0..50).filter_map(|i| settings.internal_port(i)).collect();
        let unique: HashSet<u16> = ports.iter().copied().collect();
        assert_eq!(ports.len(), 50);
        assert_eq!(unique.len(), 50);
        assert_eq!(ports[0], 9000);
        assert_eq!(ports[49], 9049);
    }

    #[test]
    fn test_port_range_overflow_rejected() {
        let mut settings = RelaySettings::new("/tmp/relay-workspace");
        settings.internal_port_start = 65535;
        assert!(settings.validate(1).is_ok());
        assert!(settings.validate(2).is_err());
    }

    #[test]
    fn test_public_port_inside_internal_range_rejected() {
        let mut settings = RelaySettings::new("/tmp/relay-workspace");
        settings.port = 9001;
        assert!(matches!(
            settings.validate(2),
            Err(RelayError::InvalidConfig(s, _)) if s == "port"
        ));
        // No providers means no internal range to collide with
        assert!(settings.validate(0).is_ok());
    }

    #[test]
    fn test_filesystem_root_workspace_rejected() {
        let settings = RelaySettings::new("/");
        assert!(settings.validate(0).is_err());
    }

    #[test]
    fn test_workspace_root_resolving_to_unsafe_directory_rejected() {
        for root in [".", "..", "/tmp/..", "", "./"] {
            let settings = RelaySettings::new(root);
            assert!(
                matches!(settings.validate(0), Err(RelayError::InvalidConfig(s, _)) if s == "workspace"),
                "workspace root {:?} should be rejected",
                root
            );
        }
    }

    #[test]
    fn test_relative_workspace_root_below_cwd_accepted() {
        assert!(RelaySettings::new("relay-workspace").validate(0).is_ok());
        assert!(RelaySettings::new("./target/../relay-workspace").validate(0).is_ok());
    }
}
