//! Stack configuration.
//!
//! A stack is described by one YAML file. Optional sections (`db_instance`,
//! `web_app`) switch whole layers on or off; everything else falls back to
//! the defaults below.

use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors found while loading or validating a stack file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML for a stack.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A required value is empty.
    #[error("Missing required config value: {0}")]
    Missing(&'static str),

    /// A CIDR block is malformed or unsupported.
    #[error("Invalid CIDR for {field}: '{value}' ({reason})")]
    InvalidCidr {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// A value is out of range or inconsistent with another one.
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Owner tags merged into every taggable resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TagConfig {
    pub user_name: String,
    pub stack_name: String,
}

/// VPC layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// VPC CIDR; must be a /16.
    pub cidr: String,
    /// One public and one private subnet per zone.
    pub availability_zones: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cidr: "10.0.0.0/16".to_string(),
            availability_zones: vec!["us-east-1a".to_string(), "us-east-1b".to_string()],
        }
    }
}

impl NetworkConfig {
    /// Public subnet CIDR for the zone at `index`.
    #[must_use]
    pub fn public_cidr(&self, index: usize) -> String {
        self.subnet_cidr(index + 1)
    }

    /// Private subnet CIDR for the zone at `index`.
    #[must_use]
    pub fn private_cidr(&self, index: usize) -> String {
        self.subnet_cidr(index + 10)
    }

    fn subnet_cidr(&self, third: usize) -> String {
        let base = self.cidr.split('/').next().unwrap_or_default();
        let mut octets = base.split('.');
        let a = octets.next().unwrap_or("10");
        let b = octets.next().unwrap_or("0");
        format!("{a}.{b}.{third}.0/24")
    }
}

/// Managed cluster and its node group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub name: String,
    pub version: String,
    pub instance_type: String,
    pub desired: u32,
    pub min: u32,
    pub max: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "ultra-tic".to_string(),
            version: "1.31".to_string(),
            instance_type: "t3.medium".to_string(),
            desired: 2,
            min: 1,
            max: 2,
        }
    }
}

/// Container registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub repository: String,
    /// Untagged images kept before expiry.
    pub untagged_images: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            repository: "ultratic-redux".to_string(),
            untagged_images: 10,
        }
    }
}

/// Standalone database host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbInstanceConfig {
    /// Host name; also the DNS label under the internal domain.
    pub name: String,
    pub instance_type: String,
    pub key_name: Option<String>,
    /// SSH ingress source. No SSH rule is declared when unset.
    pub ssh_cidr: Option<String>,
    pub database: String,
    pub username: String,
    /// Change to rotate the generated password.
    pub password_keeper: String,
    /// Playbook run by `ansible-pull` at boot.
    pub playbook: String,
    pub bootstrap_timeout_secs: u64,
}

impl Default for DbInstanceConfig {
    fn default() -> Self {
        Self {
            name: "db-instance".to_string(),
            instance_type: "t3.medium".to_string(),
            key_name: None,
            ssh_cidr: None,
            database: "ultratic".to_string(),
            username: "ultratic".to_string(),
            password_keeper: "1".to_string(),
            playbook: "playbooks/postgres.yml".to_string(),
            bootstrap_timeout_secs: 900,
        }
    }
}

/// Image build inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub context: String,
    pub dockerfile: String,
    pub tag: String,
    pub platform: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            context: "./app".to_string(),
            dockerfile: "Dockerfile".to_string(),
            tag: "latest".to_string(),
            platform: "linux/amd64".to_string(),
        }
    }
}

/// Application deployed on the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebAppConfig {
    /// Namespace and deployment name.
    pub name: String,
    /// Container port; the service exposes it on port 80.
    #[serde(alias = "target_port")]
    pub port: u16,
    /// Name of the stored database secret and of its cluster projection.
    pub postgres_secret: String,
    pub replicas: u32,
    pub image: ImageConfig,
}

impl Default for WebAppConfig {
    fn default() -> Self {
        Self {
            name: "web-app".to_string(),
            port: 3000,
            postgres_secret: "web-app-pg".to_string(),
            replicas: 2,
            image: ImageConfig::default(),
        }
    }
}

/// External-secrets operator chart coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalSecretsConfig {
    pub helm_chart: String,
    pub helm_chart_version: String,
    pub helm_repo: String,
}

impl Default for ExternalSecretsConfig {
    fn default() -> Self {
        Self {
            helm_chart: "external-secrets".to_string(),
            helm_chart_version: "0.10.4".to_string(),
            helm_repo: "https://charts.external-secrets.io".to_string(),
        }
    }
}

/// Configuration audit (AWS Config).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Full stack configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackConfig {
    pub stack: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub tags: TagConfig,
    pub git_repo_url: String,
    /// Backup bucket name.
    pub s3_bucket: String,
    /// Private hosted zone for internal names.
    pub internal_domain: String,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub db_instance: Option<DbInstanceConfig>,
    #[serde(default)]
    pub web_app: Option<WebAppConfig>,
    #[serde(default)]
    pub external_secrets: ExternalSecretsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl StackConfig {
    /// Minimal valid configuration for a stack.
    #[must_use]
    pub fn with_defaults(stack: &str) -> Self {
        Self {
            stack: stack.to_string(),
            region: default_region(),
            tags: TagConfig {
                user_name: "ultra-tic".to_string(),
                stack_name: stack.to_string(),
            },
            git_repo_url: "https://github.com/ultra-tic/ansible.git".to_string(),
            s3_bucket: format!("ultra-tic-{stack}-db-backups"),
            internal_domain: "ultra-tic.internal".to_string(),
            network: NetworkConfig::default(),
            cluster: ClusterConfig::default(),
            registry: RegistryConfig::default(),
            db_instance: Some(DbInstanceConfig::default()),
            web_app: Some(WebAppConfig::default()),
            external_secrets: ExternalSecretsConfig::default(),
            audit: AuditConfig::default(),
        }
    }

    /// Parse and validate YAML.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] for malformed YAML or invalid values.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        debug!(stack = %config.stack, "Parsed stack config");
        Ok(config)
    }

    /// Load and validate a stack file.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Check required values, CIDRs, sizes and names.
    ///
    /// # Errors
    /// Returns the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("stack", &self.stack)?;
        require("region", &self.region)?;
        require("git_repo_url", &self.git_repo_url)?;
        require("s3_bucket", &self.s3_bucket)?;
        require("internal_domain", &self.internal_domain)?;
        require("tags.user_name", &self.tags.user_name)?;
        require("tags.stack_name", &self.tags.stack_name)?;
        label("stack", &self.stack)?;
        label("cluster.name", &self.cluster.name)?;
        label("registry.repository", &self.registry.repository)?;

        let prefix = parse_cidr("network.cidr", &self.network.cidr)?;
        if prefix != 16 {
            return Err(ConfigError::InvalidCidr {
                field: "network.cidr",
                value: self.network.cidr.clone(),
                reason: "subnets are carved as /24s, so the VPC must be a /16".to_string(),
            });
        }
        let zones = self.network.availability_zones.len();
        if !(2..=9).contains(&zones) {
            return Err(ConfigError::Invalid {
                field: "network.availability_zones",
                reason: format!("expected 2 to 9 zones, got {zones}"),
            });
        }

        let c = &self.cluster;
        if c.min == 0 || c.min > c.desired || c.desired > c.max {
            return Err(ConfigError::Invalid {
                field: "cluster",
                reason: format!(
                    "expected 1 <= min <= desired <= max, got min={} desired={} max={}",
                    c.min, c.desired, c.max
                ),
            });
        }

        if let Some(db) = &self.db_instance {
            label("db_instance.name", &db.name)?;
            require("db_instance.database", &db.database)?;
            require("db_instance.username", &db.username)?;
            require("db_instance.password_keeper", &db.password_keeper)?;
            require("db_instance.playbook", &db.playbook)?;
            if let Some(cidr) = &db.ssh_cidr {
                parse_cidr("db_instance.ssh_cidr", cidr)?;
            }
            if db.bootstrap_timeout_secs == 0 {
                return Err(ConfigError::Invalid {
                    field: "db_instance.bootstrap_timeout_secs",
                    reason: "must be positive".to_string(),
                });
            }
        }

        if let Some(app) = &self.web_app {
            label("web_app.name", &app.name)?;
            label("web_app.postgres_secret", &app.postgres_secret)?;
            if app.port == 0 {
                return Err(ConfigError::Invalid {
                    field: "web_app.port",
                    reason: "must be positive".to_string(),
                });
            }
            if app.replicas == 0 {
                return Err(ConfigError::Invalid {
                    field: "web_app.replicas",
                    reason: "must be positive".to_string(),
                });
            }
        }

        require("external_secrets.helm_chart", &self.external_secrets.helm_chart)?;
        require(
            "external_secrets.helm_chart_version",
            &self.external_secrets.helm_chart_version,
        )?;
        require("external_secrets.helm_repo", &self.external_secrets.helm_repo)?;
        Ok(())
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Missing(field))
    } else {
        Ok(())
    }
}

/// DNS-1123 label: also a valid resource name and namespace.
fn label(field: &'static str, value: &str) -> Result<(), ConfigError> {
    require(field, value)?;
    let valid = value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("'{value}' is not a lowercase DNS label"),
        })
    }
}

/// Validate an IPv4 CIDR and return its prefix length.
fn parse_cidr(field: &'static str, value: &str) -> Result<u8, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidCidr {
        field,
        value: value.to_string(),
        reason: reason.to_string(),
    };
    let (addr, prefix) = value
        .split_once('/')
        .ok_or_else(|| invalid("missing prefix length"))?;
    addr.parse::<Ipv4Addr>()
        .map_err(|_| invalid("bad address"))?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid("bad prefix length"))?;
    if prefix > 32 {
        return Err(invalid("prefix length above 32"));
    }
    Ok(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r"
stack: dev
tags:
  user_name: alice
  stack_name: dev
git_repo_url: https://github.com/ultra-tic/ansible.git
s3_bucket: ultra-tic-dev-db-backups
internal_domain: ultra-tic.internal
";

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let config = StackConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.network.availability_zones.len(), 2);
        assert_eq!(config.cluster.desired, 2);
        assert!(config.db_instance.is_none());
        assert!(config.web_app.is_none());
        assert!(config.audit.enabled);
    }

    #[test]
    fn test_subnet_cidrs() {
        let network = NetworkConfig::default();
        assert_eq!(network.public_cidr(0), "10.0.1.0/24");
        assert_eq!(network.public_cidr(1), "10.0.2.0/24");
        assert_eq!(network.private_cidr(0), "10.0.10.0/24");
        assert_eq!(network.private_cidr(1), "10.0.11.0/24");
    }

    #[test]
    fn test_web_app_section() {
        let yaml = format!(
            "{MINIMAL}web_app:\n  name: orders\n  target_port: 4000\n  postgres_secret: orders-pg\n"
        );
        let config = StackConfig::from_yaml(&yaml).unwrap();
        let app = config.web_app.unwrap();
        assert_eq!(app.name, "orders");
        assert_eq!(app.port, 4000);
        assert_eq!(app.replicas, 2);
    }

    #[test]
    fn test_missing_required_value() {
        let mut config = StackConfig::with_defaults("dev");
        config.git_repo_url = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("git_repo_url"))
        ));
    }

    #[test]
    fn test_bad_cidrs_rejected() {
        let mut config = StackConfig::with_defaults("dev");
        config.network.cidr = "10.0.0.0/8".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCidr { .. })
        ));

        let mut config = StackConfig::with_defaults("dev");
        config.db_instance.as_mut().unwrap().ssh_cidr = Some("203.0.113.0".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCidr { .. })
        ));
    }

    #[test]
    fn test_inconsistent_sizes_rejected() {
        let mut config = StackConfig::with_defaults("dev");
        config.cluster.min = 3;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "cluster", .. })
        ));
    }

    #[test]
    fn test_names_must_be_labels() {
        let mut config = StackConfig::with_defaults("dev");
        config.web_app.as_mut().unwrap().name = "Orders_App".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(StackConfig::with_defaults("dev").validate().is_ok());
    }
}
