//! Blueprint configuration model.
//!
//! A blueprint document spells out every string and number of the
//! deployment. The only defaults are the scaling defaults from
//! [`crate::constants`], applied when the `scaling` section or one of its
//! fields is omitted.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, StackforgeError};

/// Root configuration of a service blueprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlueprintConfig {
    /// Project prefix all resource ids and export names derive from.
    pub project_prefix: String,
    /// Name of the stack that owns the cross-stack exports.
    pub stack_name: String,
    /// Name of the load-balanced service.
    pub service_name: String,
    /// Source-control repository that triggers builds.
    pub source: SourceConfig,
    /// Secret references.
    pub secrets: SecretsConfig,
    /// Network layout.
    pub network: NetworkConfig,
    /// Container task sizing and ports.
    pub container: ContainerConfig,
    /// Build project settings.
    pub build: BuildConfig,
    /// Autoscaling intent for the service.
    #[serde(default)]
    pub scaling: ScalingConfig,
}

/// Source-control repository settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Repository owner or organization.
    pub owner: String,
    /// Repository name.
    pub repository: String,
    /// Branch whose events trigger a build.
    pub branch: String,
    /// Event type that triggers a build (e.g. `push`).
    pub event: String,
}

/// Names of secrets the stack references but never reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretsConfig {
    /// Secret holding the source-control access token for the build.
    pub source_token_secret: String,
}

/// Network layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// IPv4 CIDR block of the network, e.g. `10.0.0.0/16`.
    pub cidr_block: String,
    /// Number of availability zones to spread subnets over.
    pub max_azs: u8,
    /// Number of NAT gateways.
    pub nat_gateways: u8,
}

impl NetworkConfig {
    /// Parses the CIDR block into its base address and prefix length.
    ///
    /// # Errors
    ///
    /// Returns an error if the block is malformed or its prefix length is
    /// outside the accepted range.
    pub fn parse_cidr(&self) -> Result<(Ipv4Addr, u8)> {
        let invalid = |why: &str| StackforgeError::Config {
            message: format!("invalid CIDR block \"{}\": {why}", self.cidr_block),
        };
        let (addr, prefix) = self
            .cidr_block
            .split_once('/')
            .ok_or_else(|| invalid("missing prefix length"))?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid("bad address"))?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid("bad prefix length"))?;
        if !(constants::MIN_CIDR_PREFIX..=constants::MAX_CIDR_PREFIX).contains(&prefix) {
            return Err(invalid(&format!(
                "prefix length must be between {} and {}",
                constants::MIN_CIDR_PREFIX,
                constants::MAX_CIDR_PREFIX
            )));
        }
        let mask = u32::MAX << (32 - u32::from(prefix));
        if u32::from(addr) & !mask != 0 {
            return Err(invalid("host bits set"));
        }
        Ok((addr, prefix))
    }
}

/// Container task sizing and ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerConfig {
    /// Initial image the task runs before the first build publishes one.
    pub image: String,
    /// Task CPU units.
    pub cpu: u32,
    /// Task memory limit in MiB.
    pub memory_mib: u32,
    /// Port the container listens on.
    pub container_port: u16,
    /// Port the public load balancer listens on.
    pub listener_port: u16,
    /// Number of tasks the service starts with.
    pub desired_count: u32,
    /// Whether the load balancer is internet-facing.
    pub public_load_balancer: bool,
}

/// Build project settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Build environment image.
    pub build_image: String,
    /// Whether the build runs privileged (required for image builds).
    pub privileged: bool,
    /// Tag pushed images receive.
    pub image_tag: String,
}

/// Utilization metric a scaling policy tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMetric {
    /// Average CPU utilization of the service.
    Cpu,
    /// Average memory utilization of the service.
    Memory,
}

/// Declarative autoscaling intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScalingConfig {
    /// Minimum running task count.
    pub min_capacity: u32,
    /// Maximum running task count.
    pub max_capacity: u32,
    /// Tracked metric.
    pub metric: ScalingMetric,
    /// Utilization the policy keeps the metric at, in percent.
    pub target_utilization_percent: u32,
    /// Cooldown after scaling in, in seconds.
    pub scale_in_cooldown_secs: u64,
    /// Cooldown after scaling out, in seconds.
    pub scale_out_cooldown_secs: u64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_capacity: constants::DEFAULT_MIN_CAPACITY,
            max_capacity: constants::DEFAULT_MAX_CAPACITY,
            metric: ScalingMetric::Cpu,
            target_utilization_percent: constants::DEFAULT_TARGET_UTILIZATION_PERCENT,
            scale_in_cooldown_secs: constants::DEFAULT_SCALE_IN_COOLDOWN_SECS,
            scale_out_cooldown_secs: constants::DEFAULT_SCALE_OUT_COOLDOWN_SECS,
        }
    }
}

impl BlueprintConfig {
    /// Validates the configuration for structural correctness.
    ///
    /// Scaling bounds are checked later by the scaling resolver, which
    /// owns those invariants.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        check_prefix(&self.project_prefix)?;
        require_non_empty("stack_name", &self.stack_name)?;
        require_non_empty("service_name", &self.service_name)?;
        require_non_empty("source.owner", &self.source.owner)?;
        require_non_empty("source.repository", &self.source.repository)?;
        require_non_empty("source.branch", &self.source.branch)?;
        require_non_empty("source.event", &self.source.event)?;
        require_non_empty("secrets.source_token_secret", &self.secrets.source_token_secret)?;
        self.validate_network()?;
        self.validate_container()?;
        require_non_empty("build.build_image", &self.build.build_image)?;
        require_non_empty("build.image_tag", &self.build.image_tag)?;
        Ok(())
    }

    fn validate_network(&self) -> Result<()> {
        let _ = self.network.parse_cidr()?;
        if self.network.max_azs == 0 {
            return Err(config_error("network.max_azs must be at least 1"));
        }
        if self.network.nat_gateways > self.network.max_azs {
            return Err(config_error(format!(
                "network.nat_gateways ({}) exceeds network.max_azs ({})",
                self.network.nat_gateways, self.network.max_azs
            )));
        }
        Ok(())
    }

    fn validate_container(&self) -> Result<()> {
        let c = &self.container;
        require_non_empty("container.image", &c.image)?;
        if !constants::VALID_TASK_CPU_UNITS.contains(&c.cpu) {
            return Err(config_error(format!(
                "container.cpu {} is not one of {:?}",
                c.cpu,
                constants::VALID_TASK_CPU_UNITS
            )));
        }
        if c.memory_mib == 0 {
            return Err(config_error("container.memory_mib must be positive"));
        }
        if c.container_port == 0 || c.listener_port == 0 {
            return Err(config_error("container ports must be non-zero"));
        }
        Ok(())
    }
}

fn check_prefix(prefix: &str) -> Result<()> {
    require_non_empty("project_prefix", prefix)?;
    if !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(config_error(format!(
            "project_prefix \"{prefix}\" may only contain ASCII letters, digits and '-'"
        )));
    }
    Ok(())
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(config_error(format!("{field} must not be empty")));
    }
    Ok(())
}

fn config_error(message: impl Into<String>) -> StackforgeError {
    StackforgeError::Config {
        message: message.into(),
    }
}
