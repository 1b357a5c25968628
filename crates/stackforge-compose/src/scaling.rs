//! Autoscaling policy resolution.
//!
//! Turns a declarative [`ScalingIntent`] into the target-tracking policy
//! the provider attaches to a service. Resolution is a pure function of the
//! intent; every number comes from the intent itself.

use std::time::Duration;

use serde::Serialize;
use stackforge_common::config::{ScalingConfig, ScalingMetric};
use stackforge_common::constants::MAX_UTILIZATION_PERCENT;
use stackforge_common::error::{Result, StackforgeError};
use stackforge_common::types::{ResourceId, ResourceKind};

use crate::node::ResourceNode;

/// Declarative autoscaling intent for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingIntent {
    /// Service to scale.
    pub target: ResourceId,
    /// Minimum running task count.
    pub min_capacity: u32,
    /// Maximum running task count.
    pub max_capacity: u32,
    /// Tracked metric.
    pub metric: ScalingMetric,
    /// Utilization to track, in percent.
    pub target_utilization_percent: u32,
    /// Cooldown after scaling in, in seconds.
    pub scale_in_cooldown_secs: u64,
    /// Cooldown after scaling out, in seconds.
    pub scale_out_cooldown_secs: u64,
}

impl ScalingIntent {
    /// Builds the intent for `target` from blueprint configuration.
    #[must_use]
    pub fn from_config(target: &ResourceNode, config: &ScalingConfig) -> Self {
        Self {
            target: target.id().clone(),
            min_capacity: config.min_capacity,
            max_capacity: config.max_capacity,
            metric: config.metric,
            target_utilization_percent: config.target_utilization_percent,
            scale_in_cooldown_secs: config.scale_in_cooldown_secs,
            scale_out_cooldown_secs: config.scale_out_cooldown_secs,
        }
    }
}

/// A resolved target-tracking scaling policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalingPolicy {
    /// Scaled service.
    pub target: ResourceId,
    /// Policy name, unique per service.
    pub policy_name: String,
    /// Minimum running task count.
    pub min_capacity: u32,
    /// Maximum running task count.
    pub max_capacity: u32,
    /// Predefined metric the policy tracks.
    pub metric_name: &'static str,
    /// Utilization to track, in percent.
    pub target_utilization_percent: u32,
    /// Cooldown after scaling in.
    pub scale_in_cooldown: Duration,
    /// Cooldown after scaling out.
    pub scale_out_cooldown: Duration,
}

/// Checks that `target` is the service `intent` names.
///
/// # Errors
///
/// Returns [`StackforgeError::InvalidScalingIntent`] if `target` is another
/// node or not a service.
pub fn check_target(intent: &ScalingIntent, target: &ResourceNode) -> Result<()> {
    let reason = if target.id() != &intent.target {
        format!("intent resolved against {}", target.id())
    } else if target.kind() != ResourceKind::Service {
        format!("only service resources scale, not {}", target.kind())
    } else {
        return Ok(());
    };
    Err(StackforgeError::InvalidScalingIntent {
        target: intent.target.clone(),
        reason,
    })
}

/// Resolves an intent against the node it scales.
///
/// # Errors
///
/// Returns [`StackforgeError::InvalidScalingIntent`] unless `target` is the
/// service the intent names, `0 < min_capacity <= max_capacity` and
/// `0 < target_utilization_percent <= 100`.
pub fn resolve(intent: &ScalingIntent, target: &ResourceNode) -> Result<ScalingPolicy> {
    check_target(intent, target)?;
    let invalid = |reason: String| StackforgeError::InvalidScalingIntent {
        target: intent.target.clone(),
        reason,
    };

    if intent.min_capacity == 0 {
        return Err(invalid("min_capacity must be positive".into()));
    }
    if intent.max_capacity < intent.min_capacity {
        return Err(invalid(format!(
            "max_capacity {} is below min_capacity {}",
            intent.max_capacity, intent.min_capacity
        )));
    }
    if intent.target_utilization_percent == 0
        || intent.target_utilization_percent > MAX_UTILIZATION_PERCENT
    {
        return Err(invalid(format!(
            "target utilization {}% is outside 1..={MAX_UTILIZATION_PERCENT}",
            intent.target_utilization_percent
        )));
    }

    let (metric_name, policy_name) = match intent.metric {
        ScalingMetric::Cpu => ("ECSServiceAverageCPUUtilization", "cpu-scaling"),
        ScalingMetric::Memory => ("ECSServiceAverageMemoryUtilization", "memory-scaling"),
    };

    Ok(ScalingPolicy {
        target: intent.target.clone(),
        policy_name: policy_name.to_string(),
        min_capacity: intent.min_capacity,
        max_capacity: intent.max_capacity,
        metric_name,
        target_utilization_percent: intent.target_utilization_percent,
        scale_in_cooldown: Duration::from_secs(intent.scale_in_cooldown_secs),
        scale_out_cooldown: Duration::from_secs(intent.scale_out_cooldown_secs),
    })
}
