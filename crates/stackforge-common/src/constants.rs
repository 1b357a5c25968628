//! System-wide constants and named configuration defaults.
//!
//! Every number the composition uses without the blueprint spelling it
//! out lives here, so none is buried in algorithmic code.

/// Default lower bound on running task count.
pub const DEFAULT_MIN_CAPACITY: u32 = 1;

/// Default upper bound on running task count.
pub const DEFAULT_MAX_CAPACITY: u32 = 6;

/// Default utilization percentage the scaling policy tracks.
pub const DEFAULT_TARGET_UTILIZATION_PERCENT: u32 = 10;

/// Default wait after a scale-in activity before another may start.
pub const DEFAULT_SCALE_IN_COOLDOWN_SECS: u64 = 60;

/// Default wait after a scale-out activity before another may start.
pub const DEFAULT_SCALE_OUT_COOLDOWN_SECS: u64 = 60;

/// Upper bound of a utilization target, in percent.
pub const MAX_UTILIZATION_PERCENT: u32 = 100;

/// Task CPU units accepted by the container platform.
pub const VALID_TASK_CPU_UNITS: [u32; 5] = [256, 512, 1024, 2048, 4096];

/// Smallest network prefix length accepted for the network CIDR block.
pub const MIN_CIDR_PREFIX: u8 = 16;

/// Largest network prefix length accepted for the network CIDR block.
pub const MAX_CIDR_PREFIX: u8 = 28;

/// Stream prefix of the container log driver.
pub const LOG_STREAM_PREFIX: &str = "ecs-logs";

/// Artifact file the build project emits for the deploy stage.
pub const IMAGE_DEFINITIONS_FILE: &str = "imagedefinitions.json";

/// Build specification schema version.
pub const BUILD_SPEC_VERSION: &str = "0.2";

/// Produced value every realized node is expected to carry.
pub const ARN_OUTPUT: &str = "arn";

/// Placeholder replaced by a produced value in interpolated attributes.
pub const INTERPOLATION_PLACEHOLDER: &str = "{}";

/// Separator between a logical name and the project suffix in ids and
/// cross-stack export names.
pub const NAME_SEPARATOR: char = '-';

/// Default location of the cross-stack export store, relative to the
/// working directory.
pub const DEFAULT_EXPORT_STORE: &str = ".stackforge/exports.json";

/// Application name used in log fields and persisted files.
pub const APP_NAME: &str = "stackforge";

/// Produced value: network id.
pub const OUTPUT_VPC_ID: &str = "vpc_id";

/// Produced value: cluster name.
pub const OUTPUT_CLUSTER_NAME: &str = "cluster_name";

/// Produced value: image repository URI.
pub const OUTPUT_REPOSITORY_URI: &str = "repository_uri";

/// Produced value: service name.
pub const OUTPUT_SERVICE_NAME: &str = "service_name";

/// Produced value: public DNS name of the service's load balancer.
pub const OUTPUT_LOAD_BALANCER_DNS: &str = "load_balancer_dns_name";

/// Produced value: build project name.
pub const OUTPUT_PROJECT_NAME: &str = "project_name";

/// Produced value: log group name.
pub const OUTPUT_LOG_GROUP_NAME: &str = "log_group_name";

/// Produced value: bucket name.
pub const OUTPUT_BUCKET_NAME: &str = "bucket_name";

/// Principal that container tasks assume roles through.
pub const TASK_SERVICE_PRINCIPAL: &str = "ecs-tasks.amazonaws.com";
