//! # Builder Pods
//!
//! Turns one bundle [`Task`] into the Kubernetes pod that builds it on one
//! architecture. The pod runs the bundle's runtime image, whose entrypoint
//! receives the recipe path and source directory as `$1` and `$2`.
//!
//! ## Scheduling Policy
//!
//! ```text
//! requests     cpu = min(task cpu, 48 if arm64) × 0.98, memory = task memory
//! tolerations  chainguard.dev/runner=bundle-builder:NoSchedule
//!              kubernetes.io/arch=arm64:NoSchedule        (arm64 only)
//! selector     kubernetes.io/arch=<arch>
//! affinity     cloud.google.com/machine-family In [<family>]  (if a family is set)
//! ```
//!
//! On arm64 a requested machine family is replaced by the arm family, since
//! no other family offers arm64 nodes.
//!
//! Only the pod object is produced here; submitting it is up to the caller.
//!
//! ## Example
//!
//! ```rust,ignore
//! let pod = podspec(&task, &bundle.runtime.unwrap(), "aarch64", "c3", "builder", "builds")?;
//! println!("{}", pod.to_yaml()?);
//! ```

mod spec;

pub use spec::{
    Affinity, Container, EmptyDir, EnvVar, NodeAffinity, NodeSelector, NodeSelectorRequirement,
    NodeSelectorTerm, ObjectMeta, Pod, PodSecurityContext, PodSpec, ResourceRequirements,
    SeccompProfile, SecurityContext, Toleration, Volume, VolumeMount,
};

use crate::bundle::Task;
use crate::constants::{
    ARCH_LABEL, ARM_MACHINE_FAMILY, BUILDER_TAINT_KEY, BUILDER_TAINT_VALUE, BUILD_ARCH_LABEL,
    BUILD_CONTAINER_NAME, BUILD_PACKAGE_LABEL, COMPONENT_LABEL, CPU_PACKING_FACTOR, DEFAULT_CPU,
    DEFAULT_MEMORY, MACHINE_FAMILY_LABEL, MAX_ARM_CORES, SCRATCH_MOUNT_PATH, SCRATCH_VOLUME_NAME,
    SMALLEST_CPU_REQUEST, SOURCE_DATE_EPOCH_ENV,
};
use crate::error::{Error, Result};
use crate::platform::Arch;
use oci_distribution::Reference;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Binary quantity suffixes accepted for memory.
const BINARY_SUFFIXES: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];

/// Decimal quantity suffixes accepted for memory.
const DECIMAL_SUFFIXES: [&str; 10] = ["", "n", "u", "m", "k", "M", "G", "T", "P", "E"];

/// Pod builder policy.
///
/// Defaults come from [`crate::constants`]; deserializing a partial
/// document keeps the defaults for missing fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PodConfig {
    /// CPU request when the task gives none.
    pub default_cpu: String,
    /// Memory request when the task gives none.
    pub default_memory: String,
    /// Upper bound on arm64 CPU requests.
    pub max_arm_cores: f64,
    /// Multiplier applied to every CPU request.
    pub cpu_packing_factor: f64,
    pub builder_taint_key: String,
    pub builder_taint_value: String,
    /// Family that replaces any machine-family hint on arm64.
    pub arm_machine_family: String,
}

impl Default for PodConfig {
    fn default() -> Self {
        Self {
            default_cpu: DEFAULT_CPU.to_string(),
            default_memory: DEFAULT_MEMORY.to_string(),
            max_arm_cores: MAX_ARM_CORES,
            cpu_packing_factor: CPU_PACKING_FACTOR,
            builder_taint_key: BUILDER_TAINT_KEY.to_string(),
            builder_taint_value: BUILDER_TAINT_VALUE.to_string(),
            arm_machine_family: ARM_MACHINE_FAMILY.to_string(),
        }
    }
}

impl PodConfig {
    /// Builds the pod for `task` on `arch`, running `image`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidCpu`] if the CPU request is not a finite,
    ///   non-negative decimal
    /// - [`Error::InvalidMemory`] if the memory request is not a quantity
    pub fn podspec(
        &self,
        task: &Task,
        image: &Reference,
        arch: &str,
        machine_family: &str,
        service_account: &str,
        namespace: &str,
    ) -> Result<Pod> {
        let arch = Arch::parse(arch);

        let (cpu, memory) = self.requests(task);
        let cpu = self.cpu_request(&cpu, &arch)?;
        validate_memory(&memory)?;

        let node_arch = arch.oci_arch().to_string();

        let mut tolerations = vec![Toleration::no_schedule(
            &self.builder_taint_key,
            &self.builder_taint_value,
        )];

        let mut family = machine_family;
        if arch.is_arm64() {
            tolerations.push(Toleration::no_schedule(ARCH_LABEL, &node_arch));
            if !family.is_empty() {
                family = self.arm_machine_family.as_str();
            }
        }

        let affinity = (!family.is_empty())
            .then(|| Affinity::require_node_label(MACHINE_FAMILY_LABEL, &[family]));

        debug!(
            "Pod for {} on {}: cpu={} memory={} family={:?}",
            task.package, arch, cpu, memory, family
        );

        let labels = BTreeMap::from([
            (ARCH_LABEL.to_string(), node_arch.clone()),
            (COMPONENT_LABEL.to_string(), task.package.clone()),
            (BUILD_ARCH_LABEL.to_string(), node_arch.clone()),
            (BUILD_PACKAGE_LABEL.to_string(), task.package.clone()),
        ]);

        let source_date_epoch = task
            .build_date_epoch
            .map(|t| t.timestamp())
            .unwrap_or(0)
            .to_string();

        let container = Container {
            name: BUILD_CONTAINER_NAME.to_string(),
            image: image.to_string(),
            args: vec![task.path.clone(), task.source_dir.clone()],
            env: vec![EnvVar {
                name: SOURCE_DATE_EPOCH_ENV.to_string(),
                value: source_date_epoch,
            }],
            resources: ResourceRequirements {
                requests: BTreeMap::from([
                    ("cpu".to_string(), cpu),
                    ("memory".to_string(), memory),
                ]),
                limits: BTreeMap::new(),
            },
            volume_mounts: vec![VolumeMount {
                name: SCRATCH_VOLUME_NAME.to_string(),
                mount_path: SCRATCH_MOUNT_PATH.to_string(),
                read_only: false,
            }],
            security_context: Some(SecurityContext {
                privileged: Some(true),
            }),
        };

        Ok(Pod {
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            metadata: ObjectMeta {
                generate_name: format!(
                    "{}-{}-",
                    escape_rfc1123(&task.package),
                    escape_rfc1123(arch.as_str())
                ),
                namespace: namespace.to_string(),
                labels,
                annotations: BTreeMap::new(),
            },
            spec: PodSpec {
                termination_grace_period_seconds: Some(0),
                containers: vec![container],
                restart_policy: "Never".to_string(),
                automount_service_account_token: Some(false),
                node_selector: BTreeMap::from([(ARCH_LABEL.to_string(), node_arch)]),
                tolerations,
                affinity,
                service_account_name: service_account.to_string(),
                security_context: Some(PodSecurityContext {
                    seccomp_profile: Some(SeccompProfile {
                        profile_type: "RuntimeDefault".to_string(),
                    }),
                }),
                volumes: vec![Volume::empty_dir(SCRATCH_VOLUME_NAME)],
            },
        })
    }

    /// Resolves the CPU and memory strings, task values winning per field.
    fn requests(&self, task: &Task) -> (String, String) {
        let mut cpu = self.default_cpu.clone();
        let mut memory = self.default_memory.clone();

        if let Some(res) = &task.resources {
            if !res.cpu.is_empty() {
                cpu = res.cpu.clone();
            }
            if !res.memory.is_empty() {
                memory = res.memory.clone();
            }
        }

        (cpu, memory)
    }

    /// Parses, clamps and scales a CPU request.
    fn cpu_request(&self, cpu: &str, arch: &Arch) -> Result<String> {
        let invalid = |reason: &str| Error::InvalidCpu {
            value: cpu.to_string(),
            reason: reason.to_string(),
        };

        let mut cores: f64 = cpu.trim().parse().map_err(|_| invalid("not a decimal number"))?;
        if !cores.is_finite() {
            return Err(invalid("not a finite number"));
        }
        if cores < 0.0 {
            return Err(invalid("must not be negative"));
        }

        if arch.is_arm64() && cores > self.max_arm_cores {
            cores = self.max_arm_cores;
        }

        Ok(format_cores(cores * self.cpu_packing_factor))
    }
}

/// Builds a builder pod with the default [`PodConfig`].
pub fn podspec(
    task: &Task,
    image: &Reference,
    arch: &str,
    machine_family: &str,
    service_account: &str,
    namespace: &str,
) -> Result<Pod> {
    PodConfig::default().podspec(task, image, arch, machine_family, service_account, namespace)
}

/// Lower-cases `s` and replaces characters not allowed in DNS labels
/// (`.`, `_`, `/`) with `-`.
pub fn escape_rfc1123(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '.' | '_' | '/' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Formats cores with microcore precision, dropping trailing zeros.
///
/// A positive request never formats as zero.
fn format_cores(cores: f64) -> String {
    let s = format!("{:.6}", cores);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "0" && cores > 0.0 {
        return SMALLEST_CPU_REQUEST.to_string();
    }
    s.to_string()
}

/// Checks that `memory` is a non-negative Kubernetes quantity.
fn validate_memory(memory: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidMemory {
        value: memory.to_string(),
        reason: reason.to_string(),
    };

    let unsigned = memory.strip_prefix('+').unwrap_or(memory);
    let split = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(split);

    if number.is_empty() || number == "." || number.matches('.').count() > 1 {
        return Err(invalid("expected a non-negative number"));
    }

    let exponent = suffix
        .strip_prefix(['e', 'E'])
        .map(|exp| exp.strip_prefix(['+', '-']).unwrap_or(exp))
        .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()));

    if BINARY_SUFFIXES.contains(&suffix) || DECIMAL_SUFFIXES.contains(&suffix) || exponent {
        Ok(())
    } else {
        Err(invalid("unknown suffix"))
    }
}
