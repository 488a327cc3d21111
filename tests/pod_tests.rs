//! Tests for builder pod generation.
//!
//! Validates resource policy, scheduling constraints, naming and the
//! serialized manifest shape.

use chrono::{TimeZone, Utc};
use magikbundle::constants::{ARCH_LABEL, MACHINE_FAMILY_LABEL};
use magikbundle::{parse_reference, podspec, Error, Pod, PodConfig, Resources, Task};
use oci_distribution::Reference;

fn image() -> Reference {
    parse_reference(
        "registry.local/bundle@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
    )
    .unwrap()
}

fn task(cpu: &str, memory: &str) -> Task {
    Task {
        package: "py3.12_requests".to_string(),
        version: "2.31.0".to_string(),
        epoch: 1,
        path: "py3-requests.yaml".to_string(),
        source_dir: "./py3-requests".to_string(),
        resources: Some(Resources {
            cpu: cpu.to_string(),
            memory: memory.to_string(),
        }),
        build_date_epoch: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
        ..Default::default()
    }
}

fn requests(pod: &Pod) -> (String, String) {
    let requests = &pod.spec.containers[0].resources.requests;
    (requests["cpu"].clone(), requests["memory"].clone())
}

// =============================================================================
// Resources
// =============================================================================

#[test]
fn test_default_resources() {
    let mut t = task("", "");
    t.resources = None;
    let pod = podspec(&t, &image(), "x86_64", "", "sa", "ns").unwrap();

    assert_eq!(requests(&pod), ("1.96".to_string(), "4Gi".to_string()));
    assert!(
        pod.spec.containers[0].resources.limits.is_empty(),
        "requests only, no limits"
    );
}

#[test]
fn test_fields_override_independently() {
    let pod = podspec(&task("", "16Gi"), &image(), "amd64", "", "sa", "ns").unwrap();
    assert_eq!(requests(&pod), ("1.96".to_string(), "16Gi".to_string()));

    let pod = podspec(&task("8", ""), &image(), "amd64", "", "sa", "ns").unwrap();
    assert_eq!(requests(&pod), ("7.84".to_string(), "4Gi".to_string()));
}

#[test]
fn test_arm64_cpu_is_clamped() {
    let pod = podspec(&task("96", ""), &image(), "aarch64", "", "sa", "ns").unwrap();
    assert_eq!(requests(&pod).0, "47.04");

    let pod = podspec(&task("96", ""), &image(), "x86_64", "", "sa", "ns").unwrap();
    assert_eq!(requests(&pod).0, "94.08");
}

#[test]
fn test_fractional_cpu_keeps_precision() {
    let cpu = |value: &str| {
        let pod = podspec(&task(value, ""), &image(), "amd64", "", "sa", "ns").unwrap();
        requests(&pod).0
    };

    assert_eq!(cpu("0.0001"), "0.000098", "below a millicore is not zero");
    assert_eq!(cpu("0.0005"), "0.00049");
    assert_eq!(cpu("1.2345"), "1.20981", "never rounded past the scaled value");
}

#[test]
fn test_invalid_cpu_fails() {
    let result = podspec(&task("lots", ""), &image(), "amd64", "", "sa", "ns");
    assert!(matches!(result, Err(Error::InvalidCpu { ref value, .. }) if value == "lots"));
}

#[test]
fn test_invalid_memory_fails() {
    let result = podspec(&task("", "4 gigs"), &image(), "amd64", "", "sa", "ns");
    assert!(matches!(result, Err(Error::InvalidMemory { .. })));
}

#[test]
fn test_custom_pod_config() {
    let config = PodConfig {
        default_cpu: "4".to_string(),
        cpu_packing_factor: 1.0,
        ..Default::default()
    };
    let mut t = task("", "");
    t.resources = None;

    let pod = config
        .podspec(&t, &image(), "amd64", "", "sa", "ns")
        .unwrap();
    assert_eq!(requests(&pod).0, "4");
}

// =============================================================================
// Scheduling
// =============================================================================

#[test]
fn test_tolerations() {
    let pod = podspec(&task("", ""), &image(), "amd64", "", "sa", "ns").unwrap();
    assert_eq!(pod.spec.tolerations.len(), 1);
    assert_eq!(pod.spec.tolerations[0].key, "chainguard.dev/runner");
    assert_eq!(pod.spec.tolerations[0].value, "bundle-builder");
    assert_eq!(pod.spec.tolerations[0].effect, "NoSchedule");

    let pod = podspec(&task("", ""), &image(), "arm64", "", "sa", "ns").unwrap();
    assert_eq!(pod.spec.tolerations.len(), 2);
    assert_eq!(pod.spec.tolerations[1].key, ARCH_LABEL);
    assert_eq!(pod.spec.tolerations[1].value, "arm64");
}

#[test]
fn test_machine_family_affinity() {
    let family = |pod: &Pod| -> Option<Vec<String>> {
        let affinity = pod.spec.affinity.as_ref()?;
        let selector = affinity
            .node_affinity
            .as_ref()?
            .required_during_scheduling_ignored_during_execution
            .as_ref()?;
        let expr = &selector.node_selector_terms[0].match_expressions[0];
        assert_eq!(expr.key, MACHINE_FAMILY_LABEL);
        assert_eq!(expr.operator, "In");
        Some(expr.values.clone())
    };

    let pod = podspec(&task("", ""), &image(), "amd64", "", "sa", "ns").unwrap();
    assert_eq!(family(&pod), None, "no hint, no affinity");

    let pod = podspec(&task("", ""), &image(), "amd64", "c3", "sa", "ns").unwrap();
    assert_eq!(family(&pod), Some(vec!["c3".to_string()]));

    let pod = podspec(&task("", ""), &image(), "arm64", "c3", "sa", "ns").unwrap();
    assert_eq!(
        family(&pod),
        Some(vec!["t2a".to_string()]),
        "arm64 overrides the hint"
    );

    let pod = podspec(&task("", ""), &image(), "arm64", "", "sa", "ns").unwrap();
    assert_eq!(family(&pod), None, "arm64 without a hint stays unconstrained");
}

#[test]
fn test_node_selector_and_labels() {
    let pod = podspec(&task("", ""), &image(), "aarch64", "", "sa", "ns").unwrap();

    assert_eq!(pod.spec.node_selector[ARCH_LABEL], "arm64");
    let labels = &pod.metadata.labels;
    assert_eq!(labels[ARCH_LABEL], "arm64");
    assert_eq!(labels["melange.chainguard.dev/arch"], "arm64");
    assert_eq!(labels["app.kubernetes.io/component"], "py3.12_requests");
    assert_eq!(labels["melange.chainguard.dev/package"], "py3.12_requests");
}

// =============================================================================
// Pod Shape
// =============================================================================

#[test]
fn test_generate_name_is_rfc1123() {
    let pod = podspec(&task("", ""), &image(), "x86_64", "", "sa", "ns").unwrap();
    assert_eq!(pod.metadata.generate_name, "py3-12-requests-amd64-");

    let pod = podspec(&task("", ""), &image(), "armv7", "", "sa", "ns").unwrap();
    assert_eq!(pod.metadata.generate_name, "py3-12-requests-arm-v7-");
}

#[test]
fn test_container() {
    let pod = podspec(&task("", ""), &image(), "amd64", "", "builder", "builds").unwrap();
    let container = &pod.spec.containers[0];

    assert_eq!(pod.spec.containers.len(), 1);
    assert_eq!(container.name, "workspace");
    assert_eq!(container.image, image().to_string());
    assert_eq!(container.args, vec!["py3-requests.yaml", "./py3-requests"]);
    assert_eq!(container.env[0].name, "SOURCE_DATE_EPOCH");
    assert_eq!(container.env[0].value, "1704164645");
    assert_eq!(container.volume_mounts[0].mount_path, "/tmp");
    assert_eq!(
        container.security_context.as_ref().and_then(|s| s.privileged),
        Some(true)
    );

    assert_eq!(pod.metadata.namespace, "builds");
    assert_eq!(pod.spec.service_account_name, "builder");
    assert_eq!(pod.spec.termination_grace_period_seconds, Some(0));
    assert_eq!(pod.spec.restart_policy, "Never");
    assert_eq!(pod.spec.automount_service_account_token, Some(false));
}

#[test]
fn test_missing_build_date_is_epoch_zero() {
    let mut t = task("", "");
    t.build_date_epoch = None;
    let pod = podspec(&t, &image(), "amd64", "", "sa", "ns").unwrap();
    assert_eq!(pod.spec.containers[0].env[0].value, "0");
}

#[test]
fn test_yaml_manifest_keys() {
    let pod = podspec(&task("", ""), &image(), "arm64", "c3", "sa", "ns").unwrap();
    let yaml = pod.to_yaml().unwrap();

    for key in [
        "apiVersion: v1",
        "kind: Pod",
        "generateName: py3-12-requests-arm64-",
        "terminationGracePeriodSeconds: 0",
        "restartPolicy: Never",
        "automountServiceAccountToken: false",
        "serviceAccountName: sa",
        "nodeSelector:",
        "requiredDuringSchedulingIgnoredDuringExecution:",
        "seccompProfile:",
        "type: RuntimeDefault",
        "emptyDir: {}",
        "volumeMounts:",
        "privileged: true",
    ] {
        assert!(yaml.contains(key), "missing {key:?} in:\n{yaml}");
    }

    let back = Pod::from_yaml(&yaml).unwrap();
    assert_eq!(back, pod);
}

#[test]
fn test_json_manifest() {
    let pod = podspec(&task("", ""), &image(), "amd64", "", "sa", "ns").unwrap();
    let json: serde_json::Value = serde_json::from_str(&pod.to_json().unwrap()).unwrap();

    assert_eq!(json["spec"]["securityContext"]["seccompProfile"]["type"], "RuntimeDefault");
    assert_eq!(json["spec"]["volumes"][0]["name"], "tmp-dir-bundle-builder");
    assert!(json["spec"].get("affinity").is_none());
}
