//! Tests for error messages.
//!
//! Error text is shown to operators, so the identifying details must be in
//! the message.

use magikbundle::Error;
use std::path::PathBuf;

#[test]
fn test_missing_entrypoint_lists_available() {
    let err = Error::MissingEntrypoint {
        arch: "riscv64".to_string(),
        available: vec!["amd64".to_string(), "arm64".to_string()],
    };
    let msg = err.to_string();
    assert!(msg.contains("riscv64"));
    assert!(msg.contains("amd64") && msg.contains("arm64"));
}

#[test]
fn test_missing_layer_names_role_entry_and_bundle() {
    let err = Error::MissingLayer {
        role: "graph".to_string(),
        digest: "sha256:abc".to_string(),
        reference: "registry.local/bundle:v1".to_string(),
    };
    assert_eq!(
        err.to_string(),
        "no graph layers in entry sha256:abc of bundle registry.local/bundle:v1"
    );
}

#[test]
fn test_cpu_error_quotes_value() {
    let err = Error::InvalidCpu {
        value: "lots".to_string(),
        reason: "not a decimal number".to_string(),
    };
    assert!(err.to_string().contains("\"lots\""));
}

#[test]
fn test_unsupported_file_type_shows_path() {
    let err = Error::UnsupportedFileType {
        path: PathBuf::from("/src/link"),
    };
    assert!(err.to_string().contains("/src/link"));
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: Error = io.into();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn test_json_error_conversion() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err: Error = json_err.into();
    assert!(matches!(err, Error::Serialization(_)));
}
