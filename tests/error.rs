//! Tests for error module

use deltaray::error::{OptionExt, ReconstructionError};
use deltaray::{ClusterId, EventStore, ObjectStore, View};

#[test]
fn test_error_display() {
    let err = ReconstructionError::InvalidParameter {
        reason: "x_min 2 exceeds x_max 1".to_string(),
    };
    assert_eq!(err.to_string(), "invalid parameter: x_min 2 exceeds x_max 1");

    let message = "matching.x_sampling_pitch must be positive, got 0";
    let err = ReconstructionError::Config(message.to_string());
    assert!(err.to_string().starts_with("configuration error"));
}

#[test]
fn test_option_ext() {
    let none: Option<i32> = None;
    let result = none.ok_or_not_found("muon cluster in view W");
    assert!(matches!(result, Err(ReconstructionError::NotFound { .. })));
    assert!(!result.unwrap_err().is_fatal());

    assert_eq!(Some(3).ok_or_not_found("anything").unwrap(), 3);
}

#[test]
fn test_store_refusals_are_fatal_transactions() {
    let mut store = EventStore::new();
    let err = store.delete_cluster(ClusterId(7)).unwrap_err();
    assert!(matches!(err, ReconstructionError::Transaction { operation: "delete_cluster", .. }));
    assert!(err.is_fatal());
    assert!(err.to_string().contains("c7"));

    assert!(store.create_cluster(View::U, &[]).is_err());
}

#[test]
fn test_io_and_json_errors_convert() {
    let io: ReconstructionError =
        std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
    assert!(matches!(io, ReconstructionError::Io(_)));

    let json: ReconstructionError = serde_json::from_str::<Vec<u32>>("[1,").unwrap_err().into();
    assert!(matches!(json, ReconstructionError::Json(_)));
}
