// tests/integration/version_guard_test.rs

use super::fixtures::{INFO_4_0_0, INFO_6_2_5, INFO_WITHOUT_VERSION, MockClient};
use spinelq::SpinelQError;
use spinelq::core::version::{MINIMUM_REDIS_VERSION, enforce_minimum_version};

#[tokio::test]
async fn test_supported_version_is_returned() {
    let mock = MockClient::ready();
    mock.set_info(INFO_6_2_5);

    let version = enforce_minimum_version(&*mock, MINIMUM_REDIS_VERSION)
        .await
        .unwrap();
    assert_eq!(version, "6.2.5");
    assert_eq!(mock.count_command("INFO"), 1);
}

#[tokio::test]
async fn test_exact_minimum_is_accepted() {
    let mock = MockClient::ready();
    mock.set_info("redis_version:5.0.0\r\n");

    let version = enforce_minimum_version(&*mock, "5.0.0").await.unwrap();
    assert_eq!(version, "5.0.0");
}

#[tokio::test]
async fn test_old_version_is_rejected_with_both_versions_named() {
    let mock = MockClient::ready();
    mock.set_info(INFO_4_0_0);

    let err = enforce_minimum_version(&*mock, MINIMUM_REDIS_VERSION)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SpinelQError::VersionMismatch {
            required: "5.0.0".into(),
            actual: "4.0.0".into(),
        }
    );
    let message = err.to_string();
    assert!(message.contains("4.0.0"), "{message}");
    assert!(message.contains("5.0.0"), "{message}");
}

#[tokio::test]
async fn test_missing_version_line_fails() {
    let mock = MockClient::ready();
    mock.set_info(INFO_WITHOUT_VERSION);

    let err = enforce_minimum_version(&*mock, MINIMUM_REDIS_VERSION)
        .await
        .unwrap_err();
    assert_eq!(err, SpinelQError::MissingVersion);
}

#[tokio::test]
async fn test_unparseable_version_fails() {
    let mock = MockClient::ready();
    mock.set_info("redis_version:unstable\r\n");

    let err = enforce_minimum_version(&*mock, MINIMUM_REDIS_VERSION)
        .await
        .unwrap_err();
    assert_eq!(err, SpinelQError::InvalidVersion("unstable".into()));
}
