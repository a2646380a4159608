use smsbatch::config::generate::generate_starter_config;
use smsbatch::config::types::CarrierConfig;
use smsbatch::config::{load_config, ConfigError};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_starter_config_from_file() {
    let file = write_temp(&generate_starter_config());
    let config = load_config(file.path()).unwrap();

    assert_eq!(config.server.listen, "0.0.0.0:5000");
    assert_eq!(config.carrier.kind(), "simulated");
    assert_eq!(config.rate_limit.api.max_requests, 100);
    assert_eq!(config.rate_limit.sms.window, Duration::from_secs(3600));
    assert!(!config.storage.path.starts_with("~"));
}

#[test]
fn test_twilio_credentials_from_environment() {
    std::env::set_var("SMSBATCH_TEST_SID", "AC0123456789");
    std::env::set_var("SMSBATCH_TEST_TOKEN", "secret-token");

    let file = write_temp(
        r#"
server:
  listen: "127.0.0.1:5000"
carrier:
  type: twilio
  account_sid: $env{SMSBATCH_TEST_SID}
  auth_token: $env{SMSBATCH_TEST_TOKEN}
  from_number: "+15550001111"
storage:
  path: /tmp/smsbatch-test.duckdb
"#,
    );

    let config = load_config(file.path()).unwrap();
    match config.carrier {
        CarrierConfig::Twilio(twilio) => {
            assert_eq!(twilio.account_sid, "AC0123456789");
            assert_eq!(twilio.auth_token, "secret-token");
            assert_eq!(twilio.base_url, "https://api.twilio.com");
            assert_eq!(twilio.timeout, Duration::from_secs(10));
            assert!(!format!("{:?}", twilio).contains("secret-token"));
        }
        other => panic!("expected twilio carrier, got {:?}", other),
    }
}

#[test]
fn test_missing_file_is_io_error() {
    let err = load_config(std::path::Path::new("/nonexistent/smsbatch/config.yml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_unknown_carrier_type_rejected() {
    let file = write_temp(
        r#"
server:
  listen: "127.0.0.1:5000"
carrier:
  type: pigeon
storage:
  path: /tmp/smsbatch-test.duckdb
"#,
    );
    assert!(matches!(
        load_config(file.path()).unwrap_err(),
        ConfigError::YamlParse(_)
    ));
}
