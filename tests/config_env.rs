
use std::time::Duration;

use env_guard::{remove_env, set_env, ENV_LOCK};
use redust_emu::{CommandError, Reply, Server, ServerConfig};
use serial_test::serial;

#[test]
#[serial]
fn from_env_defaults_when_unset() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _g1 = remove_env("REDUST_DATABASES");
    let _g2 = remove_env("REDUST_EXPIRY_INTERVAL_MS");
    let _g3 = remove_env("REDUST_EXPIRY_SAMPLE_SIZE");
    let _g4 = remove_env("REDUST_SCRIPT_DENY");

    let config = ServerConfig::from_env();
    assert_eq!(config.databases, 16);
    assert_eq!(config.expiry_interval, Duration::from_millis(100));
    assert_eq!(config.expiry_sample_size, 20);
    assert!(config.denies_in_script("blpop"));
    assert!(!config.denies_in_script("get"));
}

#[test]
#[serial]
fn from_env_reads_overrides() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _g1 = set_env("REDUST_DATABASES", "4");
    let _g2 = set_env("REDUST_EXPIRY_INTERVAL_MS", "250");
    let _g3 = set_env("REDUST_EXPIRY_SAMPLE_SIZE", "5");
    let _g4 = set_env("REDUST_SCRIPT_DENY", "FLUSHALL, del");

    let config = ServerConfig::from_env();
    assert_eq!(config.databases, 4);
    assert_eq!(config.expiry_interval, Duration::from_millis(250));
    assert_eq!(config.expiry_sample_size, 5);
    assert!(config.denies_in_script("flushall"));
    assert!(config.denies_in_script("del"));
    assert!(config.denies_in_script("blpop"));
}

#[test]
#[serial]
fn from_env_ignores_garbage() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _g1 = set_env("REDUST_DATABASES", "0");
    let _g2 = set_env("REDUST_EXPIRY_SAMPLE_SIZE", "lots");
    let _g3 = remove_env("REDUST_EXPIRY_INTERVAL_MS");
    let _g4 = remove_env("REDUST_SCRIPT_DENY");

    let config = ServerConfig::from_env();
    assert_eq!(config.databases, 16);
    assert_eq!(config.expiry_sample_size, 20);
}

#[tokio::test]
#[serial]
async fn env_config_drives_the_server() {
    let config = {
        let _lock = ENV_LOCK.lock().unwrap();
        let _g1 = set_env("REDUST_DATABASES", "2");
        let _g2 = set_env("REDUST_SCRIPT_DENY", "del");
        ServerConfig::from_env()
    };
    redust_emu::init_logging();

    let server = Server::with_config(config);
    assert_eq!(server.config().databases, 2);
    let mut s = server.open_session();

    assert_eq!(s.invoke("SELECT", ["1"]).await.unwrap(), Reply::ok());
    let err = s.invoke("SELECT", ["2"]).await.unwrap_err();
    assert_eq!(err.to_string(), "ERR DB index is out of range");

    let err = s
        .invoke("EVAL", ["return redis.call('DEL', 'k')", "0"])
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Script { .. }));
    assert!(err.to_string().contains("not allowed from scripts"));
}
