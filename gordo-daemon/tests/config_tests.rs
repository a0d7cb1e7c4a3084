//! Configuration layering: file < environment < command line.

use std::time::Duration;

use clap::Parser;
use serial_test::serial;

use gordo_core::config::GordoConfig;
use gordo_daemon::cli::DaemonCli;

const FILE: &str = r#"
[supervisor]
enforce_interval = "30s"
fixed_memory = false

[directives]
maxmemory = "2G"
loglevel = "notice"
"#;

fn layered(args: &[&str]) -> GordoConfig {
    let mut config = GordoConfig::parse(FILE).unwrap();
    config.apply_env_overrides();
    DaemonCli::try_parse_from(args).unwrap().apply(&mut config);
    config
}

#[test]
#[serial]
fn file_values_survive_without_overrides() {
    let config = layered(&["gordo"]);
    assert_eq!(config.supervisor.enforce_interval, Duration::from_secs(30));
    let directives = config.effective_directives();
    assert_eq!(directives["maxmemory"], "2G");
    assert_eq!(directives["loglevel"], "notice");
    assert_eq!(directives["port"], "6380");
}

#[test]
#[serial]
fn environment_overrides_file() {
    // SAFETY: serialized with other environment-touching tests.
    unsafe { std::env::set_var("GORDO_SUPERVISOR_FIXED_MEMORY", "true") };
    let config = layered(&["gordo"]);
    unsafe { std::env::remove_var("GORDO_SUPERVISOR_FIXED_MEMORY") };

    assert!(config.supervisor.fixed_memory);
    assert!(config.build_store().unwrap().is_protected("maxmemory"));
}

#[test]
#[serial]
fn legacy_env_flags_are_read_by_cli() {
    unsafe {
        std::env::set_var("GORDO_MAXMEM", "3G");
        std::env::set_var("GORDO_EINTERVAL", "1m30s");
    }
    let config = layered(&["gordo"]);
    unsafe {
        std::env::remove_var("GORDO_MAXMEM");
        std::env::remove_var("GORDO_EINTERVAL");
    }

    assert_eq!(config.effective_directives()["maxmemory"], "3G");
    assert_eq!(config.supervisor.enforce_interval, Duration::from_secs(90));
}

#[test]
#[serial]
fn command_line_overrides_environment() {
    unsafe { std::env::set_var("GORDO_GENERAL_LOG_LEVEL", "warn") };
    let config = layered(&["gordo", "--log-level", "debug", "-m", "4G"]);
    unsafe { std::env::remove_var("GORDO_GENERAL_LOG_LEVEL") };

    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.effective_directives()["maxmemory"], "4G");
    config.validate().unwrap();
}

#[test]
#[serial]
fn fixed_memory_flag_protects_maxmemory() {
    let config = layered(&["gordo", "--fixedmem"]);
    let store = config.build_store().unwrap();
    assert!(store.protection_active());
    assert_eq!(
        store.set("maxmemory", "8G").unwrap(),
        gordo_core::SetOutcome::Prohibited
    );
    assert_eq!(store.get("maxmemory").unwrap(), "2G");
}
