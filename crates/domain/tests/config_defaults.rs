use tk_domain::config::{ApprovalMode, Config, ConfigSeverity, ContextZipMode, LogFormat};

#[test]
fn empty_file_yields_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.compaction.mode, ContextZipMode::Zip);
    assert_eq!(config.approval.mode, ApprovalMode::Auto);
    assert_eq!(config.approval.timeout_secs, 300);
    assert_eq!(config.tasks.max_phase_retries, 0);
    assert_eq!(config.commands.history_limit, 1000);
    assert!(config.validate().is_empty());
}

#[test]
fn full_file_parses() {
    let toml_str = r#"
[compaction]
mode = "crazy_zip"
replay_raw_when_disabled = true
replay_turns = 3

[approval]
mode = "auto"
timeout_secs = 30
pre_authorized_tools = ["read_file", "search"]

[tasks]
max_phase_retries = 2

[observability]
log_format = "compact"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.compaction.mode, ContextZipMode::CrazyZip);
    assert!(config.compaction.replay_raw_when_disabled);
    assert_eq!(config.compaction.replay_turns, 3);
    assert_eq!(config.approval.pre_authorized_tools.len(), 2);
    assert_eq!(config.tasks.max_phase_retries, 2);
    assert_eq!(config.observability.log_format, LogFormat::Compact);
}

#[test]
fn zero_timeout_is_an_error() {
    let config: Config = toml::from_str("[approval]\ntimeout_secs = 0\n").unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error && i.field == "approval.timeout_secs"));
}

#[test]
fn disabled_approval_warns() {
    let config: Config = toml::from_str("[approval]\nmode = \"disabled\"\n").unwrap();
    let issues = config.validate();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, ConfigSeverity::Warning);
    assert!(issues[0].to_string().starts_with("[WARN] approval.mode"));
}

#[test]
fn unknown_mode_is_rejected() {
    let result: Result<Config, _> = toml::from_str("[compaction]\nmode = \"gzip\"\n");
    assert!(result.is_err());
}
