use tk_domain::config::{Config, ConfigSeverity};

/// Report config issues, errors first, followed by the settings the engine
/// will run with.  Returns `false` when any issue is an error.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let mut issues = config.validate();
    issues.sort_by_key(|i| i.severity != ConfigSeverity::Error);

    for issue in &issues {
        println!("{issue}");
    }
    let errors = issues
        .iter()
        .take_while(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        println!("\n{config_path}: {errors} error(s), {} warning(s)", issues.len() - errors);
        return false;
    }

    println!(
        "{config_path}: ok (compaction {}, approval {} / {}s, phase retries {})",
        config.compaction.mode,
        config.approval.mode,
        config.approval.timeout_secs,
        config.tasks.clamped().max_phase_retries,
    );
    true
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let output = toml::to_string_pretty(config)
        .map_err(|e| anyhow::anyhow!("serializing config: {e}"))?;
    print!("{output}");
    Ok(())
}
