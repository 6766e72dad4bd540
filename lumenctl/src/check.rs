use std::path::Path;

use anyhow::Result;
use lumen_config::{ConfigSource, ConfigWarnings, LumenConfig};

#[derive(Debug)]
pub struct CheckReport {
    pub source: ConfigSource,
    pub warnings: ConfigWarnings,
    pub normalized: LumenConfig,
}

pub fn check(path: Option<&Path>) -> Result<CheckReport> {
    let (config, source) = match path {
        Some(path) => (
            LumenConfig::load_from_file(path)?,
            ConfigSource::File(path.to_path_buf()),
        ),
        None => LumenConfig::load_from_env()?,
    };
    let warnings = config.validate();
    Ok(CheckReport {
        source,
        warnings,
        normalized: config.into_normalized(),
    })
}

pub fn render(report: &CheckReport, show_config: bool) -> Result<String> {
    let mut out = format!("source: {}\n", report.source);
    if report.warnings.is_empty() {
        out.push_str("no warnings\n");
    } else {
        for warning in report.warnings.iter() {
            out.push_str(&format!("warning: {warning}\n"));
        }
    }
    if show_config {
        out.push('\n');
        out.push_str(&toml::to_string_pretty(&report.normalized)?);
    }
    Ok(out)
}
