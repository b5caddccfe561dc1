//! YAML parsing with `${VAR}` environment substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use regex::Regex;

use super::types::PipelineConfig;
use super::validator::validate_pipeline;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Replace every `${VAR}` occurrence with the variable's value. All
/// missing variables are reported together.
fn substitute_env_vars(raw: &str) -> Result<String> {
    let mut missing: Vec<String> = Vec::new();
    let substituted = ENV_VAR_RE.replace_all(raw, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => {
                if !missing.contains(&name.to_string()) {
                    missing.push(name.to_string());
                }
                String::new()
            }
        }
    });
    if !missing.is_empty() {
        bail!("undefined environment variables: {}", missing.join(", "));
    }
    Ok(substituted.into_owned())
}

/// Parse and validate a pipeline definition from a YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, references undefined
/// environment variables, is not valid YAML, or fails semantic
/// validation.
pub fn parse_pipeline(path: &Path) -> Result<PipelineConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read pipeline file {}", path.display()))?;
    parse_pipeline_str(&raw)
        .with_context(|| format!("invalid pipeline file {}", path.display()))
}

/// Parse and validate a pipeline definition from a YAML string.
///
/// # Errors
///
/// See [`parse_pipeline`].
pub fn parse_pipeline_str(raw: &str) -> Result<PipelineConfig> {
    let substituted = substitute_env_vars(raw)?;
    let config: PipelineConfig =
        serde_yaml::from_str(&substituted).context("failed to parse pipeline YAML")?;
    validate_pipeline(&config)?;
    Ok(config)
}
