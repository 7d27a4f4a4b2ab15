// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Configuration file loading and command-line overrides.

use std::path::Path;

use anyhow::{Context, Result, bail};
use visionflow::core::{GraphConfig, SourceType};

/// Parse a graph configuration, picking the format from the file extension.
pub fn load_config(path: &Path) -> Result<GraphConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let config = match extension.as_deref() {
        Some("json") => serde_json::from_str(&text)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?,
        Some("yaml" | "yml") => serde_yaml::from_str(&text)
            .with_context(|| format!("Invalid YAML in {}", path.display()))?,
        Some("toml") => toml::from_str(&text)
            .with_context(|| format!("Invalid TOML in {}", path.display()))?,
        other => bail!(
            "Unsupported config format {:?} for {} (expected .json, .yaml, .yml or .toml)",
            other.unwrap_or(""),
            path.display()
        ),
    };
    Ok(config)
}

/// Replace the first source with a file input.
pub fn override_input(config: &mut GraphConfig, input: &Path) -> Result<()> {
    let uri = input_uri(input);
    let Some(first) = config.sources.first_mut() else {
        bail!("--input-file given but the config has no sources");
    };
    first.source_type = SourceType::File;
    first.uri = uri;
    Ok(())
}

fn input_uri(input: &Path) -> String {
    let raw = input.to_string_lossy();
    if raw.contains("://") {
        return raw.into_owned();
    }
    let absolute = std::fs::canonicalize(input).unwrap_or_else(|_| input.to_path_buf());
    format!("file://{}", absolute.display())
}
