use super::types::*;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    let config = parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })?;

    Ok(config)
}

/// Parse and validate config text. An empty document yields the defaults.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let config: Config = if yaml.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(yaml)?
    };

    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.merge.poll_interval.is_zero() {
        errors.push("merge.poll_interval must be greater than zero".to_string());
    }
    if config.merge.queue_capacity == 0 {
        errors.push("merge.queue_capacity must be greater than zero".to_string());
    }
    for (name, timeouts) in [("batch", &config.merge.batch), ("follow", &config.merge.follow)] {
        if timeouts.inactivity_flush_timeout.is_zero() {
            errors.push(format!(
                "merge.{}.inactivity_flush_timeout must be greater than zero",
                name
            ));
        }
    }
    if config.reader.poll_interval.is_zero() {
        errors.push("reader.poll_interval must be greater than zero".to_string());
    }
    if config.output.who_width == 0 {
        errors.push("output.who_width must be greater than zero".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}
