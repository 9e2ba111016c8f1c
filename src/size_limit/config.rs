use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use super::error::{ConfigError, ErrorFormat, SizeGuardError};
use super::route::RouteTable;
use super::size::ByteSize;
use super::stats::SizeGuardStats;

/// Effective limit governing one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimitSettings {
    pub disabled: bool,
    pub max_bytes: u64,
}

impl SizeLimitSettings {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            disabled: false,
            max_bytes,
        }
    }

    /// Settings that skip measurement entirely.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            max_bytes: 0,
        }
    }
}

/// Per-route replacement for the global settings.
///
/// When present it is taken as a whole; its fields are never merged with the
/// global ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteSizeOverride(SizeLimitSettings);

impl RouteSizeOverride {
    pub fn new(max_bytes: u64) -> Self {
        RouteSizeOverride(SizeLimitSettings::new(max_bytes))
    }

    pub fn disabled() -> Self {
        RouteSizeOverride(SizeLimitSettings::disabled())
    }

    pub fn settings(&self) -> SizeLimitSettings {
        self.0
    }
}

impl From<SizeLimitSettings> for RouteSizeOverride {
    fn from(settings: SizeLimitSettings) -> Self {
        RouteSizeOverride(settings)
    }
}

/// Process-wide guard configuration, shared read-only by every request.
#[derive(Debug)]
pub struct GlobalSizeConfig {
    settings: SizeLimitSettings,
    stats: SizeGuardStats,
    error_format: ErrorFormat,
}

impl GlobalSizeConfig {
    /// Validates `settings` and registers the stats under `stat_prefix`.
    pub fn new(settings: SizeLimitSettings, stat_prefix: &str) -> Result<Self, ConfigError> {
        validate_settings(settings, "the global configuration")?;

        Ok(Self {
            settings,
            stats: SizeGuardStats::generate(stat_prefix),
            error_format: ErrorFormat::default(),
        })
    }

    pub fn settings(&self) -> SizeLimitSettings {
        self.settings
    }

    pub fn stats(&self) -> &SizeGuardStats {
        &self.stats
    }

    pub fn error_format(&self) -> &ErrorFormat {
        &self.error_format
    }

    /// Builder-style method to set how rejections are rendered.
    pub fn with_error_format(mut self, error_format: ErrorFormat) -> Self {
        self.error_format = error_format;
        self
    }

    /// Shortcut for plain text rejections.
    pub fn with_plain_text_errors(self) -> Self {
        self.with_error_format(ErrorFormat::PlainText)
    }

    /// Shortcut for a custom rejection handler.
    pub fn with_custom_error_handler<F>(self, handler: F) -> Self
    where
        F: Fn(SizeGuardError) -> axum::response::Response + Send + Sync + 'static,
    {
        self.with_error_format(ErrorFormat::Custom(Box::new(handler)))
    }
}

pub(crate) fn validate_settings(settings: SizeLimitSettings, scope: &str) -> Result<(), ConfigError> {
    if !settings.disabled && settings.max_bytes == 0 {
        return Err(ConfigError::ZeroMaxBytes(scope.to_string()));
    }
    Ok(())
}

/// On-disk form of the guard configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    stat_prefix: String,
    disabled: bool,
    max_bytes: Option<ByteSize>,
    error_format: Option<String>,
    routes: Vec<RouteFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RouteFile {
    path_prefix: String,
    #[serde(default)]
    disabled: bool,
    max_bytes: Option<ByteSize>,
}

/// Loaded guard configuration: the global settings plus the route overrides.
#[derive(Debug, Clone)]
pub struct SizeGuardConfig {
    pub global: Arc<GlobalSizeConfig>,
    pub routes: Arc<RouteTable>,
}

impl SizeGuardConfig {
    /// Parses and validates a TOML configuration.
    ///
    /// ```
    /// use axum_size_guard::size_limit::SizeGuardConfig;
    ///
    /// let config = SizeGuardConfig::from_toml(r#"
    ///     stat_prefix = "ingress."
    ///     max_bytes = "8KiB"
    ///
    ///     [[routes]]
    ///     path_prefix = "/upload"
    ///     max_bytes = "10MB"
    /// "#).unwrap();
    ///
    /// assert_eq!(config.global.settings().max_bytes, 8192);
    /// assert_eq!(config.routes.len(), 1);
    /// ```
    pub fn from_toml(config_str: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(config_str)?;

        let max_bytes = match (file.max_bytes, file.disabled) {
            (Some(size), _) => size.as_u64(),
            (None, true) => 0,
            (None, false) => {
                return Err(ConfigError::MissingMaxBytes("the global configuration".to_string()));
            }
        };
        let settings = SizeLimitSettings {
            disabled: file.disabled,
            max_bytes,
        };

        let mut global = GlobalSizeConfig::new(settings, &file.stat_prefix)?;
        if let Some(format) = file.error_format {
            global = global.with_error_format(parse_error_format(&format)?);
        }

        let mut routes = RouteTable::new();
        for route in file.routes {
            if !route.path_prefix.starts_with('/') {
                return Err(ConfigError::InvalidPathPrefix(route.path_prefix));
            }

            let settings = match (route.max_bytes, route.disabled) {
                (_, true) => SizeLimitSettings::disabled(),
                (Some(size), false) => SizeLimitSettings::new(size.as_u64()),
                (None, false) => {
                    return Err(ConfigError::MissingMaxBytes(format!("route '{}'", route.path_prefix)));
                }
            };
            routes.insert(route.path_prefix, settings.into())?;
        }

        tracing::debug!(
            disabled = settings.disabled,
            max_bytes = settings.max_bytes,
            routes = routes.len(),
            "Loaded size guard configuration"
        );

        Ok(Self {
            global: Arc::new(global),
            routes: Arc::new(routes),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }
}

fn parse_error_format(name: &str) -> Result<ErrorFormat, ConfigError> {
    match name.to_lowercase().as_str() {
        "json" => Ok(ErrorFormat::SimpleJson),
        "text" | "plain" => Ok(ErrorFormat::PlainText),
        _ => Err(ConfigError::UnknownErrorFormat(name.to_string())),
    }
}
