// Logging utilities for the PKI trust store
//
// This module provides a small structured logging layer over the `log` facade:
// - Component-based prefixes (Store, Provider, Cache, ...)
// - Store id tracking through logger inheritance
// - Optional operation path for tracing a single store call

use serde::{Deserialize, Serialize};
use std::fmt::{self, Arguments, Display, Formatter};

/// Predefined components for logging categorization
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Component {
    Store,
    Provider,
    Cache,
    Chain,
    Revocation,
    Cms,
    Custom(&'static str),
}

// Lightweight Display helpers to avoid prefix String allocations
struct ComponentPrefixDisplay {
    parent: Option<Component>,
    component: Component,
}

impl Display for ComponentPrefixDisplay {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.parent {
            Some(parent) if parent != Component::Store => {
                write!(f, "{}.{}", parent.as_str(), self.component.as_str())
            }
            _ => write!(f, "{}", self.component.as_str()),
        }
    }
}

struct MaybeOperationDisplay<'a>(Option<&'a str>);

impl Display for MaybeOperationDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(path) = self.0 {
            write!(f, "|op={path}")
        } else {
            Ok(())
        }
    }
}

impl Component {
    /// Get the string representation of the component
    pub fn as_str(&self) -> &str {
        match self {
            Component::Store => "Store",
            Component::Provider => "Provider",
            Component::Cache => "Cache",
            Component::Chain => "Chain",
            Component::Revocation => "Revocation",
            Component::Cms => "CMS",
            Component::Custom(name) => name,
        }
    }
}

/// A helper for creating component-specific loggers with store id tracking
#[derive(Debug, Clone)]
pub struct Logger {
    /// Component this logger is for
    component: Component,
    /// Store instance identifier
    store_id: String,
    /// Parent component for hierarchical logging (if any)
    parent_component: Option<Component>,
    /// Operation path for tracing one store call
    operation: Option<String>,
}

impl Logger {
    /// Create a new root logger for a specific component and store id
    pub fn new_root(component: Component, store_id: &str) -> Self {
        Self {
            component,
            store_id: store_id.to_string(),
            parent_component: None,
            operation: None,
        }
    }

    /// Create a child logger with the same store id but different component
    pub fn with_component(&self, component: Component) -> Self {
        Self {
            component,
            store_id: self.store_id.clone(),
            parent_component: Some(self.component),
            operation: self.operation.clone(),
        }
    }

    /// Create a logger tagged with an operation path
    pub fn with_operation(&self, operation: impl Into<String>) -> Self {
        Self {
            component: self.component,
            store_id: self.store_id.clone(),
            parent_component: self.parent_component,
            operation: Some(operation.into()),
        }
    }

    /// Get a reference to the store id
    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Get the component of this logger
    pub fn component(&self) -> Component {
        self.component
    }

    /// Get a reference to the operation path if available
    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }

    /// Component path as rendered in log lines
    pub fn prefix(&self) -> String {
        format!(
            "{}{}",
            ComponentPrefixDisplay {
                parent: self.parent_component,
                component: self.component,
            },
            MaybeOperationDisplay(self.operation())
        )
    }

    /// Log preformatted arguments at `level`, prefixed with store id and component path
    pub fn log_args(&self, level: log::Level, args: Arguments) {
        if log::log_enabled!(level) {
            log::log!(
                level,
                "[{}][{}{}] {}",
                self.store_id,
                ComponentPrefixDisplay {
                    parent: self.parent_component,
                    component: self.component
                },
                MaybeOperationDisplay(self.operation()),
                args
            );
        }
    }
}

/// Log verbosity accepted in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
    Off,
}

impl LogLevel {
    fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Off => log::LevelFilter::Off,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Maximum level written by the global logger
    #[serde(default)]
    pub level: LogLevel,
    /// Prefix records with a timestamp
    #[serde(default = "default_timestamp")]
    pub with_timestamp: bool,
}

fn default_timestamp() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_timestamp: true,
        }
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_timestamp(mut self, enabled: bool) -> Self {
        self.with_timestamp = enabled;
        self
    }

    /// Install the global `env_logger`. Returns false when a logger was
    /// already installed by someone else.
    pub fn init(&self) -> bool {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(self.level.to_filter());
        if !self.with_timestamp {
            builder.format_timestamp(None);
        }
        builder.try_init().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_logger_prefix() {
        let root = Logger::new_root(Component::Store, "store-1");
        let child = root.with_component(Component::Chain);
        assert_eq!(child.prefix(), "Chain");

        let grandchild = child
            .with_component(Component::Custom("Builder"))
            .with_operation("build_chain");
        assert_eq!(grandchild.prefix(), "Chain.Builder|op=build_chain");
        assert_eq!(grandchild.store_id(), "store-1");
    }

    #[test]
    fn test_logging_config_serde_defaults() {
        let config: LoggingConfig = serde_json::from_str("{}").unwrap_or_default();
        assert_eq!(config.level, LogLevel::Info);
        assert!(config.with_timestamp);
    }
}
