use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::converter::{Converter, ConverterRegistry};
use crate::dialect::{AnsiDialect, SqlDialect, dialect_by_name};
use crate::naming::Naming;

pub const DEFAULT_TEMPLATE_CACHE_SIZE: usize = 2048;
pub const DEFAULT_TEMPLATE_CACHE_SEGMENTS: usize = 16;

/// Settings of a [`crate::Stratum`] service.
#[derive(Clone)]
pub struct StratumConfig {
    pub dialect: Arc<dyn SqlDialect>,
    pub naming: Naming,
    pub converters: ConverterRegistry,
    /// Render template values as SQL literals instead of bind markers.
    pub inline_parameters: bool,
    pub template_cache_size: usize,
    pub template_cache_segments: usize,
    /// Reject inconsistent record annotations when models are built.
    pub validate_models: bool,
}

impl Default for StratumConfig {
    fn default() -> Self {
        Self {
            dialect: Arc::new(AnsiDialect),
            naming: Naming::default(),
            converters: ConverterRegistry::default(),
            inline_parameters: false,
            template_cache_size: DEFAULT_TEMPLATE_CACHE_SIZE,
            template_cache_segments: DEFAULT_TEMPLATE_CACHE_SEGMENTS,
            validate_models: true,
        }
    }
}

impl fmt::Debug for StratumConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StratumConfig")
            .field("dialect", &self.dialect.name())
            .field("naming", &self.naming)
            .field("converters", &self.converters)
            .field("inline_parameters", &self.inline_parameters)
            .field("template_cache_size", &self.template_cache_size)
            .field("template_cache_segments", &self.template_cache_segments)
            .field("validate_models", &self.validate_models)
            .finish()
    }
}

impl StratumConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `STRATUM_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(name) = lookup("STRATUM_DIALECT") {
            match dialect_by_name(&name) {
                Some(dialect) => config.dialect = dialect,
                None => tracing::warn!(value = %name, "ignoring unknown STRATUM_DIALECT"),
            }
        }
        if let Some(size) = parse_var(&lookup, "STRATUM_TEMPLATE_CACHE_SIZE") {
            config.template_cache_size = size;
        }
        if let Some(segments) = parse_var(&lookup, "STRATUM_TEMPLATE_CACHE_SEGMENTS") {
            config.template_cache_segments = segments;
        }
        if let Some(inline) = parse_flag(&lookup, "STRATUM_INLINE_PARAMETERS") {
            config.inline_parameters = inline;
        }
        if let Some(validate) = parse_flag(&lookup, "STRATUM_VALIDATE_MODELS") {
            config.validate_models = validate;
        }
        config
    }

    pub fn dialect(mut self, dialect: impl SqlDialect + 'static) -> Self {
        self.dialect = Arc::new(dialect);
        self
    }

    pub fn naming(mut self, naming: Naming) -> Self {
        self.naming = naming;
        self
    }

    pub fn converter(mut self, converter: impl Converter + 'static) -> Self {
        self.converters.register(converter);
        self
    }

    pub fn inline_parameters(mut self, inline: bool) -> Self {
        self.inline_parameters = inline;
        self
    }

    pub fn template_cache(mut self, size: usize, segments: usize) -> Self {
        self.template_cache_size = size;
        self.template_cache_segments = segments;
        self
    }

    pub fn validate_models(mut self, validate: bool) -> Self {
        self.validate_models = validate;
        self
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring invalid value");
            None
        }
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<bool> {
    let raw = lookup(name)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(variable = name, value = %raw, "ignoring invalid flag");
            None
        }
    }
}
