//! Configuration surface: plain structs with `Default` impls. This
//! crate is a library, so the host constructs and owns these, the same
//! way `diff/morphdom.rs::DiffOptions` is a plain struct passed in by
//! the caller rather than parsed from a config file.

use std::time::Duration;

/// Boundary parser configuration.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Max nesting depth for literal `Template` recursion before a
    /// subtree degrades to opaque-string substitution.
    pub recursion_depth_limit: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            recursion_depth_limit: 32,
        }
    }
}

/// Tree generator configuration.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// HTML-escape rendered field values.
    pub escape_html: bool,
    /// If true, a path that resolves to nothing returns `DataInvalid`
    /// instead of rendering the empty string.
    pub strict_path_evaluation: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            escape_html: true,
            strict_path_evaluation: false,
        }
    }
}

/// Diff engine configuration.
#[derive(Debug, Clone)]
pub struct DiffConfig {
    /// When a computed patch would serialize larger than the full tree
    /// (in bytes), the diff engine may fall back to sending the full
    /// tree instead. `None` disables the fallback.
    pub full_tree_fallback_threshold: Option<usize>,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            full_tree_fallback_threshold: None,
        }
    }
}

/// Session & connection registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum concurrent connections per tenant.
    pub max_connections_per_tenant: usize,
    /// A connection is swept after this long without activity.
    pub connection_ttl: Duration,
    /// How often the TTL sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections_per_tenant: 1000,
            connection_ttl: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Token service configuration.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub token_ttl: Duration,
    /// Replay window: a nonce is rejected if seen again within this
    /// window.
    pub nonce_window: Duration,
    /// Cap on tracked nonces per shard per window; oldest evicted
    /// first (FIFO) once exceeded.
    pub max_nonces_per_shard: usize,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(24 * 60 * 60),
            nonce_window: Duration::from_secs(5 * 60),
            max_nonces_per_shard: 1000,
        }
    }
}

/// Aggregate configuration surface, gathering every recognized option
/// in one place for hosts that want a single value to construct and
/// pass around.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub parser: ParserConfig,
    pub generator: GeneratorConfig,
    pub diff: DiffConfig,
    pub registry: RegistryConfig,
    pub token: TokenConfig,
}
