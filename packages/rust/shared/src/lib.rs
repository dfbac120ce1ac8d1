//! Shared types, error model, and configuration for PriceWatch.
//!
//! This crate is the foundation depended on by all other PriceWatch crates.
//! It provides:
//! - [`PriceWatchError`], the unified error type
//! - Domain types ([`Product`], [`ProductImage`], [`PriceHistory`], [`RawProduct`], [`ProductId`])
//! - Configuration ([`AppConfig`], [`FetchOptions`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DatabaseConfig, FetchConfig, FetchOptions, RefreshConfig, ServerConfig,
    apply_env_overrides, config_dir, config_file_path, expand_home, init_config, load_config,
    load_config_from,
};
pub use error::{PriceWatchError, Result};
pub use types::{
    ImageStatus, PriceHistory, Product, ProductId, ProductImage, ProductPayload, RawProduct,
};
