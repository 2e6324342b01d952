//! Configuration management for tile-push-emu.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (TILE_PUSH_LENGTH, etc.)
//! 2. Project-local config file (`./tile-push.toml`)
//! 3. User config file (`~/.config/tile-push/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # tile-push.toml
//!
//! # Grid shape
//! grid_cols = 4
//! grid_rows = 4
//!
//! # Transfer
//! length_bytes = 128
//! tag = 10
//! write_back_address = 2748
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use crate::device::{GridArch, TileCoord};
use crate::emu::{HarnessOptions, PushTransfer};

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// tile-push-emu configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Grid columns.
    pub grid_cols: Option<u8>,

    /// Grid rows.
    pub grid_rows: Option<u8>,

    /// Bytes to push.
    pub length_bytes: Option<u32>,

    /// 4-bit transfer tag.
    pub tag: Option<u8>,

    /// Initiator-local byte address of the completion word.
    pub write_back_address: Option<u16>,

    /// Initiator-local source byte offset.
    pub local_address: Option<u32>,

    /// Destination tile column.
    pub dest_x: Option<u8>,

    /// Destination tile row.
    pub dest_y: Option<u8>,

    /// Destination byte offset.
    pub dest_offset: Option<u32>,

    /// DMA start latency in fabric steps.
    pub dma_latency_cycles: Option<u32>,

    /// Completion wait bound in milliseconds. Unset waits forever.
    pub completion_timeout_ms: Option<u64>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `tile-push.toml`
    /// 3. User config `~/.config/tile-push/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load user config first (lowest priority of file configs)
        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        // Load project-local config (higher priority)
        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        // Environment variables override everything
        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Grid shape, defaulting to 4x4.
    pub fn grid_arch(&self) -> GridArch {
        let default = GridArch::default();
        GridArch::new(
            self.grid_cols.unwrap_or(default.cols()),
            self.grid_rows.unwrap_or(default.rows()),
        )
    }

    /// Transfer parameters, with unset fields taken from the default transfer.
    pub fn push_transfer(&self) -> PushTransfer {
        let default = PushTransfer::default();
        PushTransfer {
            local_address: self.local_address.unwrap_or(default.local_address),
            dest: TileCoord::new(
                self.dest_x.unwrap_or(default.dest.x),
                self.dest_y.unwrap_or(default.dest.y),
            ),
            dest_offset: self.dest_offset.unwrap_or(default.dest_offset),
            length_bytes: self.length_bytes.unwrap_or(default.length_bytes),
            write_back_address: self.write_back_address.unwrap_or(default.write_back_address),
            tag: self.tag.unwrap_or(default.tag),
        }
    }

    /// DMA start latency, defaulting to 0.
    pub fn dma_latency_cycles(&self) -> u32 {
        self.dma_latency_cycles.unwrap_or(0)
    }

    /// Completion wait bound, or `None` to wait forever.
    pub fn completion_timeout(&self) -> Option<Duration> {
        self.completion_timeout_ms.map(Duration::from_millis)
    }

    /// Harness settings built from this configuration.
    pub fn harness_options(&self) -> HarnessOptions {
        HarnessOptions {
            transfer: self.push_transfer(),
            completion_timeout: self.completion_timeout(),
            dma_latency_cycles: self.dma_latency_cycles(),
        }
    }

    /// Load user configuration from ~/.config/tile-push/config.toml
    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./tile-push.toml
    fn load_local_config() -> Option<Self> {
        // Try current directory
        let local_path = Path::new("tile-push.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }

        // Try to find project root by looking for Cargo.toml
        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("tile-push.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.grid_cols.is_some() {
            self.grid_cols = other.grid_cols;
        }
        if other.grid_rows.is_some() {
            self.grid_rows = other.grid_rows;
        }
        if other.length_bytes.is_some() {
            self.length_bytes = other.length_bytes;
        }
        if other.tag.is_some() {
            self.tag = other.tag;
        }
        if other.write_back_address.is_some() {
            self.write_back_address = other.write_back_address;
        }
        if other.local_address.is_some() {
            self.local_address = other.local_address;
        }
        if other.dest_x.is_some() {
            self.dest_x = other.dest_x;
        }
        if other.dest_y.is_some() {
            self.dest_y = other.dest_y;
        }
        if other.dest_offset.is_some() {
            self.dest_offset = other.dest_offset;
        }
        if other.dma_latency_cycles.is_some() {
            self.dma_latency_cycles = other.dma_latency_cycles;
        }
        if other.completion_timeout_ms.is_some() {
            self.completion_timeout_ms = other.completion_timeout_ms;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_from(&lookup, "TILE_PUSH_GRID_COLS", &mut self.grid_cols);
        override_from(&lookup, "TILE_PUSH_GRID_ROWS", &mut self.grid_rows);
        override_from(&lookup, "TILE_PUSH_LENGTH", &mut self.length_bytes);
        override_from(&lookup, "TILE_PUSH_TAG", &mut self.tag);
        override_from(&lookup, "TILE_PUSH_WB_ADDRESS", &mut self.write_back_address);
        override_from(&lookup, "TILE_PUSH_LATENCY", &mut self.dma_latency_cycles);
        override_from(&lookup, "TILE_PUSH_TIMEOUT_MS", &mut self.completion_timeout_ms);
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("tile-push").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# tile-push-emu configuration
# Place this file at ~/.config/tile-push/config.toml or ./tile-push.toml

# Grid shape (identity = y * grid_cols + x; core 1 initiates)
grid_cols = 4
grid_rows = 4

# Bytes to push (non-zero multiple of 4)
length_bytes = 128

# Transfer tag (0-15) and completion word address
tag = 10
write_back_address = 2748

# Destination tile and byte offset
# dest_x = 0
# dest_y = 0
# dest_offset = 0

# DMA start latency in fabric steps
# dma_latency_cycles = 0

# Give up waiting for completion after this many milliseconds
# completion_timeout_ms = 5000
"#
        .to_string()
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal number.
fn parse_number<T: FromStr + TryFrom<u64>>(text: &str) -> Option<T> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok().and_then(|v| T::try_from(v).ok()),
        None => text.parse().ok(),
    }
}

fn override_from<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, field: &mut Option<T>)
where
    T: FromStr + TryFrom<u64> + std::fmt::Debug,
{
    let Some(raw) = lookup(name) else {
        return;
    };
    match parse_number::<T>(&raw) {
        Some(value) => {
            log::info!("Using {} from environment: {:?}", name, value);
            *field = Some(value);
        }
        None => log::warn!("Ignoring {}: cannot parse {:?}", name, raw),
    }
}
