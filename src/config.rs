//! Bridge configuration. Loaded from a JSON file supplied by the process
//! entry point; the matter block and all of its fields are optional and
//! fall back to the standard test-vendor defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const MATTER_PORT: u16 = 5540;
pub const MATTER_VENDOR_ID: u16 = 0xFFF1; // test vendor id
pub const MATTER_PRODUCT_ID: u16 = 0x8001;
pub const MATTER_DISCRIMINATOR: u16 = 3840;
pub const MATTER_PASSCODE: u32 = 20202021;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatterConfig {
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,
    #[serde(default = "default_product_id")]
    pub product_id: u16,
    #[serde(default = "default_discriminator")]
    pub discriminator: u16,
    #[serde(default = "default_passcode")]
    pub passcode: u32,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_vendor_id() -> u16 {
    MATTER_VENDOR_ID
}
fn default_product_id() -> u16 {
    MATTER_PRODUCT_ID
}
fn default_discriminator() -> u16 {
    MATTER_DISCRIMINATOR
}
fn default_passcode() -> u32 {
    MATTER_PASSCODE
}
fn default_port() -> u16 {
    MATTER_PORT
}

impl Default for MatterConfig {
    fn default() -> Self {
        Self {
            vendor_id: MATTER_VENDOR_ID,
            product_id: MATTER_PRODUCT_ID,
            discriminator: MATTER_DISCRIMINATOR,
            passcode: MATTER_PASSCODE,
            port: MATTER_PORT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub device_id: String,
    pub device_name: String,
    #[serde(default)]
    pub matter: MatterConfig,
}

pub fn load_config(path: &str) -> Result<BridgeConfig> {
    let data = std::fs::read_to_string(path).context(format!("reading config from {}", path))?;
    serde_json::from_str(&data).context("parsing bridge config")
}
