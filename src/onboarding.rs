//! Onboarding payload generation: QR pairing payload and manual pairing code.
//!
//! The QR payload packs setup fields into an 84 bit integer rendered as a
//! base-38 string with the `MT:` prefix. Bit layout, most significant end
//! first: version(3) vendor_id(16) product_id(16) custom_flow(2)
//! discovery_caps(8) discriminator(12) passcode(27). The packing is a fixed
//! binary contract independent of everything else in the crate.

use anyhow::{Context, Result};

use crate::error::BridgeError;

const BASE38_CHARS: &[u8; 38] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ-.";
const QR_PREFIX: &str = "MT:";
const QR_MIN_LEN: usize = 20;

/// Discovery capability bit: device is reachable on the existing IP network.
pub const DISCOVERY_CAP_ON_NETWORK: u8 = 0x04;
pub const DISCOVERY_CAP_BLE: u8 = 0x01;
pub const DISCOVERY_CAP_SOFT_AP: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QrPayload {
    pub version: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub custom_flow: u8,
    pub discovery_caps: u8,
    pub discriminator: u16,
    pub passcode: u32,
}

impl QrPayload {
    /// Standard-flow payload for an on-network device.
    pub fn new(vendor_id: u16, product_id: u16, discriminator: u16, passcode: u32) -> Self {
        Self {
            version: 0,
            vendor_id,
            product_id,
            custom_flow: 0,
            discovery_caps: DISCOVERY_CAP_ON_NETWORK,
            discriminator,
            passcode,
        }
    }

    fn pack(&self) -> u128 {
        let mut value: u128 = 0;
        value |= ((self.version & 0x7) as u128) << 81;
        value |= (self.vendor_id as u128) << 65;
        value |= (self.product_id as u128) << 49;
        value |= ((self.custom_flow & 0x3) as u128) << 47;
        value |= (self.discovery_caps as u128) << 39;
        value |= ((self.discriminator & 0xFFF) as u128) << 27;
        value |= (self.passcode & 0x7FF_FFFF) as u128;
        value
    }

    fn unpack(value: u128) -> Self {
        Self {
            version: ((value >> 81) & 0x7) as u8,
            vendor_id: ((value >> 65) & 0xFFFF) as u16,
            product_id: ((value >> 49) & 0xFFFF) as u16,
            custom_flow: ((value >> 47) & 0x3) as u8,
            discovery_caps: ((value >> 39) & 0xFF) as u8,
            discriminator: ((value >> 27) & 0xFFF) as u16,
            passcode: (value & 0x7FF_FFFF) as u32,
        }
    }

    /// Encode as `MT:<base38>`, left padded to at least 20 base-38 digits.
    pub fn encode(&self) -> String {
        let mut value = self.pack();
        let mut digits = Vec::new();
        while value > 0 {
            digits.push(BASE38_CHARS[(value % 38) as usize]);
            value /= 38;
        }
        while digits.len() < QR_MIN_LEN {
            digits.push(b'0');
        }
        digits.reverse();
        let encoded = String::from_utf8(digits).unwrap_or_default();
        format!("{}{}", QR_PREFIX, encoded)
    }
}

pub fn encode_qr_payload(
    vendor_id: u16,
    product_id: u16,
    discriminator: u16,
    passcode: u32,
) -> String {
    QrPayload::new(vendor_id, product_id, discriminator, passcode).encode()
}

pub fn decode_qr_payload(payload: &str) -> Result<QrPayload> {
    let encoded = payload
        .strip_prefix(QR_PREFIX)
        .context("qr payload missing MT: prefix")?;
    let mut value: u128 = 0;
    for c in encoded.bytes() {
        let digit = BASE38_CHARS
            .iter()
            .position(|&b| b == c)
            .with_context(|| format!("invalid base38 character {:?}", c as char))?;
        value = value
            .checked_mul(38)
            .and_then(|v| v.checked_add(digit as u128))
            .context("qr payload overflows 128 bits")?;
    }
    Ok(QrPayload::unpack(value))
}

/// Format the passcode as an 11 digit manual pairing code, `XXXX-XXX-XXXX`.
pub fn encode_manual_code(passcode: u64) -> Result<String, BridgeError> {
    if passcode >= 100_000_000_000 {
        return Err(BridgeError::PasscodeTooLarge(passcode));
    }
    let digits = format!("{:011}", passcode);
    Ok(format!(
        "{}-{}-{}",
        &digits[0..4],
        &digits[4..7],
        &digits[7..11]
    ))
}

/// Render the QR payload as a scannable two-tone terminal QR code.
pub fn render_qr_text(payload: &str) -> Result<String> {
    let code = qrcode::QrCode::new(payload)?;
    let rendered = code
        .render::<qrcode::render::unicode::Dense1x2>()
        .dark_color(qrcode::render::unicode::Dense1x2::Light)
        .light_color(qrcode::render::unicode::Dense1x2::Dark)
        .build();
    Ok(rendered)
}

/// Print pairing instructions for the operator console.
pub fn print_pairing_info(
    device_name: &str,
    device_id: &str,
    vendor_id: u16,
    product_id: u16,
    discriminator: u16,
    passcode: u32,
) -> Result<()> {
    let qr_payload = encode_qr_payload(vendor_id, product_id, discriminator, passcode);
    let manual_code = encode_manual_code(passcode as u64)?;

    println!("{}", "=".repeat(60));
    println!("MATTER DEVICE PAIRING INFORMATION");
    println!("{}", "=".repeat(60));
    println!("Device Name: {}", device_name);
    println!("Device ID: {}", device_id);
    println!("Vendor ID: 0x{:04X} ({})", vendor_id, vendor_id);
    println!("Product ID: 0x{:04X} ({})", product_id, product_id);
    println!("{}", "-".repeat(60));
    println!("Manual Pairing Code: {}", manual_code);
    println!("Discriminator: {}", discriminator);
    println!("Setup PIN: {}", passcode);
    println!("{}", "-".repeat(60));
    println!("QR Payload: {}", qr_payload);
    println!();
    println!("{}", render_qr_text(&qr_payload)?);
    println!();
    println!("Scan the QR code with the controller app, or enter the");
    println!("manual code {} when prompted.", manual_code);
    println!("{}", "=".repeat(60));

    log::info!("manual pairing code: {}", manual_code);
    log::info!("qr payload: {}", qr_payload);
    Ok(())
}
