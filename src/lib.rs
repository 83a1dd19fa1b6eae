//! Matter bridge library
//!
//! This library exposes local smart-home devices (dimmable/color lights and
//! momentary buttons) to Matter controllers. Library uses asynchronous Rust
//! and depends on Tokio. Following are main parts of api:
//! - [Bridge](bridge::Bridge) - The bridge supervisor. Owns the UDP listener on the Matter
//!               port, the mDNS announcer and the per-device event loops;
//!               [start](bridge::Bridge::start) runs them, [close](bridge::Bridge::close)
//!               cancels them and waits for teardown.
//! - [Device](device::Device) - Tagged union over the supported device capabilities.
//!               Platform drivers implement [LightDriver](device::LightDriver) or
//!               [ButtonDriver](device::ButtonDriver) outside this crate.
//! - [Registry](endpoints::Registry) - Maps registered devices to numbered Matter endpoints
//!               with device type ids and cluster lists. Endpoint 0 is the root node.
//! - [onboarding](onboarding) - QR pairing payload (base-38, `MT:` prefix) and 11 digit
//!               manual pairing code generation plus terminal QR rendering.
//! - [messages](messages) - Matter UDP message codec (8 byte header + payload).
//! - [CommissioningHandler](commissioning::CommissioningHandler) - PASE state machine over
//!               session 0 with a pluggable [SecurityProvider](commissioning::SecurityProvider);
//!               the bundled stub acknowledges and never establishes a session.
//! - [Dispatcher](dispatch::Dispatcher) - Routes OnOff/LevelControl/ColorControl commands
//!               to light endpoints, including HSV to RGB conversion.
//!
//! Example wiring a bridge with a fabricated light:
//! ```no_run
//! # use anyhow::Result;
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! # use matb::{bridge, config, device};
//! # struct MyLight;
//! # #[async_trait::async_trait]
//! # impl device::LightDriver for MyLight {
//! #     fn name(&self) -> &str { "demo" }
//! #     async fn set(&self, _u: device::LightUpdate, _t: Duration) -> Result<()> { Ok(()) }
//! #     async fn state(&self) -> device::LightState { device::LightState::default() }
//! # }
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let cfg = config::load_config("./bridge.json")?;
//! let mut bridge = bridge::Bridge::new(cfg);
//! bridge.register(Some(device::Device::Light(Arc::new(MyLight))));
//! bridge.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod announce;
pub mod bridge;
pub mod commissioning;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod endpoints;
pub mod error;
pub mod mdns;
pub mod messages;
pub mod onboarding;
pub mod transport;
