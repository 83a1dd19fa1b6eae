// Run a bridge with simulated devices:
//   cargo run --example bridge -- --name "Demo Gateway"
// Pair from a Matter controller using the printed QR code, then watch the
// commissioning traffic in the logs (RUST_LOG=debug).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use tokio::sync::Mutex;

use matb::bridge::Bridge;
use matb::config::{BridgeConfig, MatterConfig};
use matb::device::{
    ButtonAction, ButtonDriver, Device, LightDriver, LightState, LightUpdate,
};

#[derive(Parser)]
struct Args {
    /// Device instance name announced over mDNS
    #[clap(long, default_value = "Demo Gateway")]
    name: String,

    /// Matter UDP port
    #[clap(long, default_value_t = 5540)]
    port: u16,

    /// Commissioning discriminator
    #[clap(long, default_value_t = 3840)]
    discriminator: u16,

    /// Setup passcode
    #[clap(long, default_value_t = 20202021)]
    passcode: u32,
}

struct SimLight {
    state: Mutex<LightState>,
}

#[async_trait]
impl LightDriver for SimLight {
    fn name(&self) -> &str {
        "sim-light"
    }
    async fn set(&self, update: LightUpdate, transition: Duration) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(power) = update.power {
            state.power = power;
        }
        if let Some(brightness) = update.brightness {
            state.brightness = brightness;
        }
        if let Some(color) = update.color {
            state.color = color;
        }
        println!("light -> {:?} (transition {:?})", *state, transition);
        Ok(())
    }
    async fn state(&self) -> LightState {
        *self.state.lock().await
    }
}

struct SimButton;

#[async_trait]
impl ButtonDriver for SimButton {
    fn name(&self) -> &str {
        "sim-button"
    }
    async fn next_action(&self) -> Option<ButtonAction> {
        // one press every 30 seconds, forever
        tokio::time::sleep(Duration::from_secs(30)).await;
        Some(ButtonAction::Single)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = BridgeConfig {
        device_id: "matb-demo".to_owned(),
        device_name: args.name,
        matter: MatterConfig {
            port: args.port,
            discriminator: args.discriminator,
            passcode: args.passcode,
            ..Default::default()
        },
    };

    let mut bridge = Bridge::new(config);
    bridge.register(Some(Device::Light(Arc::new(SimLight {
        state: Mutex::new(LightState::default()),
    }))));
    bridge.register(Some(Device::Button(Arc::new(SimButton))));

    let bridge = Arc::new(bridge);
    let runner = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.start().await })
    };

    tokio::signal::ctrl_c().await?;
    bridge.close().await;
    runner.await??;
    Ok(())
}
