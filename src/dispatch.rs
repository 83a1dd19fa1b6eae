//! Command dispatcher: routes cluster commands to endpoint devices.

use std::sync::Arc;
use std::time::Duration;

use crate::device::{Device, LightUpdate, Rgb};
use crate::endpoints::{commands, Cluster, Registry};
use crate::error::BridgeError;

/// Arguments carried by a cluster command. Absent fields fall back to the
/// same defaults the wire layer would fill in.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandArgs {
    pub level: Option<u8>,
    /// Transition time in deciseconds.
    pub transition_time: Option<u16>,
    /// Hue on the Matter 0-254 scale.
    pub hue: Option<u8>,
    /// Saturation on the Matter 0-254 scale.
    pub saturation: Option<u8>,
}

pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Route one command to the matching endpoint's device. Device mutations
    /// are requests to the driver; physical completion is not awaited.
    pub async fn dispatch(
        &self,
        endpoint_id: u16,
        cluster_id: u16,
        command_id: u8,
        args: CommandArgs,
    ) -> Result<(), BridgeError> {
        let endpoint = self
            .registry
            .lookup_by_endpoint(endpoint_id)
            .ok_or(BridgeError::UnknownEndpoint(endpoint_id))?;
        let light = match &endpoint.device {
            Some(Device::Light(light)) => light.clone(),
            _ => return Err(BridgeError::NotALight(endpoint_id)),
        };

        let cluster = Cluster::from_id(cluster_id).ok_or(BridgeError::UnsupportedCommand {
            cluster: cluster_id,
            command: command_id,
        })?;

        let (update, transition) = match (cluster, command_id) {
            (Cluster::OnOff, commands::ON_OFF_OFF) => {
                (LightUpdate::power(false), Duration::ZERO)
            }
            (Cluster::OnOff, commands::ON_OFF_ON) => (LightUpdate::power(true), Duration::ZERO),
            (Cluster::OnOff, commands::ON_OFF_TOGGLE) => {
                let current = light.state().await;
                (LightUpdate::power(!current.power), Duration::ZERO)
            }
            (Cluster::LevelControl, commands::LEVEL_MOVE_TO_LEVEL) => {
                let level = args.level.unwrap_or(255);
                // deciseconds on the wire
                let transition =
                    Duration::from_millis(args.transition_time.unwrap_or(0) as u64 * 100);
                (LightUpdate::brightness(level), transition)
            }
            (Cluster::ColorControl, commands::COLOR_MOVE_TO_HUE_AND_SATURATION) => {
                let hue = args.hue.unwrap_or(0);
                let saturation = args.saturation.unwrap_or(0);
                let rgb = hsv_to_rgb(
                    hue as f64 / 254.0 * 360.0,
                    saturation as f64 / 254.0 * 100.0,
                    100.0,
                );
                (LightUpdate::color(rgb), Duration::ZERO)
            }
            _ => {
                return Err(BridgeError::UnsupportedCommand {
                    cluster: cluster_id,
                    command: command_id,
                })
            }
        };

        log::debug!(
            "endpoint {} cluster {:?} command 0x{:02x}: {:?}",
            endpoint_id,
            cluster,
            command_id,
            update
        );
        if let Err(e) = light.set(update, transition).await {
            log::error!("light update on endpoint {} failed: {:#}", endpoint_id, e);
        }
        Ok(())
    }
}

/// HSV to RGB. Hue in degrees, saturation and value in percent, channels
/// truncated to 0-255.
pub fn hsv_to_rgb(h: f64, s: f64, v: f64) -> Rgb {
    let h = (h / 360.0).rem_euclid(1.0);
    let s = (s / 100.0).clamp(0.0, 1.0);
    let v = (v / 100.0).clamp(0.0, 1.0);

    let i = (h * 6.0).floor();
    let f = h * 6.0 - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);
    let (r, g, b) = match (i as i64).rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    Rgb {
        r: (r * 255.0) as u8,
        g: (g * 255.0) as u8,
        b: (b * 255.0) as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::{FakeButton, FakeLight};
    use crate::device::{ButtonAction, LightDriver, LightState};

    fn registry_with_light(state: LightState) -> (Arc<Registry>, Arc<FakeLight>) {
        let light = FakeLight::with_state("light", state);
        let mut reg = Registry::new();
        reg.register(Some(Device::Light(light.clone())));
        (Arc::new(reg), light)
    }

    #[tokio::test]
    async fn test_on_off() {
        let (reg, light) = registry_with_light(LightState::default());
        let d = Dispatcher::new(reg);
        d.dispatch(1, 0x0006, commands::ON_OFF_ON, CommandArgs::default())
            .await
            .unwrap();
        assert!(light.state().await.power);
        d.dispatch(1, 0x0006, commands::ON_OFF_OFF, CommandArgs::default())
            .await
            .unwrap();
        assert!(!light.state().await.power);
    }

    #[tokio::test]
    async fn test_toggle() {
        let (reg, light) = registry_with_light(LightState {
            power: true,
            ..Default::default()
        });
        let d = Dispatcher::new(reg);
        d.dispatch(1, 0x0006, commands::ON_OFF_TOGGLE, CommandArgs::default())
            .await
            .unwrap();
        assert!(!light.state().await.power);
        d.dispatch(1, 0x0006, commands::ON_OFF_TOGGLE, CommandArgs::default())
            .await
            .unwrap();
        assert!(light.state().await.power);
    }

    #[tokio::test]
    async fn test_move_to_level() {
        let (reg, light) = registry_with_light(LightState::default());
        let d = Dispatcher::new(reg);
        let args = CommandArgs {
            level: Some(128),
            transition_time: Some(20),
            ..Default::default()
        };
        d.dispatch(1, 0x0008, commands::LEVEL_MOVE_TO_LEVEL, args)
            .await
            .unwrap();
        assert_eq!(light.state().await.brightness, 128);
    }

    #[tokio::test]
    async fn test_move_to_hue_and_saturation() {
        let (reg, light) = registry_with_light(LightState::default());
        let d = Dispatcher::new(reg);
        // hue 0, full saturation: pure red
        let args = CommandArgs {
            hue: Some(0),
            saturation: Some(254),
            ..Default::default()
        };
        d.dispatch(1, 0x0300, 0x47, args).await.unwrap();
        assert_eq!(light.state().await.color, Rgb { r: 255, g: 0, b: 0 });

        // hue 127 (~180 degrees), full saturation: cyan
        let args = CommandArgs {
            hue: Some(127),
            saturation: Some(254),
            ..Default::default()
        };
        d.dispatch(1, 0x0300, 0x47, args).await.unwrap();
        let color = light.state().await.color;
        assert_eq!(color.r, 0);
        assert!(color.g >= 254);
        assert!(color.b >= 254);
    }

    #[tokio::test]
    async fn test_bad_targets() {
        let (reg, _light) = registry_with_light(LightState::default());
        let d = Dispatcher::new(reg);
        assert_eq!(
            d.dispatch(9, 0x0006, 0x01, CommandArgs::default())
                .await
                .unwrap_err(),
            BridgeError::UnknownEndpoint(9)
        );
        // root endpoint has no device
        assert_eq!(
            d.dispatch(0, 0x0006, 0x01, CommandArgs::default())
                .await
                .unwrap_err(),
            BridgeError::NotALight(0)
        );
    }

    #[tokio::test]
    async fn test_button_endpoint_rejected() {
        let mut reg = Registry::new();
        reg.register(Some(Device::Button(FakeButton::new(
            "btn",
            &[ButtonAction::Single],
        ))));
        let d = Dispatcher::new(Arc::new(reg));
        assert_eq!(
            d.dispatch(1, 0x0006, 0x01, CommandArgs::default())
                .await
                .unwrap_err(),
            BridgeError::NotALight(1)
        );
    }

    #[tokio::test]
    async fn test_unsupported_command() {
        let (reg, light) = registry_with_light(LightState::default());
        let d = Dispatcher::new(reg);
        let before = light.state().await;
        assert_eq!(
            d.dispatch(1, 0x0006, 0x55, CommandArgs::default())
                .await
                .unwrap_err(),
            BridgeError::UnsupportedCommand {
                cluster: 0x0006,
                command: 0x55
            }
        );
        // unknown cluster id
        assert!(matches!(
            d.dispatch(1, 0x9999, 0x00, CommandArgs::default())
                .await
                .unwrap_err(),
            BridgeError::UnsupportedCommand { .. }
        ));
        assert_eq!(light.state().await, before);
    }

    #[test]
    fn test_hsv_vectors() {
        assert_eq!(hsv_to_rgb(0.0, 100.0, 100.0), Rgb { r: 255, g: 0, b: 0 });
        assert_eq!(hsv_to_rgb(120.0, 100.0, 100.0), Rgb { r: 0, g: 255, b: 0 });
        assert_eq!(hsv_to_rgb(240.0, 100.0, 100.0), Rgb { r: 0, g: 0, b: 255 });
        assert_eq!(
            hsv_to_rgb(180.0, 100.0, 100.0),
            Rgb {
                r: 0,
                g: 255,
                b: 255
            }
        );
        // zero saturation is white regardless of hue
        assert_eq!(
            hsv_to_rgb(77.0, 0.0, 100.0),
            Rgb {
                r: 255,
                g: 255,
                b: 255
            }
        );
    }
}
