//! Device abstraction seam.
//!
//! Physical drivers live outside this crate; the bridge only needs the two
//! capability sets below. Lights accept state updates and report their
//! current state, buttons emit discrete press actions. Platform discovery
//! supplies implementations and hands them to
//! [Registry::register](crate::endpoints::Registry::register) wrapped in the
//! [Device] tagged union.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightState {
    pub power: bool,
    pub brightness: u8,
    pub color: Rgb,
}

impl Default for LightState {
    fn default() -> Self {
        Self {
            power: false,
            brightness: 255,
            color: Rgb {
                r: 255,
                g: 255,
                b: 255,
            },
        }
    }
}

/// Partial state update. Unset fields leave the current value untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct LightUpdate {
    pub power: Option<bool>,
    pub brightness: Option<u8>,
    pub color: Option<Rgb>,
}

impl LightUpdate {
    pub fn power(on: bool) -> Self {
        Self {
            power: Some(on),
            ..Default::default()
        }
    }
    pub fn brightness(level: u8) -> Self {
        Self {
            brightness: Some(level),
            ..Default::default()
        }
    }
    pub fn color(color: Rgb) -> Self {
        Self {
            color: Some(color),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait LightDriver: Send + Sync {
    fn name(&self) -> &str;
    /// Apply an update over the given transition time. The driver is not
    /// expected to confirm physical completion before returning.
    async fn set(&self, update: LightUpdate, transition: Duration) -> Result<()>;
    async fn state(&self) -> LightState;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Single,
    Double,
    Triple,
    Hold,
    Release,
}

impl ButtonAction {
    /// Matter Switch cluster event id for this action.
    /// single -> ShortRelease, double/triple -> MultiPressComplete,
    /// hold -> LongPress, release -> LongRelease.
    pub fn switch_event(&self) -> u8 {
        match self {
            ButtonAction::Single => 0x02,
            ButtonAction::Double | ButtonAction::Triple => 0x05,
            ButtonAction::Hold => 0x01,
            ButtonAction::Release => 0x03,
        }
    }
}

#[async_trait]
pub trait ButtonDriver: Send + Sync {
    fn name(&self) -> &str;
    /// Wait for the next press action. `None` means the event source is
    /// exhausted and the relay task for this button should end.
    async fn next_action(&self) -> Option<ButtonAction>;
}

/// Tagged union over the supported device kinds. The registry switches on
/// the variant, never on runtime type identity.
#[derive(Clone)]
pub enum Device {
    Light(Arc<dyn LightDriver>),
    Button(Arc<dyn ButtonDriver>),
}

impl Device {
    pub fn name(&self) -> &str {
        match self {
            Device::Light(l) => l.name(),
            Device::Button(b) => b.name(),
        }
    }

    /// Pointer identity. Two handles to the same driver compare equal.
    pub fn same(&self, other: &Device) -> bool {
        match (self, other) {
            (Device::Light(a), Device::Light(b)) => Arc::ptr_eq(a, b),
            (Device::Button(a), Device::Button(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Light(l) => write!(f, "Light({})", l.name()),
            Device::Button(b) => write!(f, "Button({})", b.name()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory drivers used by unit tests across the crate.

    use super::*;
    use tokio::sync::Mutex;

    pub struct FakeLight {
        name: String,
        state: Mutex<LightState>,
    }

    impl FakeLight {
        pub fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_owned(),
                state: Mutex::new(LightState::default()),
            })
        }
        pub fn with_state(name: &str, state: LightState) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_owned(),
                state: Mutex::new(state),
            })
        }
    }

    #[async_trait]
    impl LightDriver for FakeLight {
        fn name(&self) -> &str {
            &self.name
        }
        async fn set(&self, update: LightUpdate, _transition: Duration) -> Result<()> {
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
            Ok(())
        }
        async fn state(&self) -> LightState {
            *self.state.lock().await
        }
    }

    pub struct FakeButton {
        name: String,
        actions: Mutex<Vec<ButtonAction>>,
    }

    impl FakeButton {
        pub fn new(name: &str, actions: &[ButtonAction]) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_owned(),
                actions: Mutex::new(actions.to_vec()),
            })
        }
    }

    #[async_trait]
    impl ButtonDriver for FakeButton {
        fn name(&self) -> &str {
            &self.name
        }
        async fn next_action(&self) -> Option<ButtonAction> {
            let mut actions = self.actions.lock().await;
            if actions.is_empty() {
                None
            } else {
                Some(actions.remove(0))
            }
        }
    }
}
