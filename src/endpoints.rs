//! Endpoint registry: maps registered devices to numbered Matter endpoints.
//!
//! Endpoint 0 is the root node and always exists. Endpoint ids are assigned
//! sequentially at registration and never change or disappear afterwards.
//! Registration happens before any network activity starts; after startup
//! the registry is read-only.

use crate::device::Device;

pub mod device_types {
    pub const ROOT_NODE: u16 = 0x0016;
    pub const EXTENDED_COLOR_LIGHT: u16 = 0x010D;
    pub const ON_OFF_LIGHT: u16 = 0x0100;
    pub const GENERIC_SWITCH: u16 = 0x000F;
}

/// Matter cluster ids from the fixed enumeration used by this bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Cluster {
    Descriptor = 0x001D,
    Identify = 0x0003,
    Groups = 0x0004,
    Scenes = 0x0005,
    OnOff = 0x0006,
    LevelControl = 0x0008,
    ColorControl = 0x0300,
    Switch = 0x003B,
}

impl Cluster {
    pub const fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0x001D => Some(Cluster::Descriptor),
            0x0003 => Some(Cluster::Identify),
            0x0004 => Some(Cluster::Groups),
            0x0005 => Some(Cluster::Scenes),
            0x0006 => Some(Cluster::OnOff),
            0x0008 => Some(Cluster::LevelControl),
            0x0300 => Some(Cluster::ColorControl),
            0x003B => Some(Cluster::Switch),
            _ => None,
        }
    }
}

pub mod commands {
    pub const ON_OFF_OFF: u8 = 0x00;
    pub const ON_OFF_ON: u8 = 0x01;
    pub const ON_OFF_TOGGLE: u8 = 0x02;
    pub const LEVEL_MOVE_TO_LEVEL: u8 = 0x00;
    pub const COLOR_MOVE_TO_HUE_AND_SATURATION: u8 = 0x47;
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub endpoint_id: u16,
    pub device_type: u16,
    pub clusters: Vec<Cluster>,
    pub device: Option<Device>,
}

pub struct Registry {
    endpoints: Vec<Endpoint>,
    lights: Vec<Device>,
    buttons: Vec<Device>,
}

impl Registry {
    pub fn new() -> Self {
        let root = Endpoint {
            endpoint_id: 0,
            device_type: device_types::ROOT_NODE,
            clusters: vec![Cluster::Descriptor, Cluster::Identify],
            device: None,
        };
        Self {
            endpoints: vec![root],
            lights: Vec::new(),
            buttons: Vec::new(),
        }
    }

    /// Register a device on the next endpoint id. A missing device is a
    /// silent no-op.
    pub fn register(&mut self, device: Option<Device>) {
        let Some(device) = device else {
            return;
        };
        let endpoint_id = self.endpoints.len() as u16;
        match &device {
            Device::Light(_) => {
                self.endpoints.push(Endpoint {
                    endpoint_id,
                    device_type: device_types::EXTENDED_COLOR_LIGHT,
                    clusters: vec![
                        Cluster::Descriptor,
                        Cluster::Identify,
                        Cluster::OnOff,
                        Cluster::LevelControl,
                        Cluster::ColorControl,
                    ],
                    device: Some(device.clone()),
                });
                self.lights.push(device);
                log::info!("registered rgb light on endpoint {}", endpoint_id);
            }
            Device::Button(_) => {
                self.endpoints.push(Endpoint {
                    endpoint_id,
                    device_type: device_types::GENERIC_SWITCH,
                    clusters: vec![Cluster::Descriptor, Cluster::Identify, Cluster::Switch],
                    device: Some(device.clone()),
                });
                self.buttons.push(device);
                log::info!("registered button on endpoint {}", endpoint_id);
            }
        }
    }

    pub fn lookup_by_endpoint(&self, id: u16) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.endpoint_id == id)
    }

    pub fn lookup_by_device(&self, device: &Device) -> Option<&Endpoint> {
        self.endpoints
            .iter()
            .find(|e| e.device.as_ref().is_some_and(|d| d.same(device)))
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn lights(&self) -> &[Device] {
        &self.lights
    }

    pub fn buttons(&self) -> &[Device] {
        &self.buttons
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
