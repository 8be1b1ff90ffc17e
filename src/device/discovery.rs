//! # Controller Discovery
//!
//! Sources of newly connected controllers.
//!
//! - [`HidrawDiscovery`] enumerates the udev `hidraw` subsystem for Sony DualShock 4 nodes
//! - [`BluetoothDiscovery`] connects configured addresses over L2CAP
//!
//! Both are polled from the supervisor on a fixed interval. Scans block, so
//! callers run them off the async runtime.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::bluetooth::BluetoothTransport;
use super::hidraw::{HidrawNode, HidrawTransport};
use super::Ds4Device;
use crate::report::protocol::TransportKind;

/// Sony vendor ID
pub const SONY_VENDOR_ID: u32 = 0x054c;

/// DualShock 4 product IDs (first and second revision, wireless adapter)
pub const DS4_PRODUCT_IDS: [u32; 3] = [0x05c4, 0x09cc, 0x0ba0];

/// HID bus types from `<linux/input.h>`
const BUS_USB: u32 = 0x03;
const BUS_BLUETOOTH: u32 = 0x05;

/// A source of controllers
#[cfg_attr(test, mockall::automock)]
pub trait Discovery: Send {
    /// Return controllers that appeared since the last scan
    ///
    /// `connected` holds the addresses currently bound to a session.
    fn scan(&mut self, connected: &HashSet<String>) -> Vec<Ds4Device>;
}

/// Properties of the `hid` parent of a hidraw node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidUevent {
    pub bus: u32,
    pub vendor: u32,
    pub product: u32,
    pub name: String,
    pub uniq: Option<String>,
}

impl HidUevent {
    /// Build from udev `KEY=value` properties, `HID_ID=0005:0000054C:000005C4` style
    pub fn from_properties<K, V>(properties: impl IntoIterator<Item = (K, V)>) -> Option<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut id = None;
        let mut name = String::new();
        let mut uniq = None;

        for (key, value) in properties {
            let value = value.as_ref();
            match key.as_ref() {
                "HID_ID" => {
                    let mut parts = value.split(':').map(|p| u32::from_str_radix(p, 16));
                    if let (Some(Ok(bus)), Some(Ok(vendor)), Some(Ok(product))) =
                        (parts.next(), parts.next(), parts.next())
                    {
                        id = Some((bus, vendor, product));
                    }
                }
                "HID_NAME" => name = value.to_string(),
                "HID_UNIQ" if !value.is_empty() => uniq = Some(value.to_string()),
                _ => {}
            }
        }

        let (bus, vendor, product) = id?;
        Some(Self {
            bus,
            vendor,
            product,
            name,
            uniq,
        })
    }

    /// True for a DualShock 4 on a supported bus
    pub fn is_ds4(&self) -> bool {
        self.vendor == SONY_VENDOR_ID
            && DS4_PRODUCT_IDS.contains(&self.product)
            && self.transport().is_some()
    }

    pub fn transport(&self) -> Option<TransportKind> {
        match self.bus {
            BUS_USB => Some(TransportKind::Usb),
            BUS_BLUETOOTH => Some(TransportKind::Bluetooth),
            _ => None,
        }
    }
}

/// A hidraw node with the properties of its HID device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidrawEntry {
    /// `/dev/hidrawN`
    pub hidraw: PathBuf,

    pub uevent: HidUevent,

    /// `/dev/input/eventN` below the same HID device
    pub event: Option<PathBuf>,
}

/// Lists the hidraw nodes currently present
pub trait HidrawEnumerator: Send {
    fn entries(&self) -> Vec<HidrawEntry>;
}

/// Enumerates the `hidraw` subsystem through udev
#[derive(Debug, Default, Clone, Copy)]
pub struct UdevEnumerator;

impl UdevEnumerator {
    fn scan(&self) -> io::Result<Vec<HidrawEntry>> {
        let mut enumerator = udev::Enumerator::new()?;
        enumerator.match_subsystem("hidraw")?;

        let mut entries = Vec::new();
        for device in enumerator.scan_devices()? {
            let Some(hidraw) = device.devnode().map(Path::to_path_buf) else {
                continue;
            };
            let Some(hid) = device.parent_with_subsystem("hid")? else {
                continue;
            };
            let properties = hid.properties().map(|p| {
                (
                    p.name().to_string_lossy().into_owned(),
                    p.value().to_string_lossy().into_owned(),
                )
            });
            let Some(uevent) = HidUevent::from_properties(properties) else {
                continue;
            };
            if !uevent.is_ds4() {
                continue;
            }
            entries.push(HidrawEntry {
                hidraw,
                event: event_node(&hid),
                uevent,
            });
        }
        entries.sort_by(|a, b| a.hidraw.cmp(&b.hidraw));
        Ok(entries)
    }
}

/// Find the `eventN` input node created for the same HID device
fn event_node(hid: &udev::Device) -> Option<PathBuf> {
    let mut enumerator = udev::Enumerator::new().ok()?;
    enumerator.match_parent(hid).ok()?;
    enumerator.match_subsystem("input").ok()?;

    enumerator
        .scan_devices()
        .ok()?
        .filter(|d| d.sysname().to_string_lossy().starts_with("event"))
        .find_map(|d| d.devnode().map(Path::to_path_buf))
}

impl HidrawEnumerator for UdevEnumerator {
    fn entries(&self) -> Vec<HidrawEntry> {
        match self.scan() {
            Ok(entries) => entries,
            Err(e) => {
                debug!("udev hidraw enumeration failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Finds DualShock 4 hidraw nodes
///
/// A node is remembered once it has been opened and forgotten when it goes
/// away, so a failed open is retried on the next scan.
pub struct HidrawDiscovery {
    enumerator: Box<dyn HidrawEnumerator>,
    seen: HashSet<PathBuf>,
}

impl Default for HidrawDiscovery {
    fn default() -> Self {
        Self::new(Box::new(UdevEnumerator))
    }
}

impl HidrawDiscovery {
    pub fn new(enumerator: Box<dyn HidrawEnumerator>) -> Self {
        Self {
            enumerator,
            seen: HashSet::new(),
        }
    }

    /// List DualShock 4 nodes that have not been opened yet
    pub fn find_nodes(&mut self) -> Vec<HidrawNode> {
        let entries = self.enumerator.entries();

        // Forget nodes that went away so a reconnect on the same name is picked up
        self.seen.retain(|path| entries.iter().any(|e| e.hidraw == *path));

        let mut nodes = Vec::new();
        for entry in entries {
            if self.seen.contains(&entry.hidraw) || !entry.uevent.is_ds4() {
                continue;
            }
            let Some(kind) = entry.uevent.transport() else {
                continue;
            };

            debug!("Found {} at {}", entry.uevent.name, entry.hidraw.display());
            nodes.push(HidrawNode {
                hidraw: entry.hidraw,
                event: entry.event,
                kind,
                uniq: entry.uevent.uniq,
            });
        }

        nodes
    }
}

impl Discovery for HidrawDiscovery {
    fn scan(&mut self, connected: &HashSet<String>) -> Vec<Ds4Device> {
        let mut devices = Vec::new();
        for node in self.find_nodes() {
            if let Some(uniq) = &node.uniq {
                if connected.contains(&uniq.to_ascii_uppercase()) {
                    debug!("Skipping {}, already connected", node.hidraw.display());
                    continue;
                }
            }
            match HidrawTransport::open(&node) {
                Ok(device) => {
                    self.seen.insert(node.hidraw);
                    devices.push(device);
                }
                Err(e) => warn!("Failed to open {}: {}", node.hidraw.display(), e),
            }
        }
        devices
    }
}

/// Connects to a fixed list of Bluetooth addresses
pub struct BluetoothDiscovery {
    addresses: Vec<String>,
}

impl BluetoothDiscovery {
    pub fn new(addresses: Vec<String>) -> Self {
        let addresses = addresses.into_iter().map(|a| a.to_ascii_uppercase()).collect();
        Self { addresses }
    }
}

impl Discovery for BluetoothDiscovery {
    fn scan(&mut self, connected: &HashSet<String>) -> Vec<Ds4Device> {
        let mut devices = Vec::new();
        for address in &self.addresses {
            if connected.contains(address) {
                continue;
            }
            match BluetoothTransport::connect(address) {
                Ok(device) => devices.push(device),
                // Controllers that are switched off refuse the connection every tick
                Err(e) => debug!("{}", e),
            }
        }
        devices
    }
}
