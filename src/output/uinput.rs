//! uinput backed [`VirtualOutput`]

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{
    AbsInfo, AttributeSet, BusType, EventType, InputEvent, InputId, Key, RelativeAxisType,
    UinputAbsSetup,
};
use tracing::{debug, info};

use super::layout::Layout;
use super::{OutputEvent, VirtualDeviceFactory, VirtualOutput};
use crate::error::DeviceError;

/// A device created through `/dev/uinput`
pub struct UinputOutput {
    device: Option<VirtualDevice>,
    pending: Vec<InputEvent>,
}

impl UinputOutput {
    /// Create a virtual device exposing everything `layout` maps
    ///
    /// # Errors
    ///
    /// Returns error if `/dev/uinput` is missing or not writable
    pub fn create(layout: &Layout) -> Result<Self, DeviceError> {
        let mut builder = VirtualDeviceBuilder::new()?
            .name(&layout.description)
            .input_id(InputId::new(
                BusType(layout.bus),
                layout.vendor,
                layout.product,
                layout.version,
            ));

        if !layout.buttons.is_empty() {
            let mut keys = AttributeSet::<Key>::new();
            for &(code, _) in &layout.buttons {
                keys.insert(code);
            }
            builder = builder.with_keys(&keys)?;
        }

        let hats = layout.hats.iter().map(|&(code, _, _)| code);
        for code in layout.axes.iter().map(|&(code, _, _)| code).chain(hats) {
            let Some(range) = layout.range(code) else {
                continue;
            };
            let info = AbsInfo::new(0, range.min, range.max, range.fuzz, range.flat, 0);
            builder = builder.with_absolute_axis(&UinputAbsSetup::new(code, info))?;
        }

        if layout.has_mouse() {
            let mut axes = AttributeSet::<RelativeAxisType>::new();
            for &(code, _) in &layout.mouse {
                axes.insert(code);
            }
            builder = builder.with_relative_axes(&axes)?;
        }

        let mut device = builder.build()?;

        let node = device
            .enumerate_dev_nodes_blocking()
            .ok()
            .and_then(|mut nodes| nodes.next())
            .and_then(|node| node.ok());
        match node {
            Some(path) => info!("Created {} ({})", layout.description, path.display()),
            None => info!("Created {}", layout.description),
        }

        Ok(Self {
            device: Some(device),
            pending: Vec::new(),
        })
    }
}

impl VirtualOutput for UinputOutput {
    fn write(&mut self, event: OutputEvent) -> Result<(), DeviceError> {
        let event = match event {
            OutputEvent::Absolute(code, value) => InputEvent::new(EventType::ABSOLUTE, code.0, value),
            OutputEvent::Key(code, pressed) => {
                InputEvent::new(EventType::KEY, code.code(), i32::from(pressed))
            }
            OutputEvent::Relative(code, value) => InputEvent::new(EventType::RELATIVE, code.0, value),
        };
        self.pending.push(event);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), DeviceError> {
        let Some(device) = self.device.as_mut() else {
            self.pending.clear();
            return Ok(());
        };

        // emit() appends the SYN_REPORT
        let result = device.emit(&self.pending);
        self.pending.clear();
        result.map_err(DeviceError::Io)
    }

    fn close(&mut self) {
        if self.device.take().is_some() {
            debug!("Destroyed virtual device");
        }
        self.pending.clear();
    }
}

/// Creates [`UinputOutput`] devices
#[derive(Debug, Default, Clone, Copy)]
pub struct UinputFactory;

impl VirtualDeviceFactory for UinputFactory {
    fn create(&self, layout: &Layout) -> Result<Box<dyn VirtualOutput>, DeviceError> {
        Ok(Box::new(UinputOutput::create(layout)?))
    }
}
