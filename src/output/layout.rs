//! # Virtual Device Layouts
//!
//! Which report fields a virtual device exposes and under which evdev codes.
//!
//! | Layout | Device name | Bus / vendor / product |
//! |--------|-------------|------------------------|
//! | `ds4` | Sony Computer Entertainment Wireless Controller | USB 054c:05c4 |
//! | `xboxdrv` | Xbox Gamepad (userspace driver) | none |
//! | `xpad` | Microsoft X-Box 360 pad | USB 045e:028e |
//! | `xpad_wireless` | Xbox 360 Wireless Receiver | USB 045e:0719 |
//! | `mouse` | DualShock4 Mouse Emulation | none |
//!
//! Custom layouts come from `[mappings.<name>]` tables that map evdev code
//! names (`BTN_*`, `KEY_*`, `ABS_*`, `REL_*`) to report field names. A button
//! field prefixed with `+` or `-` turns an analog axis into a digital button.

use evdev::{AbsoluteAxisType, Key, RelativeAxisType};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::MappingValue;
use crate::error::DeviceError;
use crate::report::fields::{Axis, Button};

/// Distance from center an analog axis travels before its digital button is pressed
pub const A2D_DEADZONE: i32 = 50;

/// Center of analog sticks
pub const ANALOG_CENTER: i32 = 128;

/// Relative motion per trackpad unit
pub const TRACKPAD_SENSITIVITY: f64 = 0.5;

/// Default relative motion per unit of analog stick acceleration
pub const MOUSE_SENSITIVITY: f64 = 0.3;

/// Default distance from center before an analog stick moves the mouse
pub const MOUSE_DEADZONE: i32 = 5;

const BUS_USB: u16 = 0x03;

/// `absinfo` parameters of an absolute axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisRange {
    pub min: i32,
    pub max: i32,
    pub fuzz: i32,
    pub flat: i32,
}

impl AxisRange {
    pub const fn new(min: i32, max: i32, fuzz: i32, flat: i32) -> Self {
        Self { min, max, fuzz, flat }
    }
}

impl Default for AxisRange {
    fn default() -> Self {
        Self::new(0, 255, 0, 15)
    }
}

/// Range of hat axes
pub const HAT_RANGE: AxisRange = AxisRange::new(-1, 1, 0, 0);

/// What drives a virtual key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonSource {
    Button(Button),

    /// Pressed while the axis is above center plus [`A2D_DEADZONE`]
    AnalogHigh(Axis),

    /// Pressed while the axis is below center minus [`A2D_DEADZONE`]
    AnalogLow(Axis),
}

impl std::str::FromStr for ButtonSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (high, field) = match s.as_bytes().first() {
            Some(b'+') => (Some(true), &s[1..]),
            Some(b'-') => (Some(false), &s[1..]),
            _ => (None, s),
        };

        match high {
            Some(high) => {
                let axis: Axis = field.parse()?;
                if !axis.is_analog() {
                    return Err(format!("{} is not an analog axis", field));
                }
                Ok(if high {
                    ButtonSource::AnalogHigh(axis)
                } else {
                    ButtonSource::AnalogLow(axis)
                })
            }
            None => field.parse().map(ButtonSource::Button),
        }
    }
}

/// Everything needed to create and drive one virtual device
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    /// Layout key (`ds4`, `xpad`, a mapping name)
    pub name: String,

    /// Device name shown to applications
    pub description: String,

    pub bus: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,

    pub axes: Vec<(AbsoluteAxisType, Axis, AxisRange)>,
    pub buttons: Vec<(Key, ButtonSource)>,

    /// Hat axis with its negative and positive direction
    pub hats: Vec<(AbsoluteAxisType, Button, Button)>,

    pub mouse: Vec<(RelativeAxisType, Axis)>,
    pub mouse_sensitivity: f64,
    pub mouse_deadzone: i32,
}

impl Layout {
    fn empty(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            bus: 0,
            vendor: 0,
            product: 0,
            version: 0,
            axes: Vec::new(),
            buttons: Vec::new(),
            hats: Vec::new(),
            mouse: Vec::new(),
            mouse_sensitivity: MOUSE_SENSITIVITY,
            mouse_deadzone: MOUSE_DEADZONE,
        }
    }

    /// Needs a joystick style device (absolute axes or keys)
    pub fn has_joystick(&self) -> bool {
        !self.axes.is_empty() || !self.buttons.is_empty() || !self.hats.is_empty()
    }

    pub fn has_mouse(&self) -> bool {
        !self.mouse.is_empty()
    }

    /// Range of the axis mapped to `code`, hats included
    pub fn range(&self, code: AbsoluteAxisType) -> Option<AxisRange> {
        self.axes
            .iter()
            .find(|(c, _, _)| *c == code)
            .map(|&(_, _, range)| range)
            .or_else(|| self.hats.iter().any(|(c, _, _)| *c == code).then_some(HAT_RANGE))
    }

    fn add_axis(&mut self, code: &str, field: &str, range: AxisRange) -> Result<(), String> {
        self.axes.push((abs_code(code)?, field.parse()?, range));
        Ok(())
    }

    fn add_button(&mut self, code: &str, field: &str) -> Result<(), String> {
        self.buttons.push((key_code(code)?, field.parse()?));
        Ok(())
    }

    fn add_hat(&mut self, code: &str, negative: &str, positive: &str) -> Result<(), String> {
        self.hats.push((abs_code(code)?, negative.parse()?, positive.parse()?));
        Ok(())
    }

    fn add_mouse(&mut self, code: &str, field: &str) -> Result<(), String> {
        self.mouse.push((rel_code(code)?, field.parse()?));
        Ok(())
    }
}

/// Static description of a built-in layout
struct LayoutSpec {
    name: &'static str,
    description: &'static str,
    id: (u16, u16, u16, u16),
    axes: &'static [(&'static str, &'static str)],
    axis_ranges: &'static [(&'static str, AxisRange)],
    buttons: &'static [(&'static str, &'static str)],
    hats: &'static [(&'static str, &'static str, &'static str)],
    mouse: &'static [(&'static str, &'static str)],
}

const DPAD_HATS: &[(&str, &str, &str)] = &[
    ("ABS_HAT0X", "dpad_left", "dpad_right"),
    ("ABS_HAT0Y", "dpad_up", "dpad_down"),
];

const XBOX_BUTTONS: &[(&str, &str)] = &[
    ("BTN_START", "button_options"),
    ("BTN_MODE", "button_ps"),
    ("BTN_SELECT", "button_share"),
    ("BTN_A", "button_cross"),
    ("BTN_B", "button_circle"),
    ("BTN_X", "button_square"),
    ("BTN_Y", "button_triangle"),
    ("BTN_TL", "button_l1"),
    ("BTN_TR", "button_r1"),
    ("BTN_THUMBL", "button_l3"),
    ("BTN_THUMBR", "button_r3"),
];

const XPAD_AXES: &[(&str, &str)] = &[
    ("ABS_X", "left_analog_x"),
    ("ABS_Y", "left_analog_y"),
    ("ABS_RX", "right_analog_x"),
    ("ABS_RY", "right_analog_y"),
    ("ABS_Z", "l2_analog"),
    ("ABS_RZ", "r2_analog"),
];

const BUILTIN_LAYOUTS: &[LayoutSpec] = &[
    LayoutSpec {
        name: "ds4",
        description: "Sony Computer Entertainment Wireless Controller",
        id: (BUS_USB, 1356, 1476, 273),
        axes: &[
            ("ABS_X", "left_analog_x"),
            ("ABS_Y", "left_analog_y"),
            ("ABS_Z", "right_analog_x"),
            ("ABS_RZ", "right_analog_y"),
            ("ABS_RX", "l2_analog"),
            ("ABS_RY", "r2_analog"),
            ("ABS_THROTTLE", "orientation_roll"),
            ("ABS_RUDDER", "orientation_pitch"),
            ("ABS_WHEEL", "orientation_yaw"),
            ("ABS_DISTANCE", "motion_z"),
            ("ABS_TILT_X", "motion_x"),
            ("ABS_TILT_Y", "motion_y"),
        ],
        axis_ranges: &[
            ("ABS_THROTTLE", AxisRange::new(-16385, 16384, 0, 0)),
            ("ABS_RUDDER", AxisRange::new(-16385, 16384, 0, 0)),
            ("ABS_WHEEL", AxisRange::new(-16385, 16384, 0, 0)),
            ("ABS_DISTANCE", AxisRange::new(-32768, 32767, 0, 10)),
            ("ABS_TILT_X", AxisRange::new(-32768, 32767, 0, 10)),
            ("ABS_TILT_Y", AxisRange::new(-32768, 32767, 0, 10)),
        ],
        buttons: &[
            ("BTN_TR2", "button_options"),
            ("BTN_MODE", "button_ps"),
            ("BTN_TL2", "button_share"),
            ("BTN_B", "button_cross"),
            ("BTN_C", "button_circle"),
            ("BTN_A", "button_square"),
            ("BTN_X", "button_triangle"),
            ("BTN_Y", "button_l1"),
            ("BTN_Z", "button_r1"),
            ("BTN_TL", "button_l2"),
            ("BTN_TR", "button_r2"),
            ("BTN_SELECT", "button_l3"),
            ("BTN_START", "button_r3"),
            ("BTN_THUMBL", "button_trackpad"),
        ],
        hats: DPAD_HATS,
        mouse: &[],
    },
    LayoutSpec {
        name: "xboxdrv",
        description: "Xbox Gamepad (userspace driver)",
        id: (0, 0, 0, 0),
        axes: &[
            ("ABS_X", "left_analog_x"),
            ("ABS_Y", "left_analog_y"),
            ("ABS_RX", "right_analog_x"),
            ("ABS_RY", "right_analog_y"),
            ("ABS_BRAKE", "l2_analog"),
            ("ABS_GAS", "r2_analog"),
        ],
        axis_ranges: &[],
        buttons: XBOX_BUTTONS,
        hats: DPAD_HATS,
        mouse: &[],
    },
    LayoutSpec {
        name: "xpad",
        description: "Microsoft X-Box 360 pad",
        id: (BUS_USB, 1118, 654, 272),
        axes: XPAD_AXES,
        axis_ranges: &[],
        buttons: XBOX_BUTTONS,
        hats: DPAD_HATS,
        mouse: &[],
    },
    LayoutSpec {
        name: "xpad_wireless",
        description: "Xbox 360 Wireless Receiver",
        id: (BUS_USB, 1118, 1817, 256),
        axes: XPAD_AXES,
        axis_ranges: &[],
        buttons: &[
            ("BTN_START", "button_options"),
            ("BTN_MODE", "button_ps"),
            ("BTN_SELECT", "button_share"),
            ("BTN_A", "button_cross"),
            ("BTN_B", "button_circle"),
            ("BTN_X", "button_square"),
            ("BTN_Y", "button_triangle"),
            ("BTN_TL", "button_l1"),
            ("BTN_TR", "button_r1"),
            ("BTN_THUMBL", "button_l3"),
            ("BTN_THUMBR", "button_r3"),
            ("BTN_TRIGGER_HAPPY1", "dpad_left"),
            ("BTN_TRIGGER_HAPPY2", "dpad_right"),
            ("BTN_TRIGGER_HAPPY3", "dpad_up"),
            ("BTN_TRIGGER_HAPPY4", "dpad_down"),
        ],
        hats: &[],
        mouse: &[],
    },
    LayoutSpec {
        name: "mouse",
        description: "DualShock4 Mouse Emulation",
        id: (0, 0, 0, 0),
        axes: &[],
        axis_ranges: &[],
        buttons: &[("BTN_LEFT", "button_trackpad")],
        hats: &[],
        mouse: &[("REL_X", "trackpad_touch0_x"), ("REL_Y", "trackpad_touch0_y")],
    },
];

fn build_builtin(spec: &LayoutSpec) -> Result<Layout, String> {
    let mut layout = Layout::empty(spec.name, spec.description);
    (layout.bus, layout.vendor, layout.product, layout.version) = spec.id;

    for &(code, field) in spec.axes {
        let range = spec
            .axis_ranges
            .iter()
            .find(|(c, _)| *c == code)
            .map(|&(_, range)| range)
            .unwrap_or_default();
        layout.add_axis(code, field, range)?;
    }
    for &(code, field) in spec.buttons {
        layout.add_button(code, field)?;
    }
    for &(code, negative, positive) in spec.hats {
        layout.add_hat(code, negative, positive)?;
    }
    for &(code, field) in spec.mouse {
        layout.add_mouse(code, field)?;
    }

    Ok(layout)
}

/// Build a layout from a `[mappings.<name>]` table
///
/// # Errors
///
/// Returns a message naming the first unknown code, field or option
pub fn parse_custom_layout(
    name: &str,
    mapping: &BTreeMap<String, MappingValue>,
) -> Result<Layout, String> {
    let description = format!("ds4-bridge custom mapping ({})", name);
    let mut layout = Layout::empty(name, &description);

    for (key, value) in mapping {
        let code = key.to_ascii_uppercase();

        if code.starts_with("MOUSE_") {
            let MappingValue::Number(number) = value else {
                return Err(format!("{} must be a number", code));
            };
            match code.as_str() {
                "MOUSE_SENSITIVITY" => layout.mouse_sensitivity = *number,
                "MOUSE_DEADZONE" => layout.mouse_deadzone = *number as i32,
                _ => return Err(format!("Unknown mouse option: {}", code)),
            }
            continue;
        }

        let MappingValue::Field(field) = value else {
            return Err(format!("{} must map to a report field", code));
        };

        if code.starts_with("BTN_") || code.starts_with("KEY_") {
            layout.add_button(&code, field)?;
        } else if code.starts_with("ABS_") {
            layout.add_axis(&code, field, AxisRange::default())?;
        } else if code.starts_with("REL_") {
            layout.add_mouse(&code, field)?;
        } else {
            return Err(format!("Unknown event code: {}", code));
        }
    }

    Ok(layout)
}

/// Built-in and custom layouts by name
#[derive(Debug, Clone)]
pub struct LayoutRegistry {
    layouts: HashMap<String, Arc<Layout>>,
}

impl LayoutRegistry {
    /// Registry of the built-in layouts only
    ///
    /// # Errors
    ///
    /// Returns error if a built-in table names an unknown code
    pub fn builtin() -> Result<Self, DeviceError> {
        let mut layouts = HashMap::new();
        for spec in BUILTIN_LAYOUTS {
            let layout = build_builtin(spec).map_err(DeviceError::UnknownMapping)?;
            layouts.insert(spec.name.to_string(), Arc::new(layout));
        }
        Ok(Self { layouts })
    }

    /// Built-in layouts plus every `[mappings]` table
    ///
    /// # Errors
    ///
    /// Returns error if a mapping table is malformed
    pub fn with_mappings(
        mappings: &BTreeMap<String, BTreeMap<String, MappingValue>>,
    ) -> Result<Self, DeviceError> {
        let mut registry = Self::builtin()?;
        for (name, mapping) in mappings {
            let layout = parse_custom_layout(name, mapping)
                .map_err(|e| DeviceError::UnknownMapping(format!("{}: {}", name, e)))?;
            registry.layouts.insert(name.clone(), Arc::new(layout));
        }
        Ok(registry)
    }

    /// Look up a layout
    ///
    /// # Errors
    ///
    /// `UnknownMapping` when no layout has this name
    pub fn get(&self, name: &str) -> Result<Arc<Layout>, DeviceError> {
        self.layouts
            .get(name)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownMapping(name.to_string()))
    }
}

// Event codes from <linux/input-event-codes.h>

const ABS_CODES: &[(&str, u16)] = &[
    ("ABS_X", 0x00),
    ("ABS_Y", 0x01),
    ("ABS_Z", 0x02),
    ("ABS_RX", 0x03),
    ("ABS_RY", 0x04),
    ("ABS_RZ", 0x05),
    ("ABS_THROTTLE", 0x06),
    ("ABS_RUDDER", 0x07),
    ("ABS_WHEEL", 0x08),
    ("ABS_GAS", 0x09),
    ("ABS_BRAKE", 0x0a),
    ("ABS_HAT0X", 0x10),
    ("ABS_HAT0Y", 0x11),
    ("ABS_HAT1X", 0x12),
    ("ABS_HAT1Y", 0x13),
    ("ABS_HAT2X", 0x14),
    ("ABS_HAT2Y", 0x15),
    ("ABS_HAT3X", 0x16),
    ("ABS_HAT3Y", 0x17),
    ("ABS_PRESSURE", 0x18),
    ("ABS_DISTANCE", 0x19),
    ("ABS_TILT_X", 0x1a),
    ("ABS_TILT_Y", 0x1b),
    ("ABS_TOOL_WIDTH", 0x1c),
    ("ABS_VOLUME", 0x20),
    ("ABS_MISC", 0x28),
];

const REL_CODES: &[(&str, u16)] = &[
    ("REL_X", 0x00),
    ("REL_Y", 0x01),
    ("REL_Z", 0x02),
    ("REL_RX", 0x03),
    ("REL_RY", 0x04),
    ("REL_RZ", 0x05),
    ("REL_HWHEEL", 0x06),
    ("REL_DIAL", 0x07),
    ("REL_WHEEL", 0x08),
    ("REL_MISC", 0x09),
];

const BTN_CODES: &[(&str, u16)] = &[
    ("BTN_LEFT", 0x110),
    ("BTN_RIGHT", 0x111),
    ("BTN_MIDDLE", 0x112),
    ("BTN_SIDE", 0x113),
    ("BTN_EXTRA", 0x114),
    ("BTN_FORWARD", 0x115),
    ("BTN_BACK", 0x116),
    ("BTN_TASK", 0x117),
    ("BTN_TRIGGER", 0x120),
    ("BTN_THUMB", 0x121),
    ("BTN_THUMB2", 0x122),
    ("BTN_TOP", 0x123),
    ("BTN_TOP2", 0x124),
    ("BTN_PINKIE", 0x125),
    ("BTN_BASE", 0x126),
    ("BTN_BASE2", 0x127),
    ("BTN_BASE3", 0x128),
    ("BTN_BASE4", 0x129),
    ("BTN_BASE5", 0x12a),
    ("BTN_BASE6", 0x12b),
    ("BTN_DEAD", 0x12f),
    ("BTN_A", 0x130),
    ("BTN_SOUTH", 0x130),
    ("BTN_B", 0x131),
    ("BTN_EAST", 0x131),
    ("BTN_C", 0x132),
    ("BTN_X", 0x133),
    ("BTN_NORTH", 0x133),
    ("BTN_Y", 0x134),
    ("BTN_WEST", 0x134),
    ("BTN_Z", 0x135),
    ("BTN_TL", 0x136),
    ("BTN_TR", 0x137),
    ("BTN_TL2", 0x138),
    ("BTN_TR2", 0x139),
    ("BTN_SELECT", 0x13a),
    ("BTN_START", 0x13b),
    ("BTN_MODE", 0x13c),
    ("BTN_THUMBL", 0x13d),
    ("BTN_THUMBR", 0x13e),
    ("BTN_DPAD_UP", 0x220),
    ("BTN_DPAD_DOWN", 0x221),
    ("BTN_DPAD_LEFT", 0x222),
    ("BTN_DPAD_RIGHT", 0x223),
];

const KEY_CODES: &[(&str, u16)] = &[
    ("KEY_ESC", 1),
    ("KEY_MINUS", 12),
    ("KEY_EQUAL", 13),
    ("KEY_BACKSPACE", 14),
    ("KEY_TAB", 15),
    ("KEY_LEFTBRACE", 26),
    ("KEY_RIGHTBRACE", 27),
    ("KEY_ENTER", 28),
    ("KEY_LEFTCTRL", 29),
    ("KEY_SEMICOLON", 39),
    ("KEY_APOSTROPHE", 40),
    ("KEY_GRAVE", 41),
    ("KEY_LEFTSHIFT", 42),
    ("KEY_BACKSLASH", 43),
    ("KEY_COMMA", 51),
    ("KEY_DOT", 52),
    ("KEY_SLASH", 53),
    ("KEY_RIGHTSHIFT", 54),
    ("KEY_LEFTALT", 56),
    ("KEY_SPACE", 57),
    ("KEY_CAPSLOCK", 58),
    ("KEY_F11", 87),
    ("KEY_F12", 88),
    ("KEY_RIGHTCTRL", 97),
    ("KEY_RIGHTALT", 100),
    ("KEY_HOME", 102),
    ("KEY_UP", 103),
    ("KEY_PAGEUP", 104),
    ("KEY_LEFT", 105),
    ("KEY_RIGHT", 106),
    ("KEY_END", 107),
    ("KEY_DOWN", 108),
    ("KEY_PAGEDOWN", 109),
    ("KEY_INSERT", 110),
    ("KEY_DELETE", 111),
    ("KEY_MUTE", 113),
    ("KEY_VOLUMEDOWN", 114),
    ("KEY_VOLUMEUP", 115),
    ("KEY_LEFTMETA", 125),
    ("KEY_RIGHTMETA", 126),
];

/// Keyboard rows, each starting at the code of its first key
const KEY_ROWS: &[(&str, u16)] = &[("1234567890", 2), ("QWERTYUIOP", 16), ("ASDFGHJKL", 30), ("ZXCVBNM", 44)];

fn lookup(table: &[(&str, u16)], name: &str) -> Option<u16> {
    table.iter().find(|(n, _)| *n == name).map(|&(_, code)| code)
}

fn key_number(name: &str) -> Option<u16> {
    if let Some(n) = name.strip_prefix("BTN_TRIGGER_HAPPY") {
        let n: u16 = n.parse().ok()?;
        return (1..=40).contains(&n).then(|| 0x2bf + n);
    }
    if let Some(n) = name.strip_prefix("BTN_") {
        let n: u16 = n.parse().ok()?;
        return (n <= 9).then(|| 0x100 + n);
    }

    let key = name.strip_prefix("KEY_")?;
    if let Some(n) = key.strip_prefix('F') {
        if let Ok(n) = n.parse::<u16>() {
            return (1..=10).contains(&n).then(|| 58 + n);
        }
    }

    let mut chars = key.chars();
    let (Some(c), None) = (chars.next(), chars.next()) else {
        return None;
    };
    KEY_ROWS.iter().find_map(|&(row, first)| {
        row.find(c)
            .and_then(|pos| u16::try_from(pos).ok())
            .map(|pos| first + pos)
    })
}

/// Parse a `BTN_*` or `KEY_*` name
pub fn key_code(name: &str) -> Result<Key, String> {
    let name = name.to_ascii_uppercase();
    lookup(BTN_CODES, &name)
        .or_else(|| lookup(KEY_CODES, &name))
        .or_else(|| key_number(&name))
        .map(Key::new)
        .ok_or_else(|| format!("Unknown key code: {}", name))
}

/// Parse an `ABS_*` name
pub fn abs_code(name: &str) -> Result<AbsoluteAxisType, String> {
    let name = name.to_ascii_uppercase();
    lookup(ABS_CODES, &name)
        .map(AbsoluteAxisType)
        .ok_or_else(|| format!("Unknown absolute axis: {}", name))
}

/// Parse a `REL_*` name
pub fn rel_code(name: &str) -> Result<RelativeAxisType, String> {
    let name = name.to_ascii_uppercase();
    lookup(REL_CODES, &name)
        .map(RelativeAxisType)
        .ok_or_else(|| format!("Unknown relative axis: {}", name))
}
