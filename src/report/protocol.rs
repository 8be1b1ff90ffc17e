//! # DS4 Protocol Constants and Types
//!
//! Wire constants, framing descriptions and the decoded [`Report`] /
//! [`ControlFrame`] structures shared by both transports.

use serde::Serialize;
use std::fmt;

/// USB input report size
pub const USB_REPORT_SIZE: usize = 64;

/// USB input report id (offset 0)
pub const USB_REPORT_ID: u8 = 0x01;

/// Bluetooth input report size as received on the L2CAP interrupt channel
pub const BT_REPORT_SIZE: usize = 79;

/// Bluetooth input report size as delivered by the hidraw driver
pub const HIDRAW_BT_REPORT_SIZE: usize = 78;

/// Bluetooth input report id
pub const BT_REPORT_ID: u8 = 0x11;

/// USB output report id
pub const USB_CONTROL_REPORT_ID: u8 = 0x05;

/// USB output payload size, excluding the report id
pub const USB_CONTROL_SIZE: usize = 31;

/// Bluetooth output report id
pub const BT_CONTROL_REPORT_ID: u8 = 0x11;

/// Bluetooth output payload size, excluding the report id
pub const BT_CONTROL_SIZE: usize = 77;

/// HIDP transaction header: SET_REPORT (0x50) | output report type (0x02)
pub const HIDP_SET_REPORT_OUTPUT: u8 = 0x52;

/// Battery level reported when fully charged on battery power
pub const BATTERY_MAX: u8 = 8;

/// Battery level reported when fully charged while on USB power
pub const BATTERY_MAX_CHARGING: u8 = 11;

/// Battery level under which the LED starts flashing
pub const BATTERY_WARNING: u8 = 2;

/// Physical connection kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Bluetooth,
    Usb,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Bluetooth => write!(f, "bluetooth"),
            TransportKind::Usb => write!(f, "usb"),
        }
    }
}

/// Input report framing for one transport
///
/// `trim` leading bytes are cut off before the common report layout begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    /// Expected read size
    pub size: usize,

    /// Position of the report id byte in the raw buffer
    pub id_offset: usize,

    /// Expected report id
    pub report_id: u8,

    /// Number of leading framing bytes
    pub trim: usize,
}

impl Framing {
    /// Raw L2CAP interrupt channel: HIDP header, report id, two flag bytes
    pub const L2CAP: Framing = Framing {
        size: BT_REPORT_SIZE,
        id_offset: 1,
        report_id: BT_REPORT_ID,
        trim: 3,
    };

    /// Bluetooth through the kernel hidraw driver (HIDP header already stripped)
    pub const HIDRAW_BLUETOOTH: Framing = Framing {
        size: HIDRAW_BT_REPORT_SIZE,
        id_offset: 0,
        report_id: BT_REPORT_ID,
        trim: 2,
    };

    /// USB hidraw
    pub const USB: Framing = Framing {
        size: USB_REPORT_SIZE,
        id_offset: 0,
        report_id: USB_REPORT_ID,
        trim: 0,
    };

    /// Default framing for a transport kind
    #[must_use]
    pub const fn for_kind(kind: TransportKind) -> Framing {
        match kind {
            TransportKind::Bluetooth => Framing::L2CAP,
            TransportKind::Usb => Framing::USB,
        }
    }
}

/// One trackpad contact
///
/// `x` and `y` are only meaningful while `active` is true.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TouchPoint {
    /// 7-bit tracking id, increments per new contact
    pub id: u8,

    /// Finger currently on the pad
    pub active: bool,

    /// 12-bit horizontal position
    pub x: u16,

    /// 12-bit vertical position
    pub y: u16,
}

/// One decoded sample of the full controller state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub left_analog_x: u8,
    pub left_analog_y: u8,
    pub right_analog_x: u8,
    pub right_analog_y: u8,
    pub l2_analog: u8,
    pub r2_analog: u8,

    pub dpad_up: bool,
    pub dpad_down: bool,
    pub dpad_left: bool,
    pub dpad_right: bool,

    pub button_cross: bool,
    pub button_circle: bool,
    pub button_square: bool,
    pub button_triangle: bool,
    pub button_l1: bool,
    pub button_l2: bool,
    pub button_l3: bool,
    pub button_r1: bool,
    pub button_r2: bool,
    pub button_r3: bool,
    pub button_share: bool,
    pub button_options: bool,
    pub button_trackpad: bool,
    pub button_ps: bool,

    pub motion_x: i32,
    pub motion_y: i32,
    pub motion_z: i32,

    /// Negated relative to the raw reading
    pub orientation_roll: i32,
    pub orientation_yaw: i32,
    pub orientation_pitch: i32,

    pub trackpad_touch: [TouchPoint; 2],

    /// 6-bit wrapping counter
    pub timestamp: u8,

    /// 4-bit battery level, see [`BATTERY_MAX`] and [`BATTERY_MAX_CHARGING`]
    pub battery: u8,

    pub plug_usb: bool,
    pub plug_audio: bool,
    pub plug_mic: bool,
}

/// Desired LED and rumble state of one device
///
/// Flash durations are in units of roughly 1/102 s (255 is about 2.5 s).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlFrame {
    pub led_red: u8,
    pub led_green: u8,
    pub led_blue: u8,
    pub flash_on: u8,
    pub flash_off: u8,
    pub rumble_strong: u8,
    pub rumble_weak: u8,
}

impl ControlFrame {
    /// Frame with only the LED color set
    #[must_use]
    pub fn with_led(red: u8, green: u8, blue: u8) -> Self {
        Self {
            led_red: red,
            led_green: green,
            led_blue: blue,
            ..Self::default()
        }
    }

    /// Current LED color as `(r, g, b)`
    #[must_use]
    pub fn led(&self) -> (u8, u8, u8) {
        (self.led_red, self.led_green, self.led_blue)
    }
}
