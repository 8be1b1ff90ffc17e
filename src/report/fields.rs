//! # Report Field Names
//!
//! Typed names for the boolean buttons and numeric axes of a [`Report`],
//! parsed from the names used in configuration files.

use std::fmt;
use std::str::FromStr;

use super::protocol::Report;

/// A boolean field of [`Report`]: fourteen buttons and four d-pad directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Button {
    Cross,
    Circle,
    Square,
    Triangle,
    L1,
    L2,
    L3,
    R1,
    R2,
    R3,
    Share,
    Options,
    Trackpad,
    Ps,
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
}

impl Button {
    /// All buttons in report order
    pub const ALL: [Button; 18] = [
        Button::Cross,
        Button::Circle,
        Button::Square,
        Button::Triangle,
        Button::L1,
        Button::L2,
        Button::L3,
        Button::R1,
        Button::R2,
        Button::R3,
        Button::Share,
        Button::Options,
        Button::Trackpad,
        Button::Ps,
        Button::DpadUp,
        Button::DpadDown,
        Button::DpadLeft,
        Button::DpadRight,
    ];

    /// Report field name, e.g. `button_cross` or `dpad_up`
    #[must_use]
    pub fn field_name(self) -> &'static str {
        match self {
            Button::Cross => "button_cross",
            Button::Circle => "button_circle",
            Button::Square => "button_square",
            Button::Triangle => "button_triangle",
            Button::L1 => "button_l1",
            Button::L2 => "button_l2",
            Button::L3 => "button_l3",
            Button::R1 => "button_r1",
            Button::R2 => "button_r2",
            Button::R3 => "button_r3",
            Button::Share => "button_share",
            Button::Options => "button_options",
            Button::Trackpad => "button_trackpad",
            Button::Ps => "button_ps",
            Button::DpadUp => "dpad_up",
            Button::DpadDown => "dpad_down",
            Button::DpadLeft => "dpad_left",
            Button::DpadRight => "dpad_right",
        }
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

impl FromStr for Button {
    type Err = String;

    /// Accepts short names (`cross`, `ps`, `up`) and full field names
    /// (`button_cross`, `dpad_up`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        let short = name
            .strip_prefix("button_")
            .or_else(|| name.strip_prefix("dpad_"))
            .unwrap_or(&name);

        let button = match short {
            "cross" => Button::Cross,
            "circle" => Button::Circle,
            "square" => Button::Square,
            "triangle" => Button::Triangle,
            "l1" => Button::L1,
            "l2" => Button::L2,
            "l3" => Button::L3,
            "r1" => Button::R1,
            "r2" => Button::R2,
            "r3" => Button::R3,
            "share" => Button::Share,
            "options" => Button::Options,
            "trackpad" => Button::Trackpad,
            "ps" => Button::Ps,
            "up" => Button::DpadUp,
            "down" => Button::DpadDown,
            "left" => Button::DpadLeft,
            "right" => Button::DpadRight,
            _ => return Err(format!("Invalid button: {}", s.trim())),
        };

        Ok(button)
    }
}

/// A numeric field of [`Report`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    LeftAnalogX,
    LeftAnalogY,
    RightAnalogX,
    RightAnalogY,
    L2Analog,
    R2Analog,
    MotionX,
    MotionY,
    MotionZ,
    OrientationRoll,
    OrientationYaw,
    OrientationPitch,
    Touch0X,
    Touch0Y,
    Touch1X,
    Touch1Y,
}

impl Axis {
    /// Index into [`Report::trackpad_touch`] for touch coordinates
    #[must_use]
    pub fn touch_index(self) -> Option<usize> {
        match self {
            Axis::Touch0X | Axis::Touch0Y => Some(0),
            Axis::Touch1X | Axis::Touch1Y => Some(1),
            _ => None,
        }
    }

    /// Analog sticks and triggers centered around 128
    #[must_use]
    pub fn is_analog(self) -> bool {
        matches!(
            self,
            Axis::LeftAnalogX
                | Axis::LeftAnalogY
                | Axis::RightAnalogX
                | Axis::RightAnalogY
                | Axis::L2Analog
                | Axis::R2Analog
        )
    }
}

impl FromStr for Axis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let axis = match s.trim().to_ascii_lowercase().as_str() {
            "left_analog_x" => Axis::LeftAnalogX,
            "left_analog_y" => Axis::LeftAnalogY,
            "right_analog_x" => Axis::RightAnalogX,
            "right_analog_y" => Axis::RightAnalogY,
            "l2_analog" => Axis::L2Analog,
            "r2_analog" => Axis::R2Analog,
            "motion_x" => Axis::MotionX,
            "motion_y" => Axis::MotionY,
            "motion_z" => Axis::MotionZ,
            "orientation_roll" => Axis::OrientationRoll,
            "orientation_yaw" => Axis::OrientationYaw,
            "orientation_pitch" => Axis::OrientationPitch,
            "trackpad_touch0_x" => Axis::Touch0X,
            "trackpad_touch0_y" => Axis::Touch0Y,
            "trackpad_touch1_x" => Axis::Touch1X,
            "trackpad_touch1_y" => Axis::Touch1Y,
            _ => return Err(format!("Invalid axis: {}", s.trim())),
        };

        Ok(axis)
    }
}

/// Modifier buttons that must be held plus a trigger button that is edge-detected
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ButtonCombo {
    modifiers: Vec<Button>,
    trigger: Button,
}

impl ButtonCombo {
    /// Combo from an ordered button list; the last entry is the trigger
    ///
    /// Returns `None` for an empty list.
    #[must_use]
    pub fn new(mut buttons: Vec<Button>) -> Option<Self> {
        let trigger = buttons.pop()?;
        Some(Self {
            modifiers: buttons,
            trigger,
        })
    }

    pub fn modifiers(&self) -> &[Button] {
        &self.modifiers
    }

    pub fn trigger(&self) -> Button {
        self.trigger
    }

    /// Number of buttons including the trigger
    pub fn len(&self) -> usize {
        self.modifiers.len() + 1
    }

    /// Always false, a combo holds at least its trigger
    pub fn is_empty(&self) -> bool {
        false
    }

    /// True when every modifier is held in `report`
    #[must_use]
    pub fn modifiers_held(&self, report: &Report) -> bool {
        self.modifiers.iter().all(|&b| report.button(b))
    }
}

impl FromStr for ButtonCombo {
    type Err = String;

    /// Parses `"R1+L1+PS"` style combos
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let buttons = parse_button_list(s, '+')?;
        ButtonCombo::new(buttons).ok_or_else(|| "Empty button combo".to_string())
    }
}

/// Splits `s` on `sep` and parses every entry as a [`Button`]
///
/// # Errors
///
/// Returns the first entry that is not a known button name.
pub fn parse_button_list(s: &str, sep: char) -> Result<Vec<Button>, String> {
    s.split(sep)
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect()
}

impl Report {
    /// Value of a boolean field
    #[must_use]
    pub fn button(&self, button: Button) -> bool {
        match button {
            Button::Cross => self.button_cross,
            Button::Circle => self.button_circle,
            Button::Square => self.button_square,
            Button::Triangle => self.button_triangle,
            Button::L1 => self.button_l1,
            Button::L2 => self.button_l2,
            Button::L3 => self.button_l3,
            Button::R1 => self.button_r1,
            Button::R2 => self.button_r2,
            Button::R3 => self.button_r3,
            Button::Share => self.button_share,
            Button::Options => self.button_options,
            Button::Trackpad => self.button_trackpad,
            Button::Ps => self.button_ps,
            Button::DpadUp => self.dpad_up,
            Button::DpadDown => self.dpad_down,
            Button::DpadLeft => self.dpad_left,
            Button::DpadRight => self.dpad_right,
        }
    }

    /// Value of a numeric field
    #[must_use]
    pub fn axis(&self, axis: Axis) -> i32 {
        match axis {
            Axis::LeftAnalogX => i32::from(self.left_analog_x),
            Axis::LeftAnalogY => i32::from(self.left_analog_y),
            Axis::RightAnalogX => i32::from(self.right_analog_x),
            Axis::RightAnalogY => i32::from(self.right_analog_y),
            Axis::L2Analog => i32::from(self.l2_analog),
            Axis::R2Analog => i32::from(self.r2_analog),
            Axis::MotionX => self.motion_x,
            Axis::MotionY => self.motion_y,
            Axis::MotionZ => self.motion_z,
            Axis::OrientationRoll => self.orientation_roll,
            Axis::OrientationYaw => self.orientation_yaw,
            Axis::OrientationPitch => self.orientation_pitch,
            Axis::Touch0X => i32::from(self.trackpad_touch[0].x),
            Axis::Touch0Y => i32::from(self.trackpad_touch[0].y),
            Axis::Touch1X => i32::from(self.trackpad_touch[1].x),
            Axis::Touch1Y => i32::from(self.trackpad_touch[1].y),
        }
    }

    /// Looks up a field by its report name for `$report.<field>` substitution
    #[must_use]
    pub fn field_value(&self, name: &str) -> Option<String> {
        if let Ok(button) = name.parse::<Button>() {
            if name.starts_with("button_") || name.starts_with("dpad_") {
                return Some(self.button(button).to_string());
            }
        }
        if let Ok(axis) = name.parse::<Axis>() {
            return Some(self.axis(axis).to_string());
        }

        let value = match name {
            "battery" => self.battery.to_string(),
            "timestamp" => self.timestamp.to_string(),
            "plug_usb" => self.plug_usb.to_string(),
            "plug_audio" => self.plug_audio.to_string(),
            "plug_mic" => self.plug_mic.to_string(),
            _ => return None,
        };
        Some(value)
    }
}
