//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! ```toml
//! [driver]
//! hidraw = true
//! bluetooth_addresses = ["1C:66:6D:0A:0B:0C"]
//!
//! [default]
//! led = "0000ff"
//! profiles = ["racing"]
//! profile_toggle = "R1+L1+PS"
//!
//! [profiles.racing]
//! led = "ff0000"
//! emulate = "xpad"
//! bindings = "racing"
//!
//! [bindings.global]
//! "PS+Options" = "exec-background notify-send '$name' 'battery $report.battery'"
//!
//! [mappings.custom]
//! BTN_A = "button_cross"
//! ABS_X = "left_analog_x"
//! ```

use serde::de::Error;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Ds4Error, Result};
use crate::report::fields::{parse_button_list, Button, ButtonCombo};

/// LED color used when a profile does not set one
pub const DEFAULT_LED: (u8, u8, u8) = (0, 0, 255);

/// Built-in joystick layouts selectable through `emulate`
pub const BUILTIN_LAYOUTS: [&str; 4] = ["ds4", "xboxdrv", "xpad", "xpad_wireless"];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub driver: DriverConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// The implicit "default" profile, also used by dynamic sessions
    #[serde(default)]
    pub default: ProfileOptions,

    /// Pinned session slots
    #[serde(default)]
    pub controllers: Vec<ProfileOptions>,

    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileOptions>,

    /// Binding table name -> combo -> command
    #[serde(default)]
    pub bindings: BTreeMap<String, BTreeMap<String, String>>,

    /// Custom layout name -> evdev code name -> report field or mouse option
    #[serde(default)]
    pub mappings: BTreeMap<String, BTreeMap<String, MappingValue>>,
}

/// Device discovery and session management
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DriverConfig {
    #[serde(default = "default_hidraw")]
    pub hidraw: bool,

    #[serde(default)]
    pub bluetooth_addresses: Vec<String>,

    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    /// Maximum concurrently connected controllers, 0 for no limit
    #[serde(default)]
    pub max_devices: usize,

    #[serde(default = "default_dynamic_sessions")]
    pub dynamic_sessions: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write logs to this file
    #[serde(default)]
    pub file: Option<String>,
}

/// Per-profile options delivered to actions on `load-options`
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ProfileOptions {
    /// Hex color, `rrggbb`
    #[serde(default = "default_led")]
    pub led: String,

    #[serde(default)]
    pub battery_flash: bool,

    #[serde(default)]
    pub dump_reports: bool,

    #[serde(default)]
    pub trackpad_mouse: bool,

    /// Skip the rumble and LED animation on connect
    #[serde(default)]
    pub no_splash: bool,

    /// Built-in joystick layout
    #[serde(default = "default_emulate")]
    pub emulate: String,

    /// Custom layout from `[mappings]`, overrides `emulate`
    #[serde(default)]
    pub mapping: Option<String>,

    #[serde(default)]
    pub ignored_buttons: Vec<String>,

    /// Binding table from `[bindings]`
    #[serde(default)]
    pub bindings: Option<String>,

    /// Combo that cycles `profiles`, e.g. `R1+L1+PS`
    #[serde(default)]
    pub profile_toggle: Option<String>,

    #[serde(default)]
    pub profiles: Vec<String>,
}

/// Value in a custom mapping table
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum MappingValue {
    Field(String),
    Number(f64),
}

// Default value functions
fn default_hidraw() -> bool { true }
fn default_scan_interval_ms() -> u64 { 1000 }
fn default_dynamic_sessions() -> bool { true }

fn default_log_level() -> String { "info".to_string() }

fn default_led() -> String { "0000ff".to_string() }
fn default_emulate() -> String { "ds4".to_string() }

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            hidraw: default_hidraw(),
            bluetooth_addresses: Vec::new(),
            scan_interval_ms: default_scan_interval_ms(),
            max_devices: 0,
            dynamic_sessions: default_dynamic_sessions(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            led: default_led(),
            battery_flash: false,
            dump_reports: false,
            trackpad_mouse: false,
            no_splash: false,
            emulate: default_emulate(),
            mapping: None,
            ignored_buttons: Vec::new(),
            bindings: None,
            profile_toggle: None,
            profiles: Vec::new(),
        }
    }
}

/// Parse `rrggbb` (optionally prefixed with `#`)
///
/// # Errors
///
/// Returns a message unless the value is exactly six hex digits
pub fn parse_hex_color(value: &str) -> std::result::Result<(u8, u8, u8), String> {
    let hex = value.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("Invalid color: {}", value));
    }

    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| e.to_string());
    Ok((channel(0)?, channel(2)?, channel(4)?))
}

impl ProfileOptions {
    /// LED color, falling back to blue for unparsable values
    pub fn led_color(&self) -> (u8, u8, u8) {
        parse_hex_color(&self.led).unwrap_or(DEFAULT_LED)
    }

    /// Layout name for the virtual joystick
    pub fn layout_name(&self) -> &str {
        self.mapping.as_deref().unwrap_or(&self.emulate)
    }

    /// Buttons never forwarded to the virtual joystick
    pub fn ignored(&self) -> Vec<Button> {
        self.ignored_buttons
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect()
    }

    pub fn toggle_combo(&self) -> Option<ButtonCombo> {
        self.profile_toggle.as_deref().and_then(|combo| combo.parse().ok())
    }

    fn validate(&self, context: &str, config: &Config) -> Result<()> {
        let invalid = |msg: String| {
            Ds4Error::Config(toml::de::Error::custom(format!("{}: {}", context, msg)))
        };

        parse_hex_color(&self.led).map_err(invalid)?;

        if !BUILTIN_LAYOUTS.contains(&self.emulate.as_str()) {
            return Err(invalid(format!(
                "emulate must be one of: {}",
                BUILTIN_LAYOUTS.join(", ")
            )));
        }

        if let Some(mapping) = &self.mapping {
            if !config.mappings.contains_key(mapping) {
                return Err(invalid(format!("unknown mapping '{}'", mapping)));
            }
        }

        for name in &self.ignored_buttons {
            name.parse::<Button>().map_err(invalid)?;
        }

        if let Some(bindings) = &self.bindings {
            if !config.bindings.contains_key(bindings) {
                return Err(invalid(format!("unknown bindings '{}'", bindings)));
            }
        }

        if let Some(toggle) = &self.profile_toggle {
            toggle.parse::<ButtonCombo>().map_err(invalid)?;
        }

        for profile in &self.profiles {
            if profile != "default" && !config.profiles.contains_key(profile) {
                return Err(invalid(format!("unknown profile '{}'", profile)));
            }
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ds4_bridge::config::Config;
    ///
    /// let config = Config::load("/etc/ds4-bridge.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Options of a named profile; "default" is always defined
    pub fn profile(&self, name: &str) -> Option<&ProfileOptions> {
        match name {
            "default" => Some(&self.default),
            _ => self.profiles.get(name),
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any value is malformed or references an undefined table
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Ds4Error::Config(toml::de::Error::custom(msg));

        if self.driver.scan_interval_ms == 0 || self.driver.scan_interval_ms > 60000 {
            return Err(invalid("scan_interval_ms must be between 1 and 60000".to_string()));
        }

        for address in &self.driver.bluetooth_addresses {
            crate::device::bluetooth::parse_address(address)
                .map_err(|e| invalid(e.to_string()))?;
        }

        self.default.validate("default", self)?;
        for (index, controller) in self.controllers.iter().enumerate() {
            controller.validate(&format!("controllers[{}]", index), self)?;
        }
        for (name, profile) in &self.profiles {
            profile.validate(&format!("profiles.{}", name), self)?;
        }

        for (table, bindings) in &self.bindings {
            for combo in bindings.keys() {
                combo
                    .parse::<ButtonCombo>()
                    .map_err(|e| invalid(format!("bindings.{}: {}", table, e)))?;
            }
        }

        for (name, mapping) in &self.mappings {
            crate::output::layout::parse_custom_layout(name, mapping)
                .map_err(|e| invalid(format!("mappings.{}: {}", name, e)))?;
        }

        Ok(())
    }
}

/// Parse a comma separated ignore list, as accepted on the command line
///
/// # Errors
///
/// Returns the first unknown button name
pub fn parse_ignored_buttons(value: &str) -> std::result::Result<Vec<String>, String> {
    let buttons = parse_button_list(value, ',')?;
    Ok(buttons.iter().map(|b| b.field_name().to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default.led_color(), DEFAULT_LED);
        assert_eq!(config.default.layout_name(), "ds4");
        assert!(config.driver.hidraw);
        assert_eq!(config.driver.scan_interval_ms, 1000);
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("ff8000"), Ok((255, 128, 0)));
        assert_eq!(parse_hex_color("#0000FF"), Ok((0, 0, 255)));
        assert!(parse_hex_color("ff80").is_err());
        assert!(parse_hex_color("gg0000").is_err());
    }

    #[test]
    fn test_invalid_led() {
        let result = Config::from_toml("[default]\nled = \"blue\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_ignored_button() {
        let result = Config::from_toml("[default]\nignored_buttons = [\"ps\", \"start\"]\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_references() {
        assert!(Config::from_toml("[default]\nprofiles = [\"missing\"]\n").is_err());
        assert!(Config::from_toml("[default]\nbindings = \"missing\"\n").is_err());
        assert!(Config::from_toml("[default]\nmapping = \"missing\"\n").is_err());
        assert!(Config::from_toml("[default]\nemulate = \"gamecube\"\n").is_err());
    }

    #[test]
    fn test_invalid_binding_combo() {
        let toml = "[bindings.global]\n\"L1+Start\" = \"next-profile\"\n";
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_invalid_driver_values() {
        assert!(Config::from_toml("[driver]\nscan_interval_ms = 0\n").is_err());
        assert!(Config::from_toml("[driver]\nbluetooth_addresses = [\"nope\"]\n").is_err());
    }

    #[test]
    fn test_ignored_and_toggle_helpers() {
        let options = ProfileOptions {
            ignored_buttons: vec!["PS".to_string(), "share".to_string()],
            profile_toggle: Some("R1+L1+PS".to_string()),
            ..ProfileOptions::default()
        };
        assert_eq!(options.ignored(), vec![Button::Ps, Button::Share]);
        assert_eq!(options.toggle_combo().unwrap().len(), 3);
    }

    #[test]
    fn test_parse_ignored_buttons() {
        assert_eq!(
            parse_ignored_buttons("PS,share").unwrap(),
            vec!["button_ps".to_string(), "button_share".to_string()]
        );
        assert!(parse_ignored_buttons("PS,start").is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[driver]
hidraw = false
bluetooth_addresses = ["1c:66:6d:0a:0b:0c"]
max_devices = 2

[logging]
level = "debug"

[default]
led = "00ff00"
profiles = ["racing", "mouse"]
profile_toggle = "R1+L1+PS"
bindings = "desktop"

[[controllers]]
led = "ff0000"

[profiles.racing]
emulate = "xpad"
ignored_buttons = ["PS"]

[profiles.mouse]
mapping = "pointer"
trackpad_mouse = true

[bindings.global]
"PS+Options" = "next-profile"

[bindings.desktop]
"PS+Up" = "exec-background xdotool key super"

[mappings.pointer]
BTN_LEFT = "button_trackpad"
REL_X = "right_analog_x"
REL_Y = "right_analog_y"
MOUSE_SENSITIVITY = 0.6
MOUSE_DEADZONE = 10
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert!(!config.driver.hidraw);
        assert_eq!(config.driver.max_devices, 2);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.default.led_color(), (0, 255, 0));
        assert_eq!(config.controllers.len(), 1);
        assert_eq!(config.controllers[0].led_color(), (255, 0, 0));
        assert_eq!(config.profile("racing").unwrap().layout_name(), "xpad");
        assert_eq!(config.profile("mouse").unwrap().layout_name(), "pointer");
        assert!(config.profile("default").is_some());
        assert!(config.profile("missing").is_none());
        assert_eq!(
            config.mappings["pointer"]["MOUSE_DEADZONE"],
            MappingValue::Number(10.0)
        );
    }
}
