//! Named option sets and the cycle a profile toggle walks through

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{Config, ProfileOptions};

/// Name of the controller's own options
pub const DEFAULT_PROFILE: &str = "default";

/// Outcome of [`ProfileSet::select`]
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Already current, nothing to reload
    Unchanged,

    /// Became current; carries its options
    Switched(Arc<ProfileOptions>),

    /// No profile with that name
    Unknown,
}

/// Profiles known to one session plus the current one
#[derive(Debug, Clone)]
pub struct ProfileSet {
    profiles: BTreeMap<String, Arc<ProfileOptions>>,

    /// Order of next/prev switching, always includes the default profile
    cycle: Vec<String>,

    current: String,
}

impl ProfileSet {
    /// Profiles for a controller whose own options are `default`
    ///
    /// Cycle entries without a `[profiles.<name>]` table are dropped.
    pub fn new(default: &ProfileOptions, config: &Config) -> Self {
        let mut profiles: BTreeMap<String, Arc<ProfileOptions>> = config
            .profiles
            .iter()
            .map(|(name, options)| (name.clone(), Arc::new(options.clone())))
            .collect();
        profiles.insert(DEFAULT_PROFILE.to_string(), Arc::new(default.clone()));

        let mut cycle: Vec<String> = default
            .profiles
            .iter()
            .filter(|name| profiles.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !cycle.iter().any(|name| name == DEFAULT_PROFILE) {
            cycle.push(DEFAULT_PROFILE.to_string());
        }

        Self {
            profiles,
            cycle,
            current: DEFAULT_PROFILE.to_string(),
        }
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn current_options(&self) -> Arc<ProfileOptions> {
        self.profiles
            .get(&self.current)
            .or_else(|| self.profiles.get(DEFAULT_PROFILE))
            .cloned()
            .unwrap_or_default()
    }

    pub fn cycle(&self) -> &[String] {
        &self.cycle
    }

    /// True when a toggle has somewhere to go
    pub fn has_toggle(&self) -> bool {
        self.cycle.len() > 1
    }

    /// Make `name` current
    pub fn select(&mut self, name: &str) -> Selection {
        if name == self.current {
            return Selection::Unchanged;
        }
        match self.profiles.get(name) {
            Some(options) => {
                let options = options.clone();
                self.current = name.to_string();
                Selection::Switched(options)
            }
            None => Selection::Unknown,
        }
    }

    /// Profile after the current one, wrapping around
    pub fn next(&self) -> &str {
        match self.position() {
            Some(i) => &self.cycle[(i + 1) % self.cycle.len()],
            None => self.cycle.first().map_or(DEFAULT_PROFILE, String::as_str),
        }
    }

    /// Profile before the current one, wrapping around
    pub fn prev(&self) -> &str {
        match self.position() {
            Some(i) => &self.cycle[(i + self.cycle.len() - 1) % self.cycle.len()],
            None => self.cycle.last().map_or(DEFAULT_PROFILE, String::as_str),
        }
    }

    fn position(&self) -> Option<usize> {
        self.cycle.iter().position(|name| *name == self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> (ProfileOptions, Config) {
        let config = Config::from_toml(
            r#"
            [default]
            profiles = ["a", "b"]
            profile_toggle = "R1+L1+PS"

            [profiles.a]
            led = "ff0000"

            [profiles.b]
            led = "00ff00"

            [profiles.c]
            led = "ffffff"
            "#,
        )
        .unwrap();
        (config.default.clone(), config)
    }

    #[test]
    fn test_cycle_appends_default() {
        let (default, config) = config();
        let set = ProfileSet::new(&default, &config);
        assert_eq!(set.cycle(), &["a", "b", "default"]);
        assert!(set.has_toggle());
        assert_eq!(set.current(), DEFAULT_PROFILE);
    }

    #[test]
    fn test_next_wraps_around() {
        let (default, config) = config();
        let mut set = ProfileSet::new(&default, &config);

        let mut visited = Vec::new();
        for _ in 0..4 {
            let next = set.next().to_string();
            assert!(matches!(set.select(&next), Selection::Switched(_)));
            visited.push(next);
        }
        assert_eq!(visited, vec!["a", "b", "default", "a"]);
    }

    #[test]
    fn test_prev_wraps_around() {
        let (default, config) = config();
        let mut set = ProfileSet::new(&default, &config);
        assert_eq!(set.prev(), "b");
        set.select("a");
        assert_eq!(set.prev(), "default");
    }

    #[test]
    fn test_select() {
        let (default, config) = config();
        let mut set = ProfileSet::new(&default, &config);

        assert_eq!(set.select("default"), Selection::Unchanged);
        assert_eq!(set.select("missing"), Selection::Unknown);
        assert_eq!(set.current(), DEFAULT_PROFILE);

        match set.select("c") {
            Selection::Switched(options) => assert_eq!(options.led_color(), (255, 255, 255)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(set.current_options().led, "ffffff");

        // Outside the cycle: next starts over, prev goes to the end
        assert_eq!(set.next(), "a");
        assert_eq!(set.prev(), "default");
    }

    #[test]
    fn test_single_profile_has_no_toggle() {
        let config = Config::default();
        let set = ProfileSet::new(&config.default, &config);
        assert_eq!(set.cycle(), &["default"]);
        assert!(!set.has_toggle());
        assert_eq!(set.next(), "default");
    }
}
