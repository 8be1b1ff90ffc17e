//! Button combo bindings
//!
//! A binding becomes active when its modifiers are held and its trigger is
//! pressed, and fires once when the trigger is released. Binding commands
//! are a verb plus arguments:
//!
//! | Verb | Arguments | Effect |
//! |------|-----------|--------|
//! | `exec` | command, args | runs a process, logs a non-zero exit |
//! | `exec-background` | command, args | runs a process with null stdio |
//! | `next-profile` | | switches to the next profile |
//! | `prev-profile` | | switches to the previous profile |
//! | `load-profile` | name | switches to the named profile |
//!
//! `$name`, `$profile`, `$device_addr` and `$report.<field>` are replaced
//! before the command is split. Unknown variables become `None`.

use std::collections::{BTreeMap, HashSet};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Action, ActionContext, SessionCommand, REPORT_EVENTS};
use crate::config::ProfileOptions;
use crate::error::ActionError;
use crate::event_loop::EventKind;
use crate::report::fields::ButtonCombo;
use crate::report::protocol::Report;

/// Name of the bindings table applied to every profile
pub const GLOBAL_BINDINGS: &str = "global";

/// What a binding does when it fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingTarget {
    /// A command line, substituted and parsed on every release
    Command(String),

    /// The profile toggle combo
    NextProfile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub combo: ButtonCombo,
    pub target: BindingTarget,
}

/// A parsed binding command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingCommand {
    Exec(Vec<String>),
    ExecBackground(Vec<String>),
    NextProfile,
    PrevProfile,
    LoadProfile(String),
}

/// Values available to `$variable` substitution
pub struct Variables<'a> {
    pub name: Option<&'a str>,
    pub profile: &'a str,
    pub device_addr: Option<&'a str>,
    pub report: &'a Report,
}

impl Variables<'_> {
    fn lookup(&self, var: &str, attr: Option<&str>) -> Option<String> {
        match (var, attr) {
            ("name", None) => self.name.map(str::to_string),
            ("profile", None) => Some(self.profile.to_string()),
            ("device_addr", None) => self.device_addr.map(str::to_string),
            ("report", Some(field)) => self.report.field_value(field),
            ("report", None) => serde_json::to_string(self.report).ok(),
            _ => None,
        }
    }
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Length of the leading `\w+` run of `s` in bytes
fn word_len(s: &str) -> usize {
    s.find(|c: char| !is_word(c)).unwrap_or(s.len())
}

/// Replaces `$var` and `$var.attr` occurrences in `template`
pub fn substitute(template: &str, vars: &Variables<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let var_len = word_len(after);
        if var_len == 0 {
            out.push('$');
            rest = after;
            continue;
        }
        let var = &after[..var_len];
        let mut consumed = var_len;

        let mut attr = None;
        if let Some(tail) = after[var_len..].strip_prefix('.') {
            let attr_len = word_len(tail);
            if attr_len > 0 {
                attr = Some(&tail[..attr_len]);
                consumed += 1 + attr_len;
            }
        }

        let value = vars.lookup(var, attr);
        out.push_str(value.as_deref().unwrap_or("None"));
        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}

/// Splits a command line into words, honoring quotes and backslash escapes
///
/// # Errors
///
/// Returns [`ActionError::BadCommand`] for an unterminated quote or a
/// trailing backslash.
pub fn split_command(line: &str) -> Result<Vec<String>, ActionError> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => return Err(ActionError::BadCommand("unterminated quote".to_string())),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$')) => word.push(c),
                            Some(c) => {
                                word.push('\\');
                                word.push(c);
                            }
                            None => return Err(ActionError::BadCommand("unterminated quote".to_string())),
                        },
                        Some(c) => word.push(c),
                        None => return Err(ActionError::BadCommand("unterminated quote".to_string())),
                    }
                }
            }
            '\\' => match chars.next() {
                Some(c) => {
                    in_word = true;
                    word.push(c);
                }
                None => return Err(ActionError::BadCommand("trailing backslash".to_string())),
            },
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }

    if in_word {
        words.push(word);
    }
    Ok(words)
}

/// Parses a substituted command line
///
/// # Errors
///
/// Fails on empty lines, unknown verbs and missing arguments.
pub fn parse_command(line: &str) -> Result<BindingCommand, ActionError> {
    let mut words = split_command(line)?.into_iter();
    let verb = words.next().ok_or(ActionError::EmptyCommand)?;
    let args: Vec<String> = words.collect();

    let command = match verb.as_str() {
        "exec" if args.is_empty() => return Err(ActionError::MissingArgument("exec")),
        "exec" => BindingCommand::Exec(args),
        "exec-background" if args.is_empty() => return Err(ActionError::MissingArgument("exec-background")),
        "exec-background" => BindingCommand::ExecBackground(args),
        "next-profile" => BindingCommand::NextProfile,
        "prev-profile" => BindingCommand::PrevProfile,
        "load-profile" => match args.into_iter().next() {
            Some(profile) => BindingCommand::LoadProfile(profile),
            None => return Err(ActionError::MissingArgument("load-profile")),
        },
        _ => return Err(ActionError::UnknownVerb(verb)),
    };
    Ok(command)
}

fn spawn(argv: &[String], background: bool) -> Result<Child, ActionError> {
    let (program, args) = argv.split_first().ok_or(ActionError::EmptyCommand)?;
    let mut command = Command::new(program);
    command.args(args);
    if background {
        command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
    }
    command.spawn().map_err(ActionError::Spawn)
}

/// Wait for `child` off the loop thread so a slow command never stalls reports
///
/// A failed exit is an error for foreground commands and a debug line for
/// background ones.
fn reap(mut child: Child, program: String, background: bool) -> JoinHandle<()> {
    std::thread::spawn(move || match child.wait() {
        Ok(status) if !status.success() => {
            if background {
                debug!("{} exited with {}", program, status);
            } else {
                error!("Failed to execute process: {} exited with {}", program, status);
            }
        }
        Ok(_) => {}
        Err(e) => error!("Failed to execute process: {}", e),
    })
}

/// Runs `command`, turning profile verbs into session requests
pub fn execute(command: BindingCommand, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
    match command {
        BindingCommand::Exec(argv) => {
            info!("Executing: {}", argv.join(" "));
            let child = spawn(&argv, false)?;
            reap(child, argv[0].clone(), false);
        }
        BindingCommand::ExecBackground(argv) => {
            info!("Executing in the background: {}", argv.join(" "));
            let child = spawn(&argv, true)?;
            reap(child, argv[0].clone(), true);
        }
        BindingCommand::NextProfile => ctx.request(SessionCommand::NextProfile),
        BindingCommand::PrevProfile => ctx.request(SessionCommand::PrevProfile),
        BindingCommand::LoadProfile(name) => ctx.request(SessionCommand::LoadProfile(name)),
    }
    Ok(())
}

pub struct BindingAction {
    /// Every `[bindings.<name>]` table of the configuration
    tables: Arc<BTreeMap<String, BTreeMap<String, String>>>,

    /// Added to every profile's bindings when set
    toggle: Option<ButtonCombo>,

    bindings: Vec<Binding>,

    /// Indices into `bindings` whose combo is currently held
    active: HashSet<usize>,
}

impl BindingAction {
    pub fn new(tables: Arc<BTreeMap<String, BTreeMap<String, String>>>, toggle: Option<ButtonCombo>) -> Self {
        Self {
            tables,
            toggle,
            bindings: Vec::new(),
            active: HashSet::new(),
        }
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    fn add_table(&mut self, name: &str) {
        let Some(table) = self.tables.get(name) else {
            return;
        };
        for (combo, command) in table {
            match combo.parse::<ButtonCombo>() {
                Ok(combo) => self.bindings.push(Binding {
                    combo,
                    target: BindingTarget::Command(command.clone()),
                }),
                Err(e) => warn!("Ignoring binding {}: {}", combo, e),
            }
        }
    }

    fn fire(&self, binding: &Binding, report: &Report, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        let template = match &binding.target {
            BindingTarget::NextProfile => {
                ctx.request(SessionCommand::NextProfile);
                return Ok(());
            }
            BindingTarget::Command(template) => template,
        };

        let line = {
            let info = ctx.device.as_deref().map(|d| d.info());
            let vars = Variables {
                name: info.map(|i| i.name.as_str()),
                profile: &ctx.session.profile,
                device_addr: info.map(|i| i.address.as_str()),
                report,
            };
            substitute(template, &vars)
        };

        let command = parse_command(&line)?;
        execute(command, ctx)
    }
}

impl Action for BindingAction {
    fn name(&self) -> &'static str {
        "binding"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        REPORT_EVENTS
    }

    fn load_options(&mut self, options: &ProfileOptions, _ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        self.active.clear();
        self.bindings.clear();

        self.add_table(GLOBAL_BINDINGS);
        if let Some(name) = &options.bindings {
            self.add_table(name);
        }
        if let Some(combo) = self.toggle.clone() {
            self.bindings.push(Binding {
                combo,
                target: BindingTarget::NextProfile,
            });
        }
        Ok(())
    }

    fn handle_report(&mut self, report: &Report, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        let mut fired = Vec::new();
        for (index, binding) in self.bindings.iter().enumerate() {
            let pressed = report.button(binding.combo.trigger());
            let active = self.active.contains(&index);

            if !active && pressed && binding.combo.modifiers_held(report) {
                self.active.insert(index);
            } else if active && !pressed {
                self.active.remove(&index);
                fired.push(index);
            }
        }

        for index in fired {
            if let Err(e) = self.fire(&self.bindings[index], report, ctx) {
                error!("Failed to execute action: {}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing::Harness;
    use crate::device::mocks::mock_device;
    use crate::report::protocol::TransportKind;
    use std::path::PathBuf;

    fn tables(entries: &[(&str, &[(&str, &str)])]) -> Arc<BTreeMap<String, BTreeMap<String, String>>> {
        let tables = entries
            .iter()
            .map(|(name, bindings)| {
                let table = bindings
                    .iter()
                    .map(|(combo, command)| (combo.to_string(), command.to_string()))
                    .collect();
                (name.to_string(), table)
            })
            .collect();
        Arc::new(tables)
    }

    fn report(l1: bool, r1: bool) -> Report {
        Report {
            button_l1: l1,
            button_r1: r1,
            ..Report::default()
        }
    }

    #[test]
    fn test_substitute_variables() {
        let report = Report {
            battery: 6,
            ..Report::default()
        };
        let vars = Variables {
            name: Some("Sony Computer Entertainment Wireless Controller"),
            profile: "racing",
            device_addr: Some("00:11:22:33:44:55"),
            report: &report,
        };

        assert_eq!(
            substitute("notify '$profile' $device_addr $report.battery", &vars),
            "notify 'racing' 00:11:22:33:44:55 6"
        );
        assert_eq!(substitute("$unknown and $report.nope", &vars), "None and None");
        assert_eq!(substitute("cost $ 5 $", &vars), "cost $ 5 $");
        assert_eq!(substitute("$profile.", &vars), "racing.");
    }

    #[test]
    fn test_split_command() {
        assert_eq!(
            split_command(r#"exec notify-send 'hello world' "a \"b\"" c\ d"#).unwrap(),
            vec!["exec", "notify-send", "hello world", r#"a "b""#, "c d"]
        );
        assert_eq!(split_command("  ").unwrap(), Vec::<String>::new());
        assert_eq!(split_command("''").unwrap(), vec![""]);
        assert!(matches!(split_command("exec 'open"), Err(ActionError::BadCommand(_))));
        assert!(matches!(split_command("exec \\"), Err(ActionError::BadCommand(_))));
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(
            parse_command("exec xdotool key F5").unwrap(),
            BindingCommand::Exec(vec!["xdotool".into(), "key".into(), "F5".into()])
        );
        assert_eq!(parse_command("next-profile").unwrap(), BindingCommand::NextProfile);
        assert_eq!(parse_command("prev-profile").unwrap(), BindingCommand::PrevProfile);
        assert_eq!(
            parse_command("load-profile racing").unwrap(),
            BindingCommand::LoadProfile("racing".into())
        );

        assert!(matches!(parse_command(""), Err(ActionError::EmptyCommand)));
        assert!(matches!(
            parse_command("load-profile"),
            Err(ActionError::MissingArgument("load-profile"))
        ));
        let err = parse_command("launch rockets").unwrap_err();
        assert_eq!(err.to_string(), "Invalid action type: launch");
    }

    #[test]
    fn test_load_options_merges_tables() {
        let tables = tables(&[
            ("global", &[("PS+Options", "next-profile")]),
            ("racing", &[("L1+R1", "load-profile default")]),
            ("other", &[("Cross", "prev-profile")]),
        ]);
        let toggle = "R1+L1+PS".parse().ok();
        let mut action = BindingAction::new(tables, toggle);
        let mut harness = Harness::new();

        action.load_options(&ProfileOptions::default(), &mut harness.ctx()).unwrap();
        assert_eq!(action.bindings().len(), 2, "global plus toggle");

        let racing = ProfileOptions {
            bindings: Some("racing".to_string()),
            ..ProfileOptions::default()
        };
        action.load_options(&racing, &mut harness.ctx()).unwrap();
        assert_eq!(action.bindings().len(), 3);
        assert_eq!(action.bindings()[2].target, BindingTarget::NextProfile);
    }

    #[test]
    fn test_combo_fires_once_on_release() {
        let tables = tables(&[("global", &[("L1+R1", "next-profile")])]);
        let mut action = BindingAction::new(tables, None);
        let mut harness = Harness::new();
        action.load_options(&ProfileOptions::default(), &mut harness.ctx()).unwrap();

        for r in [report(true, false), report(true, true), report(true, true), report(true, true)] {
            action.handle_report(&r, &mut harness.ctx()).unwrap();
        }
        assert!(harness.commands.is_empty(), "nothing fires while held");

        action.handle_report(&report(true, false), &mut harness.ctx()).unwrap();
        action.handle_report(&report(false, false), &mut harness.ctx()).unwrap();
        assert_eq!(harness.commands, vec![SessionCommand::NextProfile]);
    }

    #[test]
    fn test_modifier_released_first_still_fires() {
        let tables = tables(&[("global", &[("L1+R1", "prev-profile")])]);
        let mut action = BindingAction::new(tables, None);
        let mut harness = Harness::new();
        action.load_options(&ProfileOptions::default(), &mut harness.ctx()).unwrap();

        action.handle_report(&report(true, true), &mut harness.ctx()).unwrap();
        action.handle_report(&report(false, true), &mut harness.ctx()).unwrap();
        action.handle_report(&report(false, false), &mut harness.ctx()).unwrap();
        assert_eq!(harness.commands, vec![SessionCommand::PrevProfile]);
    }

    #[test]
    fn test_trigger_without_modifiers_does_nothing() {
        let tables = tables(&[("global", &[("L1+R1", "next-profile")])]);
        let mut action = BindingAction::new(tables, None);
        let mut harness = Harness::new();
        action.load_options(&ProfileOptions::default(), &mut harness.ctx()).unwrap();

        action.handle_report(&report(false, true), &mut harness.ctx()).unwrap();
        action.handle_report(&report(false, false), &mut harness.ctx()).unwrap();
        assert!(harness.commands.is_empty());
    }

    #[test]
    fn test_substituted_profile_command() {
        let tables = tables(&[("global", &[("Cross", "load-profile $device_addr")])]);
        let (device, _handles) = mock_device("00:11:22:33:44:55", TransportKind::Bluetooth);
        let mut harness = Harness::with_device(device);
        let mut action = BindingAction::new(tables, None);
        action.load_options(&ProfileOptions::default(), &mut harness.ctx()).unwrap();

        let mut pressed = Report::default();
        pressed.button_cross = true;
        action.handle_report(&pressed, &mut harness.ctx()).unwrap();
        action.handle_report(&Report::default(), &mut harness.ctx()).unwrap();

        assert_eq!(
            harness.commands,
            vec![SessionCommand::LoadProfile("00:11:22:33:44:55".to_string())]
        );
    }

    #[test]
    fn test_failed_binding_does_not_fail_report() {
        let tables = tables(&[("global", &[("Cross", "launch rockets")])]);
        let mut action = BindingAction::new(tables, None);
        let mut harness = Harness::new();
        action.load_options(&ProfileOptions::default(), &mut harness.ctx()).unwrap();

        let mut pressed = Report::default();
        pressed.button_cross = true;
        action.handle_report(&pressed, &mut harness.ctx()).unwrap();
        assert!(action.handle_report(&Report::default(), &mut harness.ctx()).is_ok());
    }

    #[test]
    fn test_exec_background_spawns() {
        let mut harness = Harness::new();
        let command = parse_command("exec-background true").unwrap();
        execute(command, &mut harness.ctx()).unwrap();

        let command = parse_command("exec-background /nonexistent/ds4-bridge-test").unwrap();
        assert!(matches!(execute(command, &mut harness.ctx()), Err(ActionError::Spawn(_))));
    }

    #[test]
    fn test_background_child_is_reaped() {
        let argv = vec!["true".to_string()];
        let child = spawn(&argv, true).unwrap();
        let pid = child.id();

        reap(child, argv[0].clone(), true).join().unwrap();

        // A zombie keeps its /proc entry until the parent waits on it
        let proc_entry = PathBuf::from(format!("/proc/{}", pid));
        assert!(!proc_entry.exists(), "background child {} left a zombie", pid);
    }

    #[test]
    fn test_failed_foreground_child_is_reaped() {
        let argv = vec!["false".to_string()];
        let child = spawn(&argv, false).unwrap();
        let pid = child.id();

        reap(child, argv[0].clone(), false).join().unwrap();
        assert!(!PathBuf::from(format!("/proc/{}", pid)).exists());
    }
}
