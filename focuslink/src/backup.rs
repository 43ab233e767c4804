//! Configuration backup and restore.
//!
//! A backup reads a fixed list of commands and stores each reply under the
//! command's name. A restore replays the writable subset, passing the stored
//! value as the argument. Both run one command at a time and stop at the
//! first failure; nothing already written is rolled back.

use std::collections::BTreeMap;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::focus::Focus;

/// Settings that can be written back to the keyboard, in restore order.
pub const RESTORE_COMMANDS: &[&str] = &[
    "keymap",
    "colormap",
    "settings.defaultLayer",
    "escape_oneshot.cancel_key",
    "idleleds.time_limit",
    "layernames",
    "led.brightness",
    "led_mode.auto_save",
    "led_mode.default",
    "macros",
    "tapdance.map",
    "hostos.type",
    "autoshift.enabled",
    "autoshift.timeout",
    "autoshift.categories",
    "typingbreaks.idleTimeLimit",
    "typingbreaks.lockTimeOut",
    "typingbreaks.lockLength",
    "typingbreaks.leftMaxKeys",
    "typingbreaks.rightMaxKeys",
];

/// Everything captured by a backup, in capture order.
///
/// The writable settings first, then the read-only introspection commands.
/// `help` fills the capability cache, so the commands after it are checked
/// against what the firmware reports.
pub const BACKUP_COMMANDS: &[&str] = &[
    "keymap",
    "colormap",
    "settings.defaultLayer",
    "escape_oneshot.cancel_key",
    "idleleds.time_limit",
    "layernames",
    "led.brightness",
    "led_mode.auto_save",
    "led_mode.default",
    "macros",
    "tapdance.map",
    "hostos.type",
    "autoshift.enabled",
    "autoshift.timeout",
    "autoshift.categories",
    "typingbreaks.idleTimeLimit",
    "typingbreaks.lockTimeOut",
    "typingbreaks.lockLength",
    "typingbreaks.leftMaxKeys",
    "typingbreaks.rightMaxKeys",
    "help",
    "plugins",
    "eeprom.contents",
    "eeprom.free",
    "settings.valid?",
    "settings.version",
    "settings.crc",
];

/// Progress callback: `(command, index, total)`, called before each command.
pub type ProgressFn<'a> = &'a mut dyn FnMut(&str, usize, usize);

/// Captured configuration, keyed by command name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Snapshot {
    values: BTreeMap<String, String>,
}

impl Snapshot {
    /// Empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value captured for `command`.
    pub fn get(&self, command: &str) -> Option<&str> {
        self.values
            .get(command)
            .map(String::as_str)
    }

    /// Store a value.
    pub fn insert(&mut self, command: impl Into<String>, value: impl Into<String>) {
        self.values
            .insert(command.into(), value.into());
    }

    /// Number of captured commands.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over `(command, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

fn check_interrupted() -> Result<()> {
    if crate::is_interrupted_requested() {
        return Err(Error::Interrupted);
    }
    Ok(())
}

impl Focus {
    /// Read every command in [`BACKUP_COMMANDS`] into a snapshot.
    ///
    /// Commands the firmware does not support are captured as empty strings.
    pub fn backup(&self, progress: ProgressFn<'_>) -> Result<Snapshot> {
        let total = BACKUP_COMMANDS.len();
        let mut snapshot = Snapshot::new();

        for (index, command) in BACKUP_COMMANDS
            .iter()
            .copied()
            .enumerate()
        {
            check_interrupted()?;
            progress(command, index, total);
            let value = self
                .command(command, &[])?
                .unwrap_or_default();
            debug!("Backed up {command} ({} bytes)", value.len());
            snapshot.insert(command, value);
        }

        info!("Backed up {total} commands");
        Ok(snapshot)
    }

    /// Write every [`RESTORE_COMMANDS`] entry present in `snapshot` back.
    ///
    /// Returns the number of commands written. Entries that are missing or
    /// empty are skipped, since sending the bare command would read the
    /// setting instead of writing it. So are settings the firmware does not
    /// list in its `help` output.
    pub fn restore(&self, snapshot: &Snapshot, progress: ProgressFn<'_>) -> Result<usize> {
        let total = RESTORE_COMMANDS.len();
        let mut written = 0;

        for (index, command) in RESTORE_COMMANDS
            .iter()
            .copied()
            .enumerate()
        {
            check_interrupted()?;
            progress(command, index, total);
            let Some(value) = snapshot
                .get(command)
                .filter(|v| !v.is_empty())
            else {
                debug!("Nothing to restore for {command}");
                continue;
            };
            if !self.is_command_supported(command) {
                debug!("Firmware does not support {command}, skipping");
                continue;
            }
            self.command(command, &[value])?;
            written += 1;
        }

        info!("Restored {written} commands");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::focus::FocusConfig;
    use crate::hardware::KNOWN_DEVICES;
    use crate::port::mock::MockDevice;
    use crate::protocol::WriteStrategy;
    use crate::usb::StaticScanner;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn open_session(device: &MockDevice) -> Focus {
        let config = FocusConfig::default()
            .with_pacing(Duration::ZERO)
            .with_poll_interval(Duration::from_millis(5))
            .with_write_strategy(WriteStrategy::Direct);
        let focus = Focus::new(device.transport(), Arc::new(StaticScanner(Vec::new())), config);
        focus
            .open("/dev/ttyACM0", &KNOWN_DEVICES[0])
            .unwrap();
        focus
    }

    /// Firmware that answers reads with `value-of:<command>` and acknowledges writes.
    fn firmware(line: &str) -> Option<Vec<u8>> {
        if line.contains(' ') {
            return Some(b"\r\n.\r\n".to_vec());
        }
        match line {
            "help" => Some(format!("{}\r\n.\r\n", BACKUP_COMMANDS.join("\r\n")).into_bytes()),
            "eeprom.free" => Some(b"\r\n.\r\n".to_vec()),
            other => Some(format!("value-of:{other}\r\n.\r\n").into_bytes()),
        }
    }

    #[test]
    fn test_lists_are_consistent() {
        let backup: HashSet<&str> = BACKUP_COMMANDS.iter().copied().collect();
        let restore: HashSet<&str> = RESTORE_COMMANDS.iter().copied().collect();
        assert_eq!(backup.len(), BACKUP_COMMANDS.len(), "duplicate backup key");
        assert_eq!(restore.len(), RESTORE_COMMANDS.len(), "duplicate restore key");
        assert_eq!(RESTORE_COMMANDS.len(), 20);
        assert!(restore.is_subset(&backup));
    }

    #[test]
    fn test_backup_order_appends_read_only_commands() {
        assert_eq!(&BACKUP_COMMANDS[..RESTORE_COMMANDS.len()], RESTORE_COMMANDS);
        assert_eq!(
            &BACKUP_COMMANDS[RESTORE_COMMANDS.len()..],
            &[
                "help",
                "plugins",
                "eeprom.contents",
                "eeprom.free",
                "settings.valid?",
                "settings.version",
                "settings.crc",
            ]
        );
    }

    #[test]
    fn test_restore_excludes_read_only_commands() {
        for read_only in [
            "help",
            "plugins",
            "eeprom.contents",
            "eeprom.free",
            "settings.valid?",
            "settings.version",
            "settings.crc",
        ] {
            assert!(BACKUP_COMMANDS.contains(&read_only));
            assert!(!RESTORE_COMMANDS.contains(&read_only), "{read_only} is read-only");
        }
    }

    #[test]
    fn test_backup_captures_every_command() {
        let _guard = crate::test_interrupt_guard();
        let device = MockDevice::new();
        device.respond_with(firmware);
        let focus = open_session(&device);

        let mut seen = Vec::new();
        let snapshot = focus
            .backup(&mut |command, index, total| {
                assert_eq!(total, BACKUP_COMMANDS.len());
                seen.push((command.to_string(), index));
            })
            .unwrap();

        assert_eq!(snapshot.len(), BACKUP_COMMANDS.len());
        assert_eq!(snapshot.get("keymap"), Some("value-of:keymap"));
        assert_eq!(snapshot.get("eeprom.free"), Some(""));
        assert_eq!(seen.len(), BACKUP_COMMANDS.len());
        assert_eq!(seen[0], ("keymap".to_string(), 0));
        assert_eq!(
            seen[RESTORE_COMMANDS.len()],
            ("help".to_string(), RESTORE_COMMANDS.len())
        );
        assert_eq!(device.written_lines(), BACKUP_COMMANDS);
    }

    #[test]
    fn test_backup_then_restore_writes_captured_values() {
        let _guard = crate::test_interrupt_guard();
        let device = MockDevice::new();
        device.respond_with(firmware);
        let focus = open_session(&device);

        let snapshot = focus.backup(&mut |_, _, _| {}).unwrap();
        let reads = device.written_lines().len();

        let written = focus.restore(&snapshot, &mut |_, _, _| {}).unwrap();
        assert_eq!(written, RESTORE_COMMANDS.len());

        let lines = device.written_lines();
        let restore_lines = &lines[reads..];
        let expected: Vec<String> = RESTORE_COMMANDS
            .iter()
            .map(|c| format!("{c} value-of:{c}"))
            .collect();
        assert_eq!(restore_lines, expected.as_slice());
        assert!(
            restore_lines
                .iter()
                .all(|l| !l.starts_with("help") && !l.starts_with("eeprom.contents"))
        );
    }

    #[test]
    fn test_restore_skips_empty_values() {
        let _guard = crate::test_interrupt_guard();
        let device = MockDevice::new();
        device.respond_with(firmware);
        let focus = open_session(&device);

        let snapshot: Snapshot = [
            ("keymap".to_string(), "0 1 2".to_string()),
            ("colormap".to_string(), String::new()),
            ("eeprom.contents".to_string(), "ff ff".to_string()),
        ]
        .into_iter()
        .collect();

        assert_eq!(focus.restore(&snapshot, &mut |_, _, _| {}).unwrap(), 1);
        assert_eq!(device.written_lines(), vec!["keymap 0 1 2"]);
    }

    #[test]
    fn test_backup_filters_later_commands_through_help() {
        let _guard = crate::test_interrupt_guard();
        let device = MockDevice::new();
        device.respond_with(|line| match line {
            "help" => Some(b"keymap\r\nhelp\r\nplugins\r\n.\r\n".to_vec()),
            other => firmware(other),
        });
        let focus = open_session(&device);

        let snapshot = focus.backup(&mut |_, _, _| {}).unwrap();
        assert_eq!(snapshot.len(), BACKUP_COMMANDS.len());
        assert_eq!(snapshot.get("colormap"), Some("value-of:colormap"));
        assert_eq!(snapshot.get("plugins"), Some("value-of:plugins"));
        assert_eq!(snapshot.get("eeprom.contents"), Some(""));

        let lines = device.written_lines();
        assert!(lines.iter().any(|l| l == "colormap"));
        assert!(!lines.iter().any(|l| l == "eeprom.contents"));
    }

    #[test]
    fn test_restore_counts_only_sent_commands() {
        let _guard = crate::test_interrupt_guard();
        let device = MockDevice::new();
        device.respond_with(|line| match line {
            "help" => Some(b"help\r\nkeymap\r\n.\r\n".to_vec()),
            other => firmware(other),
        });
        let focus = open_session(&device);
        focus.supported_commands().unwrap();

        let snapshot: Snapshot = [
            ("keymap".to_string(), "0 1 2".to_string()),
            ("colormap".to_string(), "3 4".to_string()),
        ]
        .into_iter()
        .collect();

        assert_eq!(focus.restore(&snapshot, &mut |_, _, _| {}).unwrap(), 1);
        assert_eq!(device.written_lines(), vec!["help", "keymap 0 1 2"]);
    }

    #[test]
    fn test_restore_requires_connection() {
        let _guard = crate::test_interrupt_guard();
        let device = MockDevice::new();
        let focus = open_session(&device);
        let mut snapshot = Snapshot::new();
        snapshot.insert("keymap", "1");
        snapshot.insert("colormap", "2");

        focus.close();
        assert!(matches!(
            focus.restore(&snapshot, &mut |_, _, _| {}),
            Err(Error::NotConnected)
        ));
        assert!(device.written_lines().is_empty());
    }

    #[test]
    fn test_backup_interrupted() {
        let _guard = crate::test_interrupt_guard();
        let device = MockDevice::new();
        device.respond_with(firmware);
        let focus = open_session(&device);

        crate::test_set_interrupted(true);
        let result = focus.backup(&mut |_, _, _| {});
        crate::test_set_interrupted(false);

        assert!(matches!(result, Err(Error::Interrupted)));
        assert!(device.written_lines().is_empty());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_snapshot_is_a_plain_json_object() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("keymap", "0 1");
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"keymap":"0 1"}"#);
    }
}
