//! Minimal firmware settings.
//!
//! The engine only needs a handful of the `$n` settings: the receive-buffer
//! budget, and the homing/soft-limit flags that gate which commands are
//! sensible. The full settings dictionary is a UI concern and out of scope.

use serde::{Deserialize, Serialize};

/// GRBL's stock serial receive buffer, in bytes.
pub const DEFAULT_RX_BUFFER_SIZE: usize = 127;

/// The few firmware settings the engine tracks, populated from the `$$`
/// dump observed during identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareSettings {
    /// Receive-buffer budget for character counting
    pub rx_buffer_size: usize,
    /// $22 — homing cycle enabled
    pub homing_enabled: bool,
    /// $20 — soft limits enabled
    pub soft_limits_enabled: bool,
    /// $10 — status report mask
    pub report_mask: u8,
    /// Number of settings lines observed (non-zero once a dump was seen)
    seen: usize,
}

impl Default for FirmwareSettings {
    fn default() -> Self {
        Self {
            rx_buffer_size: DEFAULT_RX_BUFFER_SIZE,
            homing_enabled: false,
            soft_limits_enabled: false,
            report_mask: 0,
            seen: 0,
        }
    }
}

impl FirmwareSettings {
    /// Apply one `$number=value` line from the settings dump.
    pub fn apply(&mut self, number: u16, value: &str) {
        self.seen += 1;
        match number {
            10 => {
                if let Ok(mask) = value.trim().parse::<u8>() {
                    self.report_mask = mask;
                }
            }
            20 => self.soft_limits_enabled = value.trim() == "1",
            22 => self.homing_enabled = value.trim() == "1",
            _ => {}
        }
    }

    /// Capture the receive-buffer size from a `$I` build-info line.
    ///
    /// GRBL 1.1 reports `[OPT:<flags>,<planner blocks>,<rx bytes>]` and
    /// grblHAL keeps the field order. Returns the advertised buffer size
    /// when the line carries one.
    pub fn apply_build_info(&mut self, body: &str) -> Option<usize> {
        let rest = body.strip_prefix("OPT:")?;
        let mut fields = rest.split(',');
        let _flags = fields.next()?;
        let _planner_blocks = fields.next()?;
        let rx = fields.next()?.trim().parse::<usize>().ok()?;
        if rx == 0 {
            return None;
        }
        self.rx_buffer_size = rx;
        Some(rx)
    }

    /// Whether a settings dump has been observed this session.
    pub fn dump_seen(&self) -> bool {
        self.seen > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = FirmwareSettings::default();
        assert_eq!(settings.rx_buffer_size, 127);
        assert!(!settings.homing_enabled);
        assert!(!settings.dump_seen());
    }

    #[test]
    fn test_apply_dump_lines() {
        let mut settings = FirmwareSettings::default();
        settings.apply(22, "1");
        settings.apply(20, "0");
        settings.apply(10, "3");
        settings.apply(110, "2000.000");

        assert!(settings.homing_enabled);
        assert!(!settings.soft_limits_enabled);
        assert_eq!(settings.report_mask, 3);
        assert!(settings.dump_seen());
    }

    #[test]
    fn test_build_info_overrides_buffer_size() {
        let mut settings = FirmwareSettings::default();
        assert_eq!(settings.apply_build_info("OPT:V,15,128"), Some(128));
        assert_eq!(settings.rx_buffer_size, 128);

        // Non-OPT feedback and truncated OPT lines leave the size alone
        assert_eq!(settings.apply_build_info("MSG:Caution: Unlocked"), None);
        assert_eq!(settings.apply_build_info("OPT:V"), None);
        assert_eq!(settings.apply_build_info("OPT:V,15,zero"), None);
        assert_eq!(settings.rx_buffer_size, 128);
    }
}
