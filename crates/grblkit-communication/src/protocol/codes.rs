//! GRBL error and alarm code tables.
//! Converts the numeric codes in `error:<n>` / `ALARM:<n>` frames to
//! human-readable descriptions for events and logs.

/// Describe a GRBL v1.1 error code
pub fn error_description(code: u8) -> &'static str {
    match code {
        1 => "Expected a G-code word (letter plus value); letter not found",
        2 => "Numeric value format invalid or missing",
        3 => "'$' system command not recognized",
        4 => "Negative value received where a positive value was expected",
        5 => "Homing cycle is not enabled in settings",
        6 => "Minimum step pulse time must be greater than 3 microseconds",
        7 => "EEPROM read failed; settings restored to defaults",
        8 => "'$' command only allowed while idle",
        9 => "G-code locked out during alarm or jog state",
        10 => "Soft limits require homing to be enabled",
        11 => "Max characters per line exceeded; line not processed",
        12 => "Setting value exceeds the supported step rate",
        13 => "Safety door opened; door state initiated",
        14 => "Startup line exceeds the EEPROM line length limit",
        15 => "Jog target exceeds machine travel; command ignored",
        16 => "Jog command missing '=' or contains prohibited g-code",
        17 => "Laser mode requires a PWM output",
        20 => "Unsupported or invalid g-code command in block",
        21 => "More than one command from the same modal group in block",
        22 => "Feed rate has not yet been set",
        23 => "Command requires an integer value",
        24 => "Two commands in block both require the XYZ axis words",
        25 => "A G-code word was repeated in the block",
        26 => "Command requires XYZ axis words but none were found",
        27 => "Line number value outside of 1 - 9,999,999",
        28 => "Command is missing required P or L value words",
        29 => "Only work coordinate systems G54-G59 are supported",
        30 => "G53 requires G0 or G1 motion mode to be active",
        31 => "Unused axis words with G80 motion mode cancel active",
        32 => "Arc command lacks XYZ axis words in the selected plane",
        33 => "Motion command has an invalid target",
        34 => "Arc radius definition produced a geometry error",
        35 => "Arc offset definition is missing the IJK word",
        36 => "Unused, leftover G-code words in block",
        37 => "G43.1 offset not assigned to its configured axis",
        38 => "Tool number greater than the supported maximum",
        _ => "Unknown error code",
    }
}

/// Describe a GRBL v1.1 alarm code
pub fn alarm_description(code: u8) -> &'static str {
    match code {
        1 => "Hard limit triggered; position likely lost, re-home recommended",
        2 => "Soft limit: motion target exceeds machine travel; position retained",
        3 => "Reset while in motion; position cannot be guaranteed, re-home recommended",
        4 => "Probe fail: probe not in expected initial state",
        5 => "Probe fail: probe did not contact within programmed travel",
        6 => "Homing fail: reset during active homing cycle",
        7 => "Homing fail: safety door opened during homing",
        8 => "Homing fail: could not clear limit switch on pull-off",
        9 => "Homing fail: limit switch not found within search distance",
        _ => "Unknown alarm code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_descriptions() {
        assert!(error_description(9).contains("locked out"));
        assert!(error_description(20).contains("Unsupported"));
        assert!(error_description(22).contains("Feed rate"));
        assert_eq!(error_description(200), "Unknown error code");
    }

    #[test]
    fn test_alarm_descriptions() {
        assert!(alarm_description(1).contains("Hard limit"));
        assert!(alarm_description(2).contains("Soft limit"));
        assert!(alarm_description(9).contains("Homing fail"));
        assert_eq!(alarm_description(200), "Unknown alarm code");
    }
}
