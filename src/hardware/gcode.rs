//! Thermocycler G-code subset.
//!
//! Protocol Overview:
//! - Format: ASCII, one command per line
//! - Terminator: CRLF (`\r\n`)
//! - Every command gets exactly one response line
//! - Setters answer `ok`; failures answer a line starting with `ERR`
//!
//! | Command | Meaning | Response |
//! |---|---|---|
//! | `M126` | open lid | `ok` |
//! | `M127` | close lid | `ok` |
//! | `M119` | lid status | `Lid:open` / `Lid:closed` |
//! | `M140 S<t>` | set lid target | `ok` |
//! | `M140` | clear lid target | `ok` |
//! | `M108` | lid heater off | `ok` |
//! | `M141` | lid temperature | `T:<t\|none> C:<c>` |
//! | `M104 S<t> [H<h>] [V<v>]` | set block target | `ok` |
//! | `M105` | block temperature | `T:<t\|none> C:<c> H:<h\|none>` |
//! | `M566 S<r>` | set ramp rate | `ok` |
//! | `M14` | block off | `ok` |
//! | `M18` | everything off | `ok` |
//! | `M115` | identity | `serial:<s> model:<m> version:<v>` |
//! | `dfu` | enter programming mode | `ok` |

use crate::error::{DriverError, DriverResult};
use crate::hardware::types::{DeviceInfo, LidStatus, PlateTemperature, Temperature};
use std::collections::HashMap;

/// Line terminator for commands and responses.
pub const TERMINATOR: &str = "\r\n";

/// Acknowledgement for commands with no payload.
pub const ACK: &str = "ok";

/// Supported command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GCode {
    /// `M126`
    OpenLid,
    /// `M127`
    CloseLid,
    /// `M119`
    GetLidStatus,
    /// `M140`
    SetLidTemperature,
    /// `M108`
    DeactivateLid,
    /// `M141`
    GetLidTemperature,
    /// `M104`
    SetPlateTemperature,
    /// `M105`
    GetPlateTemperature,
    /// `M566`
    SetRampRate,
    /// `M14`
    DeactivateBlock,
    /// `M18`
    DeactivateAll,
    /// `M115`
    DeviceInfo,
    /// `dfu`
    EnterProgrammingMode,
}

impl GCode {
    const ALL: [GCode; 13] = [
        GCode::OpenLid,
        GCode::CloseLid,
        GCode::GetLidStatus,
        GCode::SetLidTemperature,
        GCode::DeactivateLid,
        GCode::GetLidTemperature,
        GCode::SetPlateTemperature,
        GCode::GetPlateTemperature,
        GCode::SetRampRate,
        GCode::DeactivateBlock,
        GCode::DeactivateAll,
        GCode::DeviceInfo,
        GCode::EnterProgrammingMode,
    ];

    /// Wire text for this code.
    pub fn code(self) -> &'static str {
        match self {
            GCode::OpenLid => "M126",
            GCode::CloseLid => "M127",
            GCode::GetLidStatus => "M119",
            GCode::SetLidTemperature => "M140",
            GCode::DeactivateLid => "M108",
            GCode::GetLidTemperature => "M141",
            GCode::SetPlateTemperature => "M104",
            GCode::GetPlateTemperature => "M105",
            GCode::SetRampRate => "M566",
            GCode::DeactivateBlock => "M14",
            GCode::DeactivateAll => "M18",
            GCode::DeviceInfo => "M115",
            GCode::EnterProgrammingMode => "dfu",
        }
    }

    /// Look up a code by its wire text.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.code() == code)
    }
}

/// A command line: code plus single-letter numeric parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GCodeCommand {
    code: GCode,
    params: Vec<(char, f64)>,
}

impl GCodeCommand {
    /// Command with no parameters.
    pub fn new(code: GCode) -> Self {
        Self {
            code,
            params: Vec::new(),
        }
    }

    /// Append a parameter.
    pub fn param(mut self, letter: char, value: f64) -> Self {
        self.params.push((letter, value));
        self
    }

    /// Append a parameter only when present.
    pub fn optional_param(self, letter: char, value: Option<f64>) -> Self {
        match value {
            Some(v) => self.param(letter, v),
            None => self,
        }
    }

    /// The command code.
    pub fn code(&self) -> GCode {
        self.code
    }

    /// Value of parameter `letter`, if given.
    pub fn get(&self, letter: char) -> Option<f64> {
        self.params
            .iter()
            .find(|(l, _)| *l == letter)
            .map(|(_, v)| *v)
    }

    /// Parse one command line (terminator optional).
    pub fn parse(line: &str) -> DriverResult<Self> {
        let mut words = line.split_whitespace();
        let head = words.next().ok_or_else(|| DriverError::Protocol {
            command: line.to_string(),
            response: "empty command".to_string(),
        })?;
        let code = GCode::from_code(head).ok_or_else(|| DriverError::Protocol {
            command: line.to_string(),
            response: format!("unknown code '{}'", head),
        })?;

        let mut command = Self::new(code);
        for word in words {
            let mut chars = word.chars();
            let letter = chars.next().ok_or_else(|| DriverError::Protocol {
                command: line.to_string(),
                response: "empty parameter".to_string(),
            })?;
            let value = chars
                .as_str()
                .parse::<f64>()
                .map_err(|_| DriverError::Protocol {
                    command: line.to_string(),
                    response: format!("bad parameter '{}'", word),
                })?;
            command = command.param(letter, value);
        }
        Ok(command)
    }
}

impl std::fmt::Display for GCodeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code.code())?;
        for (letter, value) in &self.params {
            write!(f, " {}{}", letter, value)?;
        }
        Ok(())
    }
}

// =============================================================================
// Response parsing
// =============================================================================

fn unexpected(command: &GCodeCommand, response: &str) -> DriverError {
    DriverError::Protocol {
        command: command.to_string(),
        response: response.to_string(),
    }
}

fn check_error(response: &str) -> DriverResult<()> {
    if response.starts_with("ERR") {
        return Err(DriverError::Hardware(response.to_string()));
    }
    Ok(())
}

/// `key:value` fields of a response line.
fn fields(response: &str) -> HashMap<&str, &str> {
    response
        .split_whitespace()
        .filter_map(|word| word.split_once(':'))
        .collect()
}

fn optional_number(
    command: &GCodeCommand,
    response: &str,
    value: Option<&&str>,
) -> DriverResult<Option<f64>> {
    match value {
        None => Err(unexpected(command, response)),
        Some(&"none") => Ok(None),
        Some(text) => text
            .parse::<f64>()
            .map(Some)
            .map_err(|_| unexpected(command, response)),
    }
}

/// Expect a bare acknowledgement.
pub fn parse_ack(command: &GCodeCommand, response: &str) -> DriverResult<()> {
    check_error(response)?;
    if response.trim() == ACK {
        Ok(())
    } else {
        Err(unexpected(command, response))
    }
}

/// Parse `Lid:open` / `Lid:closed`.
pub fn parse_lid_status(command: &GCodeCommand, response: &str) -> DriverResult<LidStatus> {
    check_error(response)?;
    match fields(response).get("Lid") {
        Some(&"open") => Ok(LidStatus::Open),
        Some(&"closed") => Ok(LidStatus::Closed),
        _ => Err(unexpected(command, response)),
    }
}

/// Parse `T:<t|none> C:<c>`.
pub fn parse_lid_temperature(command: &GCodeCommand, response: &str) -> DriverResult<Temperature> {
    check_error(response)?;
    let f = fields(response);
    let target = optional_number(command, response, f.get("T"))?;
    let current =
        optional_number(command, response, f.get("C"))?.ok_or_else(|| unexpected(command, response))?;
    Ok(Temperature { current, target })
}

/// Parse `T:<t|none> C:<c> H:<h|none>`.
pub fn parse_plate_temperature(
    command: &GCodeCommand,
    response: &str,
) -> DriverResult<PlateTemperature> {
    check_error(response)?;
    let f = fields(response);
    let target = optional_number(command, response, f.get("T"))?;
    let current =
        optional_number(command, response, f.get("C"))?.ok_or_else(|| unexpected(command, response))?;
    let hold = optional_number(command, response, f.get("H"))?;
    Ok(PlateTemperature {
        current,
        target,
        hold,
    })
}

/// Parse `serial:<s> model:<m> version:<v>`.
///
/// Fields are positional: each value runs up to the next ` model:` or
/// ` version:` marker, so values may contain spaces. The version runs to the end
/// of the line.
pub fn parse_device_info(command: &GCodeCommand, response: &str) -> DriverResult<DeviceInfo> {
    check_error(response)?;
    let parsed = response
        .strip_prefix("serial:")
        .and_then(|rest| rest.split_once(" model:"))
        .and_then(|(serial, rest)| {
            rest.split_once(" version:")
                .map(|(model, version)| DeviceInfo::new(serial, model, version))
        });
    parsed.ok_or_else(|| unexpected(command, response))
}

// =============================================================================
// Response rendering (device side)
// =============================================================================

fn render_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "none".to_string(), |v| v.to_string())
}

/// Render a lid status response.
pub fn render_lid_status(status: LidStatus) -> String {
    format!("Lid:{}", status)
}

/// Render a lid temperature response.
pub fn render_lid_temperature(temp: &Temperature) -> String {
    format!("T:{} C:{}", render_optional(temp.target), temp.current)
}

/// Render a block temperature response.
pub fn render_plate_temperature(temp: &PlateTemperature) -> String {
    format!(
        "T:{} C:{} H:{}",
        render_optional(temp.target),
        temp.current,
        render_optional(temp.hold)
    )
}

/// Render an identity response.
pub fn render_device_info(info: &DeviceInfo) -> String {
    format!(
        "serial:{} model:{} version:{}",
        info.serial, info.model, info.version
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_plate_command_with_optional_params() {
        let cmd = GCodeCommand::new(GCode::SetPlateTemperature)
            .param('S', 95.0)
            .optional_param('H', Some(30.0))
            .optional_param('V', None);
        assert_eq!(cmd.to_string(), "M104 S95 H30");
    }

    #[test]
    fn renders_fractional_values() {
        let cmd = GCodeCommand::new(GCode::SetRampRate).param('S', 1.25);
        assert_eq!(cmd.to_string(), "M566 S1.25");
    }

    #[test]
    fn parse_command_round_trips_display() {
        let cmd = GCodeCommand::parse("M104 S72.5 H10 V25\r\n").unwrap();
        assert_eq!(cmd.code(), GCode::SetPlateTemperature);
        assert_eq!(cmd.get('S'), Some(72.5));
        assert_eq!(cmd.get('H'), Some(10.0));
        assert_eq!(cmd.get('V'), Some(25.0));
        assert_eq!(cmd.get('X'), None);
        assert_eq!(cmd.to_string(), "M104 S72.5 H10 V25");
    }

    #[test]
    fn parse_rejects_unknown_code() {
        assert!(matches!(
            GCodeCommand::parse("G28"),
            Err(DriverError::Protocol { .. })
        ));
    }

    #[test]
    fn parse_rejects_bad_parameter() {
        assert!(GCodeCommand::parse("M104 Sabc").is_err());
    }

    #[test]
    fn every_code_round_trips() {
        for code in GCode::ALL {
            assert_eq!(GCode::from_code(code.code()), Some(code));
        }
    }

    #[test]
    fn parses_plate_temperature() {
        let cmd = GCodeCommand::new(GCode::GetPlateTemperature);
        let temp = parse_plate_temperature(&cmd, "T:95 C:95 H:30").unwrap();
        assert_eq!(
            temp,
            PlateTemperature {
                current: 95.0,
                target: Some(95.0),
                hold: Some(30.0)
            }
        );

        let idle = parse_plate_temperature(&cmd, "T:none C:0 H:none").unwrap();
        assert_eq!(idle, PlateTemperature::default());
    }

    #[test]
    fn parses_lid_responses() {
        let status = GCodeCommand::new(GCode::GetLidStatus);
        assert_eq!(parse_lid_status(&status, "Lid:closed").unwrap(), LidStatus::Closed);
        assert!(parse_lid_status(&status, "Lid:in_between").is_err());

        let temp = GCodeCommand::new(GCode::GetLidTemperature);
        let lid = parse_lid_temperature(&temp, "T:105 C:105").unwrap();
        assert_eq!(lid.target, Some(105.0));
    }

    #[test]
    fn missing_current_is_protocol_error() {
        let cmd = GCodeCommand::new(GCode::GetLidTemperature);
        assert!(matches!(
            parse_lid_temperature(&cmd, "T:105"),
            Err(DriverError::Protocol { .. })
        ));
    }

    #[test]
    fn error_line_is_hardware_error() {
        let cmd = GCodeCommand::new(GCode::OpenLid);
        assert!(matches!(
            parse_ack(&cmd, "ERR003:lid motor stalled"),
            Err(DriverError::Hardware(_))
        ));
    }

    #[test]
    fn rendered_responses_parse_back() {
        let info = DeviceInfo::new("TC1", "thermocycler_v1", "v1.0.2");
        let cmd = GCodeCommand::new(GCode::DeviceInfo);
        assert_eq!(parse_device_info(&cmd, &render_device_info(&info)).unwrap(), info);

        let plate = PlateTemperature {
            current: 4.0,
            target: Some(4.0),
            hold: None,
        };
        let cmd = GCodeCommand::new(GCode::GetPlateTemperature);
        assert_eq!(
            parse_plate_temperature(&cmd, &render_plate_temperature(&plate)).unwrap(),
            plate
        );
    }

    #[test]
    fn identity_values_keep_their_spaces() {
        let info = DeviceInfo::new("TC 0042", "Thermocycler Module", "v1.0 beta");
        let cmd = GCodeCommand::new(GCode::DeviceInfo);
        let line = render_device_info(&info);
        assert_eq!(line, "serial:TC 0042 model:Thermocycler Module version:v1.0 beta");
        assert_eq!(parse_device_info(&cmd, &line).unwrap(), info);
    }

    #[test]
    fn identity_without_markers_is_protocol_error() {
        let cmd = GCodeCommand::new(GCode::DeviceInfo);
        for line in ["serial:TC1", "serial:TC1 version:v1", "model:m serial:s version:v"] {
            assert!(matches!(
                parse_device_info(&cmd, line),
                Err(DriverError::Protocol { .. })
            ));
        }
    }
}
