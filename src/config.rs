//! Configuration using Figment
//!
//! Settings are loaded from:
//! 1. a TOML file (default `config/lab_drivers.toml`)
//! 2. environment variables prefixed with `LAB_DRIVERS_`, nested keys joined by `__`
//!
//! Every field has a default, so an empty or missing file yields a usable
//! simulator-only setup.
//!
//! ```toml
//! [logging]
//! level = "debug"
//! format = "json"
//!
//! [simulator]
//! serial = "TC-SIM-01"
//! deactivation = "clear_targets"
//!
//! [serial]
//! port = "/dev/ttyACM0"
//! timeout = "2s"
//! ```
//!
//! Example override: `LAB_DRIVERS_LOGGING__LEVEL=trace`.

use crate::error::{DriverError, DriverResult};
use crate::hardware::capabilities::DriverFactory;
use crate::hardware::simulator::{SimulatorConfig, SimulatorFactory};
use crate::hardware::thermocycler::SerialConfig;
use crate::logging::OutputFormat;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "LAB_DRIVERS_";

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "config/lab_drivers.toml";

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Simulated device identity and behavior
    #[serde(default)]
    pub simulator: SimulatorConfig,

    /// Physical device; absent means simulator only
    #[serde(default)]
    pub serial: Option<SerialConfig>,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: OutputFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: OutputFormat::default(),
        }
    }
}

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> DriverResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> DriverResult<Self> {
        let settings: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> DriverResult<()> {
        crate::logging::parse_log_level(&self.logging.level).map_err(DriverError::Configuration)?;

        for (field, value) in [
            ("simulator.serial", &self.simulator.serial),
            ("simulator.model", &self.simulator.model),
            ("simulator.version", &self.simulator.version),
        ] {
            if value.trim().is_empty() {
                return Err(DriverError::Configuration(format!("{} must not be empty", field)));
            }
            // The M115 reply is one line with positional markers.
            if value.contains(['\r', '\n']) || value.contains(" model:") || value.contains(" version:") {
                return Err(DriverError::Configuration(format!(
                    "{} cannot be sent in an identity reply: {:?}",
                    field, value
                )));
            }
        }

        if let Some(serial) = &self.serial {
            if serial.port.trim().is_empty() {
                return Err(DriverError::Configuration("serial.port must not be empty".into()));
            }
            if serial.baud_rate == 0 {
                return Err(DriverError::Configuration("serial.baud_rate must be > 0".into()));
            }
            if serial.timeout.is_zero() {
                return Err(DriverError::Configuration("serial.timeout must be > 0".into()));
            }
        }

        Ok(())
    }

    /// Factory for the configured backend: the serial device when one is
    /// configured, the simulator otherwise.
    pub fn driver_factory(&self) -> DriverResult<Arc<dyn DriverFactory>> {
        match &self.serial {
            None => Ok(Arc::new(SimulatorFactory::with_config(self.simulator.clone()))),
            #[cfg(feature = "serial")]
            Some(serial) => Ok(Arc::new(
                crate::hardware::thermocycler::SerialDriverFactory::new(serial.clone()),
            )),
            #[cfg(not(feature = "serial"))]
            Some(serial) => Err(DriverError::Configuration(format!(
                "serial port '{}' configured but built without the `serial` feature",
                serial.port
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::simulator::DeactivationPolicy;
    use serial_test::serial;
    use std::io::Write;
    use std::time::Duration;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn missing_file_gives_defaults() {
        let settings = Settings::load_from("/nonexistent/lab_drivers.toml").unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.validate().is_ok());
    }

    #[test]
    #[serial]
    fn loads_file() {
        let file = write_config(
            r#"
            [logging]
            level = "debug"
            format = "json"

            [simulator]
            serial = "TC-SIM-01"
            deactivation = "clear_targets"

            [serial]
            port = "/dev/ttyACM0"
            timeout = "2s"
            "#,
        );

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, OutputFormat::Json);
        assert_eq!(settings.simulator.serial, "TC-SIM-01");
        assert_eq!(settings.simulator.model, "dummyModelTC");
        assert_eq!(settings.simulator.deactivation, DeactivationPolicy::ClearTargets);

        let serial = settings.serial.unwrap();
        assert_eq!(serial.baud_rate, 115_200);
        assert_eq!(serial.timeout, Duration::from_secs(2));
        assert_eq!(serial.drain_timeout, Duration::from_millis(50));
    }

    #[test]
    #[serial]
    fn environment_overrides_file() {
        let file = write_config("[logging]\nlevel = \"debug\"\n");

        std::env::set_var("LAB_DRIVERS_LOGGING__LEVEL", "warn");
        let result = Settings::load_from(file.path());
        std::env::remove_var("LAB_DRIVERS_LOGGING__LEVEL");

        assert_eq!(result.unwrap().logging.level, "warn");
    }

    #[test]
    #[serial]
    fn malformed_file_is_config_error() {
        let file = write_config("[logging\nlevel = ");
        assert!(matches!(
            Settings::load_from(file.path()),
            Err(DriverError::Config(_))
        ));
    }

    #[test]
    fn validation_checks_identity_fits_one_reply_line() {
        let mut settings = Settings::default();
        settings.simulator.serial = "TC 0042".into();
        settings.simulator.model = "Thermocycler Module".into();
        settings.validate().unwrap();

        settings.simulator.model = "tc model:v2".into();
        assert!(matches!(settings.validate(), Err(DriverError::Configuration(msg)) if msg.contains("simulator.model")));

        settings.simulator.model = "tc".into();
        settings.simulator.version = "v1\nok".into();
        assert!(matches!(settings.validate(), Err(DriverError::Configuration(msg)) if msg.contains("simulator.version")));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.logging.level = "verbose".into();
        assert!(matches!(settings.validate(), Err(DriverError::Configuration(_))));

        let mut settings = Settings::default();
        settings.simulator.serial = " ".into();
        assert!(settings.validate().is_err());

        let settings = Settings {
            serial: Some(SerialConfig {
                baud_rate: 0,
                ..SerialConfig::new("/dev/ttyACM0")
            }),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn simulator_factory_by_default() {
        let factory = Settings::default().driver_factory().unwrap();
        assert_eq!(factory.driver_type(), "thermocycler_simulator");
    }
}
