use tracing::{debug, warn};

/// Substring that marks the total-utilization sensor of a CPU unit.
pub const LOAD_SENSOR_NAME: &str = "CPU Total";
/// Substring that marks the package power sensor of a CPU unit.
pub const POWER_SENSOR_NAME: &str = "CPU Package";

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CpuSample {
    pub load_percent: f32,
    pub package_watts: f32,
}

/// Result of one poll. The loop never aborts on a bad poll: a provider
/// failure yields a zeroed sample and a warning for the notification sink.
#[derive(Debug)]
pub struct PollOutcome {
    pub sample: CpuSample,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Load,
    Power,
    Other,
}

/// One named sensor reading from a CPU-class hardware unit. `value` is
/// nullable at the provider level.
#[derive(Debug, Clone)]
pub struct SensorReading {
    pub name: String,
    pub kind: SensorKind,
    pub value: Option<f32>,
}

/// Folds the CPU units' sensor readings into a sample. Matching is by
/// case-sensitive substring on the sensor name, filtered by sensor type.
/// When several sensors match the same slot, the last one in provider
/// iteration order wins; every field a matching sensor never fills stays 0.
pub fn extract_sample(readings: &[SensorReading]) -> CpuSample {
    let mut sample = CpuSample::default();
    for reading in readings {
        match reading.kind {
            SensorKind::Load if reading.name.contains(LOAD_SENSOR_NAME) => {
                sample.load_percent = reading.value.unwrap_or(0.0);
            }
            SensorKind::Power if reading.name.contains(POWER_SENSOR_NAME) => {
                sample.package_watts = reading.value.unwrap_or(0.0);
            }
            _ => {}
        }
    }
    sample
}

pub struct SensorReader {
    provider: provider::Provider,
}

impl SensorReader {
    pub fn new() -> Self {
        Self {
            provider: provider::Provider::new(),
        }
    }

    /// Never fails outwardly. A provider error is downgraded to a zeroed
    /// sample plus a warning string; the caller decides how to surface it.
    pub fn poll(&mut self) -> PollOutcome {
        match self.provider.cpu_sensor_readings() {
            Ok(readings) => {
                let sample = extract_sample(&readings);
                debug!(
                    load = sample.load_percent,
                    watts = sample.package_watts,
                    "sensor poll"
                );
                PollOutcome {
                    sample,
                    warning: None,
                }
            }
            Err(e) => {
                warn!("sensor provider unavailable: {e}");
                PollOutcome {
                    sample: CpuSample::default(),
                    warning: Some(format!("Hardware sensors unavailable: {e}")),
                }
            }
        }
    }
}

#[cfg(windows)]
mod provider {
    use super::{SensorKind, SensorReading};
    use serde::Deserialize;
    use std::error::Error;
    use tracing::info;
    use wmi::{COMLibrary, WMIConnection};

    // The monitor service keeps these rows up to date, so there is no
    // per-unit update() call here the way an in-process provider needs.
    const NAMESPACES: [&str; 2] = ["ROOT\\LibreHardwareMonitor", "ROOT\\OpenHardwareMonitor"];
    const CPU_UNITS_QUERY: &str =
        "SELECT Identifier FROM Hardware WHERE HardwareType = 'Cpu'";
    const SENSORS_QUERY: &str =
        "SELECT Name, SensorType, Value, Parent FROM Sensor \
         WHERE SensorType = 'Load' OR SensorType = 'Power'";

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct HardwareRow {
        identifier: String,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct SensorRow {
        name: String,
        sensor_type: String,
        value: Option<f32>,
        parent: String,
    }

    pub struct Provider {
        conn: Option<WMIConnection>,
    }

    impl Provider {
        pub fn new() -> Self {
            Self { conn: None }
        }

        pub fn cpu_sensor_readings(&mut self) -> Result<Vec<SensorReading>, Box<dyn Error>> {
            if self.conn.is_none() {
                self.conn = Some(Self::connect()?);
            }
            let conn = self
                .conn
                .as_ref()
                .ok_or("sensor provider connection unavailable")?;

            match Self::query_cpu_sensors(conn) {
                Ok(readings) => Ok(readings),
                Err(e) => {
                    // Reconnect on the next poll; the monitor service may
                    // have been restarted.
                    self.conn = None;
                    Err(e)
                }
            }
        }

        fn connect() -> Result<WMIConnection, Box<dyn Error>> {
            let com_lib = COMLibrary::new()?;
            for namespace in NAMESPACES {
                if let Ok(conn) = WMIConnection::with_namespace_path(namespace, com_lib) {
                    info!(namespace, "connected to hardware sensor provider");
                    return Ok(conn);
                }
            }
            Err("no hardware monitor WMI namespace found \
                 (is LibreHardwareMonitor running?)"
                .into())
        }

        fn query_cpu_sensors(conn: &WMIConnection) -> Result<Vec<SensorReading>, Box<dyn Error>> {
            let cpu_units: Vec<HardwareRow> = conn.raw_query(CPU_UNITS_QUERY)?;
            let sensors: Vec<SensorRow> = conn.raw_query(SENSORS_QUERY)?;

            let readings = sensors
                .into_iter()
                .filter(|row| {
                    cpu_units
                        .iter()
                        .any(|unit| row.parent.starts_with(&unit.identifier))
                })
                .map(|row| SensorReading {
                    kind: match row.sensor_type.as_str() {
                        "Load" => SensorKind::Load,
                        "Power" => SensorKind::Power,
                        _ => SensorKind::Other,
                    },
                    name: row.name,
                    value: row.value,
                })
                .collect();
            Ok(readings)
        }
    }
}

#[cfg(not(windows))]
mod provider {
    use super::SensorReading;
    use std::error::Error;

    pub struct Provider;

    impl Provider {
        pub fn new() -> Self {
            Provider
        }

        pub fn cpu_sensor_readings(&mut self) -> Result<Vec<SensorReading>, Box<dyn Error>> {
            Err("hardware sensor provider is only available on Windows".into())
        }
    }
}
