use chrono::{DateTime, Local};
use serde::Serialize;

use super::catalog::{measurement_registers, output_registers, RegisterDefinition, RegisterGroup, RegisterKind};

pub const READ_ERROR: &str = "Błąd odczytu";
pub const CONTACT_CLOSED: &str = "ZWARTE";
pub const CONTACT_OPEN: &str = "ROZWARTE";
pub const OUTPUT_ON: &str = "WŁĄCZONA";
pub const OUTPUT_OFF: &str = "WYŁĄCZONA";

/// Raw value an output register reports when energised.
const OUTPUT_ON_RAW: i16 = 100;
const CONTACT_CLOSED_RAW: i16 = 1;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

impl RegisterDefinition {
    pub fn render(&self, raw: i16) -> String {
        match (self.group, self.kind) {
            (RegisterGroup::Output, _) => {
                let state = if raw == OUTPUT_ON_RAW { OUTPUT_ON } else { OUTPUT_OFF };
                state.to_string()
            }
            (RegisterGroup::Measurement, RegisterKind::ScaledDecimal) => {
                format!("{:.1}", f64::from(raw) / f64::from(self.scale.max(1)))
            }
            (RegisterGroup::Measurement, RegisterKind::BinaryState) => {
                let state = if raw == CONTACT_CLOSED_RAW { CONTACT_CLOSED } else { CONTACT_OPEN };
                state.to_string()
            }
        }
    }
}

/// One register resolved for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    #[serde(flatten)]
    pub definition: RegisterDefinition,
    pub value: String,
    pub raw: Option<i16>,
    pub error: Option<String>,
}

impl Measurement {
    pub fn resolved(definition: RegisterDefinition, raw: i16) -> Self {
        Self {
            definition,
            value: definition.render(raw),
            raw: Some(raw),
            error: None,
        }
    }

    pub fn failed(definition: RegisterDefinition, cause: impl Into<String>) -> Self {
        Self {
            definition,
            value: READ_ERROR.to_string(),
            raw: None,
            error: Some(cause.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn name(&self) -> &'static str {
        self.definition.name
    }

    pub fn display_name(&self) -> &'static str {
        self.definition.display_name
    }

    pub fn unit(&self) -> &'static str {
        self.definition.unit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CycleOutcome {
    Success,
    Partial,
    Failed,
}

/// Result of one complete poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FriskoMeasurements {
    pub measurements: Vec<Measurement>,
    pub outputs: Vec<Measurement>,
    pub is_connected: bool,
    pub last_update: String,
    pub error: Option<String>,
}

impl FriskoMeasurements {
    /// Snapshot for a cycle that never got a connection: every catalog entry
    /// is present and marked as a read error.
    pub fn unreachable(cause: impl Into<String>, at: DateTime<Local>) -> Self {
        let cause = cause.into();
        let fail = |d: &RegisterDefinition| Measurement::failed(*d, cause.clone());
        Self {
            measurements: measurement_registers().iter().map(fail).collect(),
            outputs: output_registers().iter().map(fail).collect(),
            is_connected: false,
            last_update: format_timestamp(at),
            error: Some(cause),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Measurement> {
        self.measurements.iter().chain(self.outputs.iter())
    }

    pub fn get(&self, name: &str) -> Option<&Measurement> {
        self.iter().find(|m| m.name() == name)
    }

    pub fn error_count(&self) -> usize {
        self.iter().filter(|m| m.is_error()).count()
    }

    pub fn outcome(&self) -> CycleOutcome {
        let total = self.measurements.len() + self.outputs.len();
        let errors = self.error_count();
        if !self.is_connected && errors == total {
            CycleOutcome::Failed
        } else if errors > 0 || self.error.is_some() {
            CycleOutcome::Partial
        } else {
            CycleOutcome::Success
        }
    }
}

pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}
