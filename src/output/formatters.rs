use serde_json::json;

use crate::devices::{FriskoMeasurements, Measurement, RegisterDefinition};

pub trait DataFormatter: Send + Sync {
    fn format_snapshot(&self, snapshot: &FriskoMeasurements) -> String;
    fn format_catalog(&self, registers: &[&RegisterDefinition]) -> String;
}

/// Picks a formatter by its config/CLI name.
pub fn formatter_for(name: &str) -> Box<dyn DataFormatter> {
    match name {
        "json" => Box::new(JsonFormatter),
        _ => Box::new(ConsoleFormatter),
    }
}

pub struct ConsoleFormatter;

impl ConsoleFormatter {
    fn format_row(measurement: &Measurement) -> String {
        let value = if measurement.unit().is_empty() || measurement.is_error() {
            measurement.value.clone()
        } else {
            format!("{} {}", measurement.value, measurement.unit())
        };
        format!("  {:<32} {}\n", measurement.display_name(), value)
    }
}

impl DataFormatter for ConsoleFormatter {
    fn format_snapshot(&self, snapshot: &FriskoMeasurements) -> String {
        let mut output = format!("🌡️  Frisko - {}\n", snapshot.last_update);
        output.push_str(&"═".repeat(50));
        output.push('\n');

        output.push_str("Pomiary:\n");
        for measurement in &snapshot.measurements {
            output.push_str(&Self::format_row(measurement));
        }

        output.push_str("Wyjścia:\n");
        for measurement in &snapshot.outputs {
            output.push_str(&Self::format_row(measurement));
        }

        output.push_str(&"-".repeat(50));
        output.push('\n');
        output.push_str(&format!(
            "Połączenie: {}\n",
            if snapshot.is_connected { "aktywne" } else { "brak" }
        ));
        if let Some(error) = &snapshot.error {
            output.push_str(&format!("Błędy: {}\n", error));
        }
        output
    }

    fn format_catalog(&self, registers: &[&RegisterDefinition]) -> String {
        let mut output = String::from("📋 Register map:\n");
        for register in registers {
            output.push_str(&format!(
                "  {:>5}  {:<32} {:<12} {:?}/{}\n",
                register.address,
                register.name,
                if register.unit.is_empty() { "-" } else { register.unit },
                register.kind,
                register.scale
            ));
        }
        output
    }
}

pub struct JsonFormatter;

impl DataFormatter for JsonFormatter {
    fn format_snapshot(&self, snapshot: &FriskoMeasurements) -> String {
        let value = json!({
            "outcome": snapshot.outcome(),
            "snapshot": snapshot,
        });
        serde_json::to_string_pretty(&value).unwrap_or_default()
    }

    fn format_catalog(&self, registers: &[&RegisterDefinition]) -> String {
        serde_json::to_string_pretty(registers).unwrap_or_default()
    }
}
