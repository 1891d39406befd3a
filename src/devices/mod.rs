pub mod catalog;
pub mod measurement;

pub use catalog::{
    all_registers, find_register, measurement_registers, output_registers, RegisterDefinition,
    RegisterGroup, RegisterKind,
};
pub use measurement::{CycleOutcome, FriskoMeasurements, Measurement, READ_ERROR};
