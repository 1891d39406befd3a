//! Holding-register map of the Frisko heating controller.
//!
//! Registers are polled in declaration order: every measurement register
//! first, then every output register. The map is sparse, so each register is
//! read with its own request.

use serde::Serialize;

/// How a raw register value is turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegisterKind {
    /// Fixed-point value, `raw / scale` with one decimal.
    ScaledDecimal,
    /// Contact or relay state.
    BinaryState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegisterGroup {
    Measurement,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegisterDefinition {
    pub address: u16,
    pub name: &'static str,
    pub display_name: &'static str,
    pub unit: &'static str,
    pub scale: u16,
    pub kind: RegisterKind,
    pub group: RegisterGroup,
}

impl RegisterDefinition {
    const fn temperature(address: u16, name: &'static str, display_name: &'static str) -> Self {
        Self {
            address,
            name,
            display_name,
            unit: "°C",
            scale: 10,
            kind: RegisterKind::ScaledDecimal,
            group: RegisterGroup::Measurement,
        }
    }

    const fn contact(address: u16, name: &'static str, display_name: &'static str) -> Self {
        Self {
            address,
            name,
            display_name,
            unit: "",
            scale: 1,
            kind: RegisterKind::BinaryState,
            group: RegisterGroup::Measurement,
        }
    }

    const fn output(address: u16, name: &'static str, display_name: &'static str) -> Self {
        Self {
            address,
            name,
            display_name,
            unit: "",
            scale: 1,
            kind: RegisterKind::BinaryState,
            group: RegisterGroup::Output,
        }
    }
}

static MEASUREMENT_REGISTERS: [RegisterDefinition; 13] = [
    RegisterDefinition::temperature(4248, "temperatura_zewnetrzna", "Temperatura zewnętrzna"),
    RegisterDefinition::temperature(4154, "temperatura_srednia", "Temperatura średnia"),
    RegisterDefinition::temperature(4065, "temperatura_wewnetrzna", "Temperatura wewnętrzna"),
    RegisterDefinition::temperature(4150, "zadana_temperatura_wewnetrzna", "Zadana temperatura wewnętrzna"),
    RegisterDefinition::temperature(4069, "temperatura_cwu_gora", "Temperatura CWU góra"),
    RegisterDefinition::temperature(4121, "zadana_temperatura_cwu", "Zadana temperatura CWU"),
    RegisterDefinition::temperature(4067, "temperatura_bufora", "Temperatura bufora"),
    RegisterDefinition::temperature(4158, "zadana_temperatura_bufora", "Zadana temperatura bufora"),
    RegisterDefinition::temperature(4072, "temperatura_zasilania_pc", "Temperatura zasilania PC"),
    RegisterDefinition::temperature(4071, "temperatura_wejsciowa_dz", "Temperatura wejściowa DZ"),
    RegisterDefinition::temperature(4070, "temperatura_wyjsciowa_dz", "Temperatura wyjściowa DZ"),
    RegisterDefinition::contact(4236, "wejscie_ferie", "Wejście ferie"),
    RegisterDefinition::contact(4237, "wejscie_party", "Wejście party"),
];

static OUTPUT_REGISTERS: [RegisterDefinition; 9] = [
    RegisterDefinition::output(4216, "pompa_dziennestrefa", "Pompa dzienne strefa"),
    RegisterDefinition::output(4214, "pompa_cwu", "Pompa CWU"),
    RegisterDefinition::output(4100, "silownik_zaworu", "Siłownik zaworu"),
    RegisterDefinition::output(4232, "bzc_cwu", "BZC CWU"),
    RegisterDefinition::output(4231, "bzc_co", "BZC CO"),
    RegisterDefinition::output(4215, "pompa_co", "Pompa CO"),
    RegisterDefinition::output(4101, "sprezarka", "Sprężarka"),
    RegisterDefinition::output(4213, "pompa_ccw", "Pompa CCW"),
    RegisterDefinition::output(4099, "alarm", "Alarm"),
];

pub fn measurement_registers() -> &'static [RegisterDefinition] {
    &MEASUREMENT_REGISTERS
}

pub fn output_registers() -> &'static [RegisterDefinition] {
    &OUTPUT_REGISTERS
}

/// Full polling order.
pub fn all_registers() -> impl Iterator<Item = &'static RegisterDefinition> {
    MEASUREMENT_REGISTERS.iter().chain(OUTPUT_REGISTERS.iter())
}

pub fn find_register(address: u16) -> Option<&'static RegisterDefinition> {
    all_registers().find(|r| r.address == address)
}
