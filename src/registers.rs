//! Register map of Renogy charge controllers, lithium batteries, inverters
//! and DC-DC chargers.
//!
//! Every block is a single read issued as one request. Offsets are byte
//! offsets into the response payload (register `start + n` sits at
//! offset `2 * n`).

use crate::core::{RegisterBlock, RegisterField as F, Scale};
use crate::modbus_rtu::READ_HOLDING_REGISTERS;

/// Load on/off switch (0 = off, 1 = on).
pub const LOAD_SWITCH_REGISTER: u16 = 0x010A;

pub const DEVICE_MODEL: RegisterBlock = RegisterBlock {
    tag: "device_model",
    function_code: READ_HOLDING_REGISTERS,
    start: 0x000C,
    count: 8,
    fields: &[F::ascii("model", 0, 8)],
};

/// Hardware version at 0x0014, software version at 0x0016, each stored
/// as major (high byte) / minor (low byte).
pub const DEVICE_VERSION: RegisterBlock = RegisterBlock {
    tag: "device_version",
    function_code: READ_HOLDING_REGISTERS,
    start: 0x0014,
    count: 4,
    fields: &[
        F::unsigned("hardware_major", 0).high(),
        F::unsigned("hardware_minor", 0).low(),
        F::unsigned("software_major", 4).high(),
        F::unsigned("software_minor", 4).low(),
    ],
};

pub const DEVICE_SERIAL: RegisterBlock = RegisterBlock {
    tag: "device_serial",
    function_code: READ_HOLDING_REGISTERS,
    start: 0x0018,
    count: 8,
    fields: &[F::ascii("serial_number", 0, 8)],
};

/// Full operating data, 0x0100..=0x0122.
pub const CONTROLLER_READ_00_22: RegisterBlock = RegisterBlock {
    tag: "controller_read_00_22",
    function_code: READ_HOLDING_REGISTERS,
    start: 0x0100,
    count: 0x23,
    fields: &[
        F::unsigned("battery_soc", 0).with_unit("%"),
        F::unsigned("battery_voltage", 2).scaled(Scale::TENTH).with_unit("V"),
        F::unsigned("charging_current", 4).scaled(Scale::HUNDREDTH).with_unit("A"),
        F::signed("controller_temperature", 6).high().with_unit("°C"),
        F::signed("battery_temperature", 6).low().with_unit("°C"),
        F::unsigned("load_voltage", 8).scaled(Scale::TENTH).with_unit("V"),
        F::unsigned("load_current", 10).scaled(Scale::HUNDREDTH).with_unit("A"),
        F::unsigned("load_power", 12).with_unit("W"),
        F::unsigned("solar_voltage", 14).scaled(Scale::TENTH).with_unit("V"),
        F::unsigned("solar_current", 16).scaled(Scale::HUNDREDTH).with_unit("A"),
        F::unsigned("solar_power", 18).with_unit("W"),
        F::enumeration("load_switch", 20),
        F::unsigned("daily_min_battery_voltage", 22).scaled(Scale::TENTH).with_unit("V"),
        F::unsigned("daily_max_battery_voltage", 24).scaled(Scale::TENTH).with_unit("V"),
        F::unsigned("daily_max_charging_current", 26).scaled(Scale::HUNDREDTH).with_unit("A"),
        F::unsigned("daily_max_discharging_current", 28).scaled(Scale::HUNDREDTH).with_unit("A"),
        F::unsigned("daily_max_charging_power", 30).with_unit("W"),
        F::unsigned("daily_max_discharging_power", 32).with_unit("W"),
        F::unsigned("daily_charging_amp_hours", 34).with_unit("Ah"),
        F::unsigned("daily_discharging_amp_hours", 36).with_unit("Ah"),
        F::unsigned("daily_power_generation", 38).with_unit("Wh"),
        F::unsigned("daily_power_consumption", 40).with_unit("Wh"),
        F::unsigned("total_operating_days", 42).with_unit("days"),
        F::unsigned("total_battery_over_discharges", 44),
        F::unsigned("total_battery_full_charges", 46),
        F::unsigned("total_charging_amp_hours", 48).wide().with_unit("Ah"),
        F::unsigned("total_discharging_amp_hours", 52).wide().with_unit("Ah"),
        F::unsigned("cumulative_power_generation", 56).wide().with_unit("kWh"),
        F::unsigned("cumulative_power_consumption", 60).wide().with_unit("kWh"),
        F::bitmap("load_status", 64).high(),
        F::enumeration("charging_state", 64).low(),
        F::bitmap("fault_flags", 66).wide(),
    ],
};

/// Narrow alternative to [`CONTROLLER_READ_00_22`], 0x0101..=0x0107.
pub const CONTROLLER_READ_01_07: RegisterBlock = RegisterBlock {
    tag: "controller_read_01_07",
    function_code: READ_HOLDING_REGISTERS,
    start: 0x0101,
    count: 7,
    fields: &[
        F::unsigned("battery_voltage", 0).scaled(Scale::TENTH).with_unit("V"),
        F::unsigned("charging_current", 2).scaled(Scale::HUNDREDTH).with_unit("A"),
        F::signed("controller_temperature", 4).high().with_unit("°C"),
        F::signed("battery_temperature", 4).low().with_unit("°C"),
        F::unsigned("load_voltage", 6).scaled(Scale::TENTH).with_unit("V"),
        F::unsigned("load_current", 8).scaled(Scale::HUNDREDTH).with_unit("A"),
        F::unsigned("load_power", 10).with_unit("W"),
        F::unsigned("solar_voltage", 12).scaled(Scale::TENTH).with_unit("V"),
    ],
};

pub const LOAD_STATE: RegisterBlock = RegisterBlock {
    tag: "load_state",
    function_code: READ_HOLDING_REGISTERS,
    start: LOAD_SWITCH_REGISTER,
    count: 1,
    fields: &[F::enumeration("load_switch", 0)],
};

/// Lithium battery pack status, 5042..=5047.
pub const BATTERY_READ_STATUS: RegisterBlock = RegisterBlock {
    tag: "battery_read_status",
    function_code: READ_HOLDING_REGISTERS,
    start: 0x13B2,
    count: 6,
    fields: &[
        F::signed("current", 0).scaled(Scale::HUNDREDTH).with_unit("A"),
        F::unsigned("voltage", 2).scaled(Scale::TENTH).with_unit("V"),
        F::unsigned("remaining_capacity", 4).wide().scaled(Scale::THOUSANDTH).with_unit("Ah"),
        F::unsigned("total_capacity", 8).wide().scaled(Scale::THOUSANDTH).with_unit("Ah"),
    ],
};

pub const BATTERY_READ_SERIAL: RegisterBlock = RegisterBlock {
    tag: "battery_read_serial",
    function_code: READ_HOLDING_REGISTERS,
    start: 0x13F6,
    count: 8,
    fields: &[F::ascii("serial_number", 0, 8)],
};

pub const BATTERY_READ_MODEL: RegisterBlock = RegisterBlock {
    tag: "battery_read_model",
    function_code: READ_HOLDING_REGISTERS,
    start: 0x1402,
    count: 8,
    fields: &[F::ascii("model", 0, 8)],
};

/// Inverter AC/DC status, 4000..=4009. Layout unverified against hardware.
pub const INVERTER_READ_STATUS: RegisterBlock = RegisterBlock {
    tag: "inverter_read_status",
    function_code: READ_HOLDING_REGISTERS,
    start: 0x0FA0,
    count: 10,
    fields: &[
        F::unsigned("input_voltage", 0).scaled(Scale::TENTH).with_unit("V"),
        F::unsigned("input_current", 2).scaled(Scale::HUNDREDTH).with_unit("A"),
        F::unsigned("output_voltage", 4).scaled(Scale::TENTH).with_unit("V"),
        F::unsigned("output_current", 6).scaled(Scale::HUNDREDTH).with_unit("A"),
        F::unsigned("output_frequency", 8).scaled(Scale::HUNDREDTH).with_unit("Hz"),
        F::unsigned("battery_voltage", 10).scaled(Scale::TENTH).with_unit("V"),
        F::signed("temperature", 12).scaled(Scale::TENTH).with_unit("°C"),
    ],
};

pub const INVERTER_READ_MODEL: RegisterBlock = RegisterBlock {
    tag: "inverter_read_model",
    function_code: READ_HOLDING_REGISTERS,
    start: 0x10D7,
    count: 8,
    fields: &[F::ascii("model", 0, 8)],
};

/// DC-DC charger status. Same layout as the controller block except that
/// 0x0104..=0x0106 carry the alternator input instead of the load output.
pub const DCDC_READ_STATUS: RegisterBlock = RegisterBlock {
    tag: "dcdc_read_status",
    function_code: READ_HOLDING_REGISTERS,
    start: 0x0100,
    count: 10,
    fields: &[
        F::unsigned("battery_soc", 0).with_unit("%"),
        F::unsigned("battery_voltage", 2).scaled(Scale::TENTH).with_unit("V"),
        F::unsigned("charging_current", 4).scaled(Scale::HUNDREDTH).with_unit("A"),
        F::signed("controller_temperature", 6).high().with_unit("°C"),
        F::signed("battery_temperature", 6).low().with_unit("°C"),
        F::unsigned("alternator_voltage", 8).scaled(Scale::TENTH).with_unit("V"),
        F::unsigned("alternator_current", 10).scaled(Scale::HUNDREDTH).with_unit("A"),
        F::unsigned("alternator_power", 12).with_unit("W"),
        F::unsigned("solar_voltage", 14).scaled(Scale::TENTH).with_unit("V"),
        F::unsigned("solar_current", 16).scaled(Scale::HUNDREDTH).with_unit("A"),
        F::unsigned("solar_power", 18).with_unit("W"),
    ],
};

pub static BLOCKS: &[RegisterBlock] = &[
    DEVICE_MODEL,
    DEVICE_VERSION,
    DEVICE_SERIAL,
    CONTROLLER_READ_00_22,
    CONTROLLER_READ_01_07,
    LOAD_STATE,
    BATTERY_READ_STATUS,
    BATTERY_READ_SERIAL,
    BATTERY_READ_MODEL,
    INVERTER_READ_STATUS,
    INVERTER_READ_MODEL,
    DCDC_READ_STATUS,
];

/// Looks up a block by its command tag.
pub fn block(tag: &str) -> Option<&'static RegisterBlock> {
    BLOCKS.iter().find(|b| b.tag == tag)
}

pub const CHARGING_STATES: &[(u8, &str)] = &[
    (0x00, "Deactivated"),
    (0x01, "Activated"),
    (0x02, "MPPT Charging"),
    (0x03, "Equalizing Charging"),
    (0x04, "Boost Charging"),
    (0x05, "Float Charging"),
    (0x06, "Current Limiting"),
];

/// Bit positions inside the 32-bit controller fault word (0x0121..=0x0122).
pub const FAULT_FLAGS: &[(u8, &str)] = &[
    (16, "Battery over-discharge"),
    (17, "Battery over-voltage"),
    (18, "Battery under-voltage warning"),
    (19, "Load short circuit"),
    (20, "Load over-power or over-current"),
    (21, "Controller temperature too high"),
    (22, "Ambient temperature too high"),
    (23, "Photovoltaic input over-power"),
    (24, "Photovoltaic input side short circuit"),
    (25, "Photovoltaic input side over-voltage"),
    (26, "Solar panel counter-current"),
    (27, "Solar panel working point over-voltage"),
    (28, "Solar panel reversely connected"),
    (29, "Anti-reverse MOS short"),
    (30, "Charge MOS short circuit"),
];

pub const BATTERY_TYPES: &[(u8, &str)] = &[
    (0, "User Defined"),
    (1, "Sealed Lead Acid"),
    (2, "Gel"),
    (3, "Flooded"),
    (4, "Lithium"),
];

pub const EXCEPTION_CODES: &[(u8, &str)] = &[
    (0x01, "Illegal Function"),
    (0x02, "Illegal Data Address"),
    (0x03, "Illegal Data Value"),
    (0x04, "Slave Device Failure"),
    (0x05, "Acknowledge"),
    (0x06, "Slave Device Busy"),
    (0x08, "Memory Parity Error"),
    (0x0A, "Gateway Path Unavailable"),
    (0x0B, "Gateway Target Device Failed to Respond"),
];

fn lookup(table: &'static [(u8, &'static str)], code: u8) -> Option<&'static str> {
    table.iter().find(|(c, _)| *c == code).map(|(_, label)| *label)
}

pub fn charging_state_label(code: u8) -> Option<&'static str> {
    lookup(CHARGING_STATES, code)
}

pub fn battery_type_label(code: u8) -> Option<&'static str> {
    lookup(BATTERY_TYPES, code)
}

pub fn exception_message(code: u8) -> &'static str {
    lookup(EXCEPTION_CODES, code).unwrap_or("Unknown Exception")
}

/// Labels of every fault bit set in `flags`.
pub fn active_faults(flags: u32) -> Vec<&'static str> {
    FAULT_FLAGS
        .iter()
        .filter(|(bit, _)| flags & (1 << bit) != 0)
        .map(|(_, label)| *label)
        .collect()
}
