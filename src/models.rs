use std::fmt;

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Value, json};

use crate::core::{DecodeError, DecodedBlock};
use crate::registers;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub model: String,
    pub serial_number: String,
    pub hardware_version: String,
    pub software_version: String,
}

impl DeviceInfo {
    /// Builds device identity from the model, version and serial blocks.
    pub fn from_blocks(model: &DecodedBlock, version: &DecodedBlock, serial: &DecodedBlock) -> Result<Self, DecodeError> {
        Ok(DeviceInfo {
            model: model.text("model")?.to_string(),
            serial_number: serial.text("serial_number")?.to_string(),
            hardware_version: format!("V{}.{}", version.int("hardware_major")?, version.int("hardware_minor")?),
            software_version: format!("V{}.{}", version.int("software_major")?, version.int("software_minor")?),
        })
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (S/N: {})", self.model, self.serial_number)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BatteryData {
    /// Percent, 0..=100.
    pub state_of_charge: u8,
    pub voltage: f64,
    /// Charging current.
    pub current: f64,
    pub temperature: i8,
}

impl BatteryData {
    pub fn power(&self) -> f64 {
        self.voltage * self.current
    }
}

impl fmt::Display for BatteryData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Battery: {}% @ {:.1}V, {:.2}A", self.state_of_charge, self.voltage, self.current)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SolarData {
    pub voltage: f64,
    pub current: f64,
    pub power: u16,
}

impl fmt::Display for SolarData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Solar: {:.1}V, {:.2}A, {}W", self.voltage, self.current, self.power)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LoadData {
    pub voltage: f64,
    pub current: f64,
    pub power: u16,
    pub is_on: bool,
}

impl fmt::Display for LoadData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_on { "ON" } else { "OFF" };
        write!(f, "Load ({}): {:.1}V, {:.2}A, {}W", state, self.voltage, self.current, self.power)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ControllerData {
    pub temperature: i8,
    pub charging_state: u8,
    pub fault_flags: u32,
}

impl ControllerData {
    pub fn charging_state_text(&self) -> String {
        match registers::charging_state_label(self.charging_state) {
            Some(label) => label.to_string(),
            None => format!("Unknown ({})", self.charging_state),
        }
    }

    pub fn active_faults(&self) -> Vec<&'static str> {
        registers::active_faults(self.fault_flags)
    }
}

impl fmt::Display for ControllerData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Controller: {}°C, {}", self.temperature, self.charging_state_text())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DailyStats {
    pub min_battery_voltage: f64,
    pub max_battery_voltage: f64,
    pub max_charging_current: f64,
    pub max_discharging_current: f64,
    pub max_charging_power: u16,
    pub max_discharging_power: u16,
    pub charging_amp_hours: u16,
    pub discharging_amp_hours: u16,
    /// Wh
    pub power_generation: u16,
    /// Wh
    pub power_consumption: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HistoricalStats {
    pub total_operating_days: u16,
    pub total_over_discharges: u16,
    pub total_full_charges: u16,
    pub total_amp_hours_charged: u32,
    pub total_amp_hours_discharged: u32,
    /// kWh
    pub total_power_generated: u32,
    /// kWh
    pub total_power_consumed: u32,
}

/// One consistent snapshot of a charge controller.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reading {
    pub timestamp: DateTime<Local>,
    pub device_info: DeviceInfo,
    pub battery: BatteryData,
    pub solar: SolarData,
    pub load: LoadData,
    pub controller: ControllerData,
    pub daily_stats: Option<DailyStats>,
    pub historical_stats: Option<HistoricalStats>,
}

impl Reading {
    /// Builds a reading from a decoded [`registers::CONTROLLER_READ_00_22`]
    /// block. Device identity is left empty.
    pub fn from_realtime(block: &DecodedBlock, timestamp: DateTime<Local>) -> Result<Self, DecodeError> {
        let battery = BatteryData {
            state_of_charge: block.int_as("battery_soc")?,
            voltage: block.float("battery_voltage")?,
            current: block.float("charging_current")?,
            temperature: block.int_as("battery_temperature")?,
        };
        let solar = SolarData {
            voltage: block.float("solar_voltage")?,
            current: block.float("solar_current")?,
            power: block.int_as("solar_power")?,
        };
        let load = LoadData {
            voltage: block.float("load_voltage")?,
            current: block.float("load_current")?,
            power: block.int_as("load_power")?,
            is_on: block.int("load_switch")? == 1,
        };
        let controller = ControllerData {
            temperature: block.int_as("controller_temperature")?,
            charging_state: block.int_as("charging_state")?,
            fault_flags: block.int_as("fault_flags")?,
        };
        let daily_stats = DailyStats {
            min_battery_voltage: block.float("daily_min_battery_voltage")?,
            max_battery_voltage: block.float("daily_max_battery_voltage")?,
            max_charging_current: block.float("daily_max_charging_current")?,
            max_discharging_current: block.float("daily_max_discharging_current")?,
            max_charging_power: block.int_as("daily_max_charging_power")?,
            max_discharging_power: block.int_as("daily_max_discharging_power")?,
            charging_amp_hours: block.int_as("daily_charging_amp_hours")?,
            discharging_amp_hours: block.int_as("daily_discharging_amp_hours")?,
            power_generation: block.int_as("daily_power_generation")?,
            power_consumption: block.int_as("daily_power_consumption")?,
        };
        let historical_stats = HistoricalStats {
            total_operating_days: block.int_as("total_operating_days")?,
            total_over_discharges: block.int_as("total_battery_over_discharges")?,
            total_full_charges: block.int_as("total_battery_full_charges")?,
            total_amp_hours_charged: block.int_as("total_charging_amp_hours")?,
            total_amp_hours_discharged: block.int_as("total_discharging_amp_hours")?,
            total_power_generated: block.int_as("cumulative_power_generation")?,
            total_power_consumed: block.int_as("cumulative_power_consumption")?,
        };

        Ok(Reading {
            timestamp,
            device_info: DeviceInfo::default(),
            battery,
            solar,
            load,
            controller,
            daily_stats: Some(daily_stats),
            historical_stats: Some(historical_stats),
        })
    }

    /// Flat JSON layout used by monitoring consumers.
    pub fn to_json(&self) -> Value {
        json!({
            "timestamp": self.timestamp.to_rfc3339(),
            "device": {
                "model": self.device_info.model,
                "serial_number": self.device_info.serial_number,
            },
            "battery": {
                "soc": self.battery.state_of_charge,
                "voltage": self.battery.voltage,
                "current": self.battery.current,
                "temperature": self.battery.temperature,
                "power": self.battery.power(),
            },
            "solar": {
                "voltage": self.solar.voltage,
                "current": self.solar.current,
                "power": self.solar.power,
            },
            "load": {
                "voltage": self.load.voltage,
                "current": self.load.current,
                "power": self.load.power,
                "is_on": self.load.is_on,
            },
            "controller": {
                "temperature": self.controller.temperature,
                "charging_status": self.controller.charging_state,
                "charging_status_text": self.controller.charging_state_text(),
            },
        })
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Reading at {}", self.timestamp.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "  {}", self.battery)?;
        writeln!(f, "  {}", self.solar)?;
        writeln!(f, "  {}", self.load)?;
        write!(f, "  {}", self.controller)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BatteryStatus {
    /// Negative while discharging.
    pub current: f64,
    pub voltage: f64,
    pub remaining_capacity: f64,
    pub total_capacity: f64,
}

impl BatteryStatus {
    pub fn from_block(block: &DecodedBlock) -> Result<Self, DecodeError> {
        Ok(BatteryStatus {
            current: block.float("current")?,
            voltage: block.float("voltage")?,
            remaining_capacity: block.float("remaining_capacity")?,
            total_capacity: block.float("total_capacity")?,
        })
    }

    pub fn power(&self) -> f64 {
        self.voltage * self.current
    }

    /// Remaining capacity as a percentage of the total.
    pub fn state_of_charge(&self) -> Option<f64> {
        if self.total_capacity > 0.0 {
            Some(self.remaining_capacity / self.total_capacity * 100.0)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct InverterStatus {
    pub input_voltage: f64,
    pub input_current: f64,
    pub output_voltage: f64,
    pub output_current: f64,
    pub output_frequency: f64,
    pub battery_voltage: f64,
    pub temperature: f64,
}

impl InverterStatus {
    pub fn from_block(block: &DecodedBlock) -> Result<Self, DecodeError> {
        Ok(InverterStatus {
            input_voltage: block.float("input_voltage")?,
            input_current: block.float("input_current")?,
            output_voltage: block.float("output_voltage")?,
            output_current: block.float("output_current")?,
            output_frequency: block.float("output_frequency")?,
            battery_voltage: block.float("battery_voltage")?,
            temperature: block.float("temperature")?,
        })
    }

    pub fn output_power(&self) -> f64 {
        self.output_voltage * self.output_current
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DcDcStatus {
    pub battery: BatteryData,
    pub alternator_voltage: f64,
    pub alternator_current: f64,
    pub alternator_power: u16,
    pub solar: SolarData,
    pub controller_temperature: i8,
}

impl DcDcStatus {
    pub fn from_block(block: &DecodedBlock) -> Result<Self, DecodeError> {
        Ok(DcDcStatus {
            battery: BatteryData {
                state_of_charge: block.int_as("battery_soc")?,
                voltage: block.float("battery_voltage")?,
                current: block.float("charging_current")?,
                temperature: block.int_as("battery_temperature")?,
            },
            alternator_voltage: block.float("alternator_voltage")?,
            alternator_current: block.float("alternator_current")?,
            alternator_power: block.int_as("alternator_power")?,
            solar: SolarData {
                voltage: block.float("solar_voltage")?,
                current: block.float("solar_current")?,
                power: block.int_as("solar_power")?,
            },
            controller_temperature: block.int_as("controller_temperature")?,
        })
    }
}
