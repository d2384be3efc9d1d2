//! Sungrow grid-tie inverter register map (communication protocol for SG
//! string inverters). A subset of the documented map covering the identity,
//! yield, and electrical registers plus the remotely writable limits.

use rust_decimal::Decimal;

use crate::modbus::register::{DataType::*, RegisterSpec};

fn dec(num: i64, scale: u32) -> Decimal {
    Decimal::new(num, scale)
}

pub fn registers() -> Vec<RegisterSpec> {
    let one = Decimal::ONE;
    vec![
        // Identity block
        RegisterSpec::sensor("Serial Number", "serial_number", 4990, Utf8(10), one, ""),
        RegisterSpec::sensor("Device Type Code", "device_type_code", 5000, U16, one, ""),
        RegisterSpec::sensor("Nominal Active Power", "nominal_active_power", 5001, U16, dec(1, 1), "kW")
            .device_class("power"),
        RegisterSpec::sensor("Output Type", "output_type", 5002, U16, one, ""),
        // Yields
        RegisterSpec::sensor("Daily Power Yields", "daily_power_yields", 5003, U16, dec(1, 1), "kWh")
            .device_class("energy")
            .state_class("total_increasing"),
        RegisterSpec::sensor("Total Power Yields", "total_power_yields", 5004, U32, one, "kWh")
            .device_class("energy")
            .state_class("total"),
        RegisterSpec::sensor("Total Running Time", "total_running_time", 5006, U32, one, "h")
            .device_class("duration")
            .state_class("total"),
        // Readings unavailable while the inverter is shut down overnight.
        RegisterSpec::sensor("Internal Temperature", "internal_temperature", 5008, I16, dec(1, 1), "°C")
            .device_class("temperature")
            .state_class("measurement")
            .sentinel(0x7FFF),
        RegisterSpec::sensor("Total Apparent Power", "total_apparent_power", 5009, U32, one, "VA")
            .device_class("apparent_power")
            .state_class("measurement"),
        RegisterSpec::sensor("MPPT 1 Voltage", "mppt_1_voltage", 5011, U16, dec(1, 1), "V")
            .device_class("voltage")
            .state_class("measurement"),
        RegisterSpec::sensor("MPPT 1 Current", "mppt_1_current", 5012, U16, dec(1, 1), "A")
            .device_class("current")
            .state_class("measurement"),
        RegisterSpec::sensor("Total DC Power", "total_dc_power", 5017, U32, one, "W")
            .device_class("power")
            .state_class("measurement"),
        // Grid side
        RegisterSpec::sensor("Phase A Voltage", "phase_a_voltage", 5019, U16, dec(1, 1), "V")
            .device_class("voltage")
            .state_class("measurement"),
        RegisterSpec::sensor("Phase B Voltage", "phase_b_voltage", 5020, U16, dec(1, 1), "V")
            .device_class("voltage")
            .state_class("measurement"),
        RegisterSpec::sensor("Phase C Voltage", "phase_c_voltage", 5021, U16, dec(1, 1), "V")
            .device_class("voltage")
            .state_class("measurement"),
        RegisterSpec::sensor("Phase A Current", "phase_a_current", 5022, U16, dec(1, 1), "A")
            .device_class("current")
            .state_class("measurement"),
        RegisterSpec::sensor("Phase B Current", "phase_b_current", 5023, U16, dec(1, 1), "A")
            .device_class("current")
            .state_class("measurement"),
        RegisterSpec::sensor("Phase C Current", "phase_c_current", 5024, U16, dec(1, 1), "A")
            .device_class("current")
            .state_class("measurement"),
        RegisterSpec::sensor("Total Active Power", "active_power", 5031, U32, one, "W")
            .device_class("power")
            .state_class("measurement"),
        RegisterSpec::sensor("Total Reactive Power", "reactive_power", 5033, I32, one, "var")
            .device_class("reactive_power")
            .state_class("measurement"),
        RegisterSpec::sensor("Power Factor", "power_factor", 5035, I16, dec(1, 3), "")
            .device_class("power_factor")
            .state_class("measurement"),
        RegisterSpec::sensor("Grid Frequency", "grid_frequency", 5036, U16, dec(1, 1), "Hz")
            .device_class("frequency")
            .state_class("measurement"),
        RegisterSpec::sensor("Work State", "work_state", 5038, U16, one, ""),
        // Remotely writable holding registers
        RegisterSpec::select(
            "Start/Stop",
            "start_stop",
            5006,
            vec![("Start", 0xCF), ("Stop", 0xCE)],
        ),
        RegisterSpec::switch("Power Limitation Switch", "power_limitation_switch", 5007, 0xAA, 0x55),
        RegisterSpec::number(
            "Power Limitation Setting",
            "power_limitation_setting",
            5008,
            U16,
            dec(1, 1),
            "%",
            0,
            100,
        ),
    ]
}
