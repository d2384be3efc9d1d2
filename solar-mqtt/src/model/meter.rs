//! Acrel DTSD1352 power meter register map. All registers are holding
//! registers; multipliers depend on the configured PT/CT transformer
//! ratios, and a reverse-connected meter swaps import/export roles and
//! negates power readings.

use rust_decimal::Decimal;

use super::DeviceParams;
use crate::modbus::register::{DataType::*, RegisterSpec};
use crate::Error;

fn dec(num: i64, scale: u32) -> Decimal {
    Decimal::new(num, scale)
}

pub fn registers(params: &DeviceParams) -> crate::Result<Vec<RegisterSpec>> {
    let pt = params
        .pt_ratio
        .ok_or_else(|| Error::Config("meter device requires pt_ratio".into()))?;
    let ct = params
        .ct_ratio
        .ok_or_else(|| Error::Config("meter device requires ct_ratio".into()))?;
    let pt = Decimal::from(pt);
    let ct = Decimal::from(ct);
    let sign = if params.reverse_connection {
        Decimal::NEGATIVE_ONE
    } else {
        Decimal::ONE
    };

    let voltage = dec(1, 1) * pt;
    let current = dec(1, 2) * ct;
    let power = dec(1, 3) * pt * ct * sign;
    let apparent = dec(1, 3) * pt * ct;
    let energy = dec(1, 2) * pt * ct;
    let power_factor = dec(1, 3) * sign;

    // Reverse wiring means the registers counting "forward" energy are in
    // fact counting export, and vice versa.
    let (import_addr, export_addr) = if params.reverse_connection {
        (0x0015, 0x000B)
    } else {
        (0x000B, 0x0015)
    };
    let (fwd_reactive_addr, rev_reactive_addr) = if params.reverse_connection {
        (0x0033, 0x0029)
    } else {
        (0x0029, 0x0033)
    };

    let specs = vec![
        RegisterSpec::sensor("Total Grid Import", "total_grid_import", import_addr, I32, energy, "kWh")
            .holding()
            .device_class("energy")
            .state_class("total"),
        RegisterSpec::sensor("Total Grid Export", "total_grid_export", export_addr, I32, energy, "kWh")
            .holding()
            .device_class("energy")
            .state_class("total"),
        RegisterSpec::sensor("Forward Reactive Energy", "forward_reactive_energy", fwd_reactive_addr, I32, energy, "kvarh")
            .holding()
            .device_class("energy"),
        RegisterSpec::sensor("Reverse Reactive Energy", "reverse_reactive_energy", rev_reactive_addr, I32, energy, "kvarh")
            .holding()
            .device_class("energy"),
        RegisterSpec::sensor("Phase A Voltage", "phase_a_voltage", 0x0062, U16, voltage, "V")
            .holding()
            .device_class("voltage")
            .state_class("measurement"),
        RegisterSpec::sensor("Phase B Voltage", "phase_b_voltage", 0x0063, U16, voltage, "V")
            .holding()
            .device_class("voltage")
            .state_class("measurement"),
        RegisterSpec::sensor("Phase C Voltage", "phase_c_voltage", 0x0064, U16, voltage, "V")
            .holding()
            .device_class("voltage")
            .state_class("measurement"),
        RegisterSpec::sensor("Phase A Current", "phase_a_current", 0x0065, U16, current, "A")
            .holding()
            .device_class("current")
            .state_class("measurement"),
        RegisterSpec::sensor("Phase B Current", "phase_b_current", 0x0066, U16, current, "A")
            .holding()
            .device_class("current")
            .state_class("measurement"),
        RegisterSpec::sensor("Phase C Current", "phase_c_current", 0x0067, U16, current, "A")
            .holding()
            .device_class("current")
            .state_class("measurement"),
        RegisterSpec::sensor("Grid Frequency", "grid_frequency", 0x0078, U16, dec(1, 2), "Hz")
            .holding()
            .device_class("frequency")
            .state_class("measurement"),
        RegisterSpec::sensor("A-B Line Voltage", "a_b_line_voltage", 0x0079, U16, voltage, "V")
            .holding()
            .device_class("voltage"),
        RegisterSpec::sensor("B-C Line Voltage", "b_c_line_voltage", 0x007A, U16, voltage, "V")
            .holding()
            .device_class("voltage"),
        RegisterSpec::sensor("C-A Line Voltage", "c_a_line_voltage", 0x007B, U16, voltage, "V")
            .holding()
            .device_class("voltage"),
        RegisterSpec::sensor("Phase A Active Power", "phase_a_active_power", 0x0165, I32, power, "kW")
            .holding()
            .device_class("power")
            .state_class("measurement"),
        RegisterSpec::sensor("Phase B Active Power", "phase_b_active_power", 0x0167, I32, power, "kW")
            .holding()
            .device_class("power")
            .state_class("measurement"),
        RegisterSpec::sensor("Phase C Active Power", "phase_c_active_power", 0x0169, I32, power, "kW")
            .holding()
            .device_class("power")
            .state_class("measurement"),
        RegisterSpec::sensor("Active Power", "active_power", 0x016B, I32, power, "kW")
            .holding()
            .device_class("power")
            .state_class("measurement"),
        RegisterSpec::sensor("Reactive Power", "reactive_power", 0x0173, I32, power, "kvar")
            .holding()
            .device_class("reactive_power")
            .state_class("measurement"),
        RegisterSpec::sensor("Apparent Power", "apparent_power", 0x017B, I32, apparent, "kVA")
            .holding()
            .device_class("apparent_power")
            .state_class("measurement"),
        RegisterSpec::sensor("Power Factor", "power_factor", 0x0180, I16, power_factor, "")
            .holding()
            .device_class("power_factor")
            .state_class("measurement"),
    ];

    Ok(specs)
}
