//! Sungrow plant logger (Logger1000/3000) register map: fleet counters and
//! digital inputs exposed by the data logger itself, usually at unit 247.

use rust_decimal::Decimal;

use crate::modbus::register::{DataType::*, RegisterSpec};

pub fn registers() -> Vec<RegisterSpec> {
    let one = Decimal::ONE;
    vec![
        RegisterSpec::sensor("Device Type Code", "device_type_code", 8000, U16, one, ""),
        RegisterSpec::sensor("Protocol Number", "protocol_number", 8001, U32, one, ""),
        RegisterSpec::sensor(
            "Communication Protocol Version",
            "communication_protocol_version",
            8003,
            U32,
            one,
            "",
        ),
        RegisterSpec::sensor("Total Devices Connected", "total_devices_connected", 8005, U16, one, ""),
        RegisterSpec::sensor("Total Faulty Devices", "total_faulty_devices", 8006, U16, one, ""),
        RegisterSpec::sensor("Digital Input State", "digital_input_state", 8021, Bit(1), one, ""),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::register::{Access, Value};

    #[test]
    fn logger_registers_are_read_only() {
        assert!(registers().iter().all(|s| s.access == Access::ReadOnly));
    }

    #[test]
    fn digital_input_decodes_its_bit() {
        let spec = registers()
            .into_iter()
            .find(|s| s.key == "digital_input_state")
            .unwrap();
        assert_eq!(spec.decode(&[0b0010]).unwrap(), Value::Number(Decimal::ONE));
        assert_eq!(spec.decode(&[0b1101]).unwrap(), Value::Number(Decimal::ZERO));
    }
}
