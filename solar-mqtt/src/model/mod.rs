//! Device models: the closed set of supported device types, their register
//! maps and decode parameters. Pure data, no I/O.

pub mod inverter;
pub mod logger;
pub mod meter;

use serde::Deserialize;

use crate::modbus::register::{RegisterKind, RegisterSpec, WordOrder};
use crate::Error;

/// Supported device types. Adding hardware support means adding a variant
/// here plus its register table module; the config `type` string maps onto
/// this enum at load time, so unknown types fail before anything connects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Inverter,
    Meter,
    Logger,
}

/// Per-device parameters that tune a model's register table.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DeviceParams {
    /// Voltage transformer ratio (meter).
    pub pt_ratio: Option<u32>,
    /// Current transformer ratio (meter).
    pub ct_ratio: Option<u32>,
    /// The meter is wired backwards: import/export swap roles and power
    /// readings change sign.
    #[serde(default)]
    pub reverse_connection: bool,
}

impl DeviceKind {
    pub fn manufacturer(&self) -> &'static str {
        match self {
            DeviceKind::Inverter | DeviceKind::Logger => "Sungrow",
            DeviceKind::Meter => "Acrel",
        }
    }

    pub fn model_name(&self) -> &'static str {
        match self {
            DeviceKind::Inverter => "SG series inverter",
            DeviceKind::Meter => "DTSD1352",
            DeviceKind::Logger => "Logger1000",
        }
    }

    /// Sungrow devices transmit multi-word values low word first; the Acrel
    /// meter is big-endian.
    pub fn word_order(&self) -> WordOrder {
        match self {
            DeviceKind::Meter => WordOrder::BigEndian,
            DeviceKind::Inverter | DeviceKind::Logger => WordOrder::Swapped,
        }
    }

    /// Build the register table for a configured device of this kind.
    pub fn registers(&self, params: &DeviceParams) -> crate::Result<Vec<RegisterSpec>> {
        let specs = match self {
            DeviceKind::Inverter => inverter::registers(),
            DeviceKind::Meter => meter::registers(params)?,
            DeviceKind::Logger => logger::registers(),
        };
        let order = self.word_order();
        Ok(specs.into_iter().map(|s| s.word_order(order)).collect())
    }

    /// Key of the register holding the device serial number, used for the
    /// one-shot identity check at startup. Models without one skip the check.
    pub fn identity_key(&self) -> Option<&'static str> {
        match self {
            DeviceKind::Inverter => Some("serial_number"),
            DeviceKind::Meter | DeviceKind::Logger => None,
        }
    }
}

/// Reject register tables with duplicate or overlapping address ranges
/// within one address space.
pub fn validate_registers(kind: DeviceKind, specs: &[RegisterSpec]) -> crate::Result<()> {
    for space in [RegisterKind::Input, RegisterKind::Holding] {
        let mut in_space: Vec<&RegisterSpec> =
            specs.iter().filter(|s| s.kind == space).collect();
        in_space.sort_by_key(|s| s.address);

        for pair in in_space.windows(2) {
            if pair[0].end_address() > pair[1].address {
                return Err(Error::Config(format!(
                    "{kind:?} registers {} and {} overlap at address {}",
                    pair[0].key, pair[1].key, pair[1].address
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    use crate::modbus::register::DataType;

    #[test]
    fn every_model_has_a_valid_register_table() {
        let params = DeviceParams {
            pt_ratio: Some(10),
            ct_ratio: Some(40),
            reverse_connection: false,
        };
        for kind in [DeviceKind::Inverter, DeviceKind::Meter, DeviceKind::Logger] {
            let specs = kind.registers(&params).unwrap();
            assert!(!specs.is_empty(), "{kind:?} table is empty");
            validate_registers(kind, &specs).unwrap();

            let mut keys: Vec<_> = specs.iter().map(|s| s.key).collect();
            keys.sort();
            keys.dedup();
            assert_eq!(keys.len(), specs.len(), "{kind:?} has duplicate keys");
        }
    }

    #[test]
    fn identity_register_exists_where_declared() {
        for kind in [DeviceKind::Inverter, DeviceKind::Meter, DeviceKind::Logger] {
            let params = DeviceParams {
                pt_ratio: Some(1),
                ct_ratio: Some(1),
                reverse_connection: false,
            };
            if let Some(key) = kind.identity_key() {
                let specs = kind.registers(&params).unwrap();
                assert!(specs.iter().any(|s| s.key == key));
            }
        }
    }

    #[test]
    fn overlapping_registers_are_rejected() {
        let specs = vec![
            RegisterSpec::sensor("A", "a", 100, DataType::U32, Decimal::ONE, ""),
            RegisterSpec::sensor("B", "b", 101, DataType::U16, Decimal::ONE, ""),
        ];
        assert!(validate_registers(DeviceKind::Inverter, &specs).is_err());
    }

    #[test]
    fn input_and_holding_spaces_do_not_collide() {
        let specs = vec![
            RegisterSpec::sensor("A", "a", 100, DataType::U16, Decimal::ONE, ""),
            RegisterSpec::sensor("B", "b", 100, DataType::U16, Decimal::ONE, "").holding(),
        ];
        validate_registers(DeviceKind::Inverter, &specs).unwrap();
    }

    #[test]
    fn unknown_device_type_fails_deserialization() {
        assert!(serde_json::from_str::<DeviceKind>(r#""battery""#).is_err());
        assert_eq!(
            serde_json::from_str::<DeviceKind>(r#""meter""#).unwrap(),
            DeviceKind::Meter
        );
    }
}
