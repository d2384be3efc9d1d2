use std::fmt;

use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::Serialize;

use crate::Error;

/// Which Modbus address space a register lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    /// Read-only input registers (function code 04).
    Input,
    /// Read/write holding registers (function code 03/16).
    Holding,
}

/// Raw data type held by a register group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    U16,
    I16,
    U32,
    I32,
    /// A single bit of a 16-bit register, decoded to 0/1.
    Bit(u8),
    /// UTF-8 text packed two bytes per word, fixed word length.
    Utf8(u8),
}

impl DataType {
    /// Number of 16-bit words occupied on the wire.
    pub fn words(&self) -> u16 {
        use DataType::*;
        match self {
            U16 | I16 | Bit(_) => 1,
            U32 | I32 => 2,
            Utf8(len) => *len as u16,
        }
    }
}

/// Word order for multi-word values. Sungrow devices transmit the low word
/// first; the Acrel meter is plain big-endian.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WordOrder {
    #[default]
    BigEndian,
    /// Low word first, high word second.
    Swapped,
}

/// How the entity is announced to the consuming system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Sensor,
    Number,
    Select,
    Switch,
}

impl EntityKind {
    pub fn component(&self) -> &'static str {
        match self {
            EntityKind::Sensor => "sensor",
            EntityKind::Number => "number",
            EntityKind::Select => "select",
            EntityKind::Switch => "switch",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// A decoded register value. `Unavailable` is deliberately distinct from any
/// numeric value so that "no data" sentinels never publish as zero.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Number(Decimal),
    Text(String),
    Unavailable,
}

impl Value {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Value::Unavailable)
    }

    /// The payload published on the entity's state topic.
    pub fn payload(&self) -> String {
        match self {
            Value::Number(n) => n.normalize().to_string(),
            Value::Text(s) => s.clone(),
            Value::Unavailable => "unavailable".to_owned(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.payload())
    }
}

/// Immutable description of one register group of a device model: where it
/// lives, how to decode it, and how it is presented as an entity.
#[derive(Clone, Debug)]
pub struct RegisterSpec {
    pub name: &'static str,
    pub key: &'static str,
    pub address: u16,
    pub kind: RegisterKind,
    pub dtype: DataType,
    pub word_order: WordOrder,
    pub scale: Decimal,
    pub unit: &'static str,
    pub device_class: Option<&'static str>,
    pub state_class: Option<&'static str>,
    pub entity: EntityKind,
    pub access: Access,
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
    /// Label → raw word mapping for select/switch entities.
    pub options: Vec<(&'static str, u16)>,
    /// Raw pattern some devices return when a reading is not present.
    pub sentinel: Option<u64>,
}

impl RegisterSpec {
    pub fn sensor(
        name: &'static str,
        key: &'static str,
        address: u16,
        dtype: DataType,
        scale: Decimal,
        unit: &'static str,
    ) -> Self {
        Self {
            name,
            key,
            address,
            kind: RegisterKind::Input,
            dtype,
            word_order: WordOrder::default(),
            scale,
            unit,
            device_class: None,
            state_class: None,
            entity: EntityKind::Sensor,
            access: Access::ReadOnly,
            min: None,
            max: None,
            options: Vec::new(),
            sentinel: None,
        }
    }

    pub fn number(
        name: &'static str,
        key: &'static str,
        address: u16,
        dtype: DataType,
        scale: Decimal,
        unit: &'static str,
        min: i64,
        max: i64,
    ) -> Self {
        Self {
            kind: RegisterKind::Holding,
            entity: EntityKind::Number,
            access: Access::ReadWrite,
            min: Some(Decimal::from(min)),
            max: Some(Decimal::from(max)),
            ..Self::sensor(name, key, address, dtype, scale, unit)
        }
    }

    pub fn switch(
        name: &'static str,
        key: &'static str,
        address: u16,
        on: u16,
        off: u16,
    ) -> Self {
        Self {
            kind: RegisterKind::Holding,
            entity: EntityKind::Switch,
            access: Access::ReadWrite,
            options: vec![("ON", on), ("OFF", off)],
            ..Self::sensor(name, key, address, DataType::U16, Decimal::ONE, "")
        }
    }

    pub fn select(
        name: &'static str,
        key: &'static str,
        address: u16,
        options: Vec<(&'static str, u16)>,
    ) -> Self {
        Self {
            kind: RegisterKind::Holding,
            entity: EntityKind::Select,
            access: Access::ReadWrite,
            options,
            ..Self::sensor(name, key, address, DataType::U16, Decimal::ONE, "")
        }
    }

    pub fn holding(mut self) -> Self {
        self.kind = RegisterKind::Holding;
        self
    }

    pub fn device_class(mut self, class: &'static str) -> Self {
        self.device_class = Some(class);
        self
    }

    pub fn state_class(mut self, class: &'static str) -> Self {
        self.state_class = Some(class);
        self
    }

    pub fn sentinel(mut self, raw: u64) -> Self {
        self.sentinel = Some(raw);
        self
    }

    pub fn word_order(mut self, order: WordOrder) -> Self {
        self.word_order = order;
        self
    }

    pub fn count(&self) -> u16 {
        self.dtype.words()
    }

    /// One past the last address occupied by this register group.
    pub fn end_address(&self) -> u16 {
        self.address + self.count()
    }

    pub fn writable(&self) -> bool {
        self.access == Access::ReadWrite
    }

    /// Decode a raw register read into a typed, scaled value. Pure: word
    /// assembly per word order, sentinel check, sign extension, scale.
    pub fn decode(&self, words: &[u16]) -> crate::Result<Value> {
        let count = self.count() as usize;
        if words.len() < count {
            return Err(Error::Decode {
                register: self.key.to_owned(),
                reason: format!("expected {} words, got {}", count, words.len()),
            });
        }
        let words = &words[..count];

        match self.dtype {
            DataType::Utf8(_) => {
                let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
                let text = String::from_utf8_lossy(&bytes)
                    .trim_end_matches(['\0', ' '])
                    .to_owned();
                Ok(Value::Text(text))
            }
            DataType::Bit(bit) => Ok(Value::Number(Decimal::from((words[0] >> bit) & 1))),
            _ => {
                let raw = assemble(words, self.word_order);
                if self.sentinel == Some(raw) {
                    return Ok(Value::Unavailable);
                }
                let magnitude = match self.dtype {
                    DataType::U16 => Decimal::from(raw as u16),
                    DataType::I16 => Decimal::from(raw as u16 as i16),
                    DataType::U32 => Decimal::from(raw as u32),
                    DataType::I32 => Decimal::from(raw as u32 as i32),
                    DataType::Bit(_) | DataType::Utf8(_) => unreachable!(),
                };
                Ok(Value::Number((magnitude * self.scale).normalize()))
            }
        }
    }

    /// Encode a scaled value into raw register words: the inverse of
    /// [`RegisterSpec::decode`] for numeric registers.
    pub fn encode(&self, value: Decimal) -> crate::Result<Vec<u16>> {
        let decode_err = |reason: String| Error::Decode {
            register: self.key.to_owned(),
            reason,
        };

        let raw = (value / self.scale).round();
        let raw = raw
            .to_i64()
            .ok_or_else(|| decode_err(format!("value {value} out of range")))?;

        match self.dtype {
            DataType::U16 => {
                let raw = u16::try_from(raw)
                    .map_err(|_| decode_err(format!("value {value} does not fit u16")))?;
                Ok(vec![raw])
            }
            DataType::I16 => {
                let raw = i16::try_from(raw)
                    .map_err(|_| decode_err(format!("value {value} does not fit i16")))?;
                Ok(vec![raw as u16])
            }
            DataType::U32 => {
                let raw = u32::try_from(raw)
                    .map_err(|_| decode_err(format!("value {value} does not fit u32")))?;
                Ok(split(raw, self.word_order))
            }
            DataType::I32 => {
                let raw = i32::try_from(raw)
                    .map_err(|_| decode_err(format!("value {value} does not fit i32")))?;
                Ok(split(raw as u32, self.word_order))
            }
            DataType::Bit(_) | DataType::Utf8(_) => {
                Err(decode_err("register type is not writable".to_owned()))
            }
        }
    }
}

fn assemble(words: &[u16], order: WordOrder) -> u64 {
    match (words, order) {
        ([w], _) => *w as u64,
        ([hi, lo], WordOrder::BigEndian) => ((*hi as u64) << 16) | *lo as u64,
        ([lo, hi], WordOrder::Swapped) => ((*hi as u64) << 16) | *lo as u64,
        _ => words
            .iter()
            .fold(0u64, |acc, w| (acc << 16) | *w as u64),
    }
}

fn split(raw: u32, order: WordOrder) -> Vec<u16> {
    let hi = (raw >> 16) as u16;
    let lo = raw as u16;
    match order {
        WordOrder::BigEndian => vec![hi, lo],
        WordOrder::Swapped => vec![lo, hi],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    fn dec(num: i64, scale: u32) -> Decimal {
        Decimal::new(num, scale)
    }

    #[test]
    fn decodes_u16_with_scale() {
        let spec = RegisterSpec::sensor("Active Power", "active_power", 5000, DataType::U16, dec(1, 1), "kW");
        assert_eq!(spec.decode(&[150]).unwrap(), Value::Number(dec(15, 0)));
    }

    #[test]
    fn decodes_negative_i16() {
        let spec = RegisterSpec::sensor("Temp", "temp", 5008, DataType::I16, dec(1, 1), "°C");
        // -25.3 °C as a raw signed word
        assert_eq!(
            spec.decode(&[(-253i16) as u16]).unwrap(),
            Value::Number(dec(-253, 1))
        );
    }

    #[test]
    fn decodes_u32_big_endian() {
        let spec = RegisterSpec::sensor("Energy", "energy", 10, DataType::U32, Decimal::ONE, "kWh");
        assert_eq!(
            spec.decode(&[0x0001, 0x86A0]).unwrap(),
            Value::Number(Decimal::from(100_000))
        );
    }

    #[test]
    fn decodes_u32_word_swapped() {
        let spec = RegisterSpec::sensor("Energy", "energy", 10, DataType::U32, Decimal::ONE, "kWh")
            .word_order(WordOrder::Swapped);
        assert_eq!(
            spec.decode(&[0x86A0, 0x0001]).unwrap(),
            Value::Number(Decimal::from(100_000))
        );
    }

    #[test]
    fn decodes_i32_sign_extension() {
        let spec = RegisterSpec::sensor("Power", "power", 10, DataType::I32, Decimal::ONE, "W");
        assert_eq!(
            spec.decode(&[0xFFFF, 0xFFFE]).unwrap(),
            Value::Number(Decimal::from(-2))
        );
    }

    #[test]
    fn sentinel_decodes_to_unavailable_not_zero() {
        let spec = RegisterSpec::sensor("Temp", "temp", 5008, DataType::I16, dec(1, 1), "°C")
            .sentinel(0x7FFF);
        assert_eq!(spec.decode(&[0x7FFF]).unwrap(), Value::Unavailable);
        // neighbouring values still decode normally
        assert_eq!(spec.decode(&[0x7FFE]).unwrap(), Value::Number(dec(0x7FFE, 1)));
    }

    #[test]
    fn decodes_utf8_and_trims_padding() {
        let spec = RegisterSpec::sensor("Serial", "serial_number", 4990, DataType::Utf8(5), Decimal::ONE, "");
        // "A229" + trailing NULs
        let words = [0x4132, 0x3239, 0x0000, 0x0000, 0x0000];
        assert_eq!(spec.decode(&words).unwrap(), Value::Text("A229".to_owned()));
    }

    #[test]
    fn decodes_single_bit() {
        let spec = RegisterSpec::sensor("Input", "digital_input", 8021, DataType::Bit(1), Decimal::ONE, "");
        assert_eq!(spec.decode(&[0b10]).unwrap(), Value::Number(Decimal::ONE));
        assert_eq!(spec.decode(&[0b01]).unwrap(), Value::Number(Decimal::ZERO));
    }

    #[test]
    fn short_read_is_a_decode_error() {
        let spec = RegisterSpec::sensor("Energy", "energy", 10, DataType::U32, Decimal::ONE, "kWh");
        assert!(matches!(
            spec.decode(&[0x0001]),
            Err(crate::Error::Decode { .. })
        ));
    }

    #[test]
    fn encode_is_the_inverse_of_decode() {
        let specs = [
            RegisterSpec::number("Limit", "limit", 5008, DataType::U16, dec(1, 1), "%", 0, 100),
            RegisterSpec::number("Gradient", "gradient", 31201, DataType::U16, Decimal::ONE, "%", 0, 6000),
            RegisterSpec::number("Setpoint", "setpoint", 5077, DataType::I32, Decimal::ONE, "W", -30000, 30000)
                .word_order(WordOrder::Swapped),
        ];
        let values = [dec(155, 1), Decimal::from(42), Decimal::from(-1200)];

        for (spec, value) in specs.iter().zip(values) {
            let words = spec.encode(value).unwrap();
            assert_eq!(spec.decode(&words).unwrap(), Value::Number(value), "{}", spec.key);
        }
    }

    #[test]
    fn encode_rejects_out_of_range_values() {
        let spec = RegisterSpec::number("Limit", "limit", 5008, DataType::U16, Decimal::ONE, "%", 0, 100);
        assert!(spec.encode(Decimal::from(65536)).is_err());
        assert!(spec.encode(Decimal::from(-1)).is_err());
    }

    #[test]
    fn unavailable_payload_is_literal() {
        assert_eq!(Value::Unavailable.payload(), "unavailable");
        assert_eq!(Value::Number(dec(150, 1)).payload(), "15");
    }
}
