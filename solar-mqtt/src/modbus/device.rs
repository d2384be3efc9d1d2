use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use itertools::Itertools;
use tracing::debug;

use crate::config::DeviceConfig;
use crate::model::DeviceKind;
use crate::modbus::register::{RegisterKind, RegisterSpec, Value};
use crate::modbus::transport::SharedTransport;
use crate::modbus::UnitId;
use crate::Error;

/// Modbus limits one read exchange to 125 registers.
const MAX_BLOCK_WORDS: u16 = 125;

/// One decoded reading, produced every cycle and forgotten after publishing.
#[derive(Clone, Debug)]
pub struct Measurement {
    pub key: &'static str,
    pub value: Value,
    pub unit: &'static str,
    pub timestamp: SystemTime,
}

/// A configured instance of a device model bound to a transport and a unit
/// id. Immutable after configuration load, apart from the availability flag
/// flipped when the identity check fails.
pub struct Device {
    pub name: String,
    pub serial: Option<String>,
    pub unit: UnitId,
    pub kind: DeviceKind,
    pub registers: Vec<RegisterSpec>,
    address_offset: i8,
    transport: SharedTransport,
    available: AtomicBool,
}

impl Device {
    pub fn new(config: &DeviceConfig, transport: SharedTransport) -> crate::Result<Self> {
        let registers = config.kind.registers(&config.params)?;

        for spec in &registers {
            if offset_address(spec.address, config.address_offset).is_none() {
                return Err(Error::Config(format!(
                    "device {}: address_offset {} puts register {} out of range",
                    config.name, config.address_offset, spec.key
                )));
            }
        }

        Ok(Self {
            name: config.name.clone(),
            serial: config.serial.clone(),
            unit: config.unit,
            kind: config.kind,
            registers,
            address_offset: config.address_offset,
            transport,
            available: AtomicBool::new(true),
        })
    }

    fn wire_address(&self, address: u16) -> crate::Result<u16> {
        offset_address(address, self.address_offset).ok_or_else(|| Error::Decode {
            register: format!("{address}"),
            reason: "address offset out of range".to_owned(),
        })
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    pub fn mark_unavailable(&self) {
        self.available.store(false, Ordering::Relaxed);
    }

    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    pub fn writable_register(&self, key: &str) -> Option<&RegisterSpec> {
        self.registers.iter().find(|s| s.key == key && s.writable())
    }

    /// One-shot serial-number check against the model's identity register.
    /// A mismatch disables the device for the rest of the session.
    pub async fn verify_identity(&self) -> crate::Result<()> {
        let (Some(expected), Some(key)) = (&self.serial, self.kind.identity_key()) else {
            return Ok(());
        };
        let Some(spec) = self.registers.iter().find(|s| s.key == key) else {
            return Ok(());
        };

        let address = self.wire_address(spec.address)?;
        let words = {
            let mut transport = self.transport.lock().await;
            transport.open().await?;
            transport
                .read(self.unit, spec.kind, address, spec.count())
                .await?
        };

        let actual = match spec.decode(&words)? {
            Value::Text(actual) => actual,
            other => other.payload(),
        };

        if actual == *expected {
            Ok(())
        } else {
            self.mark_unavailable();
            Err(Error::IdentityMismatch {
                device: self.name.clone(),
                expected: expected.clone(),
                actual,
            })
        }
    }

    /// Read and decode every register, batching contiguous addresses into
    /// single exchanges. The transport is held for the whole sweep of this
    /// device, so command writes serialize around it.
    pub async fn poll(&self) -> crate::Result<Vec<Measurement>> {
        let blocks = contiguous_blocks(&self.registers);
        let mut measurements = Vec::with_capacity(self.registers.len());

        let mut transport = self.transport.lock().await;
        transport.open().await?;

        for block in blocks {
            let start = self.wire_address(block.start)?;
            let words = transport
                .read(self.unit, block.kind, start, block.count)
                .await?;

            for spec in block.specs {
                let offset = (spec.address - block.start) as usize;
                let end = offset + spec.count() as usize;
                let raw = words.get(offset..end).unwrap_or(&[]);
                let value = match spec.decode(raw) {
                    Ok(value) => value,
                    Err(error) => {
                        debug!(device = %self.name, register = spec.key, %error, "decode failed");
                        Value::Unavailable
                    }
                };
                measurements.push(Measurement {
                    key: spec.key,
                    value,
                    unit: spec.unit,
                    timestamp: SystemTime::now(),
                });
            }
        }

        Ok(measurements)
    }

    /// One write exchange. Retry policy belongs to the caller.
    pub async fn write(&self, spec: &RegisterSpec, words: &[u16]) -> crate::Result<()> {
        let address = self.wire_address(spec.address)?;
        let mut transport = self.transport.lock().await;
        transport.open().await?;
        transport.write(self.unit, address, words).await
    }
}

fn offset_address(address: u16, offset: i8) -> Option<u16> {
    if offset >= 0 {
        address.checked_add(offset as u16)
    } else {
        address.checked_sub(offset.unsigned_abs() as u16)
    }
}

struct Block<'a> {
    kind: RegisterKind,
    start: u16,
    count: u16,
    specs: Vec<&'a RegisterSpec>,
}

/// Merge registers into runs of contiguous addresses within one address
/// space, capped at the protocol's read limit.
fn contiguous_blocks(specs: &[RegisterSpec]) -> Vec<Block<'_>> {
    let mut blocks: Vec<Block> = Vec::new();

    for spec in specs.iter().sorted_by_key(|s| (s.kind, s.address)) {
        match blocks.last_mut() {
            Some(block)
                if block.kind == spec.kind
                    && block.start + block.count == spec.address
                    && block.count + spec.count() <= MAX_BLOCK_WORDS =>
            {
                block.count += spec.count();
                block.specs.push(spec);
            }
            _ => blocks.push(Block {
                kind: spec.kind,
                start: spec.address,
                count: spec.count(),
                specs: vec![spec],
            }),
        }
    }

    blocks
}
