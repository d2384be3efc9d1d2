use std::{io, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_modbus::client::Context as ModbusClient;
use tokio_modbus::prelude::*;
use tracing::{debug, warn};

use crate::config::TransportConfig;
use crate::modbus::register::RegisterKind;
use crate::modbus::{Unit, UnitId};
use tokio_modbus::prelude::Slave;
use crate::Error;

/// Consecutive failed exchanges/opens before the transport is reported as
/// degraded. Purely diagnostic; affected devices are skipped each cycle
/// until the line recovers.
const DEGRADED_AFTER: u32 = 5;

/// A physical line (TCP socket or serial bus) shared by one or more devices.
///
/// One exchange is in flight at a time; callers serialize through the
/// [`SharedTransport`] mutex. The transport never retries: any I/O error or
/// timeout invalidates the connection and the next call must `open()` again.
#[async_trait]
pub trait Transport: Send {
    /// Establish the connection. Idempotent if already open.
    async fn open(&mut self) -> crate::Result<()>;

    /// One read exchange against the given unit.
    async fn read(
        &mut self,
        unit: UnitId,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> crate::Result<Vec<u16>>;

    /// One write exchange against the given unit.
    async fn write(&mut self, unit: UnitId, address: u16, words: &[u16]) -> crate::Result<()>;

    /// Release the connection.
    async fn close(&mut self);

    fn is_open(&self) -> bool;

    fn name(&self) -> &str;
}

/// The per-transport exchange exclusion: at most one in-flight exchange per
/// line, shared between the scheduler and the command handler.
pub type SharedTransport = Arc<Mutex<dyn Transport>>;

/// Connection settings for a Modbus line.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "proto", rename_all = "lowercase")]
pub enum ModbusProto {
    #[cfg(feature = "tcp")]
    Tcp {
        host: String,

        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    #[cfg(feature = "rtu")]
    #[serde(rename_all = "lowercase")]
    Rtu {
        tty: String,
        baud_rate: u32,

        #[serde(default = "default_modbus_data_bits")]
        data_bits: tokio_serial::DataBits,

        #[serde(default = "default_modbus_stop_bits")]
        stop_bits: tokio_serial::StopBits,

        #[serde(default = "default_modbus_flow_control")]
        flow_control: tokio_serial::FlowControl,

        #[serde(default = "default_modbus_parity")]
        parity: tokio_serial::Parity,
    },
}

impl ModbusProto {
    /// Open the underlying client. The slave id is set per exchange, so one
    /// connection serves every unit on the line.
    pub async fn connect(&self) -> crate::Result<ModbusClient> {
        let client = match *self {
            #[cfg(feature = "tcp")]
            ModbusProto::Tcp { ref host, port } => {
                let socket_addr = format!("{}:{}", host, port).parse()?;
                tcp::connect_slave(socket_addr, Unit::broadcast()).await?
            }

            #[cfg(feature = "rtu")]
            ModbusProto::Rtu {
                ref tty,
                baud_rate,
                data_bits,
                stop_bits,
                flow_control,
                parity,
            } => {
                let builder = tokio_serial::new(tty, baud_rate)
                    .data_bits(data_bits)
                    .flow_control(flow_control)
                    .parity(parity)
                    .stop_bits(stop_bits);
                let port = tokio_serial::SerialStream::open(&builder)?;
                rtu::connect_slave(port, Unit::broadcast()).await?
            }
        };
        Ok(client)
    }
}

pub(crate) fn default_modbus_port() -> u16 {
    502
}

#[cfg(feature = "rtu")]
pub(crate) fn default_modbus_data_bits() -> tokio_serial::DataBits {
    tokio_serial::DataBits::Eight
}

#[cfg(feature = "rtu")]
pub(crate) fn default_modbus_stop_bits() -> tokio_serial::StopBits {
    tokio_serial::StopBits::One
}

#[cfg(feature = "rtu")]
pub(crate) fn default_modbus_flow_control() -> tokio_serial::FlowControl {
    tokio_serial::FlowControl::None
}

#[cfg(feature = "rtu")]
pub(crate) fn default_modbus_parity() -> tokio_serial::Parity {
    tokio_serial::Parity::None
}

/// The real transport: a lazily opened `tokio_modbus` client plus the
/// invalidate-on-failure bookkeeping.
pub struct ModbusLink {
    name: String,
    proto: ModbusProto,
    timeout: Duration,
    client: Option<ModbusClient>,
    consecutive_failures: u32,
}

impl ModbusLink {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            name: config.name.clone(),
            proto: config.proto.clone(),
            timeout: config.timeout,
            client: None,
            consecutive_failures: 0,
        }
    }

    pub fn shared(config: &TransportConfig) -> SharedTransport {
        Arc::new(Mutex::new(Self::new(config)))
    }

    /// Invalidate the connection and account the failure.
    fn fail(&mut self, source: io::Error) -> Error {
        self.client = None;
        self.consecutive_failures += 1;
        if self.consecutive_failures == DEGRADED_AFTER {
            warn!(
                transport = %self.name,
                failures = self.consecutive_failures,
                "transport degraded; its devices are skipped until the line recovers"
            );
        }
        Error::Connection {
            transport: self.name.clone(),
            source,
        }
    }
}

fn not_open(name: &str) -> Error {
    Error::Connection {
        transport: name.to_owned(),
        source: io::Error::new(io::ErrorKind::NotConnected, "transport not open"),
    }
}

#[async_trait]
impl Transport for ModbusLink {
    async fn open(&mut self) -> crate::Result<()> {
        if self.client.is_some() {
            return Ok(());
        }

        let result = tokio::time::timeout(self.timeout, self.proto.connect()).await;
        match result {
            Err(_) => Err(self.fail(io::Error::new(
                io::ErrorKind::TimedOut,
                "connect timed out",
            ))),
            Ok(Err(error)) => {
                let source = match error {
                    Error::IOError(e) => e,
                    other => io::Error::new(io::ErrorKind::Other, other.to_string()),
                };
                Err(self.fail(source))
            }
            Ok(Ok(client)) => {
                debug!(transport = %self.name, "connected");
                self.client = Some(client);
                self.consecutive_failures = 0;
                Ok(())
            }
        }
    }

    async fn read(
        &mut self,
        unit: UnitId,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> crate::Result<Vec<u16>> {
        let client = self.client.as_mut().ok_or_else(|| not_open(&self.name))?;
        client.set_slave(Slave(unit));

        let exchange = match kind {
            RegisterKind::Input => client.read_input_registers(address, count),
            RegisterKind::Holding => client.read_holding_registers(address, count),
        };

        let result = tokio::time::timeout(self.timeout, exchange).await;
        match result {
            Err(_) => Err(self.fail(io::Error::new(
                io::ErrorKind::TimedOut,
                "read timed out",
            ))),
            Ok(Err(error)) => Err(self.fail(error)),
            Ok(Ok(words)) => {
                self.consecutive_failures = 0;
                Ok(words)
            }
        }
    }

    async fn write(&mut self, unit: UnitId, address: u16, words: &[u16]) -> crate::Result<()> {
        let client = self.client.as_mut().ok_or_else(|| not_open(&self.name))?;
        client.set_slave(Slave(unit));

        let result =
            tokio::time::timeout(self.timeout, client.write_multiple_registers(address, words))
                .await;
        match result {
            Err(_) => Err(self.fail(io::Error::new(
                io::ErrorKind::TimedOut,
                "write timed out",
            ))),
            Ok(Err(error)) => Err(self.fail(error)),
            Ok(Ok(())) => {
                self.consecutive_failures = 0;
                Ok(())
            }
        }
    }

    async fn close(&mut self) {
        // Dropping the client closes the socket or releases the tty.
        self.client = None;
    }

    fn is_open(&self) -> bool {
        self.client.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
