//! Modbus realization of the protocol adapter.
//!
//! TCP and RTU go through `tokio-modbus`; ASCII uses the framed client in
//! [`crate::ascii`]. Every connect and every read is bounded by
//! [`COMMUNICATION_TIMEOUT`]. A transport failure or timeout drops the
//! connection so the next cycle reconnects. A response that arrives intact
//! but does not match its request only marks that request bad.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio_modbus::client::{Client, Context, Reader};
use tokio_modbus::prelude::*;
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};
use tracing::{debug, warn};

use plclink_framework::{
    DeviceFamily, Error, ErrorKind, LinkValue, ProtocolAdapter, RawData, RawResult, ReadKey,
    ReadRequest, Result, TypedValue,
};

use crate::ascii::AsciiClient;
use crate::config::{ConnectionConfig, ModbusLinkConfig};

/// Fixed bound on connecting and on each individual read.
pub const COMMUNICATION_TIMEOUT: Duration = Duration::from_millis(2000);

/// Resolved serial line settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl SerialSettings {
    /// Line settings for a serial connection, `None` for TCP.
    ///
    /// Parity `none` uses 2 stop bits, any other parity 1. ASCII framing
    /// always uses 7 data bits.
    pub fn from_connection(connection: &ConnectionConfig) -> Option<Self> {
        let (port, baud_rate, data_bits, parity) = match connection {
            ConnectionConfig::Tcp { .. } => return None,
            ConnectionConfig::Rtu {
                port,
                baud_rate,
                data_bits,
                parity,
            } => (port, *baud_rate, data_bits_from(*data_bits), parity),
            ConnectionConfig::Ascii {
                port,
                baud_rate,
                parity,
            } => (port, *baud_rate, DataBits::Seven, parity),
        };

        let parity = match parity.to_lowercase().as_str() {
            "even" => Parity::Even,
            "odd" => Parity::Odd,
            _ => Parity::None,
        };

        let stop_bits = if parity == Parity::None {
            StopBits::Two
        } else {
            StopBits::One
        };

        Some(Self {
            port: port.clone(),
            baud_rate,
            data_bits,
            parity,
            stop_bits,
        })
    }

    fn open(&self) -> Result<SerialStream> {
        let builder = tokio_serial::new(&self.port, self.baud_rate)
            .data_bits(self.data_bits)
            .parity(self.parity)
            .stop_bits(self.stop_bits)
            .timeout(COMMUNICATION_TIMEOUT);

        SerialStream::open(&builder)
            .map_err(|e| Error::connection(format!("Serial open failed on {}: {}", self.port, e)))
    }
}

fn data_bits_from(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

/// An open connection.
enum Transport {
    /// TCP or RTU through `tokio-modbus`.
    Context(Context),
    /// ASCII-framed serial line.
    Ascii(AsciiClient<SerialStream>),
}

impl Transport {
    async fn read(&mut self, key: ReadKey) -> Result<RawData> {
        match self {
            Transport::Context(ctx) => read_context(ctx, key).await,
            Transport::Ascii(client) => client.read(key.family, key.address, key.quantity).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Transport::Context(ctx) => {
                ctx.disconnect().await?;
                Ok(())
            }
            Transport::Ascii(client) => client.shutdown().await,
        }
    }
}

async fn read_context(ctx: &mut Context, key: ReadKey) -> Result<RawData> {
    let ReadKey {
        family,
        address,
        quantity,
    } = key;

    let response = match family {
        DeviceFamily::Coil => ctx
            .read_coils(address, quantity)
            .await
            .map(|r| r.map(RawData::Bits)),
        DeviceFamily::DiscreteInput => ctx
            .read_discrete_inputs(address, quantity)
            .await
            .map(|r| r.map(RawData::Bits)),
        DeviceFamily::HoldingRegister => ctx
            .read_holding_registers(address, quantity)
            .await
            .map(|r| r.map(RawData::Registers)),
        DeviceFamily::InputRegister => ctx
            .read_input_registers(address, quantity)
            .await
            .map(|r| r.map(RawData::Registers)),
    };

    match response {
        Ok(Ok(data)) => Ok(data),
        Ok(Err(exception)) => Ok(RawData::Exception(format!("{:?}", exception))),
        Err(tokio_modbus::Error::Protocol(e)) => {
            Err(Error::decode(format!("Read {} failed: {}", key, e)))
        }
        Err(e) => Err(Error::connection(format!("Read {} failed: {}", key, e))),
    }
}

/// Issue every request of the batch in order, each under the fixed timeout.
async fn read_all(transport: &mut Transport, batch: &[ReadRequest]) -> Result<Vec<RawResult>> {
    let mut results = Vec::with_capacity(batch.len());

    for request in batch {
        let read = tokio::time::timeout(COMMUNICATION_TIMEOUT, transport.read(request.key))
            .await
            .map_err(|_| Error::ReadTimeout {
                timeout_ms: COMMUNICATION_TIMEOUT.as_millis() as u64,
            })?;

        let data = match read {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::ProtocolDecode => {
                warn!(key = %request.key, error = %e, "Malformed response");
                RawData::Malformed(e.to_string())
            }
            Err(e) => return Err(e),
        };

        if let RawData::Exception(exception) = &data {
            debug!(key = %request.key, exception = %exception, "Device returned exception");
        }

        results.push(RawResult {
            key: request.key,
            data,
        });
    }

    Ok(results)
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let lookup = tokio::net::lookup_host((host, port));
    let mut addrs = tokio::time::timeout(COMMUNICATION_TIMEOUT, lookup)
        .await
        .map_err(|_| Error::connection(format!("Resolving {} timed out", host)))?
        .map_err(|e| Error::connection(format!("Invalid address {}:{}: {}", host, port, e)))?;

    addrs
        .next()
        .ok_or_else(|| Error::connection(format!("No address found for {}", host)))
}

async fn open_transport(connection: &ConnectionConfig, unit_id: u8) -> Result<Transport> {
    let slave = Slave(unit_id);

    if let ConnectionConfig::Tcp { host, port } = connection {
        let addr = resolve(host, *port).await?;
        let ctx = tokio::time::timeout(COMMUNICATION_TIMEOUT, tcp::connect_slave(addr, slave))
            .await
            .map_err(|_| Error::connection(format!("Connection to {} timed out", addr)))?
            .map_err(|e| Error::connection(format!("Connection to {} failed: {}", addr, e)))?;
        return Ok(Transport::Context(ctx));
    }

    let settings = SerialSettings::from_connection(connection)
        .ok_or_else(|| Error::connection("Not a serial connection"))?;
    debug!(
        port = %settings.port,
        baud_rate = settings.baud_rate,
        data_bits = ?settings.data_bits,
        parity = ?settings.parity,
        stop_bits = ?settings.stop_bits,
        "Opening serial line"
    );
    let serial = settings.open()?;

    Ok(match connection {
        ConnectionConfig::Ascii { .. } => Transport::Ascii(AsciiClient::new(serial, unit_id)),
        _ => Transport::Context(rtu::attach_slave(serial, slave)),
    })
}

/// Protocol adapter for one Modbus link.
pub struct ModbusAdapter {
    name: String,
    connection: ConnectionConfig,
    unit_id: u8,
    transport: Option<Transport>,
}

impl ModbusAdapter {
    pub fn new(config: &ModbusLinkConfig) -> Self {
        Self {
            name: format!("modbus-{}", config.connection.kind()),
            connection: config.connection.clone(),
            unit_id: config.unit_id,
            transport: None,
        }
    }
}

#[async_trait]
impl ProtocolAdapter for ModbusAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, _family: DeviceFamily) -> bool {
        true
    }

    fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    async fn connect(&mut self) -> Result<()> {
        let transport = open_transport(&self.connection, self.unit_id).await?;
        debug!(connection = %self.connection, unit_id = self.unit_id, "Modbus connection open");
        self.transport = Some(transport);
        Ok(())
    }

    async fn read_batch(&mut self, batch: &[ReadRequest]) -> Result<Vec<RawResult>> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(Error::connection("Not connected"));
        };

        let result = read_all(transport, batch).await;
        if result.is_err() {
            // The response stream may be out of step; start over next cycle.
            self.transport = None;
        }
        result
    }

    fn decode(&self, raw: &RawResult) -> Result<LinkValue> {
        decode_raw(raw)
    }

    async fn close(&mut self) -> Result<()> {
        match self.transport.take() {
            Some(mut transport) => {
                if let Err(e) = transport.close().await {
                    warn!(connection = %self.connection, error = %e, "Error while disconnecting");
                }
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Canonical text of a single bit.
pub fn bit_text(bit: bool) -> &'static str {
    if bit { "1" } else { "0" }
}

/// Canonical text of a single register.
pub fn register_text(word: u16) -> String {
    format!("0x{:04X}", word)
}

/// Decode a raw response into its canonical text and typed value.
///
/// Multi-element values join their elements with `,`.
pub fn decode_raw(raw: &RawResult) -> Result<LinkValue> {
    let key = raw.key;
    let expected = key.quantity as usize;

    match &raw.data {
        RawData::Exception(exception) => Err(Error::decode(format!(
            "{} answered with exception {}",
            key, exception
        ))),
        RawData::Malformed(reason) => Err(Error::decode(reason.clone())),
        RawData::Bits(bits) if key.family.is_bit() && bits.len() == expected => {
            if let [bit] = bits.as_slice() {
                return Ok(LinkValue::new(bit_text(*bit), TypedValue::Bool(*bit)));
            }
            let text = bits.iter().map(|b| bit_text(*b)).collect::<Vec<_>>().join(",");
            Ok(LinkValue::new(text, TypedValue::Bits(bits.clone())))
        }
        RawData::Registers(words) if !key.family.is_bit() && words.len() == expected => {
            if let [word] = words.as_slice() {
                return Ok(LinkValue::new(register_text(*word), TypedValue::Register(*word)));
            }
            let text = words
                .iter()
                .map(|w| register_text(*w))
                .collect::<Vec<_>>()
                .join(",");
            Ok(LinkValue::new(text, TypedValue::Registers(words.clone())))
        }
        RawData::Bits(bits) => Err(Error::decode(format!(
            "{}: unexpected {} bit(s)",
            key,
            bits.len()
        ))),
        RawData::Registers(words) => Err(Error::decode(format!(
            "{}: unexpected {} register(s)",
            key,
            words.len()
        ))),
    }
}
