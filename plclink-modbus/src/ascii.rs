//! Modbus ASCII framing.
//!
//! Each frame is a `:` followed by the upper-case hex encoding of
//! `unit, function, payload, LRC` and terminated by CR LF. The LRC is the
//! two's complement of the byte sum over `unit, function, payload`.

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

use plclink_framework::{DeviceFamily, Error, RawData, Result};

const FRAME_START: u8 = b':';
const FRAME_END: &[u8] = b"\r\n";

/// Upper bound on a response line; the largest valid frame is well below it.
const MAX_LINE_LEN: usize = 600;

/// Longitudinal redundancy check over the raw (binary) frame bytes.
pub fn lrc(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    (!sum).wrapping_add(1)
}

/// Build a complete ASCII frame.
pub fn encode_frame(unit: u8, function: u8, payload: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(payload.len() + 3);
    raw.push(unit);
    raw.push(function);
    raw.extend_from_slice(payload);
    raw.push(lrc(&raw));

    let mut frame = Vec::with_capacity(raw.len() * 2 + 3);
    frame.push(FRAME_START);
    frame.extend_from_slice(hex::encode_upper(&raw).as_bytes());
    frame.extend_from_slice(FRAME_END);
    frame
}

/// A frame decoded from the wire with its LRC verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub unit: u8,
    pub function: u8,
    pub data: Vec<u8>,
}

/// Decode one line (with or without the trailing CR LF) into a frame.
pub fn decode_frame(line: &[u8]) -> Result<Frame> {
    let start = line
        .iter()
        .position(|b| *b == FRAME_START)
        .ok_or_else(|| Error::decode("ASCII frame has no start character"))?;

    let body = line[start + 1..]
        .strip_suffix(FRAME_END)
        .unwrap_or(&line[start + 1..]);

    let raw = hex::decode(body).map_err(|e| Error::decode(format!("ASCII frame: {}", e)))?;
    let Some((&checksum, content)) = raw.split_last() else {
        return Err(Error::decode("ASCII frame is empty"));
    };
    if content.len() < 2 {
        return Err(Error::decode("ASCII frame too short"));
    }

    let expected = lrc(content);
    if expected != checksum {
        return Err(Error::decode(format!(
            "ASCII frame LRC mismatch: expected {:02X}, got {:02X}",
            expected, checksum
        )));
    }

    Ok(Frame {
        unit: content[0],
        function: content[1],
        data: content[2..].to_vec(),
    })
}

/// Function code used to read a device family.
pub fn function_code(family: DeviceFamily) -> u8 {
    match family {
        DeviceFamily::Coil => 0x01,
        DeviceFamily::DiscreteInput => 0x02,
        DeviceFamily::HoldingRegister => 0x03,
        DeviceFamily::InputRegister => 0x04,
    }
}

/// Name of a Modbus exception code.
pub fn exception_name(code: u8) -> String {
    match code {
        0x01 => "IllegalFunction".to_string(),
        0x02 => "IllegalDataAddress".to_string(),
        0x03 => "IllegalDataValue".to_string(),
        0x04 => "ServerDeviceFailure".to_string(),
        0x05 => "Acknowledge".to_string(),
        0x06 => "ServerDeviceBusy".to_string(),
        0x08 => "MemoryParityError".to_string(),
        0x0A => "GatewayPathUnavailable".to_string(),
        0x0B => "GatewayTargetDevice".to_string(),
        other => format!("Custom({})", other),
    }
}

/// Request/response client for one ASCII-framed serial line.
///
/// One request is in flight at a time; the caller enforces the timeout.
pub struct AsciiClient<T> {
    io: BufReader<T>,
    unit: u8,
}

impl<T> AsciiClient<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: T, unit: u8) -> Self {
        Self {
            io: BufReader::new(io),
            unit,
        }
    }

    /// Read `quantity` items of `family` starting at `address`.
    ///
    /// A Modbus exception is returned as [`RawData::Exception`]. A complete
    /// but invalid response line is a `ProtocolDecode` error and leaves the
    /// line in step for the next request; transport failures are
    /// `Connection` errors.
    pub async fn read(
        &mut self,
        family: DeviceFamily,
        address: u16,
        quantity: u16,
    ) -> Result<RawData> {
        let function = function_code(family);

        let mut payload = [0u8; 4];
        payload[..2].copy_from_slice(&address.to_be_bytes());
        payload[2..].copy_from_slice(&quantity.to_be_bytes());

        let request = encode_frame(self.unit, function, &payload);
        self.io.get_mut().write_all(&request).await?;
        self.io.get_mut().flush().await?;

        let frame = self.read_frame().await?;

        if frame.unit != self.unit {
            return Err(Error::decode(format!(
                "Response from unit {} while talking to unit {}",
                frame.unit, self.unit
            )));
        }

        if frame.function == function | 0x80 {
            let code = frame
                .data
                .first()
                .copied()
                .ok_or_else(|| Error::decode("Exception response without code"))?;
            return Ok(RawData::Exception(exception_name(code)));
        }

        if frame.function != function {
            return Err(Error::decode(format!(
                "Unexpected function code {:#04x} in response to {:#04x}",
                frame.function, function
            )));
        }

        let Some((&byte_count, values)) = frame.data.split_first() else {
            return Err(Error::decode("Response without byte count"));
        };

        let expected = if family.is_bit() {
            quantity.div_ceil(8) as usize
        } else {
            quantity as usize * 2
        };
        if byte_count as usize != values.len() || values.len() != expected {
            return Err(Error::decode(format!(
                "Response carries {} bytes (byte count {}), expected {}",
                values.len(),
                byte_count,
                expected
            )));
        }

        if family.is_bit() {
            let bits = (0..quantity as usize)
                .map(|i| values[i / 8] & (1 << (i % 8)) != 0)
                .collect();
            Ok(RawData::Bits(bits))
        } else {
            let words = values
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            Ok(RawData::Registers(words))
        }
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        let mut line = Vec::new();
        let n = (&mut self.io)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', &mut line)
            .await?;

        if n == 0 {
            return Err(Error::connection("Serial line closed"));
        }
        if !line.ends_with(b"\n") {
            // Framing lost, the rest of the line is still on the wire.
            return Err(Error::connection("ASCII frame not terminated"));
        }

        decode_frame(&line)
    }

    /// Shut down the underlying stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.get_mut().shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn test_lrc() {
        assert_eq!(lrc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0xFB);
        assert_eq!(lrc(&[0x01, 0x03, 0x02, 0x00, 0x0A]), 0xF0);
        assert_eq!(lrc(&[]), 0x00);
    }

    #[test]
    fn test_encode_frame() {
        let frame = encode_frame(1, 0x03, &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(frame, b":010300000001FB\r\n");
    }

    #[test]
    fn test_decode_frame() {
        let frame = decode_frame(b":010302000AF0\r\n").unwrap();
        assert_eq!(frame.unit, 1);
        assert_eq!(frame.function, 0x03);
        assert_eq!(frame.data, vec![0x02, 0x00, 0x0A]);
    }

    #[test]
    fn test_decode_frame_errors() {
        assert!(decode_frame(b"010302000AF0\r\n").is_err());
        assert!(decode_frame(b":010302000AF1\r\n").is_err());
        assert!(decode_frame(b":01030Z\r\n").is_err());
        assert!(decode_frame(b":\r\n").is_err());
    }

    #[test]
    fn test_exception_name() {
        assert_eq!(exception_name(2), "IllegalDataAddress");
        assert_eq!(exception_name(0x42), "Custom(66)");
    }

    #[tokio::test]
    async fn test_read_holding_register() {
        let mock = Builder::new()
            .write(b":010300000001FB\r\n")
            .read(b":010302000AF0\r\n")
            .build();

        let mut client = AsciiClient::new(mock, 1);
        let data = client
            .read(DeviceFamily::HoldingRegister, 0, 1)
            .await
            .unwrap();

        assert_eq!(data, RawData::Registers(vec![0x000A]));
    }

    #[tokio::test]
    async fn test_read_coils() {
        let mock = Builder::new()
            .write(b":010100000003FB\r\n")
            .read(b":01010105F8\r\n")
            .build();

        let mut client = AsciiClient::new(mock, 1);
        let data = client.read(DeviceFamily::Coil, 0, 3).await.unwrap();

        assert_eq!(data, RawData::Bits(vec![true, false, true]));
    }

    #[tokio::test]
    async fn test_read_exception() {
        let mock = Builder::new()
            .write(b":010300000001FB\r\n")
            .read(b":0183027A\r\n")
            .build();

        let mut client = AsciiClient::new(mock, 1);
        let data = client
            .read(DeviceFamily::HoldingRegister, 0, 1)
            .await
            .unwrap();

        assert_eq!(data, RawData::Exception("IllegalDataAddress".to_string()));
    }

    #[tokio::test]
    async fn test_read_wrong_unit() {
        // Unit 2 answering: 02 03 02 00 0A, LRC EF
        let mock = Builder::new()
            .write(b":010300000001FB\r\n")
            .read(b":020302000AEF\r\n")
            .build();

        let mut client = AsciiClient::new(mock, 1);
        let err = client
            .read(DeviceFamily::HoldingRegister, 0, 1)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ProtocolDecode(_)));
    }

    #[tokio::test]
    async fn test_bad_lrc_keeps_line_in_step() {
        let mock = Builder::new()
            .write(b":010300000001FB\r\n")
            .read(b":010302000AF1\r\n")
            .write(b":010300010001FA\r\n")
            .read(b":010302000BEF\r\n")
            .build();

        let mut client = AsciiClient::new(mock, 1);
        let err = client
            .read(DeviceFamily::HoldingRegister, 0, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolDecode(_)));

        let data = client
            .read(DeviceFamily::HoldingRegister, 1, 1)
            .await
            .unwrap();
        assert_eq!(data, RawData::Registers(vec![0x000B]));
    }

    #[tokio::test]
    async fn test_read_line_closed() {
        let mock = Builder::new().write(b":010300000001FB\r\n").build();

        let mut client = AsciiClient::new(mock, 1);
        let err = client
            .read(DeviceFamily::HoldingRegister, 0, 1)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Connection(_)));
    }
}
