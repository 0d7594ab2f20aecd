use tokio_util::bytes::Buf;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Largest register count the Access controller accepts in a single read,
/// derived from its modbus frame size limit.
///
/// Asking for more is a caller bug, not a transport condition.
pub const MAX_REGISTERS_PER_REQUEST: u16 = 47;

/// Interpret a raw register word as a two's-complement 16-bit value.
pub fn word_to_signed(word: u16) -> i16 {
    word as i16
}

/// Inverse of [`word_to_signed`] for writes: negative values wrap into the
/// upper half of the u16 range.
pub fn word_from_signed(value: i16) -> u16 {
    value as u16
}

#[derive(Debug, Clone, Copy)]
pub struct Request {
    pub device_id: u8,
    pub transaction_id: u16,
    pub operation: Operation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Function code 0x04, the freely readable register class.
    ReadInputs { address: u16, count: u16 },
    /// Function code 0x03, the settings register class.
    ReadHoldings { address: u16, count: u16 },
    /// Function code 0x06.
    WriteHolding { address: u16, value: u16 },
    /// Function code 0x05.
    WriteCoil { address: u16, on: bool },
}

impl Operation {
    fn function_code(&self) -> u8 {
        match self {
            Operation::ReadInputs { .. } => 4,
            Operation::ReadHoldings { .. } => 3,
            Operation::WriteHolding { .. } => 6,
            Operation::WriteCoil { .. } => 5,
        }
    }
}

#[derive(Debug)]
pub struct Response {
    pub device_id: u8,
    pub transaction_id: u16,
    pub kind: ResponseKind,
}

impl Response {
    pub fn exception_code(&self) -> Option<u8> {
        match &self.kind {
            ResponseKind::Exception(c) => Some(*c),
            ResponseKind::Words { .. } => None,
            ResponseKind::WriteEcho { .. } => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResponseKind {
    /// The controller's own error reply (illegal address, busy, ...).
    Exception(u8),
    /// Register contents for a read, in request address order.
    Words(Vec<u16>),
    /// Echo of a single-register or coil write.
    WriteEcho { address: u16, value: u16 },
}

pub struct ModbusTCPCodec {}

impl Encoder<&Request> for ModbusTCPCodec {
    type Error = std::io::Error;
    fn encode(
        &mut self,
        req: &Request,
        dst: &mut tokio_util::bytes::BytesMut,
    ) -> Result<(), Self::Error> {
        dst.extend(req.transaction_id.to_be_bytes());
        // Protocol id 0, then the remaining frame length (unit + fc + 4 payload bytes).
        dst.extend(&[0, 0, 0, 6, req.device_id, req.operation.function_code()]);
        let (a, b) = match req.operation {
            Operation::ReadInputs { address, count } => (address, count),
            Operation::ReadHoldings { address, count } => (address, count),
            Operation::WriteHolding { address, value } => (address, value),
            Operation::WriteCoil { address, on } => (address, if on { 0xFF00 } else { 0x0000 }),
        };
        dst.extend(a.to_be_bytes());
        dst.extend(b.to_be_bytes());
        trace!(message="sending encoded", buffer=?dst);
        Ok(())
    }
}

impl Decoder for ModbusTCPCodec {
    type Item = Response;
    type Error = std::io::Error;
    fn decode(
        &mut self,
        src: &mut tokio_util::bytes::BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            trace!(message="attempt at decoding", buffer=?src);
            if src.len() < 8 {
                return Ok(None);
            }
            let Some((tr_id_buffer, remainder)) = src.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let transaction_id = u16::from_be_bytes(*tr_id_buffer);
            let Some((proto_buffer, remainder)) = remainder.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let proto = u16::from_be_bytes(*proto_buffer);
            if proto != 0 {
                // Not a frame boundary; resynchronize one byte at a time.
                src.advance(1);
                continue;
            }
            let Some((length_buffer, remainder)) = remainder.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let required_length = u16::from_be_bytes(*length_buffer);
            let Some((data, _)) = remainder.split_at_checked(required_length.into()) else {
                return Ok(None);
            };
            let [device_id, function_code, payload @ ..] = data else {
                src.advance(1);
                continue;
            };
            let (device_id, function_code) = (*device_id, *function_code);
            if function_code > 0x80 {
                let code = payload.first().copied().unwrap_or(0);
                src.advance(6 + usize::from(required_length));
                return Ok(Some(Response {
                    transaction_id,
                    device_id,
                    kind: ResponseKind::Exception(code),
                }));
            }
            let kind = match function_code {
                3 | 4 => {
                    // The first payload byte repeats the byte count. The TCP
                    // header length already tells us the same thing, so decode
                    // from the frame length instead of trusting it.
                    let Some((_count, mut words_data)) = payload.split_first() else {
                        src.advance(1);
                        continue;
                    };
                    let mut values = Vec::with_capacity(words_data.len() / 2);
                    while let Some((word, rest)) = words_data.split_first_chunk::<2>() {
                        values.push(u16::from_be_bytes(*word));
                        words_data = rest;
                    }
                    ResponseKind::Words(values)
                }
                5 | 6 => {
                    let Some(([a, b, c, d], _)) = payload.split_first_chunk::<4>() else {
                        src.advance(1);
                        continue;
                    };
                    ResponseKind::WriteEcho {
                        address: u16::from_be_bytes([*a, *b]),
                        value: u16::from_be_bytes([*c, *d]),
                    }
                }
                _ => {
                    src.advance(1);
                    continue;
                }
            };
            src.advance(6 + usize::from(required_length));
            return Ok(Some(Response { transaction_id, device_id, kind }));
        }
    }
}
