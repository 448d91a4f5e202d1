use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

const READ_HOLDING_REGISTERS: u8 = 3;
const WRITE_MULTIPLE_REGISTERS: u8 = 16;
const EXCEPTION_FLAG: u8 = 0x80;
/// Transaction id, protocol id and length.
const MBAP_PREFIX: usize = 6;

/// Largest amount of registers a single "write multiple registers" request may carry.
pub const MAX_WRITE_COUNT: usize = 123;

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub device_id: u8,
    pub transaction_id: u16,
    pub operation: Operation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    GetHoldings { address: u16, count: u16 },
    SetHoldings { address: u16, values: Vec<u16> },
}

#[derive(Debug, PartialEq)]
pub struct Response {
    pub device_id: u8,
    pub transaction_id: u16,
    pub kind: ResponseKind,
}

impl Response {
    pub fn exception_code(&self) -> Option<u8> {
        match &self.kind {
            ResponseKind::ErrorCode(c) => Some(*c),
            ResponseKind::GetHoldings { .. } | ResponseKind::SetHoldings { .. } => None,
        }
    }

    pub fn is_server_busy(&self) -> bool {
        self.exception_code() == Some(6)
    }
}

#[derive(Debug, PartialEq)]
pub enum ResponseKind {
    ErrorCode(u8),
    GetHoldings { values: Vec<u16> },
    SetHoldings { address: u16, count: u16 },
}

pub struct ModbusTCPCodec {}

impl Encoder<&Request> for ModbusTCPCodec {
    type Error = std::io::Error;
    fn encode(&mut self, req: &Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // Unit id and function code are part of the length.
        let pdu_length = match &req.operation {
            Operation::GetHoldings { .. } => 2 + 4,
            Operation::SetHoldings { values, .. } => {
                if values.is_empty() || values.len() > MAX_WRITE_COUNT {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("cannot write {} registers in one request", values.len()),
                    ));
                }
                2 + 5 + 2 * values.len()
            }
        };
        dst.reserve(MBAP_PREFIX + pdu_length);
        dst.put_u16(req.transaction_id);
        dst.put_u16(0);
        dst.put_u16(pdu_length as u16);
        dst.put_u8(req.device_id);
        match &req.operation {
            Operation::GetHoldings { address, count } => {
                dst.put_u8(READ_HOLDING_REGISTERS);
                dst.put_u16(*address);
                dst.put_u16(*count);
            }
            Operation::SetHoldings { address, values } => {
                dst.put_u8(WRITE_MULTIPLE_REGISTERS);
                dst.put_u16(*address);
                dst.put_u16(values.len() as u16);
                dst.put_u8((values.len() * 2) as u8);
                for value in values {
                    dst.put_u16(*value);
                }
            }
        }
        trace!(message="sending encoded", buffer=?dst);
        Ok(())
    }
}

impl Decoder for ModbusTCPCodec {
    type Item = Response;
    type Error = std::io::Error;
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            trace!(message="attempt at decoding", buffer=?src);
            if src.len() < MBAP_PREFIX + 3 {
                return Ok(None);
            }
            let transaction_id = u16::from_be_bytes([src[0], src[1]]);
            let proto = u16::from_be_bytes([src[2], src[3]]);
            let length = usize::from(u16::from_be_bytes([src[4], src[5]]));
            if proto != 0 || length < 3 {
                // Not the start of a frame, resynchronize.
                src.advance(1);
                continue;
            }
            let Some(data) = src.get(MBAP_PREFIX..MBAP_PREFIX + length) else {
                src.reserve(MBAP_PREFIX + length - src.len());
                return Ok(None);
            };
            let (device_id, function_code) = (data[0], data[1]);
            let kind = if function_code & EXCEPTION_FLAG != 0 {
                ResponseKind::ErrorCode(data[2])
            } else {
                match (function_code, &data[2..]) {
                    (READ_HOLDING_REGISTERS, [byte_count, payload @ ..])
                        if usize::from(*byte_count) == payload.len() && payload.len() % 2 == 0 =>
                    {
                        let values = payload
                            .chunks_exact(2)
                            .map(|w| u16::from_be_bytes([w[0], w[1]]))
                            .collect();
                        ResponseKind::GetHoldings { values }
                    }
                    (WRITE_MULTIPLE_REGISTERS, [a0, a1, c0, c1]) => ResponseKind::SetHoldings {
                        address: u16::from_be_bytes([*a0, *a1]),
                        count: u16::from_be_bytes([*c0, *c1]),
                    },
                    _ => {
                        trace!(message = "skipping unrecognized frame", function_code);
                        src.advance(MBAP_PREFIX + length);
                        continue;
                    }
                }
            };
            src.advance(MBAP_PREFIX + length);
            return Ok(Some(Response { device_id, transaction_id, kind }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(req: &Request) -> Vec<u8> {
        let mut buf = BytesMut::new();
        ModbusTCPCodec {}.encode(req, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn read_request_uses_register_number_verbatim() {
        let req = Request {
            device_id: 1,
            transaction_id: 0x0102,
            operation: Operation::GetHoldings { address: 300, count: 47 },
        };
        assert_eq!(encode(&req), [0x01, 0x02, 0, 0, 0, 6, 1, 3, 0x01, 0x2C, 0, 47]);
    }

    #[test]
    fn write_request_carries_byte_count() {
        let req = Request {
            device_id: 1,
            transaction_id: 7,
            operation: Operation::SetHoldings { address: 303, values: vec![0xFFA1] },
        };
        assert_eq!(encode(&req), [0, 7, 0, 0, 0, 9, 1, 16, 0x01, 0x2F, 0, 1, 2, 0xFF, 0xA1]);
        let empty = Request {
            device_id: 1,
            transaction_id: 8,
            operation: Operation::SetHoldings { address: 303, values: vec![] },
        };
        assert!(ModbusTCPCodec {}.encode(&empty, &mut BytesMut::new()).is_err());
    }

    #[test]
    fn decodes_responses_across_partial_reads() {
        let mut codec = ModbusTCPCodec {};
        let frame = [0, 1, 0, 0, 0, 7, 1, 3, 4, 0x41, 0x20, 0, 0];
        let mut buf = BytesMut::from(&frame[..5]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&frame[5..]);
        let response = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(response.transaction_id, 1);
        assert_eq!(response.kind, ResponseKind::GetHoldings { values: vec![0x4120, 0] });
        assert!(buf.is_empty());
    }

    #[test]
    fn decodes_exceptions_and_write_acks() {
        let mut codec = ModbusTCPCodec {};
        let mut buf = BytesMut::from(
            &[0, 2, 0, 0, 0, 3, 1, 0x90, 6, 0, 3, 0, 0, 0, 6, 1, 16, 0x01, 0xF5, 0, 1][..],
        );
        let busy = codec.decode(&mut buf).unwrap().unwrap();
        assert!(busy.is_server_busy());
        let ack = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(ack.transaction_id, 3);
        assert_eq!(ack.kind, ResponseKind::SetHoldings { address: 501, count: 1 });
    }

    #[test]
    fn skips_garbage_before_frame() {
        let mut codec = ModbusTCPCodec {};
        let mut buf = BytesMut::from(&[0xAA, 0, 9, 0, 0, 0, 5, 1, 3, 2, 0, 42][..]);
        let response = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(response.transaction_id, 9);
        assert_eq!(response.kind, ResponseKind::GetHoldings { values: vec![42] });
    }
}
