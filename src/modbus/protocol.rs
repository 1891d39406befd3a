//! Modbus TCP framing for "read holding registers" (function 0x03).

use bytes::{BufMut, BytesMut};

use crate::utils::error::ModbusError;

pub const MBAP_HEADER_LEN: usize = 7;
pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const REQUEST_FRAME_LEN: usize = 12;
/// MBAP (7) + function code (1) + byte count (1) + one register (2)
pub const SINGLE_REGISTER_RESPONSE_LEN: usize = 11;

const PROTOCOL_ID: u16 = 0x0000;
const REQUEST_PDU_LEN: u16 = 6;

/// Decoded single-register reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResponse {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub function_code: u8,
    pub value: i16,
}

pub fn encode_read_request(
    transaction_id: u16,
    unit_id: u8,
    start_address: u16,
    quantity: u16,
) -> [u8; REQUEST_FRAME_LEN] {
    let mut buf = BytesMut::with_capacity(REQUEST_FRAME_LEN);

    // MBAP header
    buf.put_u16(transaction_id);
    buf.put_u16(PROTOCOL_ID);
    buf.put_u16(REQUEST_PDU_LEN);
    buf.put_u8(unit_id);

    // PDU
    buf.put_u8(READ_HOLDING_REGISTERS);
    buf.put_u16(start_address);
    buf.put_u16(quantity);

    let mut frame = [0u8; REQUEST_FRAME_LEN];
    frame.copy_from_slice(&buf);
    frame
}

pub fn decode_read_response(frame: &[u8]) -> Result<ReadResponse, ModbusError> {
    if frame.len() < SINGLE_REGISTER_RESPONSE_LEN {
        return Err(ModbusError::ShortRead {
            expected: SINGLE_REGISTER_RESPONSE_LEN,
            actual: frame.len(),
        });
    }

    let function_code = frame[MBAP_HEADER_LEN];
    if function_code != READ_HOLDING_REGISTERS {
        return Err(ModbusError::ProtocolMismatch { function_code });
    }

    let byte_count = frame[MBAP_HEADER_LEN + 1];
    if byte_count < 2 {
        return Err(ModbusError::ShortPayload(byte_count));
    }

    Ok(ReadResponse {
        transaction_id: u16::from_be_bytes([frame[0], frame[1]]),
        unit_id: frame[6],
        function_code,
        value: i16::from_be_bytes([frame[9], frame[10]]),
    })
}

/// Device side of a single-register reply. Handy for simulated controllers.
pub fn encode_read_response(
    transaction_id: u16,
    unit_id: u8,
    value: i16,
) -> [u8; SINGLE_REGISTER_RESPONSE_LEN] {
    let mut buf = BytesMut::with_capacity(SINGLE_REGISTER_RESPONSE_LEN);
    buf.put_u16(transaction_id);
    buf.put_u16(PROTOCOL_ID);
    // unit id + function code + byte count + 2 data bytes
    buf.put_u16(5);
    buf.put_u8(unit_id);
    buf.put_u8(READ_HOLDING_REGISTERS);
    buf.put_u8(2);
    buf.put_i16(value);

    let mut frame = [0u8; SINGLE_REGISTER_RESPONSE_LEN];
    frame.copy_from_slice(&buf);
    frame
}

/// Exception code carried by a Modbus exception reply (function | 0x80).
pub fn exception_code(frame: &[u8]) -> Option<u8> {
    match frame.get(MBAP_HEADER_LEN) {
        Some(&fc) if fc == READ_HOLDING_REGISTERS | 0x80 => frame.get(MBAP_HEADER_LEN + 1).copied(),
        _ => None,
    }
}

/// Transaction id of any frame that carries a complete MBAP header.
pub fn frame_transaction_id(frame: &[u8]) -> Option<u16> {
    if frame.len() < MBAP_HEADER_LEN {
        return None;
    }
    Some(u16::from_be_bytes([frame[0], frame[1]]))
}

/// Total frame size announced by the MBAP length field (unit id + PDU).
pub fn declared_frame_len(frame: &[u8]) -> Option<usize> {
    if frame.len() < MBAP_HEADER_LEN - 1 {
        return None;
    }
    let length = u16::from_be_bytes([frame[4], frame[5]]) as usize;
    Some(MBAP_HEADER_LEN - 1 + length)
}
