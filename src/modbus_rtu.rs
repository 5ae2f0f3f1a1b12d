use super::*;

pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const READ_INPUT_REGISTERS: u8 = 0x04;
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
/// Vendor-specific: wipes the controller's daily/historical counters.
pub const CLEAR_HISTORY: u8 = 0x79;

pub const EXCEPTION_FLAG: u8 = 0x80;
pub const BROADCAST_ADDRESS: u8 = 0xFF;

/// address + function + byte count/exception code + CRC
pub const MIN_RESPONSE_LEN: usize = 5;
/// address + function + two 16-bit words + CRC
pub const ECHO_RESPONSE_LEN: usize = 8;

/// CRC-16/MODBUS (seed 0xFFFF, reflected polynomial 0xA001).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// CRC bytes in wire order (low byte first).
pub fn checksum(data: &[u8]) -> [u8; 2] {
    crc16(data).to_le_bytes()
}

/// Read request: address, function, start (BE), count (BE), CRC (LE).
pub fn build_read_request(address: u8, function_code: u8, start_register: u16, count: u16) -> Vec<u8> {
    wrap_rtu(address, function_code, &two_words(start_register, count))
}

/// Function 0x06 with the register/value pair in place of start/count.
pub fn build_write_single_register(address: u8, register: u16, value: u16) -> Vec<u8> {
    wrap_rtu(address, WRITE_SINGLE_REGISTER, &two_words(register, value))
}

pub fn build_write_multiple_registers(address: u8, start_register: u16, values: &[u16]) -> Result<Vec<u8>, FrameError> {
    // Modbus caps a single 0x10 write at 123 registers
    if values.is_empty() || values.len() > 123 {
        return Err(FrameError::RegisterCount(values.len()));
    }
    let mut pdu = Vec::with_capacity(5 + values.len() * 2);
    pdu.extend_from_slice(&two_words(start_register, values.len() as u16));
    pdu.push((values.len() * 2) as u8);
    for value in values {
        pdu.extend_from_slice(&value.to_be_bytes());
    }
    Ok(wrap_rtu(address, WRITE_MULTIPLE_REGISTERS, &pdu))
}

pub fn build_clear_history(address: u8) -> Vec<u8> {
    wrap_rtu(address, CLEAR_HISTORY, &two_words(0x0000, 0x0001))
}

/// Validates a register-read response and returns the data bytes only.
///
/// Checks run in wire order: length, CRC, address (skipped when the
/// request went to the broadcast address), exception flag, function code
/// and finally the declared byte count.
pub fn parse_response(frame: &[u8], expected_address: u8, expected_function_code: u8) -> Result<Vec<u8>, FrameError> {
    let body = unwrap_rtu(frame, expected_address, expected_function_code)?;

    let declared = body[0] as usize;
    let data = &body[1..];
    if declared != data.len() {
        return Err(FrameError::ByteCountMismatch {
            declared,
            actual: data.len(),
        });
    }
    Ok(data.to_vec())
}

/// Validates the echo a device sends back for 0x06, 0x10 and 0x79 and
/// returns the two echoed words.
pub fn parse_write_response(frame: &[u8], expected_address: u8, expected_function_code: u8) -> Result<(u16, u16), FrameError> {
    let body = unwrap_rtu(frame, expected_address, expected_function_code)?;
    if frame.len() != ECHO_RESPONSE_LEN {
        return Err(FrameError::FrameLength {
            expected: ECHO_RESPONSE_LEN,
            actual: frame.len(),
        });
    }
    let first = u16::from_be_bytes([body[0], body[1]]);
    let second = u16::from_be_bytes([body[2], body[3]]);
    Ok((first, second))
}

/// Total frame length implied by the first three bytes of a response.
pub fn expected_response_len(header: &[u8; 3]) -> usize {
    let function_code = header[1];
    if (function_code & EXCEPTION_FLAG) != 0 {
        return MIN_RESPONSE_LEN;
    }
    match function_code {
        WRITE_SINGLE_REGISTER | WRITE_MULTIPLE_REGISTERS | CLEAR_HISTORY => ECHO_RESPONSE_LEN,
        _ => 3 + header[2] as usize + 2,
    }
}

fn two_words(first: u16, second: u16) -> [u8; 4] {
    let [a, b] = first.to_be_bytes();
    let [c, d] = second.to_be_bytes();
    [a, b, c, d]
}

fn wrap_rtu(address: u8, function_code: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(2 + pdu.len() + 2);
    frame.push(address);
    frame.push(function_code);
    frame.extend_from_slice(pdu);

    let crc = checksum(&frame);
    frame.extend_from_slice(&crc);
    frame
}

// Returns everything between the function code and the CRC.
fn unwrap_rtu<'a>(frame: &'a [u8], expected_address: u8, expected_function_code: u8) -> Result<&'a [u8], FrameError> {
    if frame.len() < MIN_RESPONSE_LEN {
        return Err(FrameError::FrameTooShort(frame.len()));
    }

    let split = frame.len() - 2;
    let received_crc = u16::from_le_bytes([frame[split], frame[split + 1]]);
    let calculated_crc = crc16(&frame[..split]);
    if received_crc != calculated_crc {
        return Err(FrameError::CrcMismatch {
            expected: calculated_crc,
            received: received_crc,
        });
    }

    let unit_id = frame[0];
    if expected_address != BROADCAST_ADDRESS && unit_id != expected_address {
        return Err(FrameError::AddressMismatch {
            expected: expected_address,
            received: unit_id,
        });
    }

    let function_code = frame[1];
    if function_code == expected_function_code | EXCEPTION_FLAG {
        return Err(FrameError::Exception {
            function: expected_function_code,
            code: frame[2],
        });
    }
    if function_code != expected_function_code {
        return Err(FrameError::UnexpectedFunctionCode {
            expected: expected_function_code,
            received: function_code,
        });
    }

    Ok(&frame[2..split])
}
