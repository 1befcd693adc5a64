//! Minimal Modbus TCP (MBAP) codec.
//!
//! Just enough of the protocol to let real Modbus clients read a simulated
//! device's register bank.
//!
//! ## Wire Format
//!
//! ```text
//! ┌────────────────┬─────────────┬────────┬─────────┬──────────┬─────────┐
//! │ transaction id │ protocol id │ length │ unit id │ function │ data... │
//! │      u16       │  u16 (= 0)  │  u16   │   u8    │    u8    │         │
//! └────────────────┴─────────────┴────────┴─────────┴──────────┴─────────┘
//!  <──────────────── MBAP header (7 bytes) ────────────────>
//! ```
//!
//! All integers are big-endian. `length` counts the unit id and the PDU.
//!
//! ## Supported Functions
//!
//! | Code | Function                  |
//! |------|---------------------------|
//! | 0x01 | Read coils                |
//! | 0x02 | Read discrete inputs      |
//! | 0x03 | Read holding registers    |
//! | 0x04 | Read input registers      |
//! | 0x06 | Write single register     |
//! | 0x10 | Write multiple registers  |
//!
//! Anything else is answered with exception 0x01.

use bytes::{Buf, BufMut, BytesMut};
use plcsim_core::RegisterBank;
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, byteorder::big_endian::U16,
};

/// Size of the MBAP header in bytes.
pub const HEADER_LEN: usize = 7;

/// Largest PDU a Modbus TCP frame may carry.
pub const MAX_PDU_LEN: usize = 253;

/// Largest register count of one read request.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Largest bit count of one read request.
pub const MAX_READ_BITS: u16 = 2000;

/// Largest register count of one write request.
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// MBAP header, laid out exactly as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct MbapHeader {
    transaction_id: U16,
    protocol_id: U16,
    length: U16,
    unit_id: u8,
}

impl MbapHeader {
    /// Header for a frame carrying `pdu_len` PDU bytes.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(transaction_id: u16, unit_id: u8, pdu_len: usize) -> Self {
        Self {
            transaction_id: U16::new(transaction_id),
            protocol_id: U16::new(0),
            length: U16::new((pdu_len + 1) as u16),
            unit_id,
        }
    }

    /// Transaction id echoed back in the response.
    pub fn transaction_id(&self) -> u16 {
        self.transaction_id.get()
    }

    /// Protocol id, always 0 for Modbus.
    pub fn protocol_id(&self) -> u16 {
        self.protocol_id.get()
    }

    /// Number of bytes following the length field.
    pub fn length(&self) -> u16 {
        self.length.get()
    }

    /// Unit (slave) id.
    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }
}

/// Function codes understood by the responder.
pub mod function {
    /// Read coils
    pub const READ_COILS: u8 = 0x01;
    /// Read discrete inputs
    pub const READ_DISCRETE_INPUTS: u8 = 0x02;
    /// Read holding registers
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    /// Read input registers
    pub const READ_INPUT_REGISTERS: u8 = 0x04;
    /// Write single register
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
    /// Write multiple registers
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
}

/// Modbus exception codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    /// Function code not supported
    IllegalFunction = 0x01,
    /// Address range outside the bank
    IllegalDataAddress = 0x02,
    /// Quantity or payload invalid
    IllegalDataValue = 0x03,
}

/// Decoded request PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// FC 1
    ReadCoils {
        /// First coil
        start: u16,
        /// Number of coils
        count: u16,
    },
    /// FC 2
    ReadDiscreteInputs {
        /// First input
        start: u16,
        /// Number of inputs
        count: u16,
    },
    /// FC 3
    ReadHoldingRegisters {
        /// First register
        start: u16,
        /// Number of registers
        count: u16,
    },
    /// FC 4
    ReadInputRegisters {
        /// First register
        start: u16,
        /// Number of registers
        count: u16,
    },
    /// FC 6
    WriteSingleRegister {
        /// Register address
        address: u16,
        /// New value
        value: u16,
    },
    /// FC 16
    WriteMultipleRegisters {
        /// First register
        start: u16,
        /// New values
        values: Vec<u16>,
    },
    /// Known function with a body that does not parse
    Malformed {
        /// Function code
        function: u8,
    },
    /// Function code the responder does not implement
    Unsupported {
        /// Function code
        function: u8,
    },
}

impl Request {
    /// Function code of the request.
    pub fn function(&self) -> u8 {
        match self {
            Self::ReadCoils { .. } => function::READ_COILS,
            Self::ReadDiscreteInputs { .. } => function::READ_DISCRETE_INPUTS,
            Self::ReadHoldingRegisters { .. } => function::READ_HOLDING_REGISTERS,
            Self::ReadInputRegisters { .. } => function::READ_INPUT_REGISTERS,
            Self::WriteSingleRegister { .. } => function::WRITE_SINGLE_REGISTER,
            Self::WriteMultipleRegisters { .. } => function::WRITE_MULTIPLE_REGISTERS,
            Self::Malformed { function } | Self::Unsupported { function } => *function,
        }
    }

    /// Decode a PDU (function code and data).
    pub fn parse(pdu: &[u8]) -> Option<Self> {
        let (&function, mut body) = pdu.split_first()?;

        let request = match function {
            function::READ_COILS
            | function::READ_DISCRETE_INPUTS
            | function::READ_HOLDING_REGISTERS
            | function::READ_INPUT_REGISTERS => {
                if body.len() != 4 {
                    return Some(Self::Malformed { function });
                }
                let start = body.get_u16();
                let count = body.get_u16();
                match function {
                    function::READ_COILS => Self::ReadCoils { start, count },
                    function::READ_DISCRETE_INPUTS => Self::ReadDiscreteInputs { start, count },
                    function::READ_HOLDING_REGISTERS => Self::ReadHoldingRegisters { start, count },
                    _ => Self::ReadInputRegisters { start, count },
                }
            },
            function::WRITE_SINGLE_REGISTER => {
                if body.len() != 4 {
                    return Some(Self::Malformed { function });
                }
                Self::WriteSingleRegister { address: body.get_u16(), value: body.get_u16() }
            },
            function::WRITE_MULTIPLE_REGISTERS => {
                if body.len() < 5 {
                    return Some(Self::Malformed { function });
                }
                let start = body.get_u16();
                let count = body.get_u16();
                let byte_count = usize::from(body.get_u8());
                if count == 0
                    || count > MAX_WRITE_REGISTERS
                    || byte_count != usize::from(count) * 2
                    || body.remaining() != byte_count
                {
                    return Some(Self::Malformed { function });
                }
                let values = (0..count).map(|_| body.get_u16()).collect();
                Self::WriteMultipleRegisters { start, values }
            },
            _ => Self::Unsupported { function },
        };

        Some(request)
    }
}

/// One decoded request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    /// Transaction id to echo
    pub transaction_id: u16,
    /// Unit id to echo
    pub unit_id: u8,
    /// Decoded PDU
    pub request: Request,
}

/// Framing errors. The connection is closed after any of them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MbapError {
    /// Protocol id is not 0
    #[error("unexpected protocol id {0}")]
    ProtocolId(u16),

    /// Length field outside `2..=254`
    #[error("invalid MBAP length {0}")]
    Length(u16),

    /// Header bytes could not be viewed as an MBAP header
    #[error("invalid MBAP header")]
    Header,
}

/// Decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` until a complete frame is buffered, then consumes it.
pub fn decode(buf: &mut BytesMut) -> Result<Option<RequestFrame>, MbapError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let header =
        MbapHeader::read_from_bytes(&buf[..HEADER_LEN]).map_err(|_| MbapError::Header)?;

    if header.protocol_id() != 0 {
        return Err(MbapError::ProtocolId(header.protocol_id()));
    }

    let length = usize::from(header.length());
    if !(2..=MAX_PDU_LEN + 1).contains(&length) {
        return Err(MbapError::Length(header.length()));
    }

    let total = HEADER_LEN - 1 + length;
    if buf.len() < total {
        return Ok(None);
    }

    let frame = buf.split_to(total);
    let request = Request::parse(&frame[HEADER_LEN..]).ok_or(MbapError::Length(header.length()))?;

    Ok(Some(RequestFrame {
        transaction_id: header.transaction_id(),
        unit_id: header.unit_id(),
        request,
    }))
}

/// Execute a request against a bank and encode the full response frame.
pub fn respond(bank: &mut RegisterBank, frame: &RequestFrame) -> BytesMut {
    let function = frame.request.function();
    let pdu = execute(bank, &frame.request).unwrap_or_else(|code| {
        tracing::debug!(function, ?code, "Modbus exception");
        let mut pdu = BytesMut::with_capacity(2);
        pdu.put_u8(function | 0x80);
        pdu.put_u8(code as u8);
        pdu
    });

    let header = MbapHeader::new(frame.transaction_id, frame.unit_id, pdu.len());
    let mut out = BytesMut::with_capacity(HEADER_LEN + pdu.len());
    out.put_slice(header.as_bytes());
    out.put_slice(&pdu);
    out
}

fn execute(bank: &mut RegisterBank, request: &Request) -> Result<BytesMut, ExceptionCode> {
    let mut pdu = BytesMut::new();
    pdu.put_u8(request.function());

    match request {
        Request::ReadCoils { start, count } => {
            check_quantity(*count, MAX_READ_BITS)?;
            let bits = bank.coils(*start, *count).map_err(|_| ExceptionCode::IllegalDataAddress)?;
            put_bits(&mut pdu, bits);
        },
        Request::ReadDiscreteInputs { start, count } => {
            check_quantity(*count, MAX_READ_BITS)?;
            let bits = bank
                .discrete_inputs(*start, *count)
                .map_err(|_| ExceptionCode::IllegalDataAddress)?;
            put_bits(&mut pdu, bits);
        },
        Request::ReadHoldingRegisters { start, count } => {
            check_quantity(*count, MAX_READ_REGISTERS)?;
            let words =
                bank.holding(*start, *count).map_err(|_| ExceptionCode::IllegalDataAddress)?;
            put_words(&mut pdu, words);
        },
        Request::ReadInputRegisters { start, count } => {
            check_quantity(*count, MAX_READ_REGISTERS)?;
            let words = bank.input(*start, *count).map_err(|_| ExceptionCode::IllegalDataAddress)?;
            put_words(&mut pdu, words);
        },
        Request::WriteSingleRegister { address, value } => {
            bank.write_holding(*address, &[*value])
                .map_err(|_| ExceptionCode::IllegalDataAddress)?;
            pdu.put_u16(*address);
            pdu.put_u16(*value);
        },
        Request::WriteMultipleRegisters { start, values } => {
            bank.write_holding(*start, values).map_err(|_| ExceptionCode::IllegalDataAddress)?;
            pdu.put_u16(*start);
            #[allow(clippy::cast_possible_truncation)]
            pdu.put_u16(values.len() as u16);
        },
        Request::Malformed { .. } => return Err(ExceptionCode::IllegalDataValue),
        Request::Unsupported { .. } => return Err(ExceptionCode::IllegalFunction),
    }

    Ok(pdu)
}

fn check_quantity(count: u16, max: u16) -> Result<(), ExceptionCode> {
    if count == 0 || count > max {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(())
}

#[allow(clippy::cast_possible_truncation)]
fn put_bits(pdu: &mut BytesMut, bits: &[bool]) {
    let byte_count = bits.len().div_ceil(8);
    pdu.put_u8(byte_count as u8);
    for chunk in bits.chunks(8) {
        let byte = chunk
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, on)| if *on { acc | (1 << i) } else { acc });
        pdu.put_u8(byte);
    }
}

#[allow(clippy::cast_possible_truncation)]
fn put_words(pdu: &mut BytesMut, words: &[u16]) {
    pdu.put_u8((words.len() * 2) as u8);
    for word in words {
        pdu.put_u16(*word);
    }
}
