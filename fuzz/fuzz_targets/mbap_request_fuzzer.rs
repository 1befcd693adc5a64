//! Fuzz target for the MBAP request decoder and responder
//!
//! Hostile clients must not be able to crash a device's Modbus listener.
//!
//! # Strategy
//!
//! - Stream splitting: the input is fed in arbitrary chunk sizes, exercising
//!   partial headers and partial PDUs
//! - Bank sizes: small and large register banks, so address checks hit both
//!   sides of the boundary
//!
//! # Invariants
//!
//! - NEVER panic on any byte sequence
//! - Decoding consumes exactly one frame or nothing
//! - Every response carries a valid MBAP header whose length matches the PDU
//! - Responses echo the request's transaction id and function code (or the
//!   exception bit of it)

#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use plcsim_core::RegisterBank;
use plcsim_server::mbap;

#[derive(Debug, Arbitrary)]
struct Input {
    bank_size: u8,
    chunks: Vec<Vec<u8>>,
}

fuzz_target!(|input: Input| {
    let mut bank = RegisterBank::new(usize::from(input.bank_size) + 1);
    let mut buf = BytesMut::new();

    for chunk in input.chunks {
        buf.extend_from_slice(&chunk);

        loop {
            let before = buf.len();
            let frame = match mbap::decode(&mut buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    assert_eq!(buf.len(), before, "incomplete frame must not be consumed");
                    break;
                },
                Err(_) => return,
            };
            assert!(buf.len() < before, "decoded frame must be consumed");

            let response = mbap::respond(&mut bank, &frame);
            assert!(response.len() > mbap::HEADER_LEN);

            let transaction_id = u16::from_be_bytes([response[0], response[1]]);
            let length = usize::from(u16::from_be_bytes([response[4], response[5]]));
            assert_eq!(transaction_id, frame.transaction_id);
            assert_eq!(length, response.len() - mbap::HEADER_LEN + 1);
            assert_eq!(response[mbap::HEADER_LEN] & 0x7F, frame.request.function() & 0x7F);
        }
    }
});
