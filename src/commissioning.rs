//! Commissioning session handler: PASE state machine over session id 0.
//!
//! The state machine is modeled in full, but the cryptographic step bodies
//! live behind [SecurityProvider]. The bundled [StubSecurity] declines every
//! step, so the handler answers commissioning traffic with a fixed minimal
//! acknowledgment and never advances past
//! [PaseState::AwaitingPbkdfParamResponseAck]. A real provider (SPAKE2+ key
//! derivation) slots in without touching the handler.
//!
//! Known limitation, inherited by design: without an established secure
//! session there is no replay detection, no message counter validation and
//! no session id collision check.

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::BridgeError;
use crate::messages::Message;

pub mod opcodes {
    pub const PBKDF_REQ: u8 = 0x20;
    pub const PBKDF_RESP: u8 = 0x21;
    pub const PAKE1: u8 = 0x22;
    pub const PAKE2: u8 = 0x23;
    pub const PAKE3: u8 = 0x24;
    pub const STATUS: u8 = 0x40;
}

/// Minimum commissioning payload: exchange flags, opcode, exchange id.
const MIN_PAYLOAD_LEN: usize = 4;

/// Fixed minimal TLV acknowledgment the stub answers with.
const STUB_ACK_PAYLOAD: [u8; 4] = [0x15, 0x30, 0x01, 0x00];

const STATUS_FAILURE: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaseState {
    Idle,
    AwaitingPbkdfParamResponseAck,
    Pake1Received,
    Pake2Sent,
    Pake3Received,
    SessionEstablished,
}

/// Keys derived by a completed PASE exchange.
pub struct SessionKeys {
    pub session_id: u16,
    pub encrypt_key: [u8; 16],
    pub decrypt_key: [u8; 16],
}

/// Pluggable capability slot for the PASE cryptography. Each method either
/// produces the wire reply for its step, or `None` when the provider does
/// not implement the step (the handler then falls back to the stub
/// acknowledgment and does not advance past the first state).
pub trait SecurityProvider: Send {
    fn pbkdf_param_response(&mut self, request: &[u8]) -> Result<Option<Vec<u8>>>;
    fn pake2(&mut self, pake1: &[u8]) -> Result<Option<Vec<u8>>>;
    fn verify_pake3(&mut self, pake3: &[u8]) -> Result<Option<SessionKeys>>;
}

/// Declines every PASE step. The terminal behavior of this bridge today.
pub struct StubSecurity;

impl SecurityProvider for StubSecurity {
    fn pbkdf_param_response(&mut self, _request: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
    fn pake2(&mut self, _pake1: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
    fn verify_pake3(&mut self, _pake3: &[u8]) -> Result<Option<SessionKeys>> {
        Ok(None)
    }
}

pub struct CommissioningHandler {
    state: PaseState,
    commissioned: bool,
    fabric_id: Option<u64>,
    provider: Box<dyn SecurityProvider>,
}

impl CommissioningHandler {
    /// Fresh handler, uncommissioned. Session state does not persist across
    /// restarts.
    pub fn new(provider: Box<dyn SecurityProvider>) -> Self {
        Self {
            state: PaseState::Idle,
            commissioned: false,
            fabric_id: None,
            provider,
        }
    }

    pub fn state(&self) -> PaseState {
        self.state
    }

    pub fn commissioned(&self) -> bool {
        self.commissioned
    }

    pub fn fabric_id(&self) -> Option<u64> {
        self.fabric_id
    }

    /// Process one session-0 message and produce the reply datagram.
    /// Malformed payloads get a failure status, never an error upward.
    pub fn handle(&mut self, msg: &Message) -> Result<Vec<u8>> {
        if msg.payload.len() < MIN_PAYLOAD_LEN {
            let err = BridgeError::MalformedCommissioningPayload {
                len: msg.payload.len(),
            };
            log::warn!("{}, replying with failure status", err);
            return self.status_reply(msg, STATUS_FAILURE);
        }

        log::info!(
            "processing commissioning message, payload {} bytes, state {:?}",
            msg.payload.len(),
            self.state
        );

        match (self.state, parse_opcode(&msg.payload)) {
            (PaseState::Idle, Some(opcodes::PBKDF_REQ)) => {
                let reply = self.provider.pbkdf_param_response(&msg.payload)?;
                self.state = PaseState::AwaitingPbkdfParamResponseAck;
                match reply {
                    Some(reply) => self.reply(msg, reply),
                    None => self.stub_ack(msg),
                }
            }
            (PaseState::AwaitingPbkdfParamResponseAck, Some(opcodes::PAKE1)) => {
                match self.provider.pake2(&msg.payload)? {
                    Some(reply) => {
                        self.state = PaseState::Pake2Sent;
                        self.reply(msg, reply)
                    }
                    None => self.stub_ack(msg),
                }
            }
            (PaseState::Pake2Sent, Some(opcodes::PAKE3)) => {
                match self.provider.verify_pake3(&msg.payload)? {
                    Some(_keys) => {
                        self.state = PaseState::SessionEstablished;
                        self.commissioned = true;
                        log::info!("PASE session established");
                        self.stub_ack(msg)
                    }
                    None => self.stub_ack(msg),
                }
            }
            // Any other commissioning traffic: acknowledge and hold position.
            (state, opcode) => {
                log::debug!("no transition for opcode {:?} in state {:?}", opcode, state);
                if self.state == PaseState::Idle {
                    self.state = PaseState::AwaitingPbkdfParamResponseAck;
                }
                self.stub_ack(msg)
            }
        }
    }

    fn stub_ack(&self, request: &Message) -> Result<Vec<u8>> {
        self.reply(request, STUB_ACK_PAYLOAD.to_vec())
    }

    fn reply(&self, request: &Message, payload: Vec<u8>) -> Result<Vec<u8>> {
        Message {
            flags: 0,
            session_id: 0,
            security_flags: 0,
            message_counter: request.message_counter.wrapping_add(1),
            payload,
        }
        .encode()
    }

    fn status_reply(&self, request: &Message, status: u8) -> Result<Vec<u8>> {
        Message {
            flags: 0,
            session_id: request.session_id,
            security_flags: 0,
            message_counter: request.message_counter.wrapping_add(1),
            payload: vec![status],
        }
        .encode()
    }
}

/// Protocol opcode from a secure channel payload, when long enough to carry
/// the exchange header.
fn parse_opcode(payload: &[u8]) -> Option<u8> {
    let mut cursor = std::io::Cursor::new(payload);
    let _exchange_flags = cursor.read_u8().ok()?;
    let opcode = cursor.read_u8().ok()?;
    let _exchange_id = cursor.read_u16::<LittleEndian>().ok()?;
    Some(opcode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commissioning_msg(counter: u32, payload: Vec<u8>) -> Message {
        Message {
            flags: 0,
            session_id: 0,
            security_flags: 0,
            message_counter: counter,
            payload,
        }
    }

    #[test]
    fn test_short_payload_gets_failure_status() {
        let mut handler = CommissioningHandler::new(Box::new(StubSecurity));
        let msg = commissioning_msg(7, vec![0x20, 0x00]);
        let reply = handler.handle(&msg).unwrap();
        let reply = Message::decode(&reply).unwrap();
        assert_eq!(reply.message_counter, 8);
        assert_eq!(reply.payload, vec![0x01]);
        // malformed traffic does not move the state machine
        assert_eq!(handler.state(), PaseState::Idle);
    }

    #[test]
    fn test_stub_ack() {
        let mut handler = CommissioningHandler::new(Box::new(StubSecurity));
        // exchange flags, PBKDFParamRequest opcode, exchange id
        let msg = commissioning_msg(41, vec![0x05, opcodes::PBKDF_REQ, 0x01, 0x00]);
        let reply = handler.handle(&msg).unwrap();
        let reply = Message::decode(&reply).unwrap();
        assert_eq!(reply.session_id, 0);
        assert_eq!(reply.message_counter, 42);
        assert_eq!(reply.payload, STUB_ACK_PAYLOAD.to_vec());
        assert_eq!(handler.state(), PaseState::AwaitingPbkdfParamResponseAck);
        assert!(!handler.commissioned());
    }

    #[test]
    fn test_stub_never_advances_past_first_state() {
        let mut handler = CommissioningHandler::new(Box::new(StubSecurity));
        for (i, opcode) in [opcodes::PBKDF_REQ, opcodes::PAKE1, opcodes::PAKE3]
            .iter()
            .enumerate()
        {
            let msg = commissioning_msg(i as u32, vec![0x05, *opcode, 0x01, 0x00]);
            handler.handle(&msg).unwrap();
        }
        assert_eq!(handler.state(), PaseState::AwaitingPbkdfParamResponseAck);
        assert!(!handler.commissioned());
        assert_eq!(handler.fabric_id(), None);
    }

    struct FakeProvider;
    impl SecurityProvider for FakeProvider {
        fn pbkdf_param_response(&mut self, _request: &[u8]) -> Result<Option<Vec<u8>>> {
            Ok(Some(vec![0x21]))
        }
        fn pake2(&mut self, _pake1: &[u8]) -> Result<Option<Vec<u8>>> {
            Ok(Some(vec![0x23]))
        }
        fn verify_pake3(&mut self, _pake3: &[u8]) -> Result<Option<SessionKeys>> {
            Ok(Some(SessionKeys {
                session_id: 1,
                encrypt_key: [0; 16],
                decrypt_key: [0; 16],
            }))
        }
    }

    #[test]
    fn test_full_exchange_with_real_provider() {
        let mut handler = CommissioningHandler::new(Box::new(FakeProvider));
        for opcode in [opcodes::PBKDF_REQ, opcodes::PAKE1, opcodes::PAKE3] {
            let msg = commissioning_msg(0, vec![0x05, opcode, 0x01, 0x00]);
            handler.handle(&msg).unwrap();
        }
        assert_eq!(handler.state(), PaseState::SessionEstablished);
        assert!(handler.commissioned());
    }
}
