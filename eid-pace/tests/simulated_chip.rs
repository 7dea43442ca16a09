//! PACE and Secure Messaging against a chip simulated with the same cryptographic primitives.


use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use eid_pace::crypt::{
    pad_iso7816, unpad_iso7816, CipherSuite, CryptoError, CryptoProvider, DomainParameters,
    EphemeralKeyPair, NativeCrypto, SessionKeys, SharedSecret,
};
use eid_pace::der_util::{encode_tlv, parse_tlvs};
use eid_pace::iso7816::apdu::{Apdu, CommandHeader, Data, Response};
use eid_pace::iso7816::card::{CommunicationError, FailureKind, SmartCard};
use eid_pace::pace::{self, PaceEngine, PaceParameters, PaceRequest, State};
use eid_pace::pace::oids::{ecdh_gm_protocol, PACE_ECDH_GM_AES_CBC_CMAC_128};
use eid_pace::password::PasswordId;
use eid_pace::secure_messaging;
use hex_literal::hex;
use zeroize::Zeroizing;


const CAN: &[u8] = b"123456";
const CARD_ACCESS: [u8; 22] = hex!("3114 3012 060A04007F00070202040202 020102 02010D");
const EF_COM: [u8; 24] = hex!("60 16 5F01 04 30313037 5F36 06 303430303030 5C 04 6175636E");
const CAR: &[u8] = b"DETESTCVCA00003";


#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Tamper {
    None,
    ResponseMac,
    ResponseStatusMissing,
    ChipToken,
}


/// The chip side of PACE with ECDH generic mapping and Secure Messaging.
struct SimulatedChip {
    suite: CipherSuite,
    domain: DomainParameters,
    password: Vec<u8>,
    tamper: Tamper,
    tamper_after: usize,
    link_drops_at_step: Option<u8>,
    cancel_after_nonce: Option<Arc<AtomicBool>>,

    step: u8,
    nonce: Vec<u8>,
    mapped_domain: Option<DomainParameters>,
    key_pair: Option<EphemeralKeyPair>,
    terminal_public_key: Vec<u8>,
    keys: Option<SessionKeys>,
    ssc: u128,
    selected_file: Option<u16>,
    protected_responses: usize,
    commands: Vec<Apdu>,
}
impl SimulatedChip {
    fn new(password: &[u8]) -> Self {
        Self {
            suite: CipherSuite::Aes128,
            domain: DomainParameters::standardized(13).unwrap(),
            password: password.to_vec(),
            tamper: Tamper::None,
            tamper_after: 0,
            link_drops_at_step: None,
            cancel_after_nonce: None,
            step: 0,
            nonce: Vec::new(),
            mapped_domain: None,
            key_pair: None,
            terminal_public_key: Vec::new(),
            keys: None,
            ssc: 0,
            selected_file: None,
            protected_responses: 0,
            commands: Vec::new(),
        }
    }

    fn ga_response(objects: &[(u32, &[u8])]) -> Response {
        let mut inner = Vec::new();
        for (tag, value) in objects {
            encode_tlv(&mut inner, *tag, value);
        }
        let mut outer = Vec::new();
        encode_tlv(&mut outer, 0x7C, &inner);
        Response::new(outer, 0x9000)
    }

    fn ga_object(request: &Apdu, tag: u32) -> Option<Vec<u8>> {
        let outer = parse_tlvs(request.data.request_data()?).ok()?;
        let inner = parse_tlvs(outer.first()?.value).ok()?;
        inner.iter()
            .find(|tlv| tlv.tag == tag)
            .map(|tlv| tlv.value.to_vec())
    }

    fn answer_plain(&mut self, request: &Apdu) -> Response {
        let provider = NativeCrypto;
        let protocol = ecdh_gm_protocol(self.suite);
        match (request.header.ins, self.step) {
            (0xA4, _) => Response::new(Vec::new(), 0x9000),
            (0xB0, _) => Response::new(CARD_ACCESS.to_vec(), 0x9000),
            (0x22, 0) => {
                self.step = 1;
                Response::new(Vec::new(), 0x9000)
            },
            (0x86, 1) => {
                self.step = 2;
                self.nonce = vec![0x5A; 16];
                let password_key = provider.derive_key(self.suite, &self.password, 3);
                let mut encrypted_nonce = self.nonce.clone();
                provider.encrypt(self.suite, &password_key, &[0u8; 16], &mut encrypted_nonce).unwrap();
                if let Some(cancelled) = &self.cancel_after_nonce {
                    cancelled.store(true, Ordering::SeqCst);
                }
                Self::ga_response(&[(0x80, encrypted_nonce.as_slice())])
            },
            (0x86, 2) => {
                self.step = 3;
                let terminal_mapping_key = Self::ga_object(request, 0x81).unwrap();
                let mapping_key_pair = provider.generate_ephemeral_key_pair(&self.domain).unwrap();
                let shared_point = provider.derive_shared_point(&self.domain, &mapping_key_pair, &terminal_mapping_key).unwrap();
                self.mapped_domain = Some(provider.map_nonce(&self.domain, &self.nonce, &shared_point).unwrap());
                Self::ga_response(&[(0x82, mapping_key_pair.public_key())])
            },
            (0x86, 3) => {
                self.step = 4;
                let mapped_domain = self.mapped_domain.as_ref().unwrap();
                self.terminal_public_key = Self::ga_object(request, 0x83).unwrap();
                let key_pair = provider.generate_ephemeral_key_pair(mapped_domain).unwrap();
                let shared_secret = provider.derive_shared_secret(mapped_domain, &key_pair, &self.terminal_public_key).unwrap();
                self.keys = Some(provider.derive_session_keys(self.suite, &shared_secret));
                let response = Self::ga_response(&[(0x84, key_pair.public_key())]);
                self.key_pair = Some(key_pair);
                response
            },
            (0x86, 4) => {
                self.step = 5;
                let keys = self.keys.as_ref().unwrap();
                let key_pair = self.key_pair.as_ref().unwrap();
                let terminal_token = Self::ga_object(request, 0x85).unwrap();
                let expected = provider.compute_authentication_token(self.suite, keys.mac(), protocol, key_pair.public_key()).unwrap();
                if terminal_token != expected.as_slice() {
                    self.keys = None;
                    return Response::new(Vec::new(), 0x6300);
                }
                let mut chip_token = provider.compute_authentication_token(self.suite, keys.mac(), protocol, &self.terminal_public_key).unwrap();
                if self.tamper == Tamper::ChipToken {
                    chip_token[0] ^= 0x01;
                }
                Self::ga_response(&[(0x86, chip_token.as_slice()), (0x87, CAR)])
            },
            _ => Response::new(Vec::new(), 0x6985),
        }
    }

    fn padded(&self, data: &[u8]) -> Vec<u8> {
        let mut padded = data.to_vec();
        pad_iso7816(&mut padded, self.suite.block_size());
        padded
    }

    fn ssc_bytes(&self) -> Vec<u8> {
        self.ssc.to_be_bytes().to_vec()
    }

    fn answer_protected(&mut self, request: &Apdu) -> Response {
        let provider = NativeCrypto;
        let keys = self.keys.clone().unwrap();

        // command
        self.ssc += 1;
        let body = request.data.request_data().unwrap_or(&[]);
        let objects = parse_tlvs(body).unwrap();
        let (mac_object, authenticated) = objects.split_last().unwrap();
        assert_eq!(mac_object.tag, 0x8E);
        let mut mac_input = self.ssc_bytes();
        mac_input.extend(self.padded(&request.header.to_bytes()));
        let authenticated_raw: Vec<u8> = authenticated.iter().flat_map(|tlv| tlv.raw.iter().copied()).collect();
        if !authenticated_raw.is_empty() {
            mac_input.extend(self.padded(&authenticated_raw));
        }
        let mac = provider.mac(self.suite, keys.mac(), &mac_input).unwrap();
        if mac.as_slice() != mac_object.value {
            return Response::new(Vec::new(), 0x6988);
        }
        let mut command_data = Vec::new();
        if let Some(cryptogram) = authenticated.iter().find(|tlv| tlv.tag == 0x87) {
            assert_eq!(cryptogram.value[0], 0x01);
            let mut plaintext = cryptogram.value[1..].to_vec();
            let iv = provider.sequence_counter_iv(self.suite, keys.encryption(), &self.ssc_bytes()).unwrap();
            provider.decrypt(self.suite, keys.encryption(), &iv, &mut plaintext).unwrap();
            command_data = unpad_iso7816(&plaintext).unwrap().to_vec();
        }

        let (data, status_word): (Vec<u8>, u16) = match request.header.ins {
            0xA4 => {
                self.selected_file = Some(u16::from_be_bytes([command_data[0], command_data[1]]));
                (Vec::new(), 0x9000)
            },
            0xB0 if self.selected_file == Some(0x011E) => (EF_COM.to_vec(), 0x9000),
            _ => (Vec::new(), 0x6A82),
        };

        // response
        self.ssc += 1;
        let tamper = if self.protected_responses >= self.tamper_after { self.tamper } else { Tamper::None };
        self.protected_responses += 1;
        let mut response_body = Vec::new();
        if !data.is_empty() {
            let mut cryptogram = self.padded(&data);
            let iv = provider.sequence_counter_iv(self.suite, keys.encryption(), &self.ssc_bytes()).unwrap();
            provider.encrypt(self.suite, keys.encryption(), &iv, &mut cryptogram).unwrap();
            let mut value = vec![0x01];
            value.extend(cryptogram);
            encode_tlv(&mut response_body, 0x87, &value);
        }
        if tamper != Tamper::ResponseStatusMissing {
            encode_tlv(&mut response_body, 0x99, &status_word.to_be_bytes());
        }
        let mut mac_input = self.ssc_bytes();
        mac_input.extend(self.padded(&response_body));
        let mut mac = provider.mac(self.suite, keys.mac(), &mac_input).unwrap().to_vec();
        if tamper == Tamper::ResponseMac {
            mac[0] ^= 0x01;
        }
        encode_tlv(&mut response_body, 0x8E, &mac);
        Response::new(response_body, 0x9000)
    }
}
impl SmartCard for SimulatedChip {
    fn transmit(&mut self, request: &[u8]) -> Result<Vec<u8>, CommunicationError> {
        let request = Apdu::try_from_slice(request)?;
        self.commands.push(request.clone());
        if request.header.ins == 0x86 && self.link_drops_at_step == Some(self.step) {
            return Err(CommunicationError::Transport(Box::new(io::Error::new(io::ErrorKind::TimedOut, "no answer from chip"))));
        }
        let response = if request.header.cla & 0x0C == 0x0C {
            self.answer_protected(&request)
        } else {
            self.answer_plain(&request)
        };
        Ok(response.to_bytes())
    }
}


/// Records the send sequence counter of every IV derivation.
#[derive(Clone, Default)]
struct RecordingProvider {
    counters: Rc<RefCell<Vec<Vec<u8>>>>,
}
impl CryptoProvider for RecordingProvider {
    fn generate_ephemeral_key_pair(&self, domain: &DomainParameters) -> Result<EphemeralKeyPair, CryptoError> {
        NativeCrypto.generate_ephemeral_key_pair(domain)
    }

    fn derive_shared_point(&self, domain: &DomainParameters, key_pair: &EphemeralKeyPair, partner_public: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        NativeCrypto.derive_shared_point(domain, key_pair, partner_public)
    }

    fn map_nonce(&self, domain: &DomainParameters, nonce: &[u8], shared_point: &[u8]) -> Result<DomainParameters, CryptoError> {
        NativeCrypto.map_nonce(domain, nonce, shared_point)
    }

    fn derive_shared_secret(&self, domain: &DomainParameters, key_pair: &EphemeralKeyPair, partner_public: &[u8]) -> Result<SharedSecret, CryptoError> {
        NativeCrypto.derive_shared_secret(domain, key_pair, partner_public)
    }

    fn derive_key(&self, suite: CipherSuite, secret: &[u8], counter: u32) -> Zeroizing<Vec<u8>> {
        NativeCrypto.derive_key(suite, secret, counter)
    }

    fn encrypt(&self, suite: CipherSuite, key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), CryptoError> {
        NativeCrypto.encrypt(suite, key, iv, data)
    }

    fn decrypt(&self, suite: CipherSuite, key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), CryptoError> {
        NativeCrypto.decrypt(suite, key, iv, data)
    }

    fn mac(&self, suite: CipherSuite, key: &[u8], data: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        NativeCrypto.mac(suite, key, data)
    }

    fn sequence_counter_iv(&self, suite: CipherSuite, key: &[u8], send_sequence_counter: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.counters.borrow_mut().push(send_sequence_counter.to_vec());
        NativeCrypto.sequence_counter_iv(suite, key, send_sequence_counter)
    }
}


fn select(file_id: u16) -> Apdu {
    Apdu::new(
        CommandHeader { cla: 0x00, ins: 0xA4, p1: 0x02, p2: 0x0C },
        Data::RequestDataShort { request_data: file_id.to_be_bytes().to_vec() },
    )
}


fn read_binary() -> Apdu {
    Apdu::new(
        CommandHeader { cla: 0x00, ins: 0xB0, p1: 0x00, p2: 0x00 },
        Data::ResponseDataShort { response_data_length: 0x00 },
    )
}


#[test]
fn establish_and_read() {
    let mut chip = SimulatedChip::new(CAN);
    let mut engine = PaceEngine::new(NativeCrypto);
    let request = PaceRequest::new(PasswordId::Can, CAN);

    let mut established = engine.establish(&mut chip, &request).unwrap();
    assert_eq!(established.current_car.as_deref(), Some(CAR));
    assert_eq!(established.chip_identifier.len(), 32);

    let response = established.channel.communicate(&select(0x011E)).unwrap();
    assert_eq!(response.status_word(), 0x9000);
    assert!(response.data.is_empty());
    let response = established.channel.communicate(&read_binary()).unwrap();
    assert_eq!(response.status_word(), 0x9000);
    assert_eq!(response.data, EF_COM);
    let response = established.channel.communicate(&select(0x0101)).unwrap();
    assert_eq!(response.status_word(), 0x9000);
    let response = established.channel.communicate(&read_binary()).unwrap();
    assert_eq!(response.status_word(), 0x6A82);

    assert_eq!(established.channel.codec().send_sequence_counter(), 8);
    drop(established);
    assert_eq!(engine.state(), State::MutuallyAuthenticated);
    assert_eq!(chip.ssc, 8);

    // unprotected: SELECT, READ BINARY, MSE, four times GA; protected: four commands
    assert_eq!(chip.commands.len(), 11);
    assert!(chip.commands[7..].iter().all(|command| command.header.cla == 0x0C));
}


#[test]
fn sequence_counter_strictly_increases() {
    let mut chip = SimulatedChip::new(CAN);
    let provider = RecordingProvider::default();
    let mut engine = PaceEngine::new(provider.clone());
    let request = PaceRequest::new(PasswordId::Can, CAN);

    let mut established = engine.establish_with_card_access(&mut chip, &CARD_ACCESS, &request).unwrap();
    established.channel.communicate(&select(0x011E)).unwrap();
    established.channel.communicate(&read_binary()).unwrap();

    // SELECT: command data; READ BINARY: response data
    let counters = provider.counters.borrow();
    let counters: Vec<u128> = counters.iter()
        .map(|bytes| u128::from_be_bytes(bytes.as_slice().try_into().unwrap()))
        .collect();
    assert_eq!(counters, vec![1, 4]);
}


#[test]
fn wrong_password() {
    let mut chip = SimulatedChip::new(CAN);
    let mut engine = PaceEngine::new(NativeCrypto);
    let request = PaceRequest::new(PasswordId::Can, b"654321");

    let error = engine.establish(&mut chip, &request).unwrap_err();
    assert_eq!(error.kind(), FailureKind::AuthenticationTokenMismatch);
    assert!(!error.is_retryable());
    assert!(matches!(
        error,
        CommunicationError::Pace(pace::Error::AuthenticationTokenMismatch { status_word: Some(0x6300), .. }),
    ));
    assert_eq!(engine.state(), State::Failed);
}


#[test]
fn forged_chip_token() {
    let mut chip = SimulatedChip::new(CAN);
    chip.tamper = Tamper::ChipToken;
    let mut engine = PaceEngine::new(NativeCrypto);
    let request = PaceRequest::new(PasswordId::Can, CAN);

    let error = engine.establish_with_card_access(&mut chip, &CARD_ACCESS, &request).unwrap_err();
    assert_eq!(error.kind(), FailureKind::AuthenticationTokenMismatch);
    assert!(matches!(
        error,
        CommunicationError::Pace(pace::Error::AuthenticationTokenMismatch { status_word: None, .. }),
    ));
    assert_eq!(engine.state(), State::Failed);
    assert_eq!(chip.commands.len(), 5);
}


#[test]
fn transport_failure_during_key_agreement() {
    let mut chip = SimulatedChip::new(CAN);
    chip.link_drops_at_step = Some(3);
    let mut engine = PaceEngine::new(NativeCrypto);
    let request = PaceRequest::new(PasswordId::Can, CAN);

    let error = engine.establish_with_card_access(&mut chip, &CARD_ACCESS, &request).unwrap_err();
    assert_eq!(error.kind(), FailureKind::Transport);
    assert!(error.is_retryable());
    assert!(matches!(error, CommunicationError::Transport(_)));
    assert_eq!(engine.state(), State::Failed);

    // the engine is spent; a retry needs a fresh one
    let error = engine.establish_with_card_access(&mut chip, &CARD_ACCESS, &request).unwrap_err();
    assert!(matches!(error, CommunicationError::Pace(pace::Error::NotIdle { .. })));
}


#[test]
fn cancellation_between_rounds() {
    let mut chip = SimulatedChip::new(CAN);
    let cancelled = Arc::new(AtomicBool::new(false));
    chip.cancel_after_nonce = Some(Arc::clone(&cancelled));
    let mut engine = PaceEngine::new(NativeCrypto)
        .with_cancellation(cancelled);
    let request = PaceRequest::new(PasswordId::Can, CAN);

    let error = engine.establish_with_card_access(&mut chip, &CARD_ACCESS, &request).unwrap_err();
    assert_eq!(error.kind(), FailureKind::Cancelled);
    assert!(matches!(error, CommunicationError::Pace(pace::Error::Cancelled)));
    assert_eq!(engine.state(), State::Failed);

    // MSE:Set AT and the nonce request; mapping never starts
    assert_eq!(chip.commands.len(), 2);
    assert_eq!(chip.step, 2);
}


#[test]
fn tampered_mac_closes_channel() {
    let mut chip = SimulatedChip::new(CAN);
    chip.tamper = Tamper::ResponseMac;
    chip.tamper_after = 1;
    let mut engine = PaceEngine::new(NativeCrypto);
    let parameters = PaceParameters::new(PACE_ECDH_GM_AES_CBC_CMAC_128, 13).unwrap();
    let request = PaceRequest::new(PasswordId::Can, CAN);
    let mut established = engine.establish_with_parameters(&mut chip, &parameters, &request).unwrap();

    let response = established.channel.communicate(&select(0x011E)).unwrap();
    assert_eq!(response.status_word(), 0x9000);

    let error = established.channel.communicate(&read_binary()).unwrap_err();
    assert_eq!(error.kind(), FailureKind::Integrity);
    assert!(matches!(
        error,
        CommunicationError::SecureMessaging(secure_messaging::Error::ResponseMac),
    ));
    assert!(!established.channel.is_open());

    let error = established.channel.communicate(&read_binary()).unwrap_err();
    assert_eq!(error.kind(), FailureKind::ChannelClosed);
    drop(established);

    // MSE, four times GA, two protected commands; nothing reaches the card once the channel is closed
    assert_eq!(chip.commands.len(), 7);
}


#[test]
fn missing_status_closes_channel() {
    let mut chip = SimulatedChip::new(CAN);
    chip.tamper = Tamper::ResponseStatusMissing;
    let mut engine = PaceEngine::new(NativeCrypto);
    let request = PaceRequest::new(PasswordId::Can, CAN);
    let mut established = engine.establish(&mut chip, &request).unwrap();

    let error = established.channel.communicate(&select(0x011E)).unwrap_err();
    assert_eq!(error.kind(), FailureKind::Integrity);
    assert!(matches!(
        error,
        CommunicationError::SecureMessaging(secure_messaging::Error::MissingResponseStatus),
    ));
    assert!(!established.channel.is_open());
}


#[test]
fn cancellation() {
    let mut chip = SimulatedChip::new(CAN);
    let cancelled = Arc::new(AtomicBool::new(false));
    let mut engine = PaceEngine::new(NativeCrypto)
        .with_cancellation(Arc::clone(&cancelled));
    let request = PaceRequest::new(PasswordId::Can, CAN);

    cancelled.store(true, Ordering::SeqCst);
    let error = engine.establish_with_card_access(&mut chip, &CARD_ACCESS, &request).unwrap_err();
    assert_eq!(error.kind(), FailureKind::Cancelled);
    assert_eq!(engine.state(), State::Failed);
    assert!(chip.commands.is_empty());
}


#[test]
fn unsupported_card_access() {
    let mut chip = SimulatedChip::new(CAN);
    let mut engine = PaceEngine::new(NativeCrypto);
    let request = PaceRequest::new(PasswordId::Can, CAN);

    // ECDH integrated mapping only
    let card_access = hex!("3114 3012 060A04007F00070202040402 020102 02010D");
    let error = engine.establish_with_card_access(&mut chip, &card_access, &request).unwrap_err();
    assert_eq!(error.kind(), FailureKind::Unsupported);
    assert_eq!(engine.state(), State::Failed);
    assert!(chip.commands.is_empty());
}
