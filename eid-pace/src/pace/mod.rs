//! Implementation of Password Authenticated Connection Establishment.
//!
//! [`PaceEngine`] runs the terminal side of PACE with ECDH generic mapping:
//!
//! 1. MSE:Set AT selects the protocol and the password,
//! 2. General Authenticate obtains the nonce encrypted with the password key,
//! 3. General Authenticate exchanges the mapping keys; the nonce is mapped onto a new generator,
//! 4. General Authenticate exchanges ephemeral keys on the mapped curve,
//! 5. General Authenticate exchanges authentication tokens.
//!
//! On success, the card is wrapped in a [`SecureMessaging`] channel using the derived keys.


pub mod asn1;
pub mod oids;


use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rasn::types::{ObjectIdentifier, Oid};
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

use crate::crypt::{CipherSuite, CryptoError, CryptoProvider, DomainParameters, SessionKeys};
use crate::der_util::{encode_tlv, parse_tlvs, TlvError};
use crate::iso7816::apdu::{Apdu, CommandHeader, Data, Response};
use crate::iso7816::card::{CommunicationError, FailureKind, SmartCard};
use crate::pace::asn1::{CardAccessError, PaceInfo};
use crate::password::{PasswordId, PasswordStatus};
use crate::secure_messaging::{SecureMessaging, SecureMessagingCodec};
use crate::status::{map_status_word, PaceResultCode, Step, StatusFailure};


/// The short file identifier-less ID of `EF.CardAccess`.
const EF_CARD_ACCESS_FILE_ID: [u8; 2] = [0x01, 0x1C];

const TAG_DYNAMIC_AUTHENTICATION_DATA: u32 = 0x7C;
const TAG_ENCRYPTED_NONCE: u32 = 0x80;
const TAG_MAPPING_DATA_TERMINAL: u32 = 0x81;
const TAG_MAPPING_DATA_CHIP: u32 = 0x82;
const TAG_EPHEMERAL_KEY_TERMINAL: u32 = 0x83;
const TAG_EPHEMERAL_KEY_CHIP: u32 = 0x84;
const TAG_TOKEN_TERMINAL: u32 = 0x85;
const TAG_TOKEN_CHIP: u32 = 0x86;
const TAG_CAR_CURRENT: u32 = 0x87;
const TAG_CAR_PREVIOUS: u32 = 0x88;

const TAG_MSE_PROTOCOL: u32 = 0x80;
const TAG_MSE_PASSWORD: u32 = 0x83;
const TAG_MSE_CHAT: u32 = 0x7F4C;
const TAG_MSE_EXTENSIONS: u32 = 0x65;


/// The progress of a PACE run.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum State {
    Idle,
    SetAtSent,
    NonceMapped,
    KeyAgreed,
    MutuallyAuthenticated,
    Failed,
}
impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::SetAtSent => write!(f, "authentication template set"),
            Self::NonceMapped => write!(f, "nonce mapped"),
            Self::KeyAgreed => write!(f, "key agreed"),
            Self::MutuallyAuthenticated => write!(f, "mutually authenticated"),
            Self::Failed => write!(f, "failed"),
        }
    }
}


#[derive(Debug)]
pub enum Error {
    /// The engine has already been used; every run needs a fresh engine.
    NotIdle { state: State },
    Cancelled,
    CardAccess(CardAccessError),
    NotSupported,
    UnsupportedProtocol { protocol: ObjectIdentifier },
    UnsupportedParameters { parameter_id: Option<u32> },
    Status(StatusFailure),
    TlvEncoding { step: Step, error: TlvError },
    UnexpectedResponse { step: Step, expected_tag: u32 },
    Crypto { step: Step, error: CryptoError },
    PublicKeysEqual { step: Step },
    AuthenticationTokenMismatch {
        status_word: Option<u16>,
        password_status: Option<PasswordStatus>,
    },
}
impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotIdle { .. } => FailureKind::Unsupported,
            Self::Cancelled => FailureKind::Cancelled,
            Self::CardAccess(_) => FailureKind::Encoding,
            Self::NotSupported => FailureKind::Unsupported,
            Self::UnsupportedProtocol { .. } => FailureKind::Unsupported,
            Self::UnsupportedParameters { .. } => FailureKind::Unsupported,
            Self::Status(_) => FailureKind::ProtocolStatus,
            Self::TlvEncoding { .. } => FailureKind::Encoding,
            Self::UnexpectedResponse { .. } => FailureKind::Encoding,
            Self::Crypto { .. } => FailureKind::Encoding,
            Self::PublicKeysEqual { .. } => FailureKind::Integrity,
            Self::AuthenticationTokenMismatch { .. } => FailureKind::AuthenticationTokenMismatch,
        }
    }

    /// The reader result code describing this failure, if there is one.
    pub fn result_code(&self) -> Option<PaceResultCode> {
        match self {
            Self::Cancelled => Some(PaceResultCode::Abort),
            Self::Status(failure) => Some(failure.code),
            Self::TlvEncoding { .. } => Some(PaceResultCode::TlvResponseSyntax),
            Self::UnexpectedResponse { .. } => Some(PaceResultCode::UnexpectedTlvResponseObject),
            Self::AuthenticationTokenMismatch { status_word: Some(sw), .. } => Some(PaceResultCode::GeneralAuthenticate4(*sw)),
            Self::AuthenticationTokenMismatch { status_word: None, .. } => Some(PaceResultCode::WrongAuthToken),
            _ => None,
        }
    }
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::NotIdle { state }
                => write!(f, "PACE engine is not idle (state: {})", state),
            Self::Cancelled
                => write!(f, "PACE was cancelled"),
            Self::CardAccess(e)
                => write!(f, "{}", e),
            Self::NotSupported
                => write!(f, "the card offers no supported PACE protocol"),
            Self::UnsupportedProtocol { protocol }
                => write!(f, "protocol {} is not supported", oids::dotted(protocol)),
            Self::UnsupportedParameters { parameter_id: Some(parameter_id) }
                => write!(f, "domain parameters {} are not supported", parameter_id),
            Self::UnsupportedParameters { parameter_id: None }
                => write!(f, "explicit domain parameters are not supported"),
            Self::Status(failure)
                => write!(f, "{}", failure),
            Self::TlvEncoding { step, error }
                => write!(f, "invalid TLV encoding in {} response: {}", step, error),
            Self::UnexpectedResponse { step, expected_tag }
                => write!(f, "{} response does not contain data object 0x{:02X}", step, expected_tag),
            Self::Crypto { step, error }
                => write!(f, "cryptographic failure in {}: {}", step, error),
            Self::PublicKeysEqual { step }
                => write!(f, "terminal and chip public keys are equal in {}", step),
            Self::AuthenticationTokenMismatch { status_word: Some(sw), password_status: Some(status) }
                => write!(f, "card rejected the authentication token with {:04X} ({})", sw, status),
            Self::AuthenticationTokenMismatch { status_word: Some(sw), password_status: None }
                => write!(f, "card rejected the authentication token with {:04X}", sw),
            Self::AuthenticationTokenMismatch { status_word: None, .. }
                => write!(f, "authentication token of the card does not verify"),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CardAccess(e) => Some(e),
            Self::Status(e) => Some(e),
            Self::TlvEncoding { error, .. } => Some(error),
            Self::Crypto { error, .. } => Some(error),
            _ => None,
        }
    }
}
impl From<CardAccessError> for Error {
    fn from(value: CardAccessError) -> Self { Self::CardAccess(value) }
}
impl From<StatusFailure> for Error {
    fn from(value: StatusFailure) -> Self { Self::Status(value) }
}


/// What the caller wants to authenticate with.
#[derive(Clone)]
pub struct PaceRequest {
    pub password_id: PasswordId,
    pub secret: Zeroizing<Vec<u8>>,

    /// The certificate holder authorization template (contents of tag `7F4C`).
    pub chat: Option<Vec<u8>>,

    /// The certificate description shown to the user; only passed on by readers running PACE
    /// themselves.
    pub certificate_description: Option<Vec<u8>>,

    /// Authentication extensions for MSE:Set AT (contents of tag `65`).
    pub certificate_extensions: Option<Vec<u8>>,
}
impl PaceRequest {
    pub fn new(password_id: PasswordId, secret: &[u8]) -> Self {
        Self {
            password_id,
            secret: Zeroizing::new(secret.to_vec()),
            chat: None,
            certificate_description: None,
            certificate_extensions: None,
        }
    }

    pub fn with_chat(mut self, chat: Vec<u8>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn with_certificate_description(mut self, certificate_description: Vec<u8>) -> Self {
        self.certificate_description = Some(certificate_description);
        self
    }

    pub fn with_certificate_extensions(mut self, certificate_extensions: Vec<u8>) -> Self {
        self.certificate_extensions = Some(certificate_extensions);
        self
    }
}
impl fmt::Debug for PaceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaceRequest")
            .field("password_id", &self.password_id)
            .field("secret", &"<redacted>")
            .field("chat", &self.chat)
            .field("certificate_description", &self.certificate_description)
            .field("certificate_extensions", &self.certificate_extensions)
            .finish()
    }
}


/// The protocol and domain parameters of a PACE run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PaceParameters {
    protocol: ObjectIdentifier,
    suite: CipherSuite,
    domain: DomainParameters,
}
impl PaceParameters {
    /// Parameters for an ECDH generic mapping protocol with standardized domain parameters.
    pub fn new(protocol: &Oid, parameter_id: u8) -> Result<Self, Error> {
        let suite = oids::cipher_suite(protocol)
            .ok_or_else(|| Error::UnsupportedProtocol { protocol: protocol.to_owned() })?;
        let domain = DomainParameters::standardized(parameter_id)
            .ok_or(Error::UnsupportedParameters { parameter_id: Some(parameter_id.into()) })?;
        Ok(Self {
            protocol: protocol.to_owned(),
            suite,
            domain,
        })
    }

    pub fn from_pace_info(pace_info: &PaceInfo) -> Result<Self, Error> {
        if oids::cipher_suite(&pace_info.protocol).is_none() {
            return Err(Error::UnsupportedProtocol { protocol: pace_info.protocol.clone() });
        }
        let parameter_id = pace_info.standardized_curve_id()
            .ok_or(Error::UnsupportedParameters { parameter_id: pace_info.parameter_id })?;
        Self::new(&pace_info.protocol, parameter_id)
    }

    /// Chooses the first supported entry of `EF.CardAccess`.
    pub fn from_card_access(card_access: &[u8]) -> Result<Self, Error> {
        let pace_infos = asn1::parse_card_access(card_access)?;
        match asn1::select_pace_info(&pace_infos) {
            Some(pace_info) => Self::from_pace_info(pace_info),
            None => match pace_infos.first() {
                Some(unsupported) => Self::from_pace_info(unsupported),
                None => Err(Error::NotSupported),
            },
        }
    }

    pub fn protocol(&self) -> &Oid { &self.protocol }
    pub fn suite(&self) -> CipherSuite { self.suite }
    pub fn domain(&self) -> &DomainParameters { &self.domain }
}


/// A successfully established PACE channel.
pub struct Established<'sc, SC: SmartCard + ?Sized, P: CryptoProvider> {
    pub channel: SecureMessaging<'sc, SC, P>,

    /// The most recent certification authority reference for Terminal Authentication.
    pub current_car: Option<Vec<u8>>,

    /// The previous certification authority reference for Terminal Authentication.
    pub previous_car: Option<Vec<u8>>,

    /// `ID_PICC`: the x coordinate of the chip's ephemeral public key.
    pub chip_identifier: Vec<u8>,

    /// The status word of MSE:Set AT.
    pub mse_status_word: u16,

    /// The password warning reported at MSE:Set AT, if any.
    pub password_status: Option<PasswordStatus>,
}
impl<'sc, SC: SmartCard + ?Sized, P: CryptoProvider> Established<'sc, SC, P> {
    /// The retry counter reported by the card, if it reported one.
    pub fn retry_counter(&self) -> Option<u8> {
        self.password_status.and_then(|status| status.retry_counter())
    }
}
impl<'sc, SC: SmartCard + ?Sized, P: CryptoProvider> fmt::Debug for Established<'sc, SC, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Established")
            .field("channel", &self.channel)
            .field("current_car", &self.current_car)
            .field("previous_car", &self.previous_car)
            .field("chip_identifier", &self.chip_identifier)
            .field("mse_status_word", &self.mse_status_word)
            .field("password_status", &self.password_status)
            .finish()
    }
}


/// What the protocol run hands over to the channel.
struct Outcome {
    keys: SessionKeys,
    current_car: Option<Vec<u8>>,
    previous_car: Option<Vec<u8>>,
    chip_identifier: Vec<u8>,
    mse_status_word: u16,
    password_status: Option<PasswordStatus>,
}


/// Runs PACE once.
pub struct PaceEngine<P: CryptoProvider + Clone> {
    provider: P,
    state: State,
    cancellation: Option<Arc<AtomicBool>>,
}
impl<P: CryptoProvider + Clone> PaceEngine<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            state: State::Idle,
            cancellation: None,
        }
    }

    /// Lets the run be cancelled by setting the flag; it is checked between exchanges.
    pub fn with_cancellation(mut self, cancellation: Arc<AtomicBool>) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    pub fn state(&self) -> State { self.state }
    pub fn provider(&self) -> &P { &self.provider }

    fn transition(&mut self, state: State) {
        debug!(from = %self.state, to = %state, "PACE state change");
        self.state = state;
    }

    fn check_cancelled(&self) -> Result<(), Error> {
        match &self.cancellation {
            Some(flag) if flag.load(Ordering::SeqCst) => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    fn ensure_idle(&self) -> Result<(), CommunicationError> {
        if self.state != State::Idle {
            return Err(Error::NotIdle { state: self.state }.into());
        }
        Ok(())
    }

    /// Reads `EF.CardAccess`, picks the protocol and runs PACE.
    #[instrument(skip_all, fields(password = %request.password_id))]
    pub fn establish<'sc, SC: SmartCard + ?Sized>(&mut self, card: &'sc mut SC, request: &PaceRequest) -> Result<Established<'sc, SC, P>, CommunicationError> {
        self.ensure_idle()?;
        let parameters = read_card_access(card)
            .and_then(|card_access| Ok(PaceParameters::from_card_access(&card_access)?));
        match parameters {
            Ok(parameters) => self.establish_with_parameters(card, &parameters, request),
            Err(e) => {
                self.transition(State::Failed);
                Err(e)
            },
        }
    }

    /// Picks the protocol from the given contents of `EF.CardAccess` and runs PACE.
    pub fn establish_with_card_access<'sc, SC: SmartCard + ?Sized>(&mut self, card: &'sc mut SC, card_access: &[u8], request: &PaceRequest) -> Result<Established<'sc, SC, P>, CommunicationError> {
        self.ensure_idle()?;
        match PaceParameters::from_card_access(card_access) {
            Ok(parameters) => self.establish_with_parameters(card, &parameters, request),
            Err(e) => {
                self.transition(State::Failed);
                Err(e.into())
            },
        }
    }

    /// Runs PACE with the given protocol and domain parameters.
    #[instrument(skip_all, fields(password = %request.password_id, protocol = %oids::dotted(&parameters.protocol)))]
    pub fn establish_with_parameters<'sc, SC: SmartCard + ?Sized>(&mut self, card: &'sc mut SC, parameters: &PaceParameters, request: &PaceRequest) -> Result<Established<'sc, SC, P>, CommunicationError> {
        self.ensure_idle()?;
        let outcome = match self.run(card, parameters, request) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("PACE failed: {}", e);
                self.transition(State::Failed);
                return Err(e);
            },
        };

        let codec = SecureMessagingCodec::new(parameters.suite, outcome.keys, self.provider.clone());
        Ok(Established {
            channel: SecureMessaging::new(card, codec),
            current_car: outcome.current_car,
            previous_car: outcome.previous_car,
            chip_identifier: outcome.chip_identifier,
            mse_status_word: outcome.mse_status_word,
            password_status: outcome.password_status,
        })
    }

    fn run<SC: SmartCard + ?Sized>(&mut self, card: &mut SC, parameters: &PaceParameters, request: &PaceRequest) -> Result<Outcome, CommunicationError> {
        let suite = parameters.suite;
        let provider = self.provider.clone();

        // MSE:Set AT
        self.check_cancelled()?;
        let mse_response = card.communicate(&set_authentication_template_apdu(&parameters.protocol, request))?;
        let mse_status_word = mse_response.status_word();
        let password_status = PasswordStatus::from_status_word(mse_status_word);
        match (mse_status_word, request.password_id) {
            (0x63C0, PasswordId::Puk) => {},
            _ => map_status_word(Step::MseSetAt, mse_status_word).map_err(Error::from)?,
        }
        if let Some(status) = password_status {
            warn!(%status, "card reported a password warning");
        }
        self.transition(State::SetAtSent);

        // round 1: encrypted nonce
        self.check_cancelled()?;
        let objects = general_authenticate(card, Step::GeneralAuthenticate1, None)?;
        let mut nonce = Zeroizing::new(take_object(&objects, TAG_ENCRYPTED_NONCE, Step::GeneralAuthenticate1)?);
        {
            let key_seed = request.password_id.key_seed(&request.secret);
            let password_key = provider.derive_key(suite, &key_seed, 3);
            let iv = vec![0u8; suite.block_size()];
            provider.decrypt(suite, &password_key, &iv, &mut nonce)
                .map_err(|error| Error::Crypto { step: Step::GeneralAuthenticate1, error })?;
        }

        // round 2: mapping
        self.check_cancelled()?;
        let step = Step::GeneralAuthenticate2;
        let mapping_key_pair = provider.generate_ephemeral_key_pair(&parameters.domain)
            .map_err(|error| Error::Crypto { step, error })?;
        let objects = general_authenticate(card, step, Some((TAG_MAPPING_DATA_TERMINAL, mapping_key_pair.public_key())))?;
        let chip_mapping_key = take_object(&objects, TAG_MAPPING_DATA_CHIP, step)?;
        if bool::from(chip_mapping_key.as_slice().ct_eq(mapping_key_pair.public_key())) {
            return Err(Error::PublicKeysEqual { step }.into());
        }
        let mapped_domain = {
            let shared_point = provider.derive_shared_point(&parameters.domain, &mapping_key_pair, &chip_mapping_key)
                .map_err(|error| Error::Crypto { step, error })?;
            provider.map_nonce(&parameters.domain, &nonce, &shared_point)
                .map_err(|error| Error::Crypto { step, error })?
        };
        drop(mapping_key_pair);
        drop(nonce);
        self.transition(State::NonceMapped);

        // round 3: key agreement
        self.check_cancelled()?;
        let step = Step::GeneralAuthenticate3;
        let key_pair = provider.generate_ephemeral_key_pair(&mapped_domain)
            .map_err(|error| Error::Crypto { step, error })?;
        let objects = general_authenticate(card, step, Some((TAG_EPHEMERAL_KEY_TERMINAL, key_pair.public_key())))?;
        let chip_public_key = take_object(&objects, TAG_EPHEMERAL_KEY_CHIP, step)?;
        if bool::from(chip_public_key.as_slice().ct_eq(key_pair.public_key())) {
            return Err(Error::PublicKeysEqual { step }.into());
        }
        let keys = {
            let shared_secret = provider.derive_shared_secret(&mapped_domain, &key_pair, &chip_public_key)
                .map_err(|error| Error::Crypto { step, error })?;
            provider.derive_session_keys(suite, &shared_secret)
        };
        self.transition(State::KeyAgreed);

        // round 4: mutual authentication
        self.check_cancelled()?;
        let step = Step::GeneralAuthenticate4;
        let terminal_token = provider.compute_authentication_token(suite, keys.mac(), &parameters.protocol, &chip_public_key)
            .map_err(|error| Error::Crypto { step, error })?;
        let objects = general_authenticate(card, step, Some((TAG_TOKEN_TERMINAL, terminal_token.as_slice())))?;
        let chip_token = take_object(&objects, TAG_TOKEN_CHIP, step)?;
        let expected_token = provider.compute_authentication_token(suite, keys.mac(), &parameters.protocol, key_pair.public_key())
            .map_err(|error| Error::Crypto { step, error })?;
        if !bool::from(chip_token.as_slice().ct_eq(expected_token.as_slice())) {
            return Err(Error::AuthenticationTokenMismatch { status_word: None, password_status: None }.into());
        }
        drop(key_pair);
        self.transition(State::MutuallyAuthenticated);

        let current_car = find_object(&objects, TAG_CAR_CURRENT);
        let previous_car = find_object(&objects, TAG_CAR_PREVIOUS);
        let chip_identifier = chip_identifier(&mapped_domain, &chip_public_key);
        Ok(Outcome {
            keys,
            current_car,
            previous_car,
            chip_identifier,
            mse_status_word,
            password_status,
        })
    }
}


/// Builds MSE:Set AT for PACE.
pub fn set_authentication_template_apdu(protocol: &Oid, request: &PaceRequest) -> Apdu {
    let mut request_data = Vec::new();
    encode_tlv(&mut request_data, TAG_MSE_PROTOCOL, &crate::der_util::oid_to_der_bytes(protocol));
    encode_tlv(&mut request_data, TAG_MSE_PASSWORD, &[request.password_id.code()]);
    if let Some(chat) = &request.chat {
        encode_tlv(&mut request_data, TAG_MSE_CHAT, chat);
    }
    if let Some(extensions) = &request.certificate_extensions {
        encode_tlv(&mut request_data, TAG_MSE_EXTENSIONS, extensions);
    }

    Apdu::new(
        CommandHeader {
            cla: 0x00,
            ins: 0x22, // MANAGE SECURITY ENVIRONMENT
            p1: 0b1100_0001, // verify/encrypt/extauth, compute/decrypt/intauth, set
            p2: 0xA4, // control reference template for authentication
        },
        short_or_extended(request_data, false),
    )
}


fn short_or_extended(request_data: Vec<u8>, expects_response: bool) -> Data {
    match (request_data.len() <= 0xFF, expects_response) {
        (true, false) => Data::RequestDataShort { request_data },
        (false, false) => Data::RequestDataExtended { request_data },
        (true, true) => Data::BothDataShort { request_data, response_data_length: 0 },
        (false, true) => Data::BothDataExtended { request_data, response_data_length: 0 },
    }
}


/// Sends one General Authenticate command and returns the objects inside the dynamic
/// authentication data of the response.
fn general_authenticate<SC: SmartCard + ?Sized>(card: &mut SC, step: Step, object: Option<(u32, &[u8])>) -> Result<Vec<(u32, Vec<u8>)>, CommunicationError> {
    let mut inner = Zeroizing::new(Vec::new());
    if let Some((tag, value)) = object {
        encode_tlv(&mut inner, tag, value);
    }
    let mut request_data = Vec::new();
    encode_tlv(&mut request_data, TAG_DYNAMIC_AUTHENTICATION_DATA, &inner);

    let cla = if step == Step::GeneralAuthenticate4 {
        0b000_0_00_00 // last in a chain
    } else {
        0b000_1_00_00 // not the last in a chain
    };
    let request = Apdu::new(
        CommandHeader {
            cla,
            ins: 0x86, // GENERAL AUTHENTICATE
            p1: 0x00, // algorithm is known (from "set authentication template")
            p2: 0x00, // key index is known (from "set authentication template")
        },
        short_or_extended(request_data, true),
    );
    let response = card.communicate(&request)?;
    check_status(step, &response)?;
    Ok(parse_dynamic_authentication_data(step, &response.data)?)
}


fn check_status(step: Step, response: &Response) -> Result<(), Error> {
    let status_word = response.status_word();
    if step == Step::GeneralAuthenticate4 && status_word & 0xFF00 == 0x6300 {
        return Err(Error::AuthenticationTokenMismatch {
            status_word: Some(status_word),
            password_status: PasswordStatus::from_status_word(status_word),
        });
    }
    map_status_word(step, status_word)?;
    Ok(())
}


fn parse_dynamic_authentication_data(step: Step, data: &[u8]) -> Result<Vec<(u32, Vec<u8>)>, Error> {
    let outer = parse_tlvs(data)
        .map_err(|error| Error::TlvEncoding { step, error })?;
    let dynamic_authentication_data = match outer.as_slice() {
        [only] if only.tag == TAG_DYNAMIC_AUTHENTICATION_DATA => only,
        _ => return Err(Error::UnexpectedResponse { step, expected_tag: TAG_DYNAMIC_AUTHENTICATION_DATA }),
    };
    let inner = parse_tlvs(dynamic_authentication_data.value)
        .map_err(|error| Error::TlvEncoding { step, error })?;
    Ok(inner.into_iter()
        .map(|tlv| (tlv.tag, tlv.value.to_vec()))
        .collect())
}


fn find_object(objects: &[(u32, Vec<u8>)], tag: u32) -> Option<Vec<u8>> {
    objects.iter()
        .find(|(object_tag, _)| *object_tag == tag)
        .map(|(_, value)| value.clone())
}


fn take_object(objects: &[(u32, Vec<u8>)], tag: u32, step: Step) -> Result<Vec<u8>, Error> {
    find_object(objects, tag)
        .ok_or(Error::UnexpectedResponse { step, expected_tag: tag })
}


/// `ID_PICC` for ECDH: the x coordinate of the encoded point `04 || x || y`.
fn chip_identifier(domain: &DomainParameters, chip_public_key: &[u8]) -> Vec<u8> {
    let field_size = domain.field_size_bytes();
    chip_public_key.get(1..1 + field_size)
        .map(|x| x.to_vec())
        .unwrap_or_default()
}


/// Reads the contents of `EF.CardAccess` over an unprotected channel.
pub fn read_card_access<SC: SmartCard + ?Sized>(card: &mut SC) -> Result<Vec<u8>, CommunicationError> {
    let select = Apdu::new(
        CommandHeader {
            cla: 0x00,
            ins: 0xA4, // SELECT
            p1: 0x02, // EF under the current DF
            p2: 0x0C, // no response data
        },
        Data::RequestDataShort { request_data: EF_CARD_ACCESS_FILE_ID.to_vec() },
    );
    let response = card.communicate(&select)?;
    map_status_word(Step::SelectEfCardAccess, response.status_word())
        .map_err(Error::from)?;

    let read_binary = Apdu::new(
        CommandHeader {
            cla: 0x00,
            ins: 0xB0, // READ BINARY
            p1: 0x00,
            p2: 0x00,
        },
        Data::ResponseDataExtended { response_data_length: 0 },
    );
    let response = card.communicate(&read_binary)?;
    // 6282: end of file reached before Le bytes
    if response.status_word() != 0x6282 || response.data.is_empty() {
        map_status_word(Step::ReadEfCardAccess, response.status_word())
            .map_err(Error::from)?;
    }
    debug!(length = response.data.len(), "read EF.CardAccess");
    Ok(response.data)
}


#[cfg(test)]
mod tests {
    use super::{parse_dynamic_authentication_data, set_authentication_template_apdu, Error, PaceParameters, PaceRequest};
    use crate::crypt::CipherSuite;
    use crate::iso7816::card::FailureKind;
    use crate::pace::oids::{PACE_ECDH_GM_AES_CBC_CMAC_128, PACE_ECDH_GM_AES_CBC_CMAC_256};
    use crate::password::PasswordId;
    use crate::status::{PaceResultCode, Step};
    use hex_literal::hex;
    use rasn::types::Oid;

    #[test]
    fn mse_set_at() {
        let request = PaceRequest::new(PasswordId::Mrz, b"T22000129364081251010318");
        let apdu = set_authentication_template_apdu(PACE_ECDH_GM_AES_CBC_CMAC_128, &request);
        assert_eq!(apdu.to_bytes().unwrap(), hex!("0022C1A4 0F 800A04007F00070202040202 830101"));

        let request = PaceRequest::new(PasswordId::Pin, b"123456")
            .with_chat(hex!("060904007F00070301020253050000000004").to_vec())
            .with_certificate_extensions(hex!("7301AA").to_vec());
        let apdu = set_authentication_template_apdu(PACE_ECDH_GM_AES_CBC_CMAC_256, &request);
        assert_eq!(
            apdu.to_bytes().unwrap(),
            hex!("
                0022C1A4 29
                800A04007F00070202040204
                830103
                7F4C12 060904007F00070301020253050000000004
                6503 7301AA
            "),
        );
        assert!(!format!("{:?}", request).contains("123456"));
    }

    #[test]
    fn parameters() {
        let parameters = PaceParameters::new(PACE_ECDH_GM_AES_CBC_CMAC_128, 13).unwrap();
        assert_eq!(parameters.suite(), CipherSuite::Aes128);
        assert_eq!(parameters.domain().parameter_id(), Some(13));
        assert_eq!(parameters.domain().field_size_bytes(), 32);

        let ecdh_im = Oid::const_new(&[0, 4, 0, 127, 0, 7, 2, 2, 4, 4, 2]);
        let error = PaceParameters::new(ecdh_im, 13).unwrap_err();
        assert!(matches!(error, Error::UnsupportedProtocol { .. }));
        assert_eq!(error.kind(), FailureKind::Unsupported);

        assert!(matches!(
            PaceParameters::new(PACE_ECDH_GM_AES_CBC_CMAC_128, 2),
            Err(Error::UnsupportedParameters { parameter_id: Some(2) }),
        ));
    }

    #[test]
    fn parameters_from_card_access() {
        let parameters = PaceParameters::from_card_access(&hex!("3114 3012 060A04007F00070202040202 020102 02010D")).unwrap();
        assert_eq!(parameters.protocol(), PACE_ECDH_GM_AES_CBC_CMAC_128);

        // integrated mapping only
        let error = PaceParameters::from_card_access(&hex!("3114 3012 060A04007F00070202040402 020102 02010D")).unwrap_err();
        assert!(matches!(error, Error::UnsupportedProtocol { .. }));

        // no PACE at all
        let error = PaceParameters::from_card_access(&hex!("310F 300D 060804007F0007020202 020102")).unwrap_err();
        assert!(matches!(error, Error::NotSupported));
    }

    #[test]
    fn dynamic_authentication_data() {
        let objects = parse_dynamic_authentication_data(
            Step::GeneralAuthenticate4,
            &hex!("7C 12 86 08 3ABB9674BCE93C08 87 06 444531323334"),
        ).unwrap();
        assert_eq!(objects, vec![
            (0x86, hex!("3ABB9674BCE93C08").to_vec()),
            (0x87, b"DE1234".to_vec()),
        ]);

        let error = parse_dynamic_authentication_data(Step::GeneralAuthenticate1, &hex!("80 02 0102")).unwrap_err();
        assert_eq!(error.result_code(), Some(PaceResultCode::UnexpectedTlvResponseObject));
        let error = parse_dynamic_authentication_data(Step::GeneralAuthenticate1, &hex!("7C 05 80 02")).unwrap_err();
        assert_eq!(error.result_code(), Some(PaceResultCode::TlvResponseSyntax));
    }
}
