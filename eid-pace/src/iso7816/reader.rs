//! PACE performed by the card reader (PC/SC Part 10 Amendment 1).
//!
//! Readers with a PIN pad can run PACE themselves so that the password never reaches the host. The
//! feature is reached through an SCardControl code discovered with `CM_IOCTL_GET_FEATURE_REQUEST`.
//!
//! Requests are `[function] [length: u16 LE] [data]`; responses are
//! `[result: u32 LE] [length: u16 LE] [data]`.


use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, instrument, trace};
use zeroize::Zeroizing;

use crate::der_util::encode_tlv;
use crate::iso7816::card::{CommunicationError, FailureKind};
use crate::pace::PaceRequest;
use crate::password::{parse_capabilities, PaceCapability, PasswordId};
use crate::status::PaceResultCode;


/// The feature tag of PACE in the feature list.
pub const FEATURE_EXECUTE_PACE: u8 = 0x20;

/// The SCardControl function number of `CM_IOCTL_GET_FEATURE_REQUEST`.
pub const GET_FEATURE_REQUEST_FUNCTION: u32 = 3400;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Function {
    GetReaderPaceCapabilities,
    EstablishPaceChannel,
    DestroyPaceChannel,
}
impl Function {
    pub const fn code(&self) -> u8 {
        match self {
            Self::GetReaderPaceCapabilities => 0x01,
            Self::EstablishPaceChannel => 0x02,
            Self::DestroyPaceChannel => 0x03,
        }
    }
}
impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetReaderPaceCapabilities => write!(f, "GetReaderPACECapabilities"),
            Self::EstablishPaceChannel => write!(f, "EstablishPACEChannel"),
            Self::DestroyPaceChannel => write!(f, "DestroyPACEChannel"),
        }
    }
}


#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Error {
    /// The reader does not announce the PACE feature.
    FeatureUnsupported,

    /// A request field does not fit its length prefix.
    FieldTooLong { field: &'static str, maximum: usize, obtained: usize },

    /// The reader's answer does not follow the response layout.
    MalformedResponse { function: Function },

    /// The reader reported a failure.
    Failed { function: Function, result_code: u32 },
}
impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::FeatureUnsupported => FailureKind::Unsupported,
            Self::FieldTooLong { .. } => FailureKind::Encoding,
            Self::MalformedResponse { .. } => FailureKind::Encoding,
            Self::Failed { result_code, .. } => match PaceResultCode::from_code(*result_code) {
                Some(PaceResultCode::Abort) => FailureKind::Cancelled,
                Some(PaceResultCode::CommunicationAbort|PaceResultCode::NoCard|PaceResultCode::Timeout) => FailureKind::Transport,
                Some(PaceResultCode::WrongAuthToken) => FailureKind::AuthenticationTokenMismatch,
                _ => FailureKind::ProtocolStatus,
            },
        }
    }

    /// The decoded result code of a failure, if the reader reported a known one.
    pub fn result_code(&self) -> Option<PaceResultCode> {
        match self {
            Self::Failed { result_code, .. } => PaceResultCode::from_code(*result_code),
            _ => None,
        }
    }
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FeatureUnsupported
                => write!(f, "reader does not support PACE"),
            Self::FieldTooLong { field, maximum, obtained }
                => write!(f, "{} has {} bytes, at most {} fit", field, obtained, maximum),
            Self::MalformedResponse { function }
                => write!(f, "malformed {} response", function),
            Self::Failed { function, result_code } => {
                match PaceResultCode::from_code(*result_code) {
                    Some(code) => write!(f, "{} failed with 0x{:08X} ({})", function, result_code, code),
                    None => write!(f, "{} failed with unknown result 0x{:08X}", function, result_code),
                }
            },
        }
    }
}
impl std::error::Error for Error {
}


/// Direct control access to a card reader.
pub trait ReaderControl {
    /// The platform's control code for the given SCardControl function number.
    fn control_code(&self, function: u32) -> u32;

    /// Sends a control command to the reader and returns its answer.
    fn control(&mut self, control_code: u32, input: &[u8]) -> Result<Vec<u8>, CommunicationError>;

    /// Looks up the control code of a feature in the reader's feature list.
    fn feature_control_code(&mut self, feature: u8) -> Result<Option<u32>, CommunicationError> {
        let request_code = self.control_code(GET_FEATURE_REQUEST_FUNCTION);
        let features = self.control(request_code, &[])?;
        trace!("reader features:\n{}", crate::hexdump(&features));

        // each entry: tag, 0x04, control code (big-endian u32)
        for entry in features.chunks(6) {
            if let [tag, 0x04, b0, b1, b2, b3] = entry {
                if *tag == feature {
                    return Ok(Some(u32::from_be_bytes([*b0, *b1, *b2, *b3])));
                }
            }
        }
        Ok(None)
    }
}
impl<R: ReaderControl + ?Sized> ReaderControl for &mut R {
    fn control_code(&self, function: u32) -> u32 {
        (**self).control_code(function)
    }

    fn control(&mut self, control_code: u32, input: &[u8]) -> Result<Vec<u8>, CommunicationError> {
        (**self).control(control_code, input)
    }
}
impl ReaderControl for pcsc::Card {
    fn control_code(&self, function: u32) -> u32 {
        pcsc::ctl_code(function.into()) as u32
    }

    fn control(&mut self, control_code: u32, input: &[u8]) -> Result<Vec<u8>, CommunicationError> {
        let mut out_buf = vec![0u8; pcsc::MAX_BUFFER_SIZE_EXTENDED];
        let out_slice = pcsc::Card::control(self, control_code.into(), input, &mut out_buf)?;
        Ok(out_slice.to_vec())
    }
}


/// The input of EstablishPACEChannel.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct PaceEstablishChannelRequest {
    pub password_id: Option<PasswordId>,
    pub chat: Vec<u8>,

    /// The password; empty to have the reader ask for it on its PIN pad.
    pub password: Zeroizing<Vec<u8>>,

    pub certificate_description: Vec<u8>,
}
impl PaceEstablishChannelRequest {
    /// Encodes the request data.
    ///
    /// The certificate description is only part of the request for readers that support the
    /// German eID or QES, otherwise it is left out.
    pub fn to_bytes(&self, capabilities: &BTreeSet<PaceCapability>) -> Result<Zeroizing<Vec<u8>>, Error> {
        fn short_length(field: &'static str, value: &[u8]) -> Result<u8, Error> {
            u8::try_from(value.len())
                .map_err(|_| Error::FieldTooLong { field, maximum: 0xFF, obtained: value.len() })
        }

        let mut ret = Zeroizing::new(Vec::new());
        ret.push(self.password_id.map(|id| id.code()).unwrap_or(0x00));
        ret.push(short_length("CHAT", &self.chat)?);
        ret.extend(&self.chat);
        ret.push(short_length("password", &self.password)?);
        ret.extend(self.password.iter());

        if capabilities.contains(&PaceCapability::GermanEid) || capabilities.contains(&PaceCapability::Qes) {
            let description_length = u16::try_from(self.certificate_description.len())
                .map_err(|_| Error::FieldTooLong {
                    field: "certificate description",
                    maximum: 0xFFFF,
                    obtained: self.certificate_description.len(),
                })?;
            ret.extend(description_length.to_le_bytes());
            ret.extend(&self.certificate_description);
        }
        Ok(ret)
    }
}
impl fmt::Debug for PaceEstablishChannelRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaceEstablishChannelRequest")
            .field("password_id", &self.password_id)
            .field("chat", &self.chat)
            .field("password", &"<redacted>")
            .field("certificate_description", &self.certificate_description)
            .finish()
    }
}
impl From<&PaceRequest> for PaceEstablishChannelRequest {
    /// The reader expects the complete `7F4C` object as CHAT. Certificate extensions have no place
    /// in the reader request and are dropped.
    fn from(request: &PaceRequest) -> Self {
        let mut chat = Vec::new();
        if let Some(chat_contents) = &request.chat {
            encode_tlv(&mut chat, 0x7F4C, chat_contents);
        }
        Self {
            password_id: Some(request.password_id),
            chat,
            password: request.secret.clone(),
            certificate_description: request.certificate_description.clone().unwrap_or_default(),
        }
    }
}


/// The output of EstablishPACEChannel.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PaceEstablishChannelResponse {
    /// The status word the card returned for MSE:Set AT.
    pub mse_status_word: u16,
    pub ef_card_access: Vec<u8>,
    pub current_car: Vec<u8>,
    pub previous_car: Vec<u8>,
    pub chip_identifier: Vec<u8>,
}
impl PaceEstablishChannelResponse {
    pub fn try_from_slice(data: &[u8]) -> Option<Self> {
        fn take<'a>(rest: &mut &'a [u8], count: usize) -> Option<&'a [u8]> {
            let (taken, remaining) = rest.split_at_checked(count)?;
            *rest = remaining;
            Some(taken)
        }
        fn take_u16(rest: &mut &[u8]) -> Option<usize> {
            let bytes = take(rest, 2)?;
            Some(usize::from(u16::from_le_bytes([bytes[0], bytes[1]])))
        }
        fn take_u8(rest: &mut &[u8]) -> Option<usize> {
            Some(usize::from(take(rest, 1)?[0]))
        }

        let mut rest = data;
        let mse_status = take(&mut rest, 2)?;
        let mse_status_word = u16::from_le_bytes([mse_status[0], mse_status[1]]);

        let ef_card_access_length = take_u16(&mut rest)?;
        let ef_card_access = take(&mut rest, ef_card_access_length)?.to_vec();
        let current_car_length = take_u8(&mut rest)?;
        let current_car = take(&mut rest, current_car_length)?.to_vec();
        let previous_car_length = take_u8(&mut rest)?;
        let previous_car = take(&mut rest, previous_car_length)?.to_vec();
        let chip_identifier_length = take_u16(&mut rest)?;
        let chip_identifier = take(&mut rest, chip_identifier_length)?.to_vec();

        Some(Self {
            mse_status_word,
            ef_card_access,
            current_car,
            previous_car,
            chip_identifier,
        })
    }
}


/// Encodes a request to the PACE feature.
pub fn encode_request(function: Function, data: &[u8]) -> Result<Vec<u8>, Error> {
    let length = u16::try_from(data.len())
        .map_err(|_| Error::FieldTooLong { field: "request data", maximum: 0xFFFF, obtained: data.len() })?;
    let mut ret = Vec::with_capacity(3 + data.len());
    ret.push(function.code());
    ret.extend(length.to_le_bytes());
    ret.extend(data);
    Ok(ret)
}


/// Decodes a response from the PACE feature, returning its data if the result code signals
/// success.
pub fn decode_response(function: Function, response: &[u8]) -> Result<Vec<u8>, Error> {
    let malformed = Error::MalformedResponse { function };
    let (result_bytes, rest) = response.split_at_checked(4).ok_or(malformed.clone())?;
    let result_code = u32::from_le_bytes([result_bytes[0], result_bytes[1], result_bytes[2], result_bytes[3]]);
    if result_code != PaceResultCode::NoError.code() {
        return Err(Error::Failed { function, result_code });
    }

    let (length_bytes, data) = rest.split_at_checked(2).ok_or(malformed.clone())?;
    let length = usize::from(u16::from_le_bytes([length_bytes[0], length_bytes[1]]));
    if data.len() < length {
        return Err(malformed);
    }
    Ok(data[..length].to_vec())
}


/// The PACE feature of a specific reader.
pub struct PaceReaderFeature<'r, R: ReaderControl> {
    reader: &'r mut R,
    control_code: u32,
}
impl<'r, R: ReaderControl> PaceReaderFeature<'r, R> {
    /// Looks up the PACE feature; fails with [`Error::FeatureUnsupported`] if the reader does not
    /// offer it.
    pub fn discover(reader: &'r mut R) -> Result<Self, CommunicationError> {
        let control_code = reader.feature_control_code(FEATURE_EXECUTE_PACE)?
            .ok_or(Error::FeatureUnsupported)?;
        debug!(control_code, "reader offers PACE");
        Ok(Self { reader, control_code })
    }

    fn execute(&mut self, function: Function, data: &[u8]) -> Result<Vec<u8>, CommunicationError> {
        let request = Zeroizing::new(encode_request(function, data)?);
        let response = self.reader.control(self.control_code, &request)?;
        Ok(decode_response(function, &response)?)
    }

    #[instrument(skip(self))]
    pub fn get_capabilities(&mut self) -> Result<BTreeSet<PaceCapability>, CommunicationError> {
        let data = self.execute(Function::GetReaderPaceCapabilities, &[])?;
        // a longer answer is prefixed with its own length byte
        let capability_byte = match data.as_slice() {
            [single] => *single,
            [_length, capability_byte, ..] => *capability_byte,
            [] => return Err(Error::MalformedResponse { function: Function::GetReaderPaceCapabilities }.into()),
        };
        Ok(parse_capabilities(capability_byte))
    }

    #[instrument(skip(self, request))]
    pub fn establish_channel(&mut self, request: &PaceEstablishChannelRequest) -> Result<PaceEstablishChannelResponse, CommunicationError> {
        let capabilities = self.get_capabilities()?;
        let data = request.to_bytes(&capabilities)?;
        let response_data = self.execute(Function::EstablishPaceChannel, &data)?;
        let response = PaceEstablishChannelResponse::try_from_slice(&response_data)
            .ok_or(Error::MalformedResponse { function: Function::EstablishPaceChannel })?;
        debug!(mse_status_word = response.mse_status_word, "reader established PACE channel");
        Ok(response)
    }

    #[instrument(skip(self))]
    pub fn destroy_channel(&mut self) -> Result<(), CommunicationError> {
        self.execute(Function::DestroyPaceChannel, &[])?;
        Ok(())
    }
}


/// Queries the PACE capabilities of a reader.
///
/// A reader without the PACE feature has no capabilities.
pub fn query_capabilities<R: ReaderControl>(reader: &mut R) -> Result<BTreeSet<PaceCapability>, CommunicationError> {
    match PaceReaderFeature::discover(reader) {
        Ok(mut feature) => feature.get_capabilities(),
        Err(CommunicationError::Reader(Error::FeatureUnsupported)) => Ok(BTreeSet::new()),
        Err(e) => Err(e),
    }
}
