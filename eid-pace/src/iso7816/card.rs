use std::fmt;

use tracing::trace;

use crate::iso7816::apdu;
use crate::iso7816::reader;
use crate::pace;
use crate::secure_messaging;


/// The broad category of a failure, independent of where it was detected.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum FailureKind {
    /// The reader or the connection to the card failed.
    Transport,

    /// The card answered with an unexpected status word.
    ProtocolStatus,

    /// The authentication token sent by the card does not verify.
    AuthenticationTokenMismatch,

    /// A Secure Messaging response failed verification or was malformed.
    Integrity,

    /// The send sequence counter cannot be advanced any further.
    SequenceCounterOverflow,

    /// Data could not be encoded or decoded.
    Encoding,

    /// The card or reader asked for something this implementation does not support.
    Unsupported,

    /// The Secure Messaging channel has been closed or broken.
    ChannelClosed,

    /// The operation was cancelled by the caller.
    Cancelled,
}
impl FailureKind {
    /// Whether repeating the same operation might succeed.
    ///
    /// Only transport failures qualify; every other failure either changed the state of the card
    /// or will fail the same way again.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport)
    }
}
impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Transport => "transport failure",
            Self::ProtocolStatus => "unexpected status word",
            Self::AuthenticationTokenMismatch => "authentication token mismatch",
            Self::Integrity => "integrity failure",
            Self::SequenceCounterOverflow => "sequence counter overflow",
            Self::Encoding => "encoding failure",
            Self::Unsupported => "unsupported",
            Self::ChannelClosed => "channel closed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}


#[derive(Debug)]
pub enum CommunicationError {
    Write(apdu::WriteError),
    Parse(apdu::ParseError),
    Transport(Box<dyn std::error::Error + Send + Sync + 'static>),
    ShortResponse,
    Reader(reader::Error),
    SecureMessaging(secure_messaging::Error),
    Pace(pace::Error),
}
impl CommunicationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Write(_) => FailureKind::Encoding,
            Self::Parse(_) => FailureKind::Encoding,
            Self::Transport(_) => FailureKind::Transport,
            Self::ShortResponse => FailureKind::Encoding,
            Self::Reader(e) => e.kind(),
            Self::SecureMessaging(e) => e.kind(),
            Self::Pace(e) => e.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
impl fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write(e) => write!(f, "APDU write error: {}", e),
            Self::Parse(e) => write!(f, "APDU parse error: {}", e),
            Self::Transport(e) => write!(f, "transport error: {}", e),
            Self::ShortResponse => write!(f, "response too short"),
            Self::Reader(e) => write!(f, "reader error: {}", e),
            Self::SecureMessaging(e) => write!(f, "Secure Messaging error: {}", e),
            Self::Pace(e) => write!(f, "PACE error: {}", e),
        }
    }
}
impl std::error::Error for CommunicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Write(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Transport(e) => Some(e.as_ref()),
            Self::ShortResponse => None,
            Self::Reader(e) => Some(e),
            Self::SecureMessaging(e) => Some(e),
            Self::Pace(e) => Some(e),
        }
    }
}
impl From<apdu::WriteError> for CommunicationError {
    fn from(value: apdu::WriteError) -> Self { Self::Write(value) }
}
impl From<apdu::ParseError> for CommunicationError {
    fn from(value: apdu::ParseError) -> Self { Self::Parse(value) }
}
impl From<pcsc::Error> for CommunicationError {
    fn from(value: pcsc::Error) -> Self { Self::Transport(Box::new(value)) }
}
impl From<reader::Error> for CommunicationError {
    fn from(value: reader::Error) -> Self { Self::Reader(value) }
}
impl From<secure_messaging::Error> for CommunicationError {
    fn from(value: secure_messaging::Error) -> Self { Self::SecureMessaging(value) }
}
impl From<pace::Error> for CommunicationError {
    fn from(value: pace::Error) -> Self { Self::Pace(value) }
}


/// A smart card compatible with ISO/IEC 7816.
pub trait SmartCard {
    /// Send a raw command APDU to the smart card and receive the raw response APDU, including the
    /// status word.
    fn transmit(&mut self, request: &[u8]) -> Result<Vec<u8>, CommunicationError>;

    /// Send a request APDU to the smart card and receive a response APDU.
    fn communicate(&mut self, request: &apdu::Apdu) -> Result<apdu::Response, CommunicationError> {
        let request_bytes = request.to_bytes()?;
        let response_bytes = self.transmit(&request_bytes)?;
        apdu::Response::from_slice(&response_bytes)
            .ok_or(CommunicationError::ShortResponse)
    }
}
impl<SC: SmartCard + ?Sized> SmartCard for &mut SC {
    fn transmit(&mut self, request: &[u8]) -> Result<Vec<u8>, CommunicationError> {
        (**self).transmit(request)
    }

    fn communicate(&mut self, request: &apdu::Apdu) -> Result<apdu::Response, CommunicationError> {
        (**self).communicate(request)
    }
}
impl SmartCard for pcsc::Card {
    fn transmit(&mut self, request: &[u8]) -> Result<Vec<u8>, CommunicationError> {
        trace!("sending to card:\n{}", crate::hexdump(request));
        let mut in_buf = vec![0u8; pcsc::MAX_BUFFER_SIZE_EXTENDED];
        let in_slice = pcsc::Card::transmit(self, request, &mut in_buf)?;
        trace!("received from card:\n{}", crate::hexdump(in_slice));
        Ok(in_slice.to_vec())
    }
}
