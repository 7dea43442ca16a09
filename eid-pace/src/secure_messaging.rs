//! Secure Messaging (ISO/IEC 7816-4 § 10) with session keys established by PACE.
//!
//! Every command is wrapped as
//! `[87 L 01 <encrypted data>] [97 L <Le>] 8E 08 <MAC>` and every response is expected as
//! `[81|87 ..] 99 02 <status word> 8E 08 <MAC>`. The send sequence counter is incremented once
//! before each command and once before verifying each response.


use std::fmt;

use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

use crate::crypt::{pad_iso7816, unpad_iso7816, CipherSuite, CryptoError, CryptoProvider, SessionKeys};
use crate::crypt::cipher_mac::MAC_LENGTH;
use crate::der_util::{encode_tlv, parse_tlvs};
use crate::iso7816::apdu::{Apdu, CommandHeader, Data, Response};
use crate::iso7816::card::{CommunicationError, FailureKind, SmartCard};
use crate::sequence_counter::{SendSequenceCounter, SequenceCounterOverflow};


/// The bits of the class byte announcing a Secure Messaging command with an authenticated header.
const SECURE_MESSAGING_CLA_BITS: u8 = 0b000_0_11_00;

const TAG_PLAIN_VALUE: u32 = 0x81;
const TAG_CRYPTOGRAM: u32 = 0x87;
const TAG_EXPECTED_LENGTH: u32 = 0x97;
const TAG_STATUS: u32 = 0x99;
const TAG_MAC: u32 = 0x8E;

const PADDING_ISO7816: u8 = 0x01;
const PADDING_NONE: u8 = 0x02;


#[derive(Debug)]
pub enum Error {
    /// The channel has been closed or broken by an earlier failure.
    ChannelClosed,
    SequenceCounter(SequenceCounterOverflow),
    Crypto(CryptoError),
    CommandTooLong { obtained: usize },
    CardRejected { status_word: u16 },
    ResponseTlvFormat,
    UnexpectedResponseObject { tag: u32 },
    MissingResponseStatus,
    MissingResponseMac,
    StatusLength { obtained: Vec<u8> },
    MacLength { obtained: Vec<u8> },
    ResponseMac,
    CryptogramLength { obtained: usize },
    UnknownPadding { padding_mode: u8 },
    InvalidPadding,
}
impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ChannelClosed => FailureKind::ChannelClosed,
            Self::SequenceCounter(_) => FailureKind::SequenceCounterOverflow,
            Self::Crypto(_) => FailureKind::Encoding,
            Self::CommandTooLong { .. } => FailureKind::Encoding,
            Self::CardRejected { .. } => FailureKind::Integrity,
            Self::ResponseTlvFormat => FailureKind::Integrity,
            Self::UnexpectedResponseObject { .. } => FailureKind::Integrity,
            Self::MissingResponseStatus => FailureKind::Integrity,
            Self::MissingResponseMac => FailureKind::Integrity,
            Self::StatusLength { .. } => FailureKind::Integrity,
            Self::MacLength { .. } => FailureKind::Integrity,
            Self::ResponseMac => FailureKind::Integrity,
            Self::CryptogramLength { .. } => FailureKind::Integrity,
            Self::UnknownPadding { .. } => FailureKind::Integrity,
            Self::InvalidPadding => FailureKind::Integrity,
        }
    }
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::ChannelClosed
                => write!(f, "Secure Messaging channel is closed"),
            Self::SequenceCounter(e)
                => write!(f, "{}", e),
            Self::Crypto(e)
                => write!(f, "cryptographic failure: {}", e),
            Self::CommandTooLong { obtained }
                => write!(f, "protected command body has {} bytes, more than fit into an APDU", obtained),
            Self::CardRejected { status_word }
                => write!(f, "card rejected Secure Messaging with status word 0x{:04X}", status_word),
            Self::ResponseTlvFormat
                => write!(f, "response has an invalid TLV format"),
            Self::UnexpectedResponseObject { tag }
                => write!(f, "response contains unexpected data object 0x{:02X}", tag),
            Self::MissingResponseStatus
                => write!(f, "response does not contain status"),
            Self::MissingResponseMac
                => write!(f, "response does not contain a MAC"),
            Self::StatusLength { obtained }
                => write!(f, "status has unexpected length {}", obtained.len()),
            Self::MacLength { obtained }
                => write!(f, "MAC has unexpected length {}", obtained.len()),
            Self::ResponseMac
                => write!(f, "response MAC incorrect"),
            Self::CryptogramLength { obtained }
                => write!(f, "encrypted response data has invalid length {}", obtained),
            Self::UnknownPadding { padding_mode }
                => write!(f, "response payload has unknown padding mode {}", padding_mode),
            Self::InvalidPadding
                => write!(f, "response payload has invalid padding"),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SequenceCounter(e) => Some(e),
            Self::Crypto(e) => Some(e),
            _ => None,
        }
    }
}
impl From<SequenceCounterOverflow> for Error {
    fn from(value: SequenceCounterOverflow) -> Self { Self::SequenceCounter(value) }
}
impl From<CryptoError> for Error {
    fn from(value: CryptoError) -> Self { Self::Crypto(value) }
}


/// Wraps commands and unwraps responses with a pair of session keys.
///
/// Once a response fails verification, the keys are wiped and every further call fails with
/// [`Error::ChannelClosed`].
pub struct SecureMessagingCodec<P: CryptoProvider> {
    suite: CipherSuite,
    keys: Option<SessionKeys>,
    send_sequence_counter: SendSequenceCounter,
    provider: P,
}
impl<P: CryptoProvider> SecureMessagingCodec<P> {
    /// Creates a codec whose send sequence counter starts at zero.
    pub fn new(suite: CipherSuite, keys: SessionKeys, provider: P) -> Self {
        Self {
            suite,
            keys: Some(keys),
            send_sequence_counter: SendSequenceCounter::zero(suite.block_size()),
            provider,
        }
    }

    /// Creates a codec whose send sequence counter starts at the given value.
    pub fn with_send_sequence_counter(suite: CipherSuite, keys: SessionKeys, provider: P, send_sequence_counter: u128) -> Result<Self, Error> {
        let send_sequence_counter = SendSequenceCounter::new(send_sequence_counter, suite.block_size())?;
        Ok(Self {
            suite,
            keys: Some(keys),
            send_sequence_counter,
            provider,
        })
    }

    pub fn suite(&self) -> CipherSuite { self.suite }
    pub fn send_sequence_counter(&self) -> u128 { self.send_sequence_counter.value() }
    pub fn provider(&self) -> &P { &self.provider }
    pub fn is_open(&self) -> bool { self.keys.is_some() }

    /// Ends the session and wipes the keys.
    pub fn close(&mut self) {
        self.keys = None;
    }

    fn padded(&self, data: &[u8]) -> Zeroizing<Vec<u8>> {
        let mut padded = Zeroizing::new(data.to_vec());
        pad_iso7816(&mut padded, self.suite.block_size());
        padded
    }

    /// Turns a plain command into a protected command.
    ///
    /// The send sequence counter only advances if the protected command could be built.
    pub fn protect(&mut self, command: &Apdu) -> Result<Apdu, Error> {
        let result = self.try_protect(command);
        if let Err(Error::SequenceCounter(_)) = &result {
            warn!("send sequence counter exhausted; closing Secure Messaging channel");
            self.close();
        }
        result
    }

    fn try_protect(&mut self, command: &Apdu) -> Result<Apdu, Error> {
        let keys = self.keys.as_ref().ok_or(Error::ChannelClosed)?;

        let mut send_sequence_counter = self.send_sequence_counter;
        send_sequence_counter.increment()?;
        let ssc_bytes = send_sequence_counter.to_bytes();

        let header = CommandHeader {
            cla: command.header.cla | SECURE_MESSAGING_CLA_BITS,
            ..command.header.clone()
        };

        let mut body = Vec::new();
        if let Some(request_data) = command.data.request_data() {
            let mut cryptogram = self.padded(request_data);
            let iv = self.provider.sequence_counter_iv(self.suite, keys.encryption(), &ssc_bytes)?;
            self.provider.encrypt(self.suite, keys.encryption(), &iv, &mut cryptogram)?;

            let mut data_object_87 = Vec::with_capacity(1 + cryptogram.len());
            data_object_87.push(PADDING_ISO7816);
            data_object_87.extend(cryptogram.iter());
            encode_tlv(&mut body, TAG_CRYPTOGRAM, &data_object_87);
        }

        match &command.data {
            Data::NoData|Data::RequestDataShort { .. }|Data::RequestDataExtended { .. } => {},
            Data::ResponseDataShort { response_data_length }|Data::BothDataShort { response_data_length, .. } => {
                encode_tlv(&mut body, TAG_EXPECTED_LENGTH, &[*response_data_length]);
            },
            Data::ResponseDataExtended { response_data_length }|Data::BothDataExtended { response_data_length, .. } => {
                encode_tlv(&mut body, TAG_EXPECTED_LENGTH, &response_data_length.to_be_bytes());
            },
        }

        // SSC || padded header || padded body (if any)
        let mut mac_input = Zeroizing::new(ssc_bytes.clone());
        mac_input.extend(self.padded(&header.to_bytes()).iter());
        if !body.is_empty() {
            mac_input.extend(self.padded(&body).iter());
        }
        let mac = self.provider.mac(self.suite, keys.mac(), &mac_input)?;
        encode_tlv(&mut body, TAG_MAC, &mac);

        // short unless the body or the expected response length needs the extended format
        let expects_long_response = command.data.response_data_length()
            .map(|length| length > 0x100)
            .unwrap_or(false);
        let data = if body.len() <= 0xFF && !expects_long_response {
            Data::BothDataShort {
                request_data: body,
                response_data_length: 0x00,
            }
        } else if body.len() <= 0xFFFF {
            Data::BothDataExtended {
                request_data: body,
                response_data_length: 0x0000,
            }
        } else {
            return Err(Error::CommandTooLong { obtained: body.len() });
        };

        self.send_sequence_counter = send_sequence_counter;
        Ok(Apdu::new(header, data))
    }

    /// Verifies and decrypts a protected response.
    ///
    /// Any failure breaks the channel.
    pub fn unprotect(&mut self, response: &Response) -> Result<Response, Error> {
        let result = self.try_unprotect(response);
        if let Err(e) = &result {
            if self.is_open() {
                warn!("closing Secure Messaging channel: {}", e);
                self.close();
            }
        }
        result
    }

    fn try_unprotect(&mut self, response: &Response) -> Result<Response, Error> {
        let keys = self.keys.as_ref().ok_or(Error::ChannelClosed)?;

        let trailer = response.status_word();
        if trailer == 0x6987 || trailer == 0x6988 {
            return Err(Error::CardRejected { status_word: trailer });
        }

        let mut send_sequence_counter = self.send_sequence_counter;
        send_sequence_counter.increment()?;
        let ssc_bytes = send_sequence_counter.to_bytes();

        // strictly [81|87] 99 8E
        let objects = parse_tlvs(&response.data)
            .map_err(|_| Error::ResponseTlvFormat)?;
        let mut objects_iter = objects.iter().peekable();
        let data_object = objects_iter
            .next_if(|tlv| tlv.tag == TAG_PLAIN_VALUE || tlv.tag == TAG_CRYPTOGRAM);
        let status_object = match objects_iter.next() {
            Some(tlv) if tlv.tag == TAG_STATUS => tlv,
            Some(tlv) if tlv.tag == TAG_MAC => return Err(Error::MissingResponseStatus),
            Some(tlv) => return Err(Error::UnexpectedResponseObject { tag: tlv.tag }),
            None => return Err(Error::MissingResponseStatus),
        };
        let mac_object = match objects_iter.next() {
            Some(tlv) if tlv.tag == TAG_MAC => tlv,
            Some(tlv) => return Err(Error::UnexpectedResponseObject { tag: tlv.tag }),
            None => return Err(Error::MissingResponseMac),
        };
        if let Some(trailing) = objects_iter.next() {
            return Err(Error::UnexpectedResponseObject { tag: trailing.tag });
        }
        if status_object.value.len() != 2 {
            return Err(Error::StatusLength { obtained: status_object.value.to_vec() });
        }
        if mac_object.value.len() != MAC_LENGTH {
            return Err(Error::MacLength { obtained: mac_object.value.to_vec() });
        }

        // verify before touching the cryptogram
        let mut mac_input = Zeroizing::new(ssc_bytes.clone());
        let mut authenticated = Vec::new();
        if let Some(data_object) = data_object {
            authenticated.extend(data_object.raw);
        }
        authenticated.extend(status_object.raw);
        mac_input.extend(self.padded(&authenticated).iter());
        let mac = self.provider.mac(self.suite, keys.mac(), &mac_input)?;
        if !bool::from(mac.as_slice().ct_eq(mac_object.value)) {
            return Err(Error::ResponseMac);
        }

        let data = match data_object {
            None => Vec::new(),
            Some(tlv) if tlv.tag == TAG_PLAIN_VALUE => tlv.value.to_vec(),
            Some(tlv) => {
                let (&padding_mode, cryptogram) = tlv.value.split_first()
                    .ok_or(Error::CryptogramLength { obtained: 0 })?;
                if cryptogram.is_empty() || cryptogram.len() % self.suite.block_size() != 0 {
                    return Err(Error::CryptogramLength { obtained: cryptogram.len() });
                }
                let mut plaintext = Zeroizing::new(cryptogram.to_vec());
                let iv = self.provider.sequence_counter_iv(self.suite, keys.encryption(), &ssc_bytes)?;
                self.provider.decrypt(self.suite, keys.encryption(), &iv, &mut plaintext)?;
                match padding_mode {
                    0x00|PADDING_ISO7816 => unpad_iso7816(&plaintext)
                        .ok_or(Error::InvalidPadding)?
                        .to_vec(),
                    PADDING_NONE => plaintext.to_vec(),
                    other => return Err(Error::UnknownPadding { padding_mode: other }),
                }
            },
        };

        self.send_sequence_counter = send_sequence_counter;
        let status_word = u16::from_be_bytes([status_object.value[0], status_object.value[1]]);
        Ok(Response::new(data, status_word))
    }
}
impl<P: CryptoProvider> fmt::Debug for SecureMessagingCodec<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureMessagingCodec")
            .field("suite", &self.suite)
            .field("open", &self.is_open())
            .field("send_sequence_counter", &self.send_sequence_counter.value())
            .finish()
    }
}


/// A Secure Messaging channel on top of a borrowed smart card.
///
/// The channel is itself a [`SmartCard`]: plain APDUs passed to it are protected on the way in
/// and unwrapped on the way out.
pub struct SecureMessaging<'sc, SC: SmartCard + ?Sized, P: CryptoProvider> {
    card: &'sc mut SC,
    codec: SecureMessagingCodec<P>,
}
impl<'sc, SC: SmartCard + ?Sized, P: CryptoProvider> SecureMessaging<'sc, SC, P> {
    pub fn new(card: &'sc mut SC, codec: SecureMessagingCodec<P>) -> Self {
        Self { card, codec }
    }

    pub fn codec(&self) -> &SecureMessagingCodec<P> { &self.codec }
    pub fn is_open(&self) -> bool { self.codec.is_open() }

    /// Ends the session and wipes the keys; the card stays borrowed until the channel is dropped.
    pub fn close(&mut self) {
        self.codec.close();
    }

    /// Ends the session and hands back the underlying card.
    pub fn into_card(mut self) -> &'sc mut SC {
        self.codec.close();
        self.card
    }

    #[instrument(skip_all, fields(ins = command.header.ins))]
    pub fn protected_transmit(&mut self, command: &Apdu) -> Result<Response, CommunicationError> {
        let protected_command = self.codec.protect(command)?;
        debug!(ssc = self.codec.send_sequence_counter(), "sending protected command");
        // after a failed transmission the counter on the card is unknown
        let protected_response = match self.card.communicate(&protected_command) {
            Ok(response) => response,
            Err(e) => {
                warn!("closing Secure Messaging channel after transmission failure: {}", e);
                self.codec.close();
                return Err(e);
            },
        };
        let response = self.codec.unprotect(&protected_response)?;
        debug!(
            ssc = self.codec.send_sequence_counter(),
            status_word = response.status_word(),
            length = response.data.len(),
            "received protected response",
        );
        Ok(response)
    }
}
impl<'sc, SC: SmartCard + ?Sized, P: CryptoProvider> SmartCard for SecureMessaging<'sc, SC, P> {
    fn transmit(&mut self, request: &[u8]) -> Result<Vec<u8>, CommunicationError> {
        let command = Apdu::try_from_slice(request)?;
        let response = self.protected_transmit(&command)?;
        Ok(response.to_bytes())
    }

    fn communicate(&mut self, request: &Apdu) -> Result<Response, CommunicationError> {
        self.protected_transmit(request)
    }
}
impl<'sc, SC: SmartCard + ?Sized, P: CryptoProvider> fmt::Debug for SecureMessaging<'sc, SC, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureMessaging")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::{Error, SecureMessaging, SecureMessagingCodec};
    use crate::crypt::{CipherSuite, NativeCrypto, SessionKeys};
    use crate::iso7816::apdu::{Apdu, Response};
    use crate::iso7816::card::{CommunicationError, FailureKind, SmartCard};
    use hex_literal::hex;
    use std::io;

    const K_ENC: [u8; 16] = hex!("68406B4162100563D9C901A6154D2901");
    const K_MAC: [u8; 16] = hex!("73FF268784F72AF833FDC9464049AFC9");

    fn codec(last_send_sequence_counter: u128) -> SecureMessagingCodec<NativeCrypto> {
        SecureMessagingCodec::with_send_sequence_counter(
            CipherSuite::Aes128,
            SessionKeys::new(&K_ENC, &K_MAC),
            NativeCrypto,
            last_send_sequence_counter,
        ).unwrap()
    }

    fn assert_protects(plain: &[u8], last_send_sequence_counter: u128, expected: &[u8]) {
        let mut codec = codec(last_send_sequence_counter);
        let command = Apdu::try_from_slice(plain).unwrap();
        let protected = codec.protect(&command).unwrap();
        assert_eq!(protected.to_bytes().unwrap(), expected);
        assert_eq!(codec.send_sequence_counter(), last_send_sequence_counter + 1);
    }

    #[test]
    fn protect_case_1() {
        assert_protects(&hex!("00840000"), 0, &hex!("0C8400000A8E08F146CA58D9D8796200"));
    }

    #[test]
    fn protect_case_2() {
        assert_protects(&hex!("0084000008"), 2, &hex!("0C8400000D9701088E081DC3357110820CAD00"));
    }

    #[test]
    fn protect_case_2_extended() {
        assert_protects(&hex!("00840000001111"), 4, &hex!("0C84000000000E970211118E08EEF70779FD0263D60000"));
    }

    #[test]
    fn protect_case_3() {
        assert_protects(
            &hex!("002281B60F830D44454356434141543030303031"),
            6,
            &hex!("0C2281B61D871101BEE6E33D7D2F6D8662ED4CF56739794C8E0808FEA4E3EEEC972000"),
        );
    }

    #[test]
    fn protect_case_4() {
        assert_protects(
            &hex!("002281B60F830D4445435643414154303030303108"),
            10,
            &hex!("0C2281B620871101B86BC36EBADED003068B831CC70D8E0E9701088E08972AE4B01DB3299300"),
        );
    }

    #[test]
    fn protect_case_4_extended() {
        assert_protects(
            &hex!("002281B600000F830D444543564341415430303030311111"),
            14,
            &hex!("0C2281B60000218711011E52F828C7DE2F1F27EEEB5838065F4D970211118E08F9FD84145B179F100000"),
        );
    }

    #[test]
    fn protect_read_binary_with_extended_le_stays_short() {
        // an extended plain Le within 256 bytes does not force extended framing
        let mut codec = codec(0);
        let command = Apdu::try_from_slice(&hex!("00B0000000 0100")).unwrap();
        let protected = codec.protect(&command).unwrap();
        assert!(!protected.data.is_extended());
        assert_eq!(protected.data.response_data_length(), Some(256));
        assert_eq!(&protected.data.request_data().unwrap()[..4], &hex!("97020100"));
    }

    const PROTECTED_RESPONSE: [u8; 35] = hex!("871101FFC073CB761DC0461DDAFA3217DFB392990290008E08442DFAAF0E4588969000");

    #[test]
    fn unprotect_response() {
        let mut codec = codec(1);
        let response = Response::from_slice(&PROTECTED_RESPONSE).unwrap();
        let plain = codec.unprotect(&response).unwrap();
        assert_eq!(plain.data, hex!("547E4EAB03B235D2"));
        assert_eq!(plain.status_word(), 0x9000);
        assert_eq!(codec.send_sequence_counter(), 2);
        assert!(codec.is_open());
    }

    #[test]
    fn wrong_mac_breaks_channel() {
        let mut codec = codec(1);
        let response = Response::from_slice(&hex!("871101FFC073CB761DC0461DDAFA3217DFB392990290008E0812345678910111269000")).unwrap();
        let error = codec.unprotect(&response).unwrap_err();
        assert!(matches!(error, Error::ResponseMac));
        assert_eq!(error.kind(), FailureKind::Integrity);
        assert!(!codec.is_open());

        let again = codec.unprotect(&Response::from_slice(&PROTECTED_RESPONSE).unwrap()).unwrap_err();
        assert!(matches!(again, Error::ChannelClosed));
        let command = Apdu::try_from_slice(&hex!("00840000")).unwrap();
        assert_eq!(codec.protect(&command).unwrap_err().kind(), FailureKind::ChannelClosed);
    }

    #[test]
    fn missing_status() {
        let mut codec = codec(1);
        let response = Response::from_slice(&hex!("871101FFC073CB761DC0461DDAFA3217DFB3928E08442DFAAF0E4588969000")).unwrap();
        assert!(matches!(codec.unprotect(&response), Err(Error::MissingResponseStatus)));
    }

    #[test]
    fn missing_mac() {
        let mut codec = codec(1);
        let response = Response::from_slice(&hex!("871101FFC073CB761DC0461DDAFA3217DFB39299029000 9000")).unwrap();
        assert!(matches!(codec.unprotect(&response), Err(Error::MissingResponseMac)));
    }

    #[test]
    fn card_rejection() {
        let mut codec = codec(1);
        let error = codec.unprotect(&Response::new(Vec::new(), 0x6988)).unwrap_err();
        assert!(matches!(error, Error::CardRejected { status_word: 0x6988 }));
        assert!(!codec.is_open());
    }

    #[test]
    fn failed_protection_keeps_counter() {
        let mut codec = SecureMessagingCodec::with_send_sequence_counter(
            CipherSuite::TripleDes,
            SessionKeys::new(&K_ENC, &K_MAC),
            NativeCrypto,
            u64::MAX.into(),
        ).unwrap();
        let command = Apdu::try_from_slice(&hex!("00840000")).unwrap();
        assert_eq!(codec.protect(&command).unwrap_err().kind(), FailureKind::SequenceCounterOverflow);
        assert_eq!(codec.send_sequence_counter(), u128::from(u64::MAX));
        assert!(!codec.is_open());
    }

    /// A card whose link drops on every command.
    #[derive(Default)]
    struct UnreachableCard {
        transmissions: usize,
    }
    impl SmartCard for UnreachableCard {
        fn transmit(&mut self, _request: &[u8]) -> Result<Vec<u8>, CommunicationError> {
            self.transmissions += 1;
            Err(CommunicationError::Transport(Box::new(io::Error::new(io::ErrorKind::ConnectionReset, "card removed"))))
        }
    }

    #[test]
    fn transport_failure_breaks_channel() {
        let mut card = UnreachableCard::default();
        let mut channel = SecureMessaging::new(&mut card, codec(0));
        let command = Apdu::try_from_slice(&hex!("00A4020C02011E")).unwrap();

        let error = channel.communicate(&command).unwrap_err();
        assert_eq!(error.kind(), FailureKind::Transport);
        assert!(!channel.is_open());
        assert_eq!(channel.codec().send_sequence_counter(), 1);

        // the counter on the card is unknown now, so nothing else may be sent
        let error = channel.communicate(&command).unwrap_err();
        assert_eq!(error.kind(), FailureKind::ChannelClosed);
        drop(channel);
        assert_eq!(card.transmissions, 1);
    }
}
