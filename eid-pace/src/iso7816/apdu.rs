//! Structures related to application protocol data units (APDUs).


use std::fmt;
use std::io::{self, Write};


#[derive(Debug)]
pub enum WriteError {
    Io(io::Error),
    EmptyData,
    DataTooLong { maximum: usize, obtained: usize },
}
impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::EmptyData => write!(f, "data is, but must not be, empty"),
            Self::DataTooLong { maximum, obtained } => write!(f, "too much data: obtained {} bytes, expected maximum {} bytes", obtained, maximum),
        }
    }
}
impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::EmptyData => None,
            Self::DataTooLong { .. } => None,
        }
    }
}
impl From<io::Error> for WriteError {
    fn from(value: io::Error) -> Self { Self::Io(value) }
}


/// A byte string that is not a well-formed command APDU.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ParseError {
    /// Fewer than four header bytes.
    ShortHeader { length: usize },

    /// The body does not match any of the cases of ISO/IEC 7816-3.
    InvalidBody { length: usize },
}
impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortHeader { length } => write!(f, "APDU of {} bytes has no complete header", length),
            Self::InvalidBody { length } => write!(f, "APDU body of {} bytes matches no ISO/IEC 7816-3 case", length),
        }
    }
}
impl std::error::Error for ParseError {
}


#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CommandHeader {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
}
impl CommandHeader {
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self { cla, ins, p1, p2 }
    }

    pub const fn to_bytes(&self) -> [u8; 4] {
        [self.cla, self.ins, self.p1, self.p2]
    }

    pub const fn to_be_u32(&self) -> u32 {
        u32::from_be_bytes(self.to_bytes())
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }
}
impl fmt::Debug for CommandHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CommandHeader {} cla: 0x{:02X}, ins: 0x{:02X}, p1: 0x{:02X}, p2: 0x{:02X} {}",
            '{', self.cla, self.ins, self.p1, self.p2, '}',
        )
    }
}

#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResponseTrailer {
    pub sw1: u8,
    pub sw2: u8,
}
impl ResponseTrailer {
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self {
            sw1,
            sw2,
        }
    }

    pub const fn from_word(status_word: u16) -> Self {
        let [sw1, sw2] = status_word.to_be_bytes();
        Self { sw1, sw2 }
    }

    pub const fn to_bytes(&self) -> [u8; 2] {
        [self.sw1, self.sw2]
    }

    pub const fn to_word(&self) -> u16 {
        u16::from_be_bytes([self.sw1, self.sw2])
    }

    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }
}
impl fmt::Debug for ResponseTrailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResponseTrailer {} sw1: 0x{:02X}, sw2: 0x{:02X} {}", '{', self.sw1, self.sw2, '}')
    }
}


/// The body of a command APDU.
///
/// A length field of zero in a `response_data_length` means the maximum (256 for short, 65536 for
/// extended APDUs), as on the wire.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Data {
    NoData,
    RequestDataShort {
        request_data: Vec<u8>,
    },
    RequestDataExtended {
        request_data: Vec<u8>,
    },
    ResponseDataShort {
        response_data_length: u8,
    },
    ResponseDataExtended {
        response_data_length: u16,
    },
    BothDataShort {
        request_data: Vec<u8>,
        response_data_length: u8,
    },
    BothDataExtended {
        request_data: Vec<u8>,
        response_data_length: u16,
    },
}
impl Data {
    /// The maximum number of response bytes expected, with a zero Le field resolved to its
    /// maximum.
    pub fn response_data_length(&self) -> Option<usize> {
        match self {
            Self::NoData|Self::RequestDataShort { .. }|Self::RequestDataExtended { .. } => None,
            Self::ResponseDataShort { response_data_length }|Self::BothDataShort { response_data_length, .. } => {
                if *response_data_length == 0 {
                    Some(256)
                } else {
                    Some(usize::from(*response_data_length))
                }
            },
            Self::ResponseDataExtended { response_data_length }|Self::BothDataExtended { response_data_length, .. } => {
                if *response_data_length == 0 {
                    Some(65536)
                } else {
                    Some(usize::from(*response_data_length))
                }
            },
        }
    }

    pub fn request_data(&self) -> Option<&[u8]> {
        match self {
            Self::NoData => None,
            Self::RequestDataShort { request_data } => Some(request_data.as_slice()),
            Self::RequestDataExtended { request_data } => Some(request_data.as_slice()),
            Self::ResponseDataShort { .. } => None,
            Self::ResponseDataExtended { .. } => None,
            Self::BothDataShort { request_data, .. } => Some(request_data.as_slice()),
            Self::BothDataExtended { request_data, .. } => Some(request_data.as_slice()),
        }
    }

    /// Whether the length fields use the extended (three-byte Lc, two- or three-byte Le) format.
    pub fn is_extended(&self) -> bool {
        matches!(
            self,
            Self::RequestDataExtended { .. }|Self::ResponseDataExtended { .. }|Self::BothDataExtended { .. }
        )
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        fn short_length(request_data: &[u8]) -> Result<u8, WriteError> {
            match request_data.len() {
                0 => Err(WriteError::EmptyData),
                256 => Ok(0x00),
                n if n > 256 => Err(WriteError::DataTooLong { maximum: 256, obtained: n }),
                n => Ok(n as u8),
            }
        }
        fn extended_length(request_data: &[u8]) -> Result<[u8; 2], WriteError> {
            match request_data.len() {
                0 => Err(WriteError::EmptyData),
                65536 => Ok([0x00, 0x00]),
                n if n > 65536 => Err(WriteError::DataTooLong { maximum: 65536, obtained: n }),
                n => Ok((n as u16).to_be_bytes()),
            }
        }

        // "case" refers to the cases in ISO/IEC 7816-3:2006 § 12.1.3
        match self {
            Data::NoData => {
                // case 1
            },
            Data::RequestDataShort { request_data } => {
                // case 3S: [Lc] [Data]
                writer.write_all(&[short_length(request_data)?])?;
                writer.write_all(request_data)?;
            },
            Data::RequestDataExtended { request_data } => {
                // case 3E: [0x00] [LcMSB] [LcLSB] [Data]
                let [lc_msb, lc_lsb] = extended_length(request_data)?;
                writer.write_all(&[0x00, lc_msb, lc_lsb])?;
                writer.write_all(request_data)?;
            },
            Data::ResponseDataShort { response_data_length } => {
                // case 2S: [Le]
                writer.write_all(&[*response_data_length])?;
            },
            Data::ResponseDataExtended { response_data_length } => {
                // case 2E: [0x00] [LeMSB] [LeLSB]
                let [le_msb, le_lsb] = response_data_length.to_be_bytes();
                writer.write_all(&[0x00, le_msb, le_lsb])?;
            },
            Data::BothDataShort { request_data, response_data_length } => {
                // case 4S: [Lc] [Data] [Le]
                writer.write_all(&[short_length(request_data)?])?;
                writer.write_all(request_data)?;
                writer.write_all(&[*response_data_length])?;
            },
            Data::BothDataExtended { request_data, response_data_length } => {
                // case 4E: [0x00] [LcMSB] [LcLSB] [Data] [LeMSB] [LeLSB]
                let [lc_msb, lc_lsb] = extended_length(request_data)?;
                writer.write_all(&[0x00, lc_msb, lc_lsb])?;
                writer.write_all(request_data)?;
                writer.write_all(&response_data_length.to_be_bytes())?;
            },
        }
        Ok(())
    }

    /// Decodes an APDU body (everything after the four header bytes).
    pub fn try_from_body(body: &[u8]) -> Result<Self, ParseError> {
        let invalid = ParseError::InvalidBody { length: body.len() };
        match body {
            [] => Ok(Self::NoData),
            [le] => Ok(Self::ResponseDataShort { response_data_length: *le }),
            [0x00, le_msb, le_lsb] => Ok(Self::ResponseDataExtended {
                response_data_length: u16::from_be_bytes([*le_msb, *le_lsb]),
            }),
            [0x00, lc_msb, lc_lsb, rest @ ..] => {
                let lc = usize::from(u16::from_be_bytes([*lc_msb, *lc_lsb]));
                if lc == 0 {
                    return Err(invalid);
                }
                if rest.len() == lc {
                    Ok(Self::RequestDataExtended { request_data: rest.to_vec() })
                } else if rest.len() == lc + 2 {
                    Ok(Self::BothDataExtended {
                        request_data: rest[..lc].to_vec(),
                        response_data_length: u16::from_be_bytes([rest[lc], rest[lc + 1]]),
                    })
                } else {
                    Err(invalid)
                }
            },
            [lc, rest @ ..] if *lc != 0x00 => {
                let lc = usize::from(*lc);
                if rest.len() == lc {
                    Ok(Self::RequestDataShort { request_data: rest.to_vec() })
                } else if rest.len() == lc + 1 {
                    Ok(Self::BothDataShort {
                        request_data: rest[..lc].to_vec(),
                        response_data_length: rest[lc],
                    })
                } else {
                    Err(invalid)
                }
            },
            _ => Err(invalid),
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Apdu {
    pub header: CommandHeader,
    pub data: Data,
}
impl Apdu {
    pub const fn new(header: CommandHeader, data: Data) -> Self {
        Self { header, data }
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        self.header.write_bytes(writer)?;
        self.data.write_bytes(writer)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WriteError> {
        let mut ret = Vec::new();
        self.write_bytes(&mut ret)?;
        Ok(ret)
    }

    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < 4 {
            return Err(ParseError::ShortHeader { length: bytes.len() });
        }
        let header = CommandHeader::new(bytes[0], bytes[1], bytes[2], bytes[3]);
        let data = Data::try_from_body(&bytes[4..])?;
        Ok(Self { header, data })
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Response {
    pub data: Vec<u8>,
    pub trailer: ResponseTrailer,
}
impl Response {
    pub const fn new(data: Vec<u8>, status_word: u16) -> Self {
        Self {
            data,
            trailer: ResponseTrailer::from_word(status_word),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let (data, trailer) = bytes.split_at_checked(bytes.len().checked_sub(2)?)?;
        Some(Self {
            data: data.to_vec(),
            trailer: ResponseTrailer::new(trailer[0], trailer[1]),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut ret = Vec::with_capacity(self.data.len() + 2);
        ret.extend_from_slice(&self.data);
        ret.extend_from_slice(&self.trailer.to_bytes());
        ret
    }

    pub const fn status_word(&self) -> u16 {
        self.trailer.to_word()
    }
}


#[cfg(test)]
mod tests {
    use super::{Apdu, CommandHeader, Data, ParseError, Response};
    use hex_literal::hex;

    #[test]
    fn iso_cases() {
        let cases: [(&[u8], Data); 7] = [
            (&hex!("00840000"), Data::NoData),
            (&hex!("0084000008"), Data::ResponseDataShort { response_data_length: 0x08 }),
            (&hex!("00840000001111"), Data::ResponseDataExtended { response_data_length: 0x1111 }),
            (&hex!("002281B602830D"), Data::RequestDataShort { request_data: hex!("830D").to_vec() }),
            (&hex!("002281B602830D08"), Data::BothDataShort { request_data: hex!("830D").to_vec(), response_data_length: 0x08 }),
            (&hex!("002281B6000002830D"), Data::RequestDataExtended { request_data: hex!("830D").to_vec() }),
            (&hex!("002281B6000002830D0000"), Data::BothDataExtended { request_data: hex!("830D").to_vec(), response_data_length: 0x0000 }),
        ];
        for (bytes, data) in cases {
            let apdu = Apdu::try_from_slice(bytes).unwrap();
            assert_eq!(apdu.data, data);
            assert_eq!(apdu.to_bytes().unwrap(), bytes);
        }
    }

    #[test]
    fn le_zero_means_maximum() {
        assert_eq!(Data::ResponseDataShort { response_data_length: 0 }.response_data_length(), Some(256));
        assert_eq!(Data::BothDataExtended { request_data: vec![1], response_data_length: 0 }.response_data_length(), Some(65536));
        assert_eq!(Data::RequestDataShort { request_data: vec![1] }.response_data_length(), None);
    }

    #[test]
    fn malformed_apdus() {
        assert_eq!(Apdu::try_from_slice(&hex!("0084")), Err(ParseError::ShortHeader { length: 2 }));
        assert_eq!(Apdu::try_from_slice(&hex!("00840000 03 0102")), Err(ParseError::InvalidBody { length: 3 }));
        assert_eq!(Apdu::try_from_slice(&hex!("00840000 0000")), Err(ParseError::InvalidBody { length: 2 }));
        let empty = Apdu::new(CommandHeader::new(0x00, 0x22, 0xC1, 0xA4), Data::RequestDataShort { request_data: Vec::new() });
        assert!(empty.to_bytes().is_err());
    }

    #[test]
    fn responses() {
        let response = Response::from_slice(&hex!("0102 9000")).unwrap();
        assert_eq!(response.data, hex!("0102"));
        assert!(response.trailer.is_success());
        assert_eq!(response.to_bytes(), hex!("0102 9000"));
        assert_eq!(Response::new(Vec::new(), 0x6988).to_bytes(), hex!("6988"));
        assert_eq!(Response::from_slice(&hex!("90")), None);
    }
}
