//! Decoding of card status words into PACE result codes.
//!
//! The result codes are those returned by PC/SC readers that implement PACE themselves (PC/SC Part
//! 10 AMD1); the same codes are used to report failures of the terminal-side implementation.


use std::fmt;


/// A card exchange performed while establishing PACE.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Step {
    SelectEfCardAccess,
    ReadEfCardAccess,
    MseSetAt,
    GeneralAuthenticate1,
    GeneralAuthenticate2,
    GeneralAuthenticate3,
    GeneralAuthenticate4,
}
impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelectEfCardAccess => write!(f, "SELECT EF.CardAccess"),
            Self::ReadEfCardAccess => write!(f, "READ BINARY EF.CardAccess"),
            Self::MseSetAt => write!(f, "MSE:Set AT"),
            Self::GeneralAuthenticate1 => write!(f, "General Authenticate (encrypted nonce)"),
            Self::GeneralAuthenticate2 => write!(f, "General Authenticate (map nonce)"),
            Self::GeneralAuthenticate3 => write!(f, "General Authenticate (key agreement)"),
            Self::GeneralAuthenticate4 => write!(f, "General Authenticate (mutual authentication)"),
        }
    }
}


/// A PACE result code.
///
/// The variants carrying a `u16` hold the status word returned by the card in the respective step.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum PaceResultCode {
    NoError,
    InconsistentLength,
    UnexpectedData,
    UnexpectedCombinationOfData,
    TlvResponseSyntax,
    UnexpectedTlvResponseObject,
    UnknownPin,
    WrongAuthToken,
    SelectEfCardAccess(u16),
    ReadEfCardAccess(u16),
    MseSetAt(u16),
    GeneralAuthenticate1(u16),
    GeneralAuthenticate2(u16),
    GeneralAuthenticate3(u16),
    GeneralAuthenticate4(u16),
    CommunicationAbort,
    NoCard,
    Abort,
    Timeout,
}
impl PaceResultCode {
    /// The 32-bit code as transmitted by a reader.
    pub const fn code(&self) -> u32 {
        match self {
            Self::NoError => 0x0000_0000,
            Self::InconsistentLength => 0xD000_0001,
            Self::UnexpectedData => 0xD000_0002,
            Self::UnexpectedCombinationOfData => 0xD000_0003,
            Self::TlvResponseSyntax => 0xE000_0001,
            Self::UnexpectedTlvResponseObject => 0xE000_0002,
            Self::UnknownPin => 0xE000_0003,
            Self::WrongAuthToken => 0xE000_0006,
            Self::SelectEfCardAccess(sw) => 0xF000_0000 | *sw as u32,
            Self::ReadEfCardAccess(sw) => 0xF001_0000 | *sw as u32,
            Self::MseSetAt(sw) => 0xF002_0000 | *sw as u32,
            Self::GeneralAuthenticate1(sw) => 0xF003_0000 | *sw as u32,
            Self::GeneralAuthenticate2(sw) => 0xF004_0000 | *sw as u32,
            Self::GeneralAuthenticate3(sw) => 0xF005_0000 | *sw as u32,
            Self::GeneralAuthenticate4(sw) => 0xF006_0000 | *sw as u32,
            Self::CommunicationAbort => 0xF010_0001,
            Self::NoCard => 0xF010_0002,
            Self::Abort => 0xF020_0001,
            Self::Timeout => 0xF020_0002,
        }
    }

    pub const fn from_code(code: u32) -> Option<Self> {
        let sw = (code & 0xFFFF) as u16;
        match code {
            0x0000_0000 => Some(Self::NoError),
            0xD000_0001 => Some(Self::InconsistentLength),
            0xD000_0002 => Some(Self::UnexpectedData),
            0xD000_0003 => Some(Self::UnexpectedCombinationOfData),
            0xE000_0001 => Some(Self::TlvResponseSyntax),
            0xE000_0002 => Some(Self::UnexpectedTlvResponseObject),
            0xE000_0003 => Some(Self::UnknownPin),
            0xE000_0006 => Some(Self::WrongAuthToken),
            0xF010_0001 => Some(Self::CommunicationAbort),
            0xF010_0002 => Some(Self::NoCard),
            0xF020_0001 => Some(Self::Abort),
            0xF020_0002 => Some(Self::Timeout),
            _ => match code & 0xFFFF_0000 {
                0xF000_0000 => Some(Self::SelectEfCardAccess(sw)),
                0xF001_0000 => Some(Self::ReadEfCardAccess(sw)),
                0xF002_0000 => Some(Self::MseSetAt(sw)),
                0xF003_0000 => Some(Self::GeneralAuthenticate1(sw)),
                0xF004_0000 => Some(Self::GeneralAuthenticate2(sw)),
                0xF005_0000 => Some(Self::GeneralAuthenticate3(sw)),
                0xF006_0000 => Some(Self::GeneralAuthenticate4(sw)),
                _ => None,
            },
        }
    }

    /// The status word carried by this code, if any.
    pub const fn status_word(&self) -> Option<u16> {
        match self {
            Self::SelectEfCardAccess(sw)
                | Self::ReadEfCardAccess(sw)
                | Self::MseSetAt(sw)
                | Self::GeneralAuthenticate1(sw)
                | Self::GeneralAuthenticate2(sw)
                | Self::GeneralAuthenticate3(sw)
                | Self::GeneralAuthenticate4(sw)
                => Some(*sw),
            _ => None,
        }
    }

    /// The SW-carrying code for a failure in the given step.
    pub const fn for_step(step: Step, sw: u16) -> Self {
        match step {
            Step::SelectEfCardAccess => Self::SelectEfCardAccess(sw),
            Step::ReadEfCardAccess => Self::ReadEfCardAccess(sw),
            Step::MseSetAt => Self::MseSetAt(sw),
            Step::GeneralAuthenticate1 => Self::GeneralAuthenticate1(sw),
            Step::GeneralAuthenticate2 => Self::GeneralAuthenticate2(sw),
            Step::GeneralAuthenticate3 => Self::GeneralAuthenticate3(sw),
            Step::GeneralAuthenticate4 => Self::GeneralAuthenticate4(sw),
        }
    }

    pub const fn description(&self) -> &'static str {
        match self {
            Self::NoError => "no error",
            Self::InconsistentLength => "length of input data inconsistent",
            Self::UnexpectedData => "unexpected data in input",
            Self::UnexpectedCombinationOfData => "unexpected combination of data in input",
            Self::TlvResponseSyntax => "syntax error in TLV response",
            Self::UnexpectedTlvResponseObject => "unexpected or missing object in TLV response",
            Self::UnknownPin => "unknown password ID",
            Self::WrongAuthToken => "wrong authentication token",
            Self::SelectEfCardAccess(_) => "SELECT EF.CardAccess failed",
            Self::ReadEfCardAccess(_) => "READ BINARY EF.CardAccess failed",
            Self::MseSetAt(_) => "MSE:Set AT failed",
            Self::GeneralAuthenticate1(_) => "General Authenticate step 1 failed",
            Self::GeneralAuthenticate2(_) => "General Authenticate step 2 failed",
            Self::GeneralAuthenticate3(_) => "General Authenticate step 3 failed",
            Self::GeneralAuthenticate4(_) => "General Authenticate step 4 failed",
            Self::CommunicationAbort => "communication abort",
            Self::NoCard => "no card",
            Self::Abort => "aborted",
            Self::Timeout => "timeout",
        }
    }
}
impl fmt::Display for PaceResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())?;
        if let Some(sw) = self.status_word() {
            write!(f, " (SW {:04X})", sw)?;
        }
        write!(f, " [0x{:08X}]", self.code())
    }
}


/// A status word that ended a PACE step unsuccessfully.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StatusFailure {
    pub step: Step,
    pub code: PaceResultCode,
    pub status_word: u16,
}
impl fmt::Display for StatusFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} returned {:04X}: {}", self.step, self.status_word, self.code)
    }
}
impl std::error::Error for StatusFailure {
}


/// Decides whether a status word lets PACE continue past the given step.
///
/// At MSE:Set AT, the password warnings `63C1` to `63CF` are not failures: the password can still
/// be used and the caller decodes the retry counter from the status word. `63C0` (blocked) is
/// reported as a failure here; only a PUK may continue in that state, which the engine decides.
///
/// `61xx` is normal processing as well; the response data is parsed like that of a `9000`.
pub fn map_status_word(step: Step, sw: u16) -> Result<(), StatusFailure> {
    let code = match sw {
        0x9000 => return Ok(()),
        0x6100..=0x61FF => return Ok(()),
        0x63C1..=0x63CF if step == Step::MseSetAt => return Ok(()),
        0x6700 => PaceResultCode::InconsistentLength,
        0x6A80 => PaceResultCode::UnexpectedData,
        0x6A88 => PaceResultCode::UnknownPin,
        _ => PaceResultCode::for_step(step, sw),
    };
    Err(StatusFailure { step, code, status_word: sw })
}
