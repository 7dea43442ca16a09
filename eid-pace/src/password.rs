//! Password identifiers, password status and reader capabilities.


use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use digest::Digest;
use sha1::Sha1;
use zeroize::Zeroizing;


/// The kind of password used to run PACE.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum PasswordId {
    /// Key derived from the machine-readable zone.
    Mrz,

    /// Card access number, printed on the document.
    Can,

    /// Personal identification number.
    Pin,

    /// PIN unblocking key.
    Puk,
}
impl PasswordId {
    pub const ALL: [PasswordId; 4] = [Self::Mrz, Self::Can, Self::Pin, Self::Puk];

    /// The password reference sent in MSE:Set AT.
    pub const fn code(&self) -> u8 {
        match self {
            Self::Mrz => 0x01,
            Self::Can => 0x02,
            Self::Pin => 0x03,
            Self::Puk => 0x04,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Mrz),
            0x02 => Some(Self::Can),
            0x03 => Some(Self::Pin),
            0x04 => Some(Self::Puk),
            _ => None,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Mrz => "MRZ",
            Self::Can => "CAN",
            Self::Pin => "PIN",
            Self::Puk => "PUK",
        }
    }

    /// Parses either the numeric code (`"3"`) or the symbolic name (`"pin"`, case-insensitive).
    pub fn from_text(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if let Ok(code) = trimmed.parse::<u8>() {
            return Self::from_code(code);
        }
        Self::ALL.into_iter()
            .find(|id| id.name().eq_ignore_ascii_case(trimmed))
    }

    /// Turns the password into the seed of the password key derivation.
    ///
    /// The MRZ key is the SHA-1 hash of the MRZ information (document number, date of birth and
    /// date of expiry, each with check digit); all other passwords are used verbatim.
    pub fn key_seed(&self, secret: &[u8]) -> Zeroizing<Vec<u8>> {
        match self {
            Self::Mrz => {
                let mut hash = Sha1::digest(secret);
                let seed = Zeroizing::new(hash.to_vec());
                hash.iter_mut().for_each(|b| *b = 0);
                seed
            },
            Self::Can|Self::Pin|Self::Puk => Zeroizing::new(secret.to_vec()),
        }
    }
}
impl fmt::Display for PasswordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
impl FromStr for PasswordId {
    type Err = UnknownPasswordId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_text(s)
            .ok_or_else(|| UnknownPasswordId(s.to_owned()))
    }
}


#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UnknownPasswordId(pub String);
impl fmt::Display for UnknownPasswordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown password identifier {:?} (expected MRZ, CAN, PIN, PUK or 1 to 4)", self.0)
    }
}
impl std::error::Error for UnknownPasswordId {
}


/// What the card says about the password in a warning status word.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum PasswordStatus {
    /// The password can still be used; this many attempts remain.
    RetriesLeft(u8),

    /// One attempt remains, but it must be preceded by a successful PACE with the CAN.
    Suspended,

    /// No attempts remain; the password must be unblocked with the PUK.
    Blocked,

    /// The password has been deactivated.
    Deactivated,
}
impl PasswordStatus {
    pub const fn from_status_word(status_word: u16) -> Option<Self> {
        match status_word {
            0x63C0 => Some(Self::Blocked),
            0x63C1 => Some(Self::Suspended),
            0x63C2..=0x63CF => Some(Self::RetriesLeft((status_word & 0x000F) as u8)),
            0x6283 => Some(Self::Deactivated),
            _ => None,
        }
    }

    /// The retry counter as reported by the card.
    pub const fn retry_counter(&self) -> Option<u8> {
        match self {
            Self::RetriesLeft(n) => Some(*n),
            Self::Suspended => Some(1),
            Self::Blocked => Some(0),
            Self::Deactivated => None,
        }
    }
}
impl fmt::Display for PasswordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriesLeft(n) => write!(f, "{} attempts left", n),
            Self::Suspended => write!(f, "password suspended, CAN required"),
            Self::Blocked => write!(f, "password blocked, PUK required"),
            Self::Deactivated => write!(f, "password deactivated"),
        }
    }
}


/// A PACE-related feature announced by a card reader.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum PaceCapability {
    /// Qualified electronic signature.
    Qes,

    /// The German eID application.
    GermanEid,

    /// Plain PACE.
    GenericPace,

    /// The reader can tear down an established channel.
    DestroyChannel,
}
impl PaceCapability {
    pub const ALL: [PaceCapability; 4] = [Self::Qes, Self::GermanEid, Self::GenericPace, Self::DestroyChannel];

    pub const fn bit(&self) -> u8 {
        match self {
            Self::Qes => 0x10,
            Self::GermanEid => 0x20,
            Self::GenericPace => 0x40,
            Self::DestroyChannel => 0x80,
        }
    }
}


/// Decodes the capability byte returned by a reader. Undefined bits are ignored.
pub fn parse_capabilities(status_byte: u8) -> BTreeSet<PaceCapability> {
    PaceCapability::ALL.into_iter()
        .filter(|capability| status_byte & capability.bit() != 0)
        .collect()
}


#[cfg(test)]
mod tests {
    use super::{parse_capabilities, PaceCapability, PasswordId, PasswordStatus};
    use hex_literal::hex;

    #[test]
    fn password_id_mapping() {
        for id in PasswordId::ALL {
            assert_eq!(PasswordId::from_code(id.code()), Some(id));
            assert_eq!(PasswordId::from_text(id.name()), Some(id));
            assert_eq!(id.to_string().parse::<PasswordId>().unwrap(), id);
        }
        assert_eq!(PasswordId::from_text("3"), Some(PasswordId::Pin));
        assert_eq!(PasswordId::from_text("can"), Some(PasswordId::Can));
        assert_eq!(PasswordId::from_text(" Puk "), Some(PasswordId::Puk));
        assert_eq!(PasswordId::from_code(0x00), None);
        assert_eq!(PasswordId::from_code(0x05), None);
        assert_eq!(PasswordId::from_text("5"), None);
        assert_eq!(PasswordId::from_text("pinn"), None);
        assert!("".parse::<PasswordId>().is_err());
    }

    #[test]
    fn key_seeds() {
        assert_eq!(PasswordId::Can.key_seed(b"123456").as_slice(), b"123456");
        // ICAO Doc 9303 Part 11 Appendix G.1
        assert_eq!(
            PasswordId::Mrz.key_seed(b"T22000129364081251010318").as_slice(),
            hex!("7E2D2A41 C74EA0B3 8CD36F86 3939BFA8 E9032AAD"),
        );
    }

    #[test]
    fn password_status() {
        assert_eq!(PasswordStatus::from_status_word(0x63C2), Some(PasswordStatus::RetriesLeft(2)));
        assert_eq!(PasswordStatus::from_status_word(0x63C1), Some(PasswordStatus::Suspended));
        assert_eq!(PasswordStatus::from_status_word(0x63C0), Some(PasswordStatus::Blocked));
        assert_eq!(PasswordStatus::from_status_word(0x6283), Some(PasswordStatus::Deactivated));
        assert_eq!(PasswordStatus::from_status_word(0x9000), None);
        assert_eq!(PasswordStatus::Suspended.retry_counter(), Some(1));
    }

    #[test]
    fn capabilities() {
        assert_eq!(
            parse_capabilities(0x70).into_iter().collect::<Vec<_>>(),
            vec![PaceCapability::Qes, PaceCapability::GermanEid, PaceCapability::GenericPace],
        );
        assert_eq!(parse_capabilities(0xF0).len(), 4);
        assert!(parse_capabilities(0x0F).is_empty());
        assert_eq!(
            parse_capabilities(0x81).into_iter().collect::<Vec<_>>(),
            vec![PaceCapability::DestroyChannel],
        );
    }
}
