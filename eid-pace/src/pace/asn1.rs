//! ASN.1 structures relevant to PACE.


use std::fmt;

use rasn::{AsnType, Decode, Encode};
use rasn::types::ObjectIdentifier;
use tracing::debug;

use crate::crypt::CipherSuite;
use crate::der_util::{parse_tlvs, TlvError};
use crate::pace::oids;


const TAG_SET: u32 = 0x31;
const TAG_SEQUENCE: u32 = 0x30;
const TAG_OBJECT_IDENTIFIER: u32 = 0x06;

/// The only PACE version in use.
pub const PACE_VERSION: u32 = 2;


#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CardAccessError {
    /// The file is not a DER-encoded SET.
    NotASet { tag: Option<u32> },

    /// The TLV structure is broken.
    Structure(TlvError),
}
impl fmt::Display for CardAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotASet { tag: Some(tag) }
                => write!(f, "EF.CardAccess starts with tag 0x{:02X} instead of SET", tag),
            Self::NotASet { tag: None }
                => write!(f, "EF.CardAccess is empty"),
            Self::Structure(e)
                => write!(f, "EF.CardAccess is malformed: {}", e),
        }
    }
}
impl std::error::Error for CardAccessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NotASet { .. } => None,
            Self::Structure(e) => Some(e),
        }
    }
}
impl From<TlvError> for CardAccessError {
    fn from(value: TlvError) -> Self { Self::Structure(value) }
}


/// An item of PACE-related security information in the `EF.CardAccess` file.
///
/// ```plain
/// PACEInfo ::= SEQUENCE {
///     protocol OBJECT IDENTIFIER,
///     version INTEGER, -- SHOULD be 2
///     parameterId INTEGER OPTIONAL
/// }
/// ```
#[derive(AsnType, Clone, Debug, Decode, Encode, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PaceInfo {
    pub protocol: ObjectIdentifier,
    pub version: u32,
    pub parameter_id: Option<u32>,
}
impl PaceInfo {
    pub fn new(
        protocol: ObjectIdentifier,
        version: u32,
        parameter_id: Option<u32>,
    ) -> Self {
        Self {
            protocol,
            version,
            parameter_id,
        }
    }

    /// The cipher suite, if the protocol is ECDH generic mapping.
    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        oids::cipher_suite(&self.protocol)
    }

    /// The standardized domain parameter identifier, if it is one of the supported curves.
    pub fn standardized_curve_id(&self) -> Option<u8> {
        let parameter_id = u8::try_from(self.parameter_id?).ok()?;
        (8..=18).contains(&parameter_id).then_some(parameter_id)
    }

    /// Whether PACE can be run with this information.
    pub fn is_supported(&self) -> bool {
        self.version == PACE_VERSION
            && self.cipher_suite().is_some()
            && self.standardized_curve_id().is_some()
    }
}


/// Extracts every `PaceInfo` from the contents of `EF.CardAccess`.
///
/// Security infos of other protocols (Chip Authentication, Terminal Authentication, domain
/// parameter infos) are skipped, as are PACE entries that do not decode.
pub fn parse_card_access(card_access: &[u8]) -> Result<Vec<PaceInfo>, CardAccessError> {
    let outer = parse_tlvs(card_access)?;
    let set = match outer.first() {
        Some(tlv) if tlv.tag == TAG_SET => tlv,
        Some(tlv) => return Err(CardAccessError::NotASet { tag: Some(tlv.tag) }),
        None => return Err(CardAccessError::NotASet { tag: None }),
    };

    let mut ret = Vec::new();
    for (entry_index, security_info) in parse_tlvs(set.value)?.into_iter().enumerate() {
        if security_info.tag != TAG_SEQUENCE {
            debug!(entry_index, tag = security_info.tag, "skipping non-SEQUENCE security info");
            continue;
        }
        let members = parse_tlvs(security_info.value)?;
        let Some(oid_tlv) = members.first().filter(|tlv| tlv.tag == TAG_OBJECT_IDENTIFIER) else {
            debug!(entry_index, "skipping security info without protocol");
            continue;
        };
        let Ok(protocol): Result<ObjectIdentifier, _> = rasn::der::decode(oid_tlv.raw) else {
            debug!(entry_index, "skipping security info with undecodable protocol");
            continue;
        };
        if !oids::is_pace_protocol(&protocol) {
            continue;
        }
        match rasn::der::decode::<PaceInfo>(security_info.raw) {
            Ok(pace_info) => ret.push(pace_info),
            Err(error) => debug!(entry_index, %error, "skipping undecodable PaceInfo"),
        }
    }
    Ok(ret)
}


/// Picks the first `PaceInfo` PACE can be run with.
pub fn select_pace_info(pace_infos: &[PaceInfo]) -> Option<&PaceInfo> {
    pace_infos.iter()
        .find(|pace_info| pace_info.is_supported())
}


#[cfg(test)]
mod tests {
    use super::{parse_card_access, select_pace_info, CardAccessError};
    use crate::crypt::CipherSuite;
    use crate::pace::oids::PACE_ECDH_GM_AES_CBC_CMAC_128;
    use hex_literal::hex;

    #[test]
    fn appendix_g1_card_access() {
        // ICAO Doc 9303 Part 11 Appendix G.1
        let card_access = hex!("3114 3012 060A04007F00070202040202 020102 02010D");
        let pace_infos = parse_card_access(&card_access).unwrap();
        assert_eq!(pace_infos.len(), 1);
        assert_eq!(&*pace_infos[0].protocol, PACE_ECDH_GM_AES_CBC_CMAC_128);
        assert_eq!(pace_infos[0].version, 2);
        assert_eq!(pace_infos[0].parameter_id, Some(13));

        let selected = select_pace_info(&pace_infos).unwrap();
        assert_eq!(selected.cipher_suite(), Some(CipherSuite::Aes128));
        assert_eq!(selected.standardized_curve_id(), Some(13));
    }

    #[test]
    fn skips_unsupported_entries() {
        let card_access = hex!(
            "3148"
            // TerminalAuthenticationInfo
            "300D 060804007F0007020202 020102"
            // PACE ECDH-IM, AES-128
            "3012 060A04007F00070202040402 020102 02010D"
            // PACE ECDH-GM, 3DES, explicit domain parameters
            "300F 060A04007F00070202040201 020102"
            // PACE ECDH-GM, AES-256, brainpoolP384r1
            "3012 060A04007F00070202040204 020102 020110"
        );
        let pace_infos = parse_card_access(&card_access).unwrap();
        assert_eq!(pace_infos.len(), 3);
        let selected = select_pace_info(&pace_infos).unwrap();
        assert_eq!(selected.cipher_suite(), Some(CipherSuite::Aes256));
        assert_eq!(selected.standardized_curve_id(), Some(16));
    }

    #[test]
    fn malformed_card_access() {
        assert_eq!(parse_card_access(&[]), Err(CardAccessError::NotASet { tag: None }));
        assert_eq!(parse_card_access(&hex!("3003 020102")), Err(CardAccessError::NotASet { tag: Some(0x30) }));
        assert!(matches!(parse_card_access(&hex!("3114 3012 060A")), Err(CardAccessError::Structure(_))));
    }
}
