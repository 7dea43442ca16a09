//! Object identifiers relevant to PACE.


use rasn::types::Oid;

use crate::crypt::CipherSuite;


macro_rules! pace_oid {
    ($name:ident $(, $number:expr)* $(,)?) => {
        pub const $name: &'static Oid = Oid::const_new(&[0, 4, 0, 127, 0, 7, 2, 2, 4 $(, $number)*]);
    };
}

pace_oid!(PACE_OID_PREFIX);

pace_oid!(PACE_ECDH_GM,                     2);
pace_oid!(PACE_ECDH_GM_3DES_CBC_CBC,        2, 1);
pace_oid!(PACE_ECDH_GM_AES_CBC_CMAC_128,    2, 2);
pace_oid!(PACE_ECDH_GM_AES_CBC_CMAC_192,    2, 3);
pace_oid!(PACE_ECDH_GM_AES_CBC_CMAC_256,    2, 4);


/// The ECDH generic mapping protocols together with their symmetric algorithms.
pub const ECDH_GM_PROTOCOLS: [(&'static Oid, CipherSuite); 4] = [
    (PACE_ECDH_GM_3DES_CBC_CBC, CipherSuite::TripleDes),
    (PACE_ECDH_GM_AES_CBC_CMAC_128, CipherSuite::Aes128),
    (PACE_ECDH_GM_AES_CBC_CMAC_192, CipherSuite::Aes192),
    (PACE_ECDH_GM_AES_CBC_CMAC_256, CipherSuite::Aes256),
];


/// Whether the OID names any PACE protocol, supported or not.
pub fn is_pace_protocol(oid: &Oid) -> bool {
    oid.len() == PACE_OID_PREFIX.len() + 2 && oid.starts_with(PACE_OID_PREFIX)
}


/// The cipher suite of a supported protocol; `None` for other mappings and for non-PACE OIDs.
pub fn cipher_suite(protocol: &Oid) -> Option<CipherSuite> {
    ECDH_GM_PROTOCOLS.iter()
        .find(|(oid, _)| *oid == protocol)
        .map(|(_, suite)| *suite)
}


/// Dotted decimal notation, e.g. `0.4.0.127.0.7.2.2.4.2.2`.
pub fn dotted(oid: &Oid) -> String {
    oid.iter()
        .map(|arc| arc.to_string())
        .collect::<Vec<_>>()
        .join(".")
}


/// The ECDH generic mapping protocol using the given cipher suite.
pub fn ecdh_gm_protocol(suite: CipherSuite) -> &'static Oid {
    match suite {
        CipherSuite::TripleDes => PACE_ECDH_GM_3DES_CBC_CBC,
        CipherSuite::Aes128 => PACE_ECDH_GM_AES_CBC_CMAC_128,
        CipherSuite::Aes192 => PACE_ECDH_GM_AES_CBC_CMAC_192,
        CipherSuite::Aes256 => PACE_ECDH_GM_AES_CBC_CMAC_256,
    }
}


#[cfg(test)]
mod tests {
    use super::{cipher_suite, dotted, ecdh_gm_protocol, is_pace_protocol, PACE_ECDH_GM, PACE_ECDH_GM_AES_CBC_CMAC_128};
    use crate::crypt::CipherSuite;
    use rasn::types::Oid;

    #[test]
    fn protocol_table() {
        assert_eq!(cipher_suite(PACE_ECDH_GM_AES_CBC_CMAC_128), Some(CipherSuite::Aes128));
        for suite in [CipherSuite::TripleDes, CipherSuite::Aes128, CipherSuite::Aes192, CipherSuite::Aes256] {
            assert_eq!(cipher_suite(ecdh_gm_protocol(suite)), Some(suite));
        }

        // integrated mapping
        let ecdh_im = Oid::const_new(&[0, 4, 0, 127, 0, 7, 2, 2, 4, 4, 2]);
        assert!(is_pace_protocol(ecdh_im));
        assert_eq!(cipher_suite(ecdh_im), None);

        assert!(!is_pace_protocol(PACE_ECDH_GM));
        assert_eq!(dotted(PACE_ECDH_GM_AES_CBC_CMAC_128), "0.4.0.127.0.7.2.2.4.2.2");
        // chip authentication
        assert!(!is_pace_protocol(Oid::const_new(&[0, 4, 0, 127, 0, 7, 2, 2, 3, 2, 2])));
    }
}
