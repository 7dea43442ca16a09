//! PACE (Password Authenticated Connection Establishment) and ISO/IEC 7816-4 Secure Messaging for
//! contactless identity documents.
//!
//! The usual entry point is [`pace::PaceEngine`], which runs PACE against a [`SmartCard`] and
//! returns a [`secure_messaging::SecureMessaging`] channel. Readers which run PACE themselves are
//! driven through [`iso7816::reader::PaceReaderFeature`].
//!
//! [`SmartCard`]: iso7816::card::SmartCard


pub mod crypt;
pub mod der_util;
pub mod iso7816;
pub mod pace;
pub mod password;
pub mod secure_messaging;
pub mod sequence_counter;
pub mod status;


use std::fmt::Write;


/// Formats the buffer as a classic hex dump: offset, sixteen bytes, printable characters.
pub fn hexdump(buf: &[u8]) -> String {
    let mut ret = String::new();
    for (line_index, line) in buf.chunks(16).enumerate() {
        let _ = write!(ret, "{:08X}  ", line_index * 16);

        for i in 0..16 {
            match line.get(i) {
                Some(b) => { let _ = write!(ret, " {:02X}", b); },
                None => ret.push_str("   "),
            }
        }

        ret.push_str(" |");
        for &b in line {
            if b >= b' ' && b <= b'~' {
                ret.push(char::from(b));
            } else {
                ret.push('.');
            }
        }
        ret.push_str("|\n");
    }
    ret
}
