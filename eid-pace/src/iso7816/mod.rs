//! ISO/IEC 7816 smart card access.


pub mod apdu;
pub mod card;
pub mod reader;
