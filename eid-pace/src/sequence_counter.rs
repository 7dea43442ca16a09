//! The send sequence counter of Secure Messaging.
//!
//! Both sides of a Secure Messaging channel keep a counter that is incremented once for every
//! command and once for every response. It is mixed into every MAC (and, for AES, into every IV),
//! so a replayed or reordered message fails verification.


use std::fmt;


/// The counter does not fit into the requested number of bytes.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SequenceCounterOverflow {
    pub target_length: usize,
}
impl fmt::Display for SequenceCounterOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "send sequence counter does not fit into {} bytes", self.target_length)
    }
}
impl std::error::Error for SequenceCounterOverflow {
}


fn fits(counter: u128, target_length: usize) -> bool {
    if target_length >= 16 {
        true
    } else {
        counter >> (8 * target_length) == 0
    }
}


/// Encodes the counter big-endian, left-padded with zeroes to exactly `target_length` bytes.
///
/// Never truncates: a counter whose minimal representation is longer than `target_length` is an
/// overflow.
pub fn encode(counter: u128, target_length: usize) -> Result<Vec<u8>, SequenceCounterOverflow> {
    if !fits(counter, target_length) {
        return Err(SequenceCounterOverflow { target_length });
    }
    Ok(encode_fitting(counter, target_length))
}

fn encode_fitting(counter: u128, target_length: usize) -> Vec<u8> {
    let full = counter.to_be_bytes();
    let mut ret = Vec::with_capacity(target_length);
    if target_length > full.len() {
        ret.resize(target_length - full.len(), 0x00);
        ret.extend_from_slice(&full);
    } else {
        ret.extend_from_slice(&full[full.len()-target_length..]);
    }
    ret
}


/// A send sequence counter with a fixed encoding width.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SendSequenceCounter {
    value: u128,
    width: usize,
}
impl SendSequenceCounter {
    /// Creates a counter; fails if the initial value does not fit the width.
    pub fn new(value: u128, width: usize) -> Result<Self, SequenceCounterOverflow> {
        if !fits(value, width) {
            return Err(SequenceCounterOverflow { target_length: width });
        }
        Ok(Self { value, width })
    }

    /// A counter starting at zero, which fits every width.
    pub const fn zero(width: usize) -> Self {
        Self { value: 0, width }
    }

    pub fn value(&self) -> u128 { self.value }
    pub fn width(&self) -> usize { self.width }

    /// Advances the counter by one and returns the new value.
    ///
    /// On overflow, the counter keeps its previous value.
    pub fn increment(&mut self) -> Result<u128, SequenceCounterOverflow> {
        let overflow = SequenceCounterOverflow { target_length: self.width };
        let next = self.value.checked_add(1)
            .ok_or(overflow)?;
        if !fits(next, self.width) {
            return Err(overflow);
        }
        self.value = next;
        Ok(next)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode_fitting(self.value, self.width)
    }
}


#[cfg(test)]
mod tests {
    use super::{encode, SendSequenceCounter, SequenceCounterOverflow};
    use hex_literal::hex;

    #[test]
    fn encoding() {
        assert_eq!(encode(1, 16).unwrap(), hex!("00000000000000000000000000000001"));
        assert_eq!(encode(0x0102, 8).unwrap(), hex!("0000000000000102"));
        assert_eq!(encode(0xFF, 1).unwrap(), hex!("FF"));
        assert_eq!(encode(0, 0).unwrap(), Vec::<u8>::new());
        assert_eq!(encode(u128::MAX, 16).unwrap(), vec![0xFF; 16]);
        assert_eq!(encode(1, 20).unwrap().len(), 20);
    }

    #[test]
    fn encoding_never_truncates() {
        assert_eq!(encode(0x0100, 1), Err(SequenceCounterOverflow { target_length: 1 }));
        assert_eq!(encode(1, 0), Err(SequenceCounterOverflow { target_length: 0 }));
        assert_eq!(encode(1 << 64, 8), Err(SequenceCounterOverflow { target_length: 8 }));
    }

    #[test]
    fn decodes_back() {
        for value in [0u128, 1, 0x7F, 0x80, 0xFFFF, 0x0123_4567_89AB_CDEF, u128::MAX >> 8] {
            let encoded = encode(value, 16).unwrap();
            assert_eq!(u128::from_be_bytes(encoded.try_into().unwrap()), value);
        }
    }

    #[test]
    fn increment() {
        let mut ssc = SendSequenceCounter::zero(16);
        assert_eq!(ssc.increment(), Ok(1));
        assert_eq!(ssc.increment(), Ok(2));
        assert_eq!(ssc.to_bytes(), hex!("00000000000000000000000000000002"));

        let mut narrow = SendSequenceCounter::new(0xFE, 1).unwrap();
        assert_eq!(narrow.increment(), Ok(0xFF));
        assert_eq!(narrow.increment(), Err(SequenceCounterOverflow { target_length: 1 }));
        assert_eq!(narrow.value(), 0xFF);

        let mut widest = SendSequenceCounter::new(u128::MAX, 16).unwrap();
        assert!(widest.increment().is_err());
        assert!(SendSequenceCounter::new(0x100, 1).is_err());
    }
}
