use std::fmt::{Debug, Display, Formatter};
use std::ops::Add;

/// A 16 bit sequence / acknowledgement number. Sequence numbers count *bytes*, not packets, and
///  all arithmetic wraps modulo 65536.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct SeqNum(u16);

impl Display for SeqNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

impl Debug for SeqNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SeqNum(0x{:04x})", self.0)
    }
}

impl SeqNum {
    pub const ZERO: SeqNum = SeqNum(0);

    pub fn from_raw(value: u16) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u16 {
        self.0
    }

    /// The number of bytes between `earlier` and `self`, going forward (i.e. wrapping).
    pub fn bytes_since(&self, earlier: SeqNum) -> u16 {
        self.0.wrapping_sub(earlier.0)
    }
}

/// Advancing by a byte count: only the count modulo 65536 matters
impl Add<usize> for SeqNum {
    type Output = SeqNum;

    fn add(self, rhs: usize) -> Self::Output {
        SeqNum(self.0.wrapping_add((rhs & 0xffff) as u16))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0x1000, 0, 0x1000)]
    #[case::simple(0x2000, 2, 0x2002)]
    #[case::wrap(0xfffe, 3, 0x0001)]
    #[case::full_cycle(0x1234, 0x10000, 0x1234)]
    #[case::more_than_cycle(0x1234, 0x10005, 0x1239)]
    fn test_add(#[case] start: u16, #[case] n: usize, #[case] expected: u16) {
        assert_eq!(SeqNum::from_raw(start) + n, SeqNum::from_raw(expected));
    }

    #[rstest]
    #[case(0x1000, 0x1000, 0)]
    #[case(0x1000, 0x100a, 10)]
    #[case(0xfff0, 0x0010, 0x20)]
    #[case(0x1000, 0x0fff, 0xffff)]
    fn test_bytes_since(#[case] earlier: u16, #[case] later: u16, #[case] expected: u16) {
        assert_eq!(SeqNum::from_raw(later).bytes_since(SeqNum::from_raw(earlier)), expected);
    }

    #[test]
    fn test_display() {
        assert_eq!(SeqNum::from_raw(0x2a).to_string(), "0x002a");
        assert_eq!(format!("{:?}", SeqNum::from_raw(0xbeef)), "SeqNum(0xbeef)");
    }
}
