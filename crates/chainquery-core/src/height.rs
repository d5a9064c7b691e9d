//! Arbitrary-precision block heights and event indices.
//!
//! Some chains number blocks past `u64`, so heights and the in-block event
//! cursor are backed by [`BigUint`] and always compared and incremented exactly.
//! Both serialize as decimal strings.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

macro_rules! biguint_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(BigUint);

        impl $name {
            pub fn zero() -> Self {
                Self(BigUint::zero())
            }

            /// Returns the value directly after `self`.
            pub fn next(&self) -> Self {
                Self(&self.0 + 1u32)
            }

            /// Advance by one in place.
            pub fn increment(&mut self) {
                self.0 += 1u32;
            }

            /// Returns the value as `u64` if it fits.
            pub fn to_u64(&self) -> Option<u64> {
                self.0.to_u64()
            }
        }

        impl From<u64> for $name {
            fn from(n: u64) -> Self {
                Self(BigUint::from(n))
            }
        }

        impl From<u32> for $name {
            fn from(n: u32) -> Self {
                Self(BigUint::from(n))
            }
        }

        impl From<usize> for $name {
            fn from(n: usize) -> Self {
                Self(BigUint::from(n))
            }
        }

        impl From<BigUint> for $name {
            fn from(n: BigUint) -> Self {
                Self(n)
            }
        }

        impl FromStr for $name {
            type Err = num_bigint::ParseBigIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                BigUint::from_str(s.trim()).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0.to_str_radix(10))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct Visitor;

                impl<'de> de::Visitor<'de> for Visitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str("a non-negative integer or decimal string")
                    }

                    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                        Ok($name::from(v))
                    }

                    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                        u64::try_from(v)
                            .map($name::from)
                            .map_err(|_| E::custom("negative value"))
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                        v.parse().map_err(E::custom)
                    }
                }

                deserializer.deserialize_any(Visitor)
            }
        }
    };
}

biguint_newtype!(
    /// Height (number) of a block in the chain.
    BlockHeight
);

biguint_newtype!(
    /// Position of an event inside the ordered event list of its block.
    EventIndex
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_past_u64() {
        let mut h = BlockHeight::from(u64::MAX);
        h.increment();
        assert_eq!(h.to_string(), "18446744073709551616");
        assert!(h.to_u64().is_none());
        assert!(BlockHeight::from(u64::MAX) < h);
    }

    #[test]
    fn ordering_is_numeric() {
        let a: BlockHeight = "99".parse().unwrap();
        let b: BlockHeight = "100".parse().unwrap();
        assert!(a < b);
        assert_eq!(a.next(), b);
        assert!(EventIndex::zero() < EventIndex::zero().next());
    }

    #[test]
    fn serde_accepts_numbers_and_strings() {
        let from_num: BlockHeight = serde_json::from_str("42").unwrap();
        let from_str: BlockHeight = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(from_num, from_str);
        assert_eq!(serde_json::to_string(&from_num).unwrap(), "\"42\"");
    }
}
