//! Bluetooth device addresses.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for address parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressParseError {
   /// Input is not `XX:XX:XX:XX:XX:XX`
   #[error("expected XX:XX:XX:XX:XX:XX, got {len} characters")]
   BadLength { len: usize },

   /// A separator other than `:` was found
   #[error("unexpected separator at offset {offset}")]
   BadSeparator { offset: usize },

   /// An octet is not two hex digits
   #[error("invalid octet {octet:?}")]
   BadOctet { octet: String },
}

/// A 48-bit device address, stored least significant byte first as it
/// appears on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 6]);

impl Address {
   pub const fn bytes(&self) -> &[u8; 6] {
      &self.0
   }
}

impl FromStr for Address {
   type Err = AddressParseError;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      if s.len() != 17 {
         return Err(AddressParseError::BadLength { len: s.len() });
      }

      let mut bytes = [0u8; 6];
      for (i, octet) in s.split(':').enumerate() {
         if i >= 6 || octet.len() != 2 {
            let offset = s
               .char_indices()
               .skip(2)
               .step_by(3)
               .find(|(_, c)| *c != ':')
               .map_or(0, |(offset, _)| offset);
            return Err(AddressParseError::BadSeparator { offset });
         }
         // from_str_radix alone would accept a leading '+'
         let value = octet
            .bytes()
            .all(|b| b.is_ascii_hexdigit())
            .then(|| u8::from_str_radix(octet, 16).ok())
            .flatten()
            .ok_or_else(|| AddressParseError::BadOctet {
               octet: octet.to_owned(),
            })?;
         // "11:22:..." puts 0x11 in the most significant position
         bytes[5 - i] = value;
      }
      Ok(Self(bytes))
   }
}

impl fmt::Display for Address {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let b = &self.0;
      write!(
         f,
         "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
         b[5], b[4], b[3], b[2], b[1], b[0]
      )
   }
}

/// LE peer address type as carried in HCI.
#[repr(u8)]
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   Serialize,
   Deserialize,
   strum::FromRepr,
   strum::Display,
)]
pub enum AddressType {
   #[strum(serialize = "PUBLIC_DEVICE_ADDRESS")]
   PublicDevice = 0x00,
   #[strum(serialize = "RANDOM_DEVICE_ADDRESS")]
   RandomDevice = 0x01,
   #[strum(serialize = "PUBLIC_IDENTITY_ADDRESS")]
   PublicIdentity = 0x02,
   #[strum(serialize = "RANDOM_IDENTITY_ADDRESS")]
   RandomIdentity = 0x03,
}

impl AddressType {
   /// Converts a raw RPC value, rejecting anything that is not a defined type.
   pub fn from_raw(raw: u32) -> Option<Self> {
      u8::try_from(raw).ok().and_then(Self::from_repr)
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressWithType {
   pub address: Address,
   pub address_type: AddressType,
}

impl AddressWithType {
   pub const fn new(address: Address, address_type: AddressType) -> Self {
      Self {
         address,
         address_type,
      }
   }
}

impl fmt::Display for AddressWithType {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{}[{}]", self.address, self.address_type)
   }
}
