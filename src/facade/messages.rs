//! RPC message shapes exchanged with the remote harness.

use serde::{Deserialize, Serialize};

use crate::{
   error::{FacadeError, Result},
   hci::{
      address::{Address, AddressType, AddressWithType},
      packets::PacketBuilder,
   },
};

/// Target of `CreateConnection`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeConnectionMsg {
   pub address: String,
   pub address_type: u32,
}

impl LeConnectionMsg {
   pub fn new(address: impl Into<String>, address_type: AddressType) -> Self {
      Self {
         address: address.into(),
         address_type: address_type as u32,
      }
   }

   /// Validates the request into a peer address.
   pub fn peer(&self) -> Result<AddressWithType> {
      let address: Address = self.address.parse()?;
      let address_type = AddressType::from_raw(self.address_type)
         .ok_or(FacadeError::InvalidAddressType(self.address_type))?;
      Ok(AddressWithType::new(address, address_type))
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeHandleMsg {
   pub handle: u16,
}

/// One serialized HCI packet on a connection stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeConnectionEvent {
   pub event: Vec<u8>,
}

impl LeConnectionEvent {
   pub fn from_builder(builder: &impl PacketBuilder) -> Self {
      Self {
         event: builder.to_bytes(),
      }
   }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeAclData {
   pub handle: u16,
   pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_peer_parsing() {
      let peer = LeConnectionMsg::new("11:22:33:44:55:66", AddressType::RandomDevice)
         .peer()
         .unwrap();
      assert_eq!(peer.address.to_string(), "11:22:33:44:55:66");
      assert_eq!(peer.address_type, AddressType::RandomDevice);
   }

   #[test]
   fn test_peer_rejects_bad_input() {
      let bad_address = LeConnectionMsg::new("not-an-address", AddressType::PublicDevice);
      assert!(matches!(
         bad_address.peer(),
         Err(FacadeError::InvalidAddress(_))
      ));

      let bad_type = LeConnectionMsg {
         address: "11:22:33:44:55:66".into(),
         address_type: 7,
      };
      assert!(matches!(
         bad_type.peer(),
         Err(FacadeError::InvalidAddressType(7))
      ));
   }
}
