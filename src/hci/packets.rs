//! HCI packet definitions emitted by the facade.
//!
//! Only the two packets the facade reports back to the harness are built
//! here: the LE Connection Complete event and the Disconnect command. Both
//! serialize little-endian with the connection handle packed into 12 bits.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hci::address::{Address, AddressType, AddressWithType};

/// HCI event code for LE Meta events.
pub const EVT_LE_META: u8 = 0x3E;
/// LE Meta subevent code for Connection Complete.
pub const SUBEVT_LE_CONNECTION_COMPLETE: u8 = 0x01;
/// Opcode of the Disconnect command (OGF 0x01, OCF 0x0006).
pub const OP_DISCONNECT: u16 = 0x0406;

const HANDLE_MASK: u16 = 0x0FFF;

const KNOWN_ERROR_CODES: &[(u8, &str)] = &[
   (ErrorCode::SUCCESS.code(), "SUCCESS"),
   (ErrorCode::UNKNOWN_HCI_COMMAND.code(), "UNKNOWN_HCI_COMMAND"),
   (ErrorCode::UNKNOWN_CONNECTION.code(), "UNKNOWN_CONNECTION"),
   (ErrorCode::HARDWARE_FAILURE.code(), "HARDWARE_FAILURE"),
   (ErrorCode::PAGE_TIMEOUT.code(), "PAGE_TIMEOUT"),
   (ErrorCode::AUTHENTICATION_FAILURE.code(), "AUTHENTICATION_FAILURE"),
   (ErrorCode::PIN_OR_KEY_MISSING.code(), "PIN_OR_KEY_MISSING"),
   (ErrorCode::MEMORY_CAPACITY_EXCEEDED.code(), "MEMORY_CAPACITY_EXCEEDED"),
   (ErrorCode::CONNECTION_TIMEOUT.code(), "CONNECTION_TIMEOUT"),
   (ErrorCode::CONNECTION_LIMIT_EXCEEDED.code(), "CONNECTION_LIMIT_EXCEEDED"),
   (
      ErrorCode::CONNECTION_REJECTED_LIMITED_RESOURCES.code(),
      "CONNECTION_REJECTED_LIMITED_RESOURCES",
   ),
   (
      ErrorCode::REMOTE_USER_TERMINATED_CONNECTION.code(),
      "REMOTE_USER_TERMINATED_CONNECTION",
   ),
   (
      ErrorCode::REMOTE_DEVICE_TERMINATED_CONNECTION_LOW_RESOURCES.code(),
      "REMOTE_DEVICE_TERMINATED_CONNECTION_LOW_RESOURCES",
   ),
   (
      ErrorCode::REMOTE_DEVICE_TERMINATED_CONNECTION_POWER_OFF.code(),
      "REMOTE_DEVICE_TERMINATED_CONNECTION_POWER_OFF",
   ),
   (
      ErrorCode::CONNECTION_TERMINATED_BY_LOCAL_HOST.code(),
      "CONNECTION_TERMINATED_BY_LOCAL_HOST",
   ),
   (
      ErrorCode::UNSUPPORTED_REMOTE_FEATURE.code(),
      "UNSUPPORTED_REMOTE_FEATURE",
   ),
   (
      ErrorCode::UNACCEPTABLE_CONNECTION_PARAMETERS.code(),
      "UNACCEPTABLE_CONNECTION_PARAMETERS",
   ),
   (
      ErrorCode::CONNECTION_FAILED_ESTABLISHMENT.code(),
      "CONNECTION_FAILED_ESTABLISHMENT",
   ),
];

/// HCI status / error code. Unknown values are carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ErrorCode(u8);

impl ErrorCode {
   pub const SUCCESS: Self = Self(0x00);
   pub const UNKNOWN_HCI_COMMAND: Self = Self(0x01);
   pub const UNKNOWN_CONNECTION: Self = Self(0x02);
   pub const HARDWARE_FAILURE: Self = Self(0x03);
   pub const PAGE_TIMEOUT: Self = Self(0x04);
   pub const AUTHENTICATION_FAILURE: Self = Self(0x05);
   pub const PIN_OR_KEY_MISSING: Self = Self(0x06);
   pub const MEMORY_CAPACITY_EXCEEDED: Self = Self(0x07);
   pub const CONNECTION_TIMEOUT: Self = Self(0x08);
   pub const CONNECTION_LIMIT_EXCEEDED: Self = Self(0x09);
   pub const CONNECTION_REJECTED_LIMITED_RESOURCES: Self = Self(0x0D);
   pub const REMOTE_USER_TERMINATED_CONNECTION: Self = Self(0x13);
   pub const REMOTE_DEVICE_TERMINATED_CONNECTION_LOW_RESOURCES: Self = Self(0x14);
   pub const REMOTE_DEVICE_TERMINATED_CONNECTION_POWER_OFF: Self = Self(0x15);
   pub const CONNECTION_TERMINATED_BY_LOCAL_HOST: Self = Self(0x16);
   pub const UNSUPPORTED_REMOTE_FEATURE: Self = Self(0x1A);
   pub const UNACCEPTABLE_CONNECTION_PARAMETERS: Self = Self(0x3B);
   pub const CONNECTION_FAILED_ESTABLISHMENT: Self = Self(0x3E);

   pub const fn from_code(code: u8) -> Self {
      Self(code)
   }

   pub const fn code(self) -> u8 {
      self.0
   }

   pub fn try_to_str(self) -> Option<&'static str> {
      KNOWN_ERROR_CODES
         .iter()
         .find(|(code, _)| *code == self.0)
         .map(|(_, name)| *name)
   }
}

impl fmt::Display for ErrorCode {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self.try_to_str() {
         Some(name) => f.write_str(name),
         None => write!(f, "0x{:02x}", self.0),
      }
   }
}

/// Reason carried by the Disconnect command. Shares the error code space,
/// so any [`ErrorCode`] converts losslessly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DisconnectReason(u8);

impl DisconnectReason {
   pub const REMOTE_USER_TERMINATED_CONNECTION: Self = Self(0x13);
   pub const REMOTE_DEVICE_TERMINATED_CONNECTION_LOW_RESOURCES: Self = Self(0x14);

   pub const fn code(self) -> u8 {
      self.0
   }
}

impl From<ErrorCode> for DisconnectReason {
   fn from(code: ErrorCode) -> Self {
      Self(code.code())
   }
}

impl From<DisconnectReason> for ErrorCode {
   fn from(reason: DisconnectReason) -> Self {
      Self(reason.0)
   }
}

impl fmt::Display for DisconnectReason {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      fmt::Display::fmt(&ErrorCode::from(*self), f)
   }
}

/// The facade always reports itself as central.
#[repr(u8)]
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::FromRepr, strum::Display,
)]
pub enum Role {
   Central = 0x00,
}

/// Sleep clock accuracy of the central.
#[repr(u8)]
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::FromRepr, strum::Display,
)]
pub enum ClockAccuracy {
   Ppm500 = 0x00,
   Ppm250 = 0x01,
   Ppm150 = 0x02,
   Ppm100 = 0x03,
   Ppm75 = 0x04,
   Ppm50 = 0x05,
   Ppm30 = 0x06,
   Ppm20 = 0x07,
}

/// Anything that serializes to HCI bytes.
pub trait PacketBuilder {
   fn size(&self) -> usize;

   fn serialize(&self, out: &mut Vec<u8>);

   fn to_bytes(&self) -> Vec<u8> {
      let mut out = Vec::with_capacity(self.size());
      self.serialize(&mut out);
      out
   }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
   out.extend_from_slice(&value.to_le_bytes());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeConnectionCompleteBuilder {
   pub status: ErrorCode,
   pub connection_handle: u16,
   pub role: Role,
   pub peer_address_type: AddressType,
   pub peer_address: Address,
   pub connection_interval: u16,
   pub peripheral_latency: u16,
   pub supervision_timeout: u16,
   pub central_clock_accuracy: ClockAccuracy,
}

impl LeConnectionCompleteBuilder {
   const PARAMS_LEN: u8 = 19;

   /// Completion reported for an established link. The timing fields are
   /// fixed placeholders the harness keys on.
   pub const fn success(connection_handle: u16, peer: &AddressWithType) -> Self {
      Self {
         status: ErrorCode::SUCCESS,
         connection_handle,
         role: Role::Central,
         peer_address_type: peer.address_type,
         peer_address: peer.address,
         connection_interval: 1,
         peripheral_latency: 2,
         supervision_timeout: 3,
         central_clock_accuracy: ClockAccuracy::Ppm20,
      }
   }

   pub const fn failure(status: ErrorCode, peer: &AddressWithType) -> Self {
      Self {
         status,
         connection_handle: 0,
         role: Role::Central,
         peer_address_type: peer.address_type,
         peer_address: peer.address,
         connection_interval: 0,
         peripheral_latency: 0,
         supervision_timeout: 0,
         central_clock_accuracy: ClockAccuracy::Ppm20,
      }
   }
}

impl PacketBuilder for LeConnectionCompleteBuilder {
   fn size(&self) -> usize {
      2 + Self::PARAMS_LEN as usize
   }

   fn serialize(&self, out: &mut Vec<u8>) {
      out.push(EVT_LE_META);
      out.push(Self::PARAMS_LEN);
      out.push(SUBEVT_LE_CONNECTION_COMPLETE);
      out.push(self.status.code());
      put_u16(out, self.connection_handle & HANDLE_MASK);
      out.push(self.role as u8);
      out.push(self.peer_address_type as u8);
      out.extend_from_slice(self.peer_address.bytes());
      put_u16(out, self.connection_interval);
      put_u16(out, self.peripheral_latency);
      put_u16(out, self.supervision_timeout);
      out.push(self.central_clock_accuracy as u8);
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectBuilder {
   pub connection_handle: u16,
   pub reason: DisconnectReason,
}

impl DisconnectBuilder {
   const PARAMS_LEN: u8 = 3;

   pub const fn new(connection_handle: u16, reason: DisconnectReason) -> Self {
      Self {
         connection_handle,
         reason,
      }
   }
}

impl PacketBuilder for DisconnectBuilder {
   fn size(&self) -> usize {
      3 + Self::PARAMS_LEN as usize
   }

   fn serialize(&self, out: &mut Vec<u8>) {
      put_u16(out, OP_DISCONNECT);
      out.push(Self::PARAMS_LEN);
      put_u16(out, self.connection_handle & HANDLE_MASK);
      out.push(self.reason.code());
   }
}
