//! HCI-level types the facade speaks: addresses, the packets it reports,
//! and the ACL manager interface it drives.

pub mod acl_manager;
pub mod address;
pub mod packets;

#[cfg(test)]
pub(crate) mod mock;
