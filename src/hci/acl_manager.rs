//! Interface to the stack's LE ACL manager.
//!
//! The manager itself lives outside this crate. These traits describe what
//! the facade needs from it: starting connections, delivering connection
//! callbacks, and per-connection ACL queues. Every registration takes the
//! [`Handler`] the callback must be run on.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::{
   hci::{
      address::AddressWithType,
      packets::{DisconnectReason, ErrorCode},
   },
   os::Handler,
};

/// One ACL segment as exchanged with the connection queue.
pub type Packet = SmallVec<[u8; 32]>;

/// Called when the stack is ready to take one outbound packet.
pub type EnqueueCallback = Box<dyn FnMut() -> Packet + Send>;
/// Called when an inbound packet can be taken with [`AclQueueEnd::try_dequeue`].
pub type DequeueCallback = Box<dyn FnMut() + Send>;
/// Called once when the link goes down.
pub type DisconnectCallback = Box<dyn FnOnce(ErrorCode) + Send>;

/// The host side of a connection's bidirectional ACL queue.
///
/// Unregistering drops the stored callback, or, if the callback is running at
/// that moment, drops it as soon as it returns.
pub trait AclQueueEnd: Send + Sync {
   fn register_enqueue(&self, handler: &Handler, callback: EnqueueCallback);

   fn unregister_enqueue(&self);

   fn register_dequeue(&self, handler: &Handler, callback: DequeueCallback);

   fn unregister_dequeue(&self);

   fn try_dequeue(&self) -> Option<Packet>;
}

/// An established LE ACL link handed over by the manager.
pub trait LeAclConnection: Send + Sync {
   fn acl_queue_end(&self) -> &dyn AclQueueEnd;

   /// Requests link termination. Completion arrives through the disconnect
   /// callback.
   fn disconnect(&self, reason: DisconnectReason);

   fn register_disconnect_callback(&self, handler: &Handler, callback: DisconnectCallback);

   fn register_callbacks(
      &self,
      handler: &Handler,
      callbacks: Arc<dyn LeConnectionManagementCallbacks>,
   );

   /// Releases the manager's reference to the connection after a disconnect.
   fn finish(&self);
}

/// Outcome of connection attempts, delivered on the registered handler.
pub trait LeConnectionCallbacks: Send + Sync {
   fn on_le_connect_success(&self, peer: AddressWithType, connection: Box<dyn LeAclConnection>);

   fn on_le_connect_fail(&self, peer: AddressWithType, reason: ErrorCode);
}

/// Link-level notifications for an established connection.
pub trait LeConnectionManagementCallbacks: Send + Sync {
   fn on_connection_update(
      &self,
      connection_interval: u16,
      connection_latency: u16,
      supervision_timeout: u16,
   );

   fn on_data_length_change(
      &self,
      _tx_octets: u16,
      _tx_time: u16,
      _rx_octets: u16,
      _rx_time: u16,
   ) {
   }

   fn on_phy_update(&self, _tx_phy: u8, _rx_phy: u8) {}
}

pub trait AclManager: Send + Sync {
   fn register_le_callbacks(&self, handler: &Handler, callbacks: Arc<dyn LeConnectionCallbacks>);

   /// Stops delivering LE connection callbacks. Callbacks already posted to
   /// the handler may still run.
   fn unregister_le_callbacks(&self);

   fn create_le_connection(&self, peer: AddressWithType);
}
