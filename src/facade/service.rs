//! The LE ACL manager facade service.
//!
//! RPC bodies run on the caller's tasks; every stack callback runs on the
//! facade's [`Handler`]. The two sides meet in the connection table, the
//! request ledger and the event streams, none of which is locked across an
//! `.await` or across a call back into the stack that may post work.

use std::{
   sync::{
      Arc, Weak,
      atomic::{AtomicBool, Ordering},
   },
   time::Duration,
};

use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use tokio::{sync::oneshot, time};

use crate::{
   config::Config,
   error::{FacadeError, Result},
   facade::{
      connections::{ConnectionEntry, ConnectionTable, disarm_enqueue, to_handle},
      event_stream::{EventStream, ServerContext, ServerWriter},
      ledger::RequestLedger,
      messages::{LeAclData, LeConnectionEvent, LeConnectionMsg, LeHandleMsg},
   },
   hci::{
      acl_manager::{
         AclManager, LeAclConnection, LeConnectionCallbacks, LeConnectionManagementCallbacks,
         Packet,
      },
      address::AddressWithType,
      packets::{DisconnectBuilder, DisconnectReason, ErrorCode, LeConnectionCompleteBuilder},
   },
   os::Handler,
};

struct FacadeInner {
   acl_manager: Arc<dyn AclManager>,
   handler: Handler,
   send_timeout: Duration,
   connections: Mutex<ConnectionTable>,
   ledger: Mutex<RequestLedger>,
   pending_acl_data: Arc<EventStream<LeAclData>>,
   stopped: AtomicBool,
}

/// Remote-control surface over an LE ACL manager.
///
/// This type is cheaply cloneable; clones share one set of connections and
/// streams. Dropping the last clone tears the service down.
#[derive(Clone)]
pub struct LeAclManagerFacadeService(Arc<FacadeInner>);

impl LeAclManagerFacadeService {
   /// Creates the service and registers it as the manager's LE callback sink.
   pub fn new(acl_manager: Arc<dyn AclManager>, handler: Handler, config: &Config) -> Self {
      let inner = Arc::new(FacadeInner {
         acl_manager,
         handler,
         send_timeout: config.send_acl_timeout(),
         connections: Mutex::new(ConnectionTable::new()),
         ledger: Mutex::new(RequestLedger::new(config.event_queue_capacity)),
         pending_acl_data: Arc::new(EventStream::new(
            "FetchAclData",
            config.event_queue_capacity,
         )),
         stopped: AtomicBool::new(false),
      });
      inner
         .acl_manager
         .register_le_callbacks(&inner.handler, Arc::new(CallbackSink(Arc::downgrade(&inner))));
      Self(inner)
   }

   /// Starts an outbound connection and streams its lifecycle events until
   /// the client cancels.
   pub async fn create_connection<W>(
      &self,
      context: &ServerContext,
      request: &LeConnectionMsg,
      writer: &mut W,
   ) -> Result<()>
   where
      W: ServerWriter<LeConnectionEvent>,
   {
      self.0.ensure_running()?;
      let peer = request.peer()?;
      let (index, stream) = self.0.ledger.lock().allocate("connection attempt")?;
      info!("Connecting to {peer} (request {index})");
      self.0.acl_manager.create_le_connection(peer);
      self.drive_slot(index, &stream, context, writer).await
   }

   /// Streams the lifecycle of whichever connection the stack reports next.
   pub async fn fetch_incoming_connection<W>(
      &self,
      context: &ServerContext,
      writer: &mut W,
   ) -> Result<()>
   where
      W: ServerWriter<LeConnectionEvent>,
   {
      self.0.ensure_running()?;
      let (index, stream) = self.0.ledger.lock().allocate("incoming connection")?;
      info!("Waiting for incoming connection (request {index})");
      self.drive_slot(index, &stream, context, writer).await
   }

   async fn drive_slot<W>(
      &self,
      index: u32,
      stream: &EventStream<LeConnectionEvent>,
      context: &ServerContext,
      writer: &mut W,
   ) -> Result<()>
   where
      W: ServerWriter<LeConnectionEvent>,
   {
      let _release = SlotRelease {
         inner: &self.0,
         index,
      };
      stream.run_loop(context, writer).await
   }

   /// Asks the stack to terminate `handle`. The disconnect event arrives on
   /// the stream of the request that created the link.
   pub async fn disconnect(&self, request: &LeHandleMsg) -> Result<()> {
      self.0.ensure_running()?;
      let entry = self.0.lookup(request.handle)?;
      info!("Disconnecting {:#06x}", request.handle);
      entry
         .connection
         .disconnect(DisconnectReason::REMOTE_USER_TERMINATED_CONNECTION);
      Ok(())
   }

   /// Hands `payload` to the connection's outbound queue and returns once the
   /// stack has pulled it.
   pub async fn send_acl_data(&self, request: LeAclData) -> Result<()> {
      self.0.ensure_running()?;
      let LeAclData { handle, payload } = request;
      let entry = self.0.lookup(handle)?;

      // Released by the enqueue callback, or when the stack drops it.
      let turn = entry.send_gate.clone().lock_owned().await;
      let armed = entry.enqueue_armed();
      let (done_tx, mut done_rx) = oneshot::channel();
      {
         let connections = self.0.connections.lock();
         if connections
            .get(handle)
            .is_none_or(|live| live.slot != entry.slot)
         {
            return Err(FacadeError::UnknownHandle(handle));
         }

         trace!("→ {handle:#06x}: {}", hex::encode(&payload));
         armed.store(true, Ordering::Release);
         let connection = entry.connection.clone();
         let callback_armed = armed.clone();
         let mut pending = Some((payload, done_tx, turn));
         entry.connection.acl_queue_end().register_enqueue(
            &self.0.handler,
            Box::new(move || {
               let _ = disarm_enqueue(&*connection, &callback_armed);
               let Some((payload, done_tx, turn)) = pending.take() else {
                  return Packet::new();
               };
               let packet = Packet::from_vec(payload);
               let _ = done_tx.send(());
               drop(turn);
               packet
            }),
         );
      }

      match time::timeout(self.0.send_timeout, &mut done_rx).await {
         Ok(Ok(())) => {
            debug!("Packet for {handle:#06x} pulled by the stack");
            Ok(())
         },
         Ok(Err(_)) => Err(FacadeError::ConnectionClosed(handle)),
         Err(_) => {
            // Unregistering drops the callback unless the stack is running it,
            // in which case it completes first. Either way `done_rx` settles.
            let withdrawn = disarm_enqueue(&*entry.connection, &armed);
            match done_rx.await {
               Ok(()) => {
                  debug!("Packet for {handle:#06x} pulled at the deadline");
                  Ok(())
               },
               Err(_) if withdrawn => {
                  warn!("Send on {handle:#06x} not pulled in {:?}", self.0.send_timeout);
                  Err(FacadeError::RequestTimeout(handle))
               },
               Err(_) => Err(FacadeError::ConnectionClosed(handle)),
            }
         },
      }
   }

   /// Streams inbound ACL data from every connection until the client cancels.
   pub async fn fetch_acl_data<W>(&self, context: &ServerContext, writer: &mut W) -> Result<()>
   where
      W: ServerWriter<LeAclData>,
   {
      self.0.ensure_running()?;
      self.0.pending_acl_data.run_loop(context, writer).await
   }

   /// Handles of the links currently up, ascending.
   pub fn connection_handles(&self) -> Vec<u16> {
      self.0.connections.lock().handles()
   }

   /// Number of connect outcomes observed so far.
   pub fn request_counter(&self) -> u32 {
      self.0.ledger.lock().current()
   }

   pub fn has_outstanding_request(&self) -> bool {
      self.0.ledger.lock().is_outstanding()
   }

   /// Request slots not yet retired.
   pub fn request_slots(&self) -> usize {
      self.0.ledger.lock().len()
   }

   /// Detaches from the stack and ends every stream. Idempotent.
   pub fn shutdown(&self) {
      self.0.shutdown();
   }
}

struct SlotRelease<'a> {
   inner: &'a FacadeInner,
   index: u32,
}

impl Drop for SlotRelease<'_> {
   fn drop(&mut self) {
      self.inner.ledger.lock().release(self.index);
   }
}

impl FacadeInner {
   fn is_stopped(&self) -> bool {
      self.stopped.load(Ordering::Acquire)
   }

   fn ensure_running(&self) -> Result<()> {
      if self.is_stopped() {
         Err(FacadeError::ServiceStopped)
      } else {
         Ok(())
      }
   }

   fn lookup(&self, handle: u16) -> Result<ConnectionEntry> {
      self.connections.lock().get(handle).cloned().ok_or_else(|| {
         warn!("Invalid handle {handle:#06x}");
         FacadeError::UnknownHandle(handle)
      })
   }

   fn on_le_connect_success(
      self: &Arc<Self>,
      peer: AddressWithType,
      connection: Arc<dyn LeAclConnection>,
   ) {
      debug!("LE connection to {peer} complete");
      let index = self.ledger.lock().claim_current();

      let handle = {
         let mut connections = self.connections.lock();
         let Some(handle) = connections.allocate_handle(index) else {
            drop(connections);
            error!("No free connection handle for {peer}, rejecting");
            let rejected_link = connection.clone();
            connection.register_disconnect_callback(
               &self.handler,
               Box::new(move |code| {
                  debug!("Rejected link to {peer} down: {code}");
                  rejected_link.finish();
               }),
            );
            connection.disconnect(DisconnectReason::REMOTE_DEVICE_TERMINATED_CONNECTION_LOW_RESOURCES);
            let rejected = LeConnectionCompleteBuilder::failure(
               ErrorCode::CONNECTION_REJECTED_LIMITED_RESOURCES,
               &peer,
            );
            self
               .ledger
               .lock()
               .resolve(index, LeConnectionEvent::from_builder(&rejected), true);
            return;
         };
         if handle != to_handle(index) {
            warn!(
               "Handle {:#06x} still in use, assigning {handle:#06x} to {peer}",
               to_handle(index)
            );
         }

         let data = self.pending_acl_data.clone();
         let dequeue_connection = connection.clone();
         connection.acl_queue_end().register_dequeue(
            &self.handler,
            Box::new(move || on_incoming_acl(&*dequeue_connection, handle, &data)),
         );

         let sink = Arc::downgrade(self);
         let disconnected = connection.clone();
         connection.register_disconnect_callback(
            &self.handler,
            Box::new(move |code| match sink.upgrade() {
               Some(inner) => inner.on_disconnect(&disconnected, index, handle, code),
               None => debug!("Facade gone, ignoring disconnect of {handle:#06x}"),
            }),
         );
         connection.register_callbacks(&self.handler, Arc::new(CallbackSink(Arc::downgrade(self))));

         connections.insert(handle, ConnectionEntry::new(connection, index));
         handle
      };

      let established = LeConnectionCompleteBuilder::success(handle, &peer);
      self
         .ledger
         .lock()
         .resolve(index, LeConnectionEvent::from_builder(&established), false);
      info!("Connection {handle:#06x} to {peer} established (request {index})");
   }

   fn on_le_connect_fail(&self, peer: AddressWithType, reason: ErrorCode) {
      warn!("LE connection to {peer} failed: {reason}");
      let failed = LeConnectionCompleteBuilder::failure(reason, &peer);
      let mut ledger = self.ledger.lock();
      let index = ledger.claim_current();
      ledger.resolve(index, LeConnectionEvent::from_builder(&failed), true);
   }

   fn on_disconnect(
      &self,
      connection: &Arc<dyn LeAclConnection>,
      index: u32,
      handle: u16,
      code: ErrorCode,
   ) {
      if self.is_stopped() {
         debug!("Facade stopped, ignoring disconnect of {handle:#06x}");
         return;
      }
      info!("Connection {handle:#06x} disconnected: {code}");

      let entry = self.connections.lock().remove(handle, index);
      match entry {
         Some(entry) => entry.release_queues(),
         None => warn!("Disconnected {handle:#06x} was not in the connection table"),
      }
      connection.finish();

      let disconnection = DisconnectBuilder::new(handle, code.into());
      self
         .ledger
         .lock()
         .publish(index, LeConnectionEvent::from_builder(&disconnection), true);
   }

   fn shutdown(&self) {
      if self.stopped.swap(true, Ordering::AcqRel) {
         return;
      }
      self.acl_manager.unregister_le_callbacks();
      {
         let mut connections = self.connections.lock();
         for (handle, entry) in connections.drain() {
            debug!("Releasing queues of {handle:#06x}");
            entry.release_queues();
         }
      }
      self.ledger.lock().close_all();
      self.pending_acl_data.close();
      info!("LE ACL facade stopped");
   }
}

impl Drop for FacadeInner {
   fn drop(&mut self) {
      self.shutdown();
   }
}

fn on_incoming_acl(connection: &dyn LeAclConnection, handle: u16, data: &EventStream<LeAclData>) {
   let Some(packet) = connection.acl_queue_end().try_dequeue() else {
      warn!("Dequeue ready on {handle:#06x} but nothing queued");
      return;
   };
   trace!("← {handle:#06x}: {}", hex::encode(&packet));
   data.on_incoming_event(LeAclData {
      handle,
      payload: packet.to_vec(),
   });
}

/// What the stack holds on to. Weak so that registering with the manager
/// does not keep the service alive.
struct CallbackSink(Weak<FacadeInner>);

impl CallbackSink {
   fn live(&self) -> Option<Arc<FacadeInner>> {
      self.0.upgrade().filter(|inner| !inner.is_stopped())
   }
}

impl LeConnectionCallbacks for CallbackSink {
   fn on_le_connect_success(&self, peer: AddressWithType, connection: Box<dyn LeAclConnection>) {
      match self.live() {
         Some(inner) => inner.on_le_connect_success(peer, Arc::from(connection)),
         None => warn!("Facade stopped, dropping connection to {peer}"),
      }
   }

   fn on_le_connect_fail(&self, peer: AddressWithType, reason: ErrorCode) {
      match self.live() {
         Some(inner) => inner.on_le_connect_fail(peer, reason),
         None => debug!("Facade stopped, ignoring failed connection to {peer}"),
      }
   }
}

impl LeConnectionManagementCallbacks for CallbackSink {
   fn on_connection_update(
      &self,
      connection_interval: u16,
      connection_latency: u16,
      supervision_timeout: u16,
   ) {
      debug!(
         "interval: {connection_interval:#x}, latency: {connection_latency:#x}, timeout: {supervision_timeout:#x}"
      );
   }

   fn on_data_length_change(&self, tx_octets: u16, tx_time: u16, rx_octets: u16, rx_time: u16) {
      debug!("tx: {tx_octets} octets / {tx_time} us, rx: {rx_octets} octets / {rx_time} us");
   }

   fn on_phy_update(&self, tx_phy: u8, rx_phy: u8) {
      debug!("tx phy: {tx_phy}, rx phy: {rx_phy}");
   }
}
