//! In-memory ACL manager for exercising the facade without a controller.
//!
//! Connections record every registration and unregistration so tests can
//! check the queue discipline; misuse is counted as a violation rather than
//! panicking on the handler thread.

use std::{
   collections::VecDeque,
   mem,
   sync::{
      Arc,
      atomic::{AtomicUsize, Ordering},
   },
};

use crossbeam::channel;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{
   hci::{
      acl_manager::{
         AclManager, AclQueueEnd, DequeueCallback, DisconnectCallback, EnqueueCallback,
         LeAclConnection, LeConnectionCallbacks, LeConnectionManagementCallbacks, Packet,
      },
      address::AddressWithType,
      packets::{DisconnectReason, ErrorCode},
   },
   os::Handler,
};

#[derive(Default)]
struct ManagerState {
   sink: Option<(Handler, Arc<dyn LeConnectionCallbacks>)>,
   created: Vec<AddressWithType>,
}

#[derive(Default)]
pub struct MockAclManager {
   state: Mutex<ManagerState>,
}

impl MockAclManager {
   pub fn new() -> Arc<Self> {
      Arc::new(Self::default())
   }

   pub fn created(&self) -> Vec<AddressWithType> {
      self.state.lock().created.clone()
   }

   pub fn is_registered(&self) -> bool {
      self.state.lock().sink.is_some()
   }

   fn sink(&self) -> (Handler, Arc<dyn LeConnectionCallbacks>) {
      self
         .state
         .lock()
         .sink
         .clone()
         .expect("no LE callbacks registered")
   }

   /// Reports a successful connection to `peer` and returns the stack side of it.
   pub fn connect(&self, peer: AddressWithType) -> MockConnection {
      let connection = MockConnection::default();
      let boxed: Box<dyn LeAclConnection> = Box::new(connection.clone());
      let (handler, sink) = self.sink();
      handler.post(move || sink.on_le_connect_success(peer, boxed));
      connection
   }

   pub fn fail(&self, peer: AddressWithType, reason: ErrorCode) {
      let (handler, sink) = self.sink();
      handler.post(move || sink.on_le_connect_fail(peer, reason));
   }
}

impl AclManager for MockAclManager {
   fn register_le_callbacks(&self, handler: &Handler, callbacks: Arc<dyn LeConnectionCallbacks>) {
      self.state.lock().sink = Some((handler.clone(), callbacks));
   }

   fn unregister_le_callbacks(&self) {
      self.state.lock().sink = None;
   }

   fn create_le_connection(&self, peer: AddressWithType) {
      self.state.lock().created.push(peer);
   }
}

enum EnqueueState {
   Idle,
   Registered(Handler, EnqueueCallback),
   Firing { unregistered: bool },
}

struct MockQueue {
   enqueue: Mutex<EnqueueState>,
   dequeue: Mutex<Option<(Handler, DequeueCallback)>>,
   inbound: Mutex<VecDeque<Packet>>,
   enqueue_registrations: AtomicUsize,
   enqueue_unregistrations: AtomicUsize,
   dequeue_registrations: AtomicUsize,
   dequeue_unregistrations: AtomicUsize,
   violations: AtomicUsize,
}

impl Default for MockQueue {
   fn default() -> Self {
      Self {
         enqueue: Mutex::new(EnqueueState::Idle),
         dequeue: Mutex::new(None),
         inbound: Mutex::new(VecDeque::new()),
         enqueue_registrations: AtomicUsize::new(0),
         enqueue_unregistrations: AtomicUsize::new(0),
         dequeue_registrations: AtomicUsize::new(0),
         dequeue_unregistrations: AtomicUsize::new(0),
         violations: AtomicUsize::new(0),
      }
   }
}

impl MockQueue {
   fn violation(&self) {
      self.violations.fetch_add(1, Ordering::SeqCst);
   }

   fn fire_enqueue(&self) -> Option<Packet> {
      let (handler, callback) = self.take_enqueue()?;
      Some(self.run_enqueue(handler, callback))
   }

   /// Marks the registered callback as running and hands it out.
   fn take_enqueue(&self) -> Option<(Handler, EnqueueCallback)> {
      let mut state = self.enqueue.lock();
      match mem::replace(&mut *state, EnqueueState::Firing {
         unregistered: false,
      }) {
         EnqueueState::Registered(handler, callback) => Some((handler, callback)),
         other => {
            *state = other;
            None
         },
      }
   }

   fn run_enqueue(&self, handler: Handler, mut callback: EnqueueCallback) -> Packet {
      let packet = callback();

      let mut state = self.enqueue.lock();
      if matches!(*state, EnqueueState::Firing {
         unregistered: false
      }) {
         *state = EnqueueState::Registered(handler, callback);
      } else {
         if matches!(*state, EnqueueState::Firing { unregistered: true }) {
            *state = EnqueueState::Idle;
         }
         drop(state);
         drop(callback);
      }
      packet
   }
}

impl AclQueueEnd for MockQueue {
   fn register_enqueue(&self, handler: &Handler, callback: EnqueueCallback) {
      self.enqueue_registrations.fetch_add(1, Ordering::SeqCst);
      let mut state = self.enqueue.lock();
      if matches!(
         *state,
         EnqueueState::Registered(..) | EnqueueState::Firing {
            unregistered: false
         }
      ) {
         self.violation();
      }
      let previous = mem::replace(&mut *state, EnqueueState::Registered(handler.clone(), callback));
      drop(state);
      drop(previous);
   }

   fn unregister_enqueue(&self) {
      self.enqueue_unregistrations.fetch_add(1, Ordering::SeqCst);
      let mut state = self.enqueue.lock();
      let previous = match mem::replace(&mut *state, EnqueueState::Idle) {
         EnqueueState::Registered(_, callback) => Some(callback),
         EnqueueState::Firing { .. } => {
            *state = EnqueueState::Firing { unregistered: true };
            None
         },
         EnqueueState::Idle => {
            self.violation();
            None
         },
      };
      drop(state);
      drop(previous);
   }

   fn register_dequeue(&self, handler: &Handler, callback: DequeueCallback) {
      self.dequeue_registrations.fetch_add(1, Ordering::SeqCst);
      let previous = self.dequeue.lock().replace((handler.clone(), callback));
      if previous.is_some() {
         self.violation();
      }
   }

   fn unregister_dequeue(&self) {
      self.dequeue_unregistrations.fetch_add(1, Ordering::SeqCst);
      let previous = self.dequeue.lock().take();
      if previous.is_none() {
         self.violation();
      }
   }

   fn try_dequeue(&self) -> Option<Packet> {
      self.inbound.lock().pop_front()
   }
}

/// A pull parked between taking the enqueue callback and running it.
pub struct HeldPull {
   release: channel::Sender<()>,
   packet: oneshot::Receiver<Option<Packet>>,
}

impl HeldPull {
   /// Runs the held callback and returns what it produced.
   pub async fn release(self) -> Option<Packet> {
      let _ = self.release.send(());
      self.packet.await.ok().flatten()
   }
}

#[derive(Default)]
struct ConnectionInner {
   queue: MockQueue,
   disconnect_requests: Mutex<Vec<DisconnectReason>>,
   on_disconnect: Mutex<Option<(Handler, DisconnectCallback)>>,
   management: Mutex<Option<(Handler, Arc<dyn LeConnectionManagementCallbacks>)>>,
   finished: AtomicUsize,
}

/// Stack side of a mock link. Clones share state with the connection handed
/// to the facade.
#[derive(Clone, Default)]
pub struct MockConnection(Arc<ConnectionInner>);

impl MockConnection {
   /// Lets the stack pull one outbound packet, as the controller would when
   /// it has buffer space.
   pub async fn pull(&self) -> Option<Packet> {
      let handler = match &*self.0.queue.enqueue.lock() {
         EnqueueState::Registered(handler, _) => handler.clone(),
         _ => return None,
      };
      let (tx, rx) = oneshot::channel();
      let inner = self.0.clone();
      handler.post(move || {
         let _ = tx.send(inner.queue.fire_enqueue());
      });
      rx.await.ok().flatten()
   }

   /// Starts a pull on the handler but stops right after the callback is
   /// taken for running. Blocks until that point; the handler stays busy
   /// until [`HeldPull::release`].
   pub fn hold_pull(&self) -> HeldPull {
      let handler = match &*self.0.queue.enqueue.lock() {
         EnqueueState::Registered(handler, _) => handler.clone(),
         _ => panic!("no enqueue callback registered"),
      };
      let (taken_tx, taken_rx) = channel::bounded(1);
      let (release_tx, release_rx) = channel::bounded::<()>(1);
      let (packet_tx, packet_rx) = oneshot::channel();
      let inner = self.0.clone();
      handler.post(move || {
         let taken = inner.queue.take_enqueue();
         let _ = taken_tx.send(());
         let _ = release_rx.recv();
         let packet = taken.map(|(handler, callback)| inner.queue.run_enqueue(handler, callback));
         let _ = packet_tx.send(packet);
      });
      taken_rx.recv().expect("handler gone");
      HeldPull {
         release: release_tx,
         packet: packet_rx,
      }
   }

   /// Queues an inbound segment and notifies the dequeue side.
   pub fn deliver(&self, bytes: &[u8]) {
      self
         .0
         .queue
         .inbound
         .lock()
         .push_back(Packet::from_slice(bytes));
      let Some(handler) = self.0.queue.dequeue.lock().as_ref().map(|(h, _)| h.clone()) else {
         return;
      };
      let inner = self.0.clone();
      handler.post(move || {
         if let Some((_, callback)) = inner.queue.dequeue.lock().as_mut() {
            callback();
         }
      });
   }

   /// Reports the link as gone with `code`.
   pub fn drop_link(&self, code: ErrorCode) {
      let Some((handler, callback)) = self.0.on_disconnect.lock().take() else {
         return;
      };
      handler.post(move || callback(code));
   }

   pub fn update_connection(&self, interval: u16, latency: u16, timeout: u16) {
      let Some((handler, callbacks)) = self.0.management.lock().clone() else {
         return;
      };
      handler.post(move || callbacks.on_connection_update(interval, latency, timeout));
   }

   pub fn is_enqueue_registered(&self) -> bool {
      matches!(*self.0.queue.enqueue.lock(), EnqueueState::Registered(..))
   }

   pub fn has_disconnect_callback(&self) -> bool {
      self.0.on_disconnect.lock().is_some()
   }

   pub fn disconnect_requests(&self) -> Vec<DisconnectReason> {
      self.0.disconnect_requests.lock().clone()
   }

   pub fn enqueue_registrations(&self) -> usize {
      self.0.queue.enqueue_registrations.load(Ordering::SeqCst)
   }

   pub fn enqueue_unregistrations(&self) -> usize {
      self.0.queue.enqueue_unregistrations.load(Ordering::SeqCst)
   }

   pub fn dequeue_registrations(&self) -> usize {
      self.0.queue.dequeue_registrations.load(Ordering::SeqCst)
   }

   pub fn dequeue_unregistrations(&self) -> usize {
      self.0.queue.dequeue_unregistrations.load(Ordering::SeqCst)
   }

   pub fn finished(&self) -> usize {
      self.0.finished.load(Ordering::SeqCst)
   }

   pub fn violations(&self) -> usize {
      self.0.queue.violations.load(Ordering::SeqCst)
   }
}

impl LeAclConnection for MockConnection {
   fn acl_queue_end(&self) -> &dyn AclQueueEnd {
      &self.0.queue
   }

   fn disconnect(&self, reason: DisconnectReason) {
      self.0.disconnect_requests.lock().push(reason);
      self.drop_link(reason.into());
   }

   fn register_disconnect_callback(&self, handler: &Handler, callback: DisconnectCallback) {
      *self.0.on_disconnect.lock() = Some((handler.clone(), callback));
   }

   fn register_callbacks(
      &self,
      handler: &Handler,
      callbacks: Arc<dyn LeConnectionManagementCallbacks>,
   ) {
      *self.0.management.lock() = Some((handler.clone(), callbacks));
   }

   fn finish(&self) {
      self.0.finished.fetch_add(1, Ordering::SeqCst);
   }
}
