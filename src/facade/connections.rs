//! Live connections keyed by the handle the harness sees.

use std::{
   collections::HashMap,
   sync::{
      Arc,
      atomic::{AtomicBool, Ordering},
   },
};

use crate::hci::acl_manager::LeAclConnection;

/// First handle handed out.
pub const HANDLE_BASE: u32 = 0x10;
/// Handles wrap before this value.
pub const HANDLE_MODULUS: u32 = 0xE00;

/// Handle derived from a request index.
pub const fn to_handle(index: u32) -> u16 {
   ((index.wrapping_add(HANDLE_BASE)) % HANDLE_MODULUS) as u16
}

/// One established link.
#[derive(Clone)]
pub struct ConnectionEntry {
   pub connection: Arc<dyn LeAclConnection>,
   /// Ledger slot whose stream reports this link's lifecycle.
   pub slot: u32,
   /// Held by the registered enqueue callback, so at most one send is in flight.
   pub send_gate: Arc<tokio::sync::Mutex<()>>,
   enqueue_armed: Arc<AtomicBool>,
}

impl ConnectionEntry {
   pub fn new(connection: Arc<dyn LeAclConnection>, slot: u32) -> Self {
      Self {
         connection,
         slot,
         send_gate: Arc::new(tokio::sync::Mutex::new(())),
         enqueue_armed: Arc::new(AtomicBool::new(false)),
      }
   }

   /// Flag set while an enqueue callback is registered. Whoever clears it
   /// owns the matching `unregister_enqueue`.
   pub fn enqueue_armed(&self) -> Arc<AtomicBool> {
      self.enqueue_armed.clone()
   }

   /// Unregisters a still-armed enqueue callback. Dropping it wakes any
   /// waiting sender.
   pub fn disarm_enqueue(&self) {
      let _ = disarm_enqueue(&*self.connection, &self.enqueue_armed);
   }

   /// Detaches every queue callback the facade registered on this link.
   pub fn release_queues(&self) {
      self.connection.acl_queue_end().unregister_dequeue();
      self.disarm_enqueue();
   }
}

/// Returns `false` if someone else already disarmed it.
pub fn disarm_enqueue(connection: &dyn LeAclConnection, armed: &AtomicBool) -> bool {
   let was_armed = armed.swap(false, Ordering::AcqRel);
   if was_armed {
      connection.acl_queue_end().unregister_enqueue();
   }
   was_armed
}

#[derive(Default)]
pub struct ConnectionTable {
   entries: HashMap<u16, ConnectionEntry>,
}

impl ConnectionTable {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn len(&self) -> usize {
      self.entries.len()
   }

   pub fn is_empty(&self) -> bool {
      self.entries.is_empty()
   }

   pub fn contains(&self, handle: u16) -> bool {
      self.entries.contains_key(&handle)
   }

   pub fn get(&self, handle: u16) -> Option<&ConnectionEntry> {
      self.entries.get(&handle)
   }

   /// Picks the handle for request `index`: `to_handle(index)` unless a live
   /// link still holds it, in which case the next free handle after it.
   /// `None` when every handle is taken.
   pub fn allocate_handle(&self, index: u32) -> Option<u16> {
      (0..HANDLE_MODULUS)
         .map(|probe| to_handle(index.wrapping_add(probe)))
         .find(|handle| !self.entries.contains_key(handle))
   }

   pub fn insert(&mut self, handle: u16, entry: ConnectionEntry) {
      self.entries.insert(handle, entry);
   }

   /// Removes `handle` if it still belongs to `slot`.
   pub fn remove(&mut self, handle: u16, slot: u32) -> Option<ConnectionEntry> {
      match self.entries.get(&handle) {
         Some(entry) if entry.slot == slot => self.entries.remove(&handle),
         _ => None,
      }
   }

   pub fn handles(&self) -> Vec<u16> {
      let mut handles: Vec<_> = self.entries.keys().copied().collect();
      handles.sort_unstable();
      handles
   }

   pub fn drain(&mut self) -> impl Iterator<Item = (u16, ConnectionEntry)> + '_ {
      self.entries.drain()
   }
}
