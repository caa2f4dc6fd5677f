//! Per-attempt connection event streams.
//!
//! Every `CreateConnection` / `FetchIncomingConnection` call owns one slot.
//! The request counter names the slot the next connect outcome belongs to
//! and only advances once that outcome is published, which is what limits
//! the facade to one unresolved attempt at a time.

use std::{collections::BTreeMap, sync::Arc};

use log::debug;
use smol_str::format_smolstr;

use crate::{
   error::{FacadeError, Result},
   facade::{event_stream::EventStream, messages::LeConnectionEvent},
};

struct Slot {
   stream: Arc<EventStream<LeConnectionEvent>>,
   /// An RPC is (or may still be) draining the stream.
   driven: bool,
   /// Nothing more will be published: connect failure or disconnect.
   terminal: bool,
}

pub struct RequestLedger {
   slots: BTreeMap<u32, Slot>,
   allocated: u32,
   current: u32,
   capacity: usize,
}

impl RequestLedger {
   pub fn new(capacity: usize) -> Self {
      Self {
         slots: BTreeMap::new(),
         allocated: 0,
         current: 0,
         capacity,
      }
   }

   /// Index of the attempt the next outcome resolves.
   pub const fn current(&self) -> u32 {
      self.current
   }

   /// Whether a slot exists that has not seen its connect outcome yet.
   pub const fn is_outstanding(&self) -> bool {
      self.allocated != self.current
   }

   /// Slots not yet retired.
   pub fn len(&self) -> usize {
      self.slots.len()
   }

   pub fn is_empty(&self) -> bool {
      self.slots.is_empty()
   }

   /// Opens a slot for an RPC driver, failing while another is unresolved.
   pub fn allocate(&mut self, kind: &str) -> Result<(u32, Arc<EventStream<LeConnectionEvent>>)> {
      if self.is_outstanding() {
         return Err(FacadeError::OutstandingRequest);
      }
      let index = self.allocated;
      let stream = self.open(index, kind, true);
      Ok((index, stream))
   }

   /// Returns the slot the next outcome belongs to, opening a driverless one
   /// if the stack reports a connection nobody asked for.
   pub fn claim_current(&mut self) -> u32 {
      if !self.is_outstanding() {
         debug!("No request outstanding, opening slot {}", self.current);
         self.open(self.current, "unsolicited connection", false);
      }
      self.current
   }

   fn open(&mut self, index: u32, kind: &str, driven: bool) -> Arc<EventStream<LeConnectionEvent>> {
      let stream = Arc::new(EventStream::new(
         format_smolstr!("{kind} {index}"),
         self.capacity,
      ));
      self.slots.insert(index, Slot {
         stream: stream.clone(),
         driven,
         terminal: false,
      });
      self.allocated = index.wrapping_add(1);
      stream
   }

   /// Publishes the connect outcome for `index` and advances the counter.
   pub fn resolve(&mut self, index: u32, event: LeConnectionEvent, terminal: bool) {
      debug_assert_eq!(index, self.current);
      self.publish(index, event, terminal);
      self.current = self.current.wrapping_add(1);
   }

   pub fn publish(&mut self, index: u32, event: LeConnectionEvent, terminal: bool) {
      let Some(slot) = self.slots.get_mut(&index) else {
         debug!("Slot {index} already retired, dropping event");
         return;
      };
      slot.stream.on_incoming_event(event);
      if terminal {
         slot.terminal = true;
         self.retire_if_done(index);
      }
   }

   /// Records that the RPC driving `index` has returned.
   pub fn release(&mut self, index: u32) {
      if let Some(slot) = self.slots.get_mut(&index) {
         slot.driven = false;
         self.retire_if_done(index);
      }
   }

   fn retire_if_done(&mut self, index: u32) {
      if let Some(slot) = self.slots.get(&index)
         && slot.terminal
         && !slot.driven
      {
         debug!("Retiring {}", slot.stream.name());
         self.slots.remove(&index);
      }
   }

   /// Ends every driver; used at teardown.
   pub fn close_all(&mut self) {
      for slot in self.slots.values() {
         slot.stream.close();
      }
   }
}
