//! Bridges events produced on the handler thread into server-streaming RPCs.
//!
//! Producers push without blocking; a single RPC driver drains the queue in
//! FIFO order until the client cancels, the client goes away, or the stream
//! is closed at teardown.

use std::{
   future::Future,
   sync::atomic::{AtomicBool, Ordering},
};

use crossbeam::queue::ArrayQueue;
use log::{debug, warn};
use smol_str::SmolStr;
use tokio::{
   select,
   sync::{Notify, mpsc},
};

use crate::error::{FacadeError, Result};

/// Per-call state shared between the transport and the RPC body.
#[derive(Debug, Default)]
pub struct ServerContext {
   cancelled: AtomicBool,
   notifier: Notify,
}

impl ServerContext {
   pub fn new() -> Self {
      Self::default()
   }

   /// Marks the call as cancelled by the client.
   pub fn cancel(&self) {
      self.cancelled.store(true, Ordering::Release);
      self.notifier.notify_waiters();
   }

   pub fn is_cancelled(&self) -> bool {
      self.cancelled.load(Ordering::Acquire)
   }

   pub async fn cancelled(&self) {
      loop {
         // Registered before the check so a concurrent cancel is not missed.
         let notified = self.notifier.notified();
         if self.is_cancelled() {
            return;
         }
         notified.await;
      }
   }
}

/// Outbound half of a server-streaming call.
pub trait ServerWriter<T>: Send {
   /// Sends one message; `false` means the client is gone.
   fn write(&mut self, message: T) -> impl Future<Output = bool> + Send;
}

impl<T: Send> ServerWriter<T> for mpsc::Sender<T> {
   fn write(&mut self, message: T) -> impl Future<Output = bool> + Send {
      async move { self.send(message).await.is_ok() }
   }
}

struct DriverGuard<'a>(&'a AtomicBool);

impl Drop for DriverGuard<'_> {
   fn drop(&mut self) {
      self.0.store(false, Ordering::Release);
   }
}

pub struct EventStream<T> {
   name: SmolStr,
   queue: ArrayQueue<T>,
   notifier: Notify,
   closed: AtomicBool,
   driven: AtomicBool,
}

impl<T: Send> EventStream<T> {
   pub fn new(name: impl Into<SmolStr>, capacity: usize) -> Self {
      Self {
         name: name.into(),
         queue: ArrayQueue::new(capacity.max(1)),
         notifier: Notify::new(),
         closed: AtomicBool::new(false),
         driven: AtomicBool::new(false),
      }
   }

   pub fn name(&self) -> &str {
      &self.name
   }

   /// Events waiting for a driver.
   pub fn pending(&self) -> usize {
      self.queue.len()
   }

   pub fn is_driven(&self) -> bool {
      self.driven.load(Ordering::Acquire)
   }

   /// Enqueues `event` for the driver. Never blocks; drops the event if the
   /// stream is full or closed.
   pub fn on_incoming_event(&self, event: T) {
      if self.closed.load(Ordering::Acquire) {
         debug!("{}: closed, dropping event", self.name);
         return;
      }
      if self.queue.push(event).is_err() {
         warn!("{}: queue full, dropping event", self.name);
         return;
      }
      self.notifier.notify_one();
   }

   /// Ends the current and any future driver once queued events are drained.
   pub fn close(&self) {
      self.closed.store(true, Ordering::Release);
      self.notifier.notify_one();
   }

   /// Drains the stream into `writer` until cancellation, client departure or
   /// close. Only one driver may be attached at a time.
   pub async fn run_loop<W>(&self, context: &ServerContext, writer: &mut W) -> Result<()>
   where
      W: ServerWriter<T>,
   {
      if self.driven.swap(true, Ordering::AcqRel) {
         return Err(FacadeError::StreamBusy(self.name.clone()));
      }
      let _guard = DriverGuard(&self.driven);
      debug!("{}: driver attached", self.name);

      while let Some(event) = self.next(context).await {
         let delivered = select! {
            delivered = writer.write(event) => delivered,
            () = context.cancelled() => false,
         };
         if !delivered {
            break;
         }
      }

      debug!("{}: driver detached", self.name);
      Ok(())
   }

   async fn next(&self, context: &ServerContext) -> Option<T> {
      loop {
         if context.is_cancelled() {
            return None;
         }
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         if self.closed.load(Ordering::Acquire) {
            return None;
         }
         select! {
            () = self.notifier.notified() => {},
            () = context.cancelled() => return None,
         }
      }
   }
}
