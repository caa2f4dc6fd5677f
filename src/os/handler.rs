//! Single-threaded serial executor.
//!
//! Every stack callback the facade registers is posted to a [`Handler`], so
//! callbacks never run concurrently with each other.

use std::{
   panic::{self, AssertUnwindSafe},
   sync::Arc,
   thread::{self, JoinHandle, ThreadId},
};

use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, error};
use smol_str::SmolStr;
use tokio::sync::oneshot;

use crate::error::Result;

type Task = Box<dyn FnOnce() + Send>;

enum Message {
   Run(Task),
   Stop,
}

struct HandlerInner {
   name: SmolStr,
   tx: Sender<Message>,
   thread_id: ThreadId,
   thread: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

/// Cheaply cloneable handle to a serial executor thread.
#[derive(Clone)]
pub struct Handler(Arc<HandlerInner>);

impl Handler {
   pub fn new(name: impl Into<SmolStr>) -> Result<Self> {
      let name = name.into();
      let (tx, rx) = channel::unbounded();
      let thread = thread::Builder::new()
         .name(name.to_string())
         .spawn({
            let name = name.clone();
            move || run(&name, &rx)
         })?;

      Ok(Self(Arc::new(HandlerInner {
         name,
         tx,
         thread_id: thread.thread().id(),
         thread: parking_lot::Mutex::new(Some(thread)),
      })))
   }

   pub fn name(&self) -> &str {
      &self.0.name
   }

   /// Queues `task` behind everything already posted. Returns `false` once
   /// the handler has been shut down.
   pub fn post<F>(&self, task: F) -> bool
   where
      F: FnOnce() + Send + 'static,
   {
      self.0.tx.send(Message::Run(Box::new(task))).is_ok()
   }

   /// Whether the caller is running on this handler's thread.
   pub fn is_current(&self) -> bool {
      thread::current().id() == self.0.thread_id
   }

   /// Resolves once every task posted before this call has run.
   pub async fn flush(&self) {
      let (tx, rx) = oneshot::channel();
      if self.post(move || {
         let _ = tx.send(());
      }) {
         let _ = rx.await;
      }
   }

   /// Stops the thread after the queued tasks drain. Joins unless called from
   /// the handler thread itself.
   pub fn shutdown(&self) {
      let _ = self.0.tx.send(Message::Stop);
      if self.is_current() {
         return;
      }
      if let Some(thread) = self.0.thread.lock().take()
         && thread.join().is_err()
      {
         error!("Handler {} thread panicked", self.0.name);
      }
   }
}

impl Drop for HandlerInner {
   fn drop(&mut self) {
      let _ = self.tx.send(Message::Stop);
   }
}

fn run(name: &str, rx: &Receiver<Message>) {
   debug!("Handler {name} started");
   for message in rx {
      match message {
         Message::Run(task) => {
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
               error!("Task panicked on handler {name}");
            }
         },
         Message::Stop => break,
      }
   }
   debug!("Handler {name} stopped");
}
