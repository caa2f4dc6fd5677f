//! Remote-control facade over an LE ACL manager.
//!
//! A test harness drives LE connections through five calls on
//! [`LeAclManagerFacadeService`]: create a connection, wait for an incoming
//! one, disconnect, send ACL data and stream received ACL data. Connection
//! lifecycle is reported as serialized HCI events so the harness can check
//! them byte for byte.

pub mod config;
pub mod error;
pub mod facade;
pub mod hci;
pub mod os;

pub use config::Config;
pub use error::{FacadeError, Result, StatusCode};
pub use facade::{LeAclManagerFacadeModule, LeAclManagerFacadeService};
