pub mod connections;
pub mod event_stream;
pub mod ledger;
pub mod messages;
pub mod module;
pub mod service;

pub use event_stream::{ServerContext, ServerWriter};
pub use messages::{LeAclData, LeConnectionEvent, LeConnectionMsg, LeHandleMsg};
pub use module::LeAclManagerFacadeModule;
pub use service::LeAclManagerFacadeService;
