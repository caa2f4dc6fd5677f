//! Start/stop shell around the facade service.

use std::sync::Arc;

use log::info;

use crate::{
   config::Config,
   error::{FacadeError, Result},
   facade::service::LeAclManagerFacadeService,
   hci::acl_manager::AclManager,
   os::Handler,
};

/// Owns the facade's handler thread and service instance between `start`
/// and `stop`.
pub struct LeAclManagerFacadeModule {
   acl_manager: Arc<dyn AclManager>,
   config: Config,
   running: Option<(Handler, LeAclManagerFacadeService)>,
}

impl LeAclManagerFacadeModule {
   pub const NAME: &'static str = "LeAclManagerFacadeModule";

   pub fn new(acl_manager: Arc<dyn AclManager>, config: Config) -> Self {
      Self {
         acl_manager,
         config,
         running: None,
      }
   }

   /// Builds the module from the on-disk configuration, creating it with
   /// defaults on first use.
   pub fn from_config_file(acl_manager: Arc<dyn AclManager>) -> Result<Self> {
      let config = Config::load()?;
      info!(
         "Loaded configuration: queue capacity {}, send timeout {:?}",
         config.event_queue_capacity,
         config.send_acl_timeout()
      );
      Ok(Self::new(acl_manager, config))
   }

   /// Spawns the handler and registers the service with the ACL manager.
   pub fn start(&mut self) -> Result<LeAclManagerFacadeService> {
      if self.running.is_some() {
         return Err(FacadeError::AlreadyStarted);
      }
      let handler = Handler::new(self.config.handler_name.as_str())?;
      let service =
         LeAclManagerFacadeService::new(self.acl_manager.clone(), handler.clone(), &self.config);
      info!("{} started on {}", Self::NAME, handler.name());
      self.running = Some((handler, service.clone()));
      Ok(service)
   }

   pub fn stop(&mut self) -> Result<()> {
      let (handler, service) = self.running.take().ok_or(FacadeError::NotStarted)?;
      service.shutdown();
      handler.shutdown();
      info!("{} stopped", Self::NAME);
      Ok(())
   }

   pub fn service(&self) -> Result<&LeAclManagerFacadeService> {
      self
         .running
         .as_ref()
         .map(|(_, service)| service)
         .ok_or(FacadeError::NotStarted)
   }

   pub const fn is_started(&self) -> bool {
      self.running.is_some()
   }
}

impl Drop for LeAclManagerFacadeModule {
   fn drop(&mut self) {
      let _ = self.stop();
   }
}
