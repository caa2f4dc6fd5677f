//! Configuration management for the facade.
//!
//! This module handles loading and saving the facade's tunables from disk:
//! event queue sizing, the `SendAclData` wait bound and the handler name.

use std::{
   env, fs,
   path::{Path, PathBuf},
   time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{FacadeError, Result};

/// Main configuration structure for the facade.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
   /// Events buffered per stream before new ones are dropped.
   #[serde(default = "default_event_queue_capacity")]
   pub event_queue_capacity: usize,

   /// Upper bound on how long `SendAclData` waits for the stack to pull.
   #[serde(default = "default_send_acl_timeout_ms")]
   pub send_acl_timeout_ms: u64,

   #[serde(default = "default_handler_name")]
   pub handler_name: String,
}

const fn default_event_queue_capacity() -> usize {
   1024
}

const fn default_send_acl_timeout_ms() -> u64 {
   10_000
}

fn default_handler_name() -> String {
   "le_acl_facade".to_owned()
}

impl Default for Config {
   fn default() -> Self {
      Self {
         event_queue_capacity: default_event_queue_capacity(),
         send_acl_timeout_ms: default_send_acl_timeout_ms(),
         handler_name: default_handler_name(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   /// Loads configuration from `path`, writing the defaults there if the
   /// file does not exist yet.
   pub fn load_from(path: &Path) -> Result<Self> {
      if path.exists() {
         let contents = fs::read_to_string(path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         let config = Self::default();
         config.save_to(path)?;
         Ok(config)
      }
   }

   pub fn save_to(&self, path: &Path) -> Result<()> {
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(facade_home) = env::var("LE_ACL_FACADE_HOME") {
         PathBuf::from(facade_home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Some(config_dir) = dirs::config_dir() {
         config_dir
      } else {
         return Err(FacadeError::ConfigDirNotFound);
      };

      Ok(config_dir.join("le-acl-facade").join("config.toml"))
   }

   pub const fn send_acl_timeout(&self) -> Duration {
      Duration::from_millis(self.send_acl_timeout_ms)
   }
}
