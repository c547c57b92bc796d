//! lib/registry.rs
//!
//! This module contains the adaptor registry, the component binding URL schemas to adaptor
//! factories. API objects are created against a URL such as `slurm://cluster.lab.org`, and the
//! registry answers with the factory able to talk to that backend. Registration honors the user
//! settings: disabled adaptors and unlisted schemas are skipped.


//------------------------------------------------------------------------------------------ IMPORTS


use crate::config::Settings;
use crate::error::Error;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;


//------------------------------------------------------------------------------------------ FACTORY


/// The entry point of an adaptor crate: a named factory announcing the URL schemas its backend
/// answers to.
pub trait AdaptorFactory: Send + Sync {
    /// The factory name, matched against the `disabled_adaptors` setting.
    fn name(&self) -> &str;
    /// The URL schemas this factory binds, e.g. `["slurm", "slurm+ssh"]`.
    fn schemas(&self) -> Vec<String>;
}


//----------------------------------------------------------------------------------------- REGISTRY


/// The schema-to-factory bindings of a running session.
pub struct Registry {
    bindings: BTreeMap<String, Arc<dyn AdaptorFactory>>,
    settings: Settings,
}

impl Registry {
    /// Creates a registry honoring the user settings.
    pub fn new(settings: Settings) -> Registry {
        Registry {
            bindings: BTreeMap::new(),
            settings,
        }
    }

    /// Registers a factory under every schema it announces. Factories disabled by the settings
    /// are skipped silently; a schema already bound to another factory fails with
    /// `AlreadyExists`.
    pub fn register(&mut self, factory: Arc<dyn AdaptorFactory>) -> Result<(), Error> {
        if !self.settings.adaptor_enabled(factory.name()) {
            debug!("The adaptor {} is disabled, skipping", factory.name());
            return Ok(());
        }
        for schema in factory.schemas() {
            if !self.settings.schema_enabled(&schema) {
                debug!("The schema {} is disabled, skipping", schema);
                continue;
            }
            if let Some(bound) = self.bindings.get(&schema) {
                return Err(Error::AlreadyExists(format!(
                    "The schema {} is already bound to the adaptor {}",
                    schema,
                    bound.name()
                )));
            }
            info!("Binding the schema {} to the adaptor {}", schema, factory.name());
            self.bindings.insert(schema, factory.clone());
        }
        Ok(())
    }

    /// Returns the factory bound to the schema of the URL.
    pub fn lookup(&self, url: &Url) -> Result<Arc<dyn AdaptorFactory>, Error> {
        match self.bindings.get(url.scheme()) {
            Some(factory) => Ok(factory.clone()),
            None => {
                let known: Vec<&str> = self.bindings.keys().map(String::as_str).collect();
                Err(Error::NotImplemented(format!(
                    "No adaptor is bound to the schema {} (known schemas: {})",
                    url.scheme(),
                    known.join(", ")
                )))
            }
        }
    }

    /// Parses the URL and returns the factory bound to its schema.
    pub fn lookup_str(&self, url: &str) -> Result<Arc<dyn AdaptorFactory>, Error> {
        let url = Url::parse(url)?;
        self.lookup(&url)
    }

    /// The schemas currently bound.
    pub fn schemas(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }
}


//-------------------------------------------------------------------------------------------- TESTS
