//! Built in environment provisioner.
//!
//! Environment resources do not know their values at generation time. Their
//! outputs answer every lookup with [`Error::DeferredVariable`], so params are
//! resolved from the current environment while generated files get a
//! `${NAME}` expression interpolated by the runtime. Every accessed variable
//! is recorded with its current value for the `.env` manifest.
//!
//! [`EnvironmentProvisioner::fallback_for`] applies the same treatment to a
//! single resource no other provisioner supports: `${resources.db.host}` on a
//! resource named `db` becomes the required variable `DB_HOST`.

use super::{Input, ProvisionOutput, Provisioner, ProvisionerDescriptor};
use crate::constants::{
    DEFAULT_RESOURCE_CLASS, ENVIRONMENT_PROVISIONER_URI, ENVIRONMENT_RESOURCE_TYPE,
};
use crate::error::{Error, Result};
use crate::project::ResourceUid;
use crate::substitution::OutputLookupFn;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Shared between the provisioner and its fallbacks.
struct Tracker {
    lookup: EnvLookup,
    accessed: Mutex<BTreeMap<String, String>>,
}

impl Tracker {
    fn defer(&self, variable: String, required: bool) -> Result<Value> {
        let value = (self.lookup)(&variable).unwrap_or_default();
        self.accessed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(variable.clone(), value);
        Err(Error::DeferredVariable { variable, required })
    }
}

/// Provisions `environment` resources as deferred environment variables.
pub struct EnvironmentProvisioner {
    descriptor: ProvisionerDescriptor,
    tracker: Arc<Tracker>,
}

impl Default for EnvironmentProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentProvisioner {
    /// Creates the provisioner, reading values from the process environment.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }

    /// Creates the provisioner with a custom environment lookup.
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        let mut descriptor =
            ProvisionerDescriptor::new(ENVIRONMENT_PROVISIONER_URI, ENVIRONMENT_RESOURCE_TYPE);
        descriptor.class = Some(DEFAULT_RESOURCE_CLASS.to_string());
        descriptor.description =
            "Outputs are environment variables resolved at deploy time".to_string();
        Self {
            descriptor,
            tracker: Arc::new(Tracker {
                lookup: Arc::new(lookup),
                accessed: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Variables accessed so far with their value at access time, empty if
    /// unset.
    #[must_use]
    pub fn accessed(&self) -> BTreeMap<String, String> {
        self.tracker
            .accessed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Creates a provisioner for one otherwise unsupported resource whose
    /// outputs map to `<NAME>_<KEY>...` variables.
    #[must_use]
    pub fn fallback_for(&self, resource_name: &str, uid: ResourceUid) -> EnvironmentFallback {
        let uri = format!(
            "{}/{}",
            ENVIRONMENT_PROVISIONER_URI,
            url::form_urlencoded::byte_serialize(uid.as_str().as_bytes()).collect::<String>()
        );
        let mut descriptor = ProvisionerDescriptor::new(uri, uid.resource_type());
        descriptor.class = Some(uid.class().to_string());
        descriptor.id = Some(uid.id().to_string());
        EnvironmentFallback {
            descriptor,
            prefix: resource_name.to_uppercase(),
            tracker: Arc::clone(&self.tracker),
        }
    }
}

#[async_trait]
impl Provisioner for EnvironmentProvisioner {
    fn descriptor(&self) -> &ProvisionerDescriptor {
        &self.descriptor
    }

    /// Only workload-scoped resources, whose id contains a `.`.
    fn matches(&self, uid: &ResourceUid) -> bool {
        self.descriptor.matches(uid) && uid.id().contains('.')
    }

    async fn provision(&self, _cancel: &CancellationToken, input: &Input) -> Result<ProvisionOutput> {
        if !input.resource_params.is_empty() {
            return Err(Error::InvalidInput("no params expected".to_string()));
        }
        let tracker = Arc::clone(&self.tracker);
        let lookup: OutputLookupFn = Arc::new(move |keys: &[String]| match keys {
            [key] => tracker.defer(key.clone(), false),
            _ => Err(Error::Lookup(
                "environment resource only supports a single lookup key".to_string(),
            )),
        });
        Ok(ProvisionOutput {
            output_lookup_fn: Some(lookup),
            ..Default::default()
        })
    }
}

/// Environment-backed provisioner for exactly one resource.
pub struct EnvironmentFallback {
    descriptor: ProvisionerDescriptor,
    prefix: String,
    tracker: Arc<Tracker>,
}

impl EnvironmentFallback {
    /// Name of the variable backing an output key path.
    #[must_use]
    pub fn variable_name(&self, keys: &[String]) -> String {
        variable_name(&self.prefix, keys)
    }
}

fn variable_name(prefix: &str, keys: &[String]) -> String {
    let mut name = prefix.to_string();
    for key in keys {
        name.push('_');
        name.push_str(key);
    }
    name.replace(['-', '.'], "_").to_uppercase()
}

#[async_trait]
impl Provisioner for EnvironmentFallback {
    fn descriptor(&self) -> &ProvisionerDescriptor {
        &self.descriptor
    }

    async fn provision(&self, _cancel: &CancellationToken, _input: &Input) -> Result<ProvisionOutput> {
        let tracker = Arc::clone(&self.tracker);
        let prefix = self.prefix.clone();
        let lookup: OutputLookupFn = Arc::new(move |keys: &[String]| {
            if keys.is_empty() {
                return Err(Error::Lookup(
                    "at least one output lookup key is required".to_string(),
                ));
            }
            tracker.defer(variable_name(&prefix, keys), true)
        });
        Ok(ProvisionOutput {
            output_lookup_fn: Some(lookup),
            ..Default::default()
        })
    }
}
