//! Provisioner backed by a closure, matching exactly one resource.

use super::{Input, ProvisionOutput, Provisioner, ProvisionerDescriptor};
use crate::error::Result;
use crate::project::ResourceUid;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

type ProvisionFn = Box<dyn Fn(&Input) -> Result<ProvisionOutput> + Send + Sync>;

/// Provisions one exact resource with the given function.
pub struct EphemeralProvisioner {
    descriptor: ProvisionerDescriptor,
    uid: ResourceUid,
    provision: ProvisionFn,
}

impl EphemeralProvisioner {
    pub fn new(
        uri: impl Into<String>,
        uid: ResourceUid,
        provision: impl Fn(&Input) -> Result<ProvisionOutput> + Send + Sync + 'static,
    ) -> Self {
        let mut descriptor = ProvisionerDescriptor::new(uri, uid.resource_type());
        descriptor.class = Some(uid.class().to_string());
        descriptor.id = Some(uid.id().to_string());
        Self {
            descriptor,
            uid,
            provision: Box::new(provision),
        }
    }
}

#[async_trait]
impl Provisioner for EphemeralProvisioner {
    fn descriptor(&self) -> &ProvisionerDescriptor {
        &self.descriptor
    }

    fn matches(&self, uid: &ResourceUid) -> bool {
        *uid == self.uid
    }

    async fn provision(&self, _cancel: &CancellationToken, input: &Input) -> Result<ProvisionOutput> {
        (self.provision)(input)
    }
}
