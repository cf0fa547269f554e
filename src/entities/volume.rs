//! Volumes

use crate::entities::resource::Resource;
use crate::entities::resource_definition::VolumeDefinition;
use crate::error::{Error, Result};
use crate::flag_set;
use crate::flags::StateFlags;
use crate::object::{CoreEntity, CoreObject, EntityDriver, ObjectId};
use crate::props::PropsContainer;
use crate::security::{AccessContext, AccessType, ObjectProtection, ProtectionDrivers};
use crate::transaction::{TransactionContext, TransactionalValue};
use crate::types::VolumeNumber;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::info;
use uuid::Uuid;

flag_set! {
    pub enum VolumeFlags {
        Delete = 1,
        Resize = 1 << 1,
    }
}

// =============================================================================
// Volume
// =============================================================================

/// One block device of a resource, backed by a volume definition
pub struct Volume {
    core: CoreObject,
    volume_nr: VolumeNumber,
    resource: Weak<Resource>,
    definition: Weak<VolumeDefinition>,
    /// Block device path reported by the node's agent; staged like any field
    /// but never persisted
    device_path: Arc<TransactionalValue<Option<String>>>,
    flags: StateFlags<VolumeFlags>,
    props: PropsContainer,
}

impl Volume {
    pub fn volume_number(&self) -> VolumeNumber {
        self.volume_nr
    }

    /// The volume definition backing this volume
    pub fn definition(&self) -> Result<Arc<VolumeDefinition>> {
        self.definition.upgrade().ok_or_else(|| {
            Error::ImplementationError(format!(
                "volume {} outlived its volume definition",
                self.volume_nr
            ))
        })
    }

    pub fn device_path(&self, ctx: &AccessContext) -> Result<Option<String>> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(self.device_path.get())
    }

    /// Record the device path reported by the node's agent
    pub fn set_device_path(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        path: Option<String>,
    ) -> Result<()> {
        self.core.ensure_access(ctx, AccessType::Change)?;
        self.device_path.set(tx, path);
        Ok(())
    }

    pub fn flags(&self) -> Result<&StateFlags<VolumeFlags>> {
        self.core.check_deleted()?;
        Ok(&self.flags)
    }

    pub fn props(&self, ctx: &AccessContext) -> Result<&PropsContainer> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(&self.props)
    }

    pub fn set_prop(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        key: impl AsRef<str>,
        value: impl Into<String>,
    ) -> Result<Option<String>> {
        self.core.ensure_access(ctx, AccessType::Change)?;
        self.props.set(tx, key, value)
    }

    /// Soft-delete this volume and detach it from its resource
    pub fn delete(&self, tx: &TransactionContext, ctx: &AccessContext) -> Result<()> {
        if self.core.is_deleted() {
            return Ok(());
        }
        self.core
            .protection()
            .require_access(ctx, AccessType::Control)?;

        if let Some(resource) = self.resource.upgrade() {
            resource.remove_volume(tx, self.volume_nr);
        }

        self.core.finish_delete(tx)
    }

    pub fn api_data(&self, ctx: &AccessContext) -> Result<VolumeDto> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(VolumeDto {
            uuid: self.core.uuid(),
            volume_nr: self.volume_nr,
            device_path: self.device_path.get(),
            flags: self.flags.bits(ctx)?,
            props: self.props.map(),
        })
    }
}

impl CoreEntity for Volume {
    fn core(&self) -> &CoreObject {
        &self.core
    }
}

/// Serializable view of a volume
#[derive(Debug, Clone, Serialize)]
pub struct VolumeDto {
    pub uuid: Uuid,
    pub volume_nr: VolumeNumber,
    pub device_path: Option<String>,
    pub flags: u64,
    pub props: BTreeMap<String, String>,
}

// =============================================================================
// Volume Factory
// =============================================================================

/// Sole construction path for [`Volume`] instances
pub struct VolumeFactory {
    driver: Option<Arc<dyn EntityDriver>>,
    public_access: Option<AccessType>,
}

impl VolumeFactory {
    pub fn new(driver: Option<Arc<dyn EntityDriver>>, public_access: Option<AccessType>) -> Self {
        Self {
            driver,
            public_access,
        }
    }

    /// Create the volume for `definition`'s slot on `resource`; requires
    /// CHANGE on the resource and USE on the volume definition
    pub fn create(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        resource: &Arc<Resource>,
        definition: &Arc<VolumeDefinition>,
    ) -> Result<Arc<Volume>> {
        resource.core().ensure_access(ctx, AccessType::Change)?;
        definition.core().ensure_access(ctx, AccessType::Use)?;

        let volume_nr = definition.volume_number();
        let id = ObjectId::generate();
        let label = format!(
            "volume '{}/{}/{}'",
            resource.node_name(),
            resource.name(),
            volume_nr
        );
        let protection = ObjectProtection::new(
            id,
            label.clone(),
            ctx,
            self.public_access,
            ProtectionDrivers::default(),
        );

        let volume = Arc::new(Volume {
            core: CoreObject::new(id, "volume", label, protection.clone(), self.driver.clone()),
            volume_nr,
            resource: Arc::downgrade(resource),
            definition: Arc::downgrade(definition),
            device_path: TransactionalValue::new(id, None, None),
            flags: StateFlags::new(id, protection, 0, None),
            props: PropsContainer::new(id, None),
        });

        volume.core.driver_create()?;
        resource.add_volume(tx, volume.clone())?;
        info!(
            node = %resource.node_name(),
            resource = %resource.name(),
            volume_nr,
            "created volume"
        );
        Ok(volume)
    }
}
