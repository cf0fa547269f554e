//! Per-object access control

use crate::error::{Error, Result};
use crate::object::ObjectId;
use crate::security::{AccessContext, AccessType, IdentityName, RoleName};
use crate::transaction::{MapDriver, TransactionContext, TransactionalMap, TransactionalValue, ValueDriver};
use std::sync::Arc;

// =============================================================================
// ACL Subjects
// =============================================================================

/// Subject of an access control entry
///
/// Direct identity entries take precedence over role entries during
/// resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclSubject {
    Identity(IdentityName),
    Role(RoleName),
}

// =============================================================================
// Protection Drivers
// =============================================================================

/// Persistence drivers for the protection's own fields
///
/// All `None` for objects whose protection is not persisted (temporary or
/// satellite-side objects).
#[derive(Default, Clone)]
pub struct ProtectionDrivers {
    pub creator: Option<Arc<dyn ValueDriver<IdentityName>>>,
    pub owner_role: Option<Arc<dyn ValueDriver<RoleName>>>,
    pub identity_acl: Option<Arc<dyn MapDriver<IdentityName, AccessType>>>,
    pub role_acl: Option<Arc<dyn MapDriver<RoleName, AccessType>>>,
}

// =============================================================================
// Object Protection
// =============================================================================

/// Access control state guarding one control-plane object
///
/// Resolution order for a caller's effective level: the owner role always
/// holds CONTROL; otherwise a direct ACL entry for the caller's identity,
/// else an entry for the caller's role, else the object's public default.
/// ACL mutations are transactional and share the owning entity's
/// commit/rollback boundary.
pub struct ObjectProtection {
    /// Display name of the protected object, used in denial messages
    object: String,
    /// Identity that created the object; may change if that account is
    /// deleted later
    creator: Arc<TransactionalValue<IdentityName>>,
    /// Role holding owner rights
    owner_role: Arc<TransactionalValue<RoleName>>,
    identity_acl: Arc<TransactionalMap<IdentityName, AccessType>>,
    role_acl: Arc<TransactionalMap<RoleName, AccessType>>,
    public_access: Option<AccessType>,
}

impl ObjectProtection {
    /// Create the protection for a newly created object
    ///
    /// The creating context becomes creator and owner role.
    pub fn new(
        owner_id: ObjectId,
        object: impl Into<String>,
        creator: &AccessContext,
        public_access: Option<AccessType>,
        drivers: ProtectionDrivers,
    ) -> Arc<Self> {
        Arc::new(Self {
            object: object.into(),
            creator: TransactionalValue::new(owner_id, creator.identity().clone(), drivers.creator),
            owner_role: TransactionalValue::new(owner_id, creator.role().clone(), drivers.owner_role),
            identity_acl: TransactionalMap::new(owner_id, drivers.identity_acl),
            role_acl: TransactionalMap::new(owner_id, drivers.role_acl),
            public_access,
        })
    }

    /// Effective level granted to `ctx`, or `None` when nothing is granted
    pub fn query_access(&self, ctx: &AccessContext) -> Option<AccessType> {
        if *ctx.role() == self.owner_role.get() {
            return Some(AccessType::Control);
        }
        self.identity_acl
            .get(ctx.identity())
            .or_else(|| self.role_acl.get(ctx.role()))
            .or(self.public_access)
    }

    /// Fail with `AccessDenied` unless `ctx` is granted at least `requested`
    pub fn require_access(&self, ctx: &AccessContext, requested: AccessType) -> Result<()> {
        match self.query_access(ctx) {
            Some(effective) if effective.implies(requested) => Ok(()),
            _ => Err(Error::AccessDenied {
                role: ctx.role().to_string(),
                requested,
                object: self.object.clone(),
            }),
        }
    }

    /// Grant `access` to `subject`; requires CONTROL
    pub fn grant(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        subject: AclSubject,
        access: AccessType,
    ) -> Result<()> {
        self.require_access(ctx, AccessType::Control)?;
        match subject {
            AclSubject::Identity(identity) => {
                self.identity_acl.insert(tx, identity, access);
            }
            AclSubject::Role(role) => {
                self.role_acl.insert(tx, role, access);
            }
        }
        Ok(())
    }

    /// Remove the entry for `subject`; requires CONTROL
    pub fn revoke(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        subject: &AclSubject,
    ) -> Result<()> {
        self.require_access(ctx, AccessType::Control)?;
        match subject {
            AclSubject::Identity(identity) => {
                self.identity_acl.remove(tx, identity);
            }
            AclSubject::Role(role) => {
                self.role_acl.remove(tx, role);
            }
        }
        Ok(())
    }

    /// Transfer ownership to another role; requires CONTROL
    pub fn set_owner_role(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        new_owner: RoleName,
    ) -> Result<()> {
        self.require_access(ctx, AccessType::Control)?;
        self.owner_role.set(tx, new_owner);
        Ok(())
    }

    pub fn creator(&self) -> IdentityName {
        self.creator.get()
    }

    pub fn owner_role(&self) -> RoleName {
        self.owner_role.get()
    }

    pub fn public_access(&self) -> Option<AccessType> {
        self.public_access
    }

    /// Drop all ACL entries; part of the owning object's delete sequence
    pub(crate) fn clear(&self, tx: &TransactionContext) {
        self.identity_acl.clear(tx);
        self.role_acl.clear(tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn protection_for(creator: &AccessContext, public: Option<AccessType>) -> Arc<ObjectProtection> {
        ObjectProtection::new(
            ObjectId::generate(),
            "node 'alpha'",
            creator,
            public,
            ProtectionDrivers::default(),
        )
    }

    #[test]
    fn test_owner_role_holds_control() {
        let creator = AccessContext::new("alice", "storage-admins");
        let prot = protection_for(&creator, None);

        assert_eq!(prot.query_access(&creator), Some(AccessType::Control));
        assert!(prot.require_access(&creator, AccessType::Control).is_ok());

        // Same role, different identity
        let colleague = AccessContext::new("bob", "storage-admins");
        assert!(prot.require_access(&colleague, AccessType::Control).is_ok());
    }

    #[test]
    fn test_granted_level_implies_lower_levels_only() {
        let tx = TransactionContext::new();
        let creator = AccessContext::new("alice", "storage-admins");
        let buddy = AccessContext::new("bob", "operators");
        let prot = protection_for(&creator, None);

        prot.grant(
            &tx,
            &creator,
            AclSubject::Role(buddy.role().clone()),
            AccessType::Change,
        )
        .unwrap();

        assert!(prot.require_access(&buddy, AccessType::View).is_ok());
        assert!(prot.require_access(&buddy, AccessType::Use).is_ok());
        assert!(prot.require_access(&buddy, AccessType::Change).is_ok());
        assert_matches!(
            prot.require_access(&buddy, AccessType::Control),
            Err(Error::AccessDenied { .. })
        );
        tx.commit().unwrap();
    }

    #[test]
    fn test_identity_entry_beats_role_entry() {
        let tx = TransactionContext::new();
        let creator = AccessContext::new("alice", "storage-admins");
        let bandit = AccessContext::new("mallory", "operators");
        let prot = protection_for(&creator, None);

        prot.grant(
            &tx,
            &creator,
            AclSubject::Role(RoleName::new("operators")),
            AccessType::Change,
        )
        .unwrap();
        prot.grant(
            &tx,
            &creator,
            AclSubject::Identity(IdentityName::new("mallory")),
            AccessType::View,
        )
        .unwrap();

        assert_eq!(prot.query_access(&bandit), Some(AccessType::View));
        assert_matches!(
            prot.require_access(&bandit, AccessType::Change),
            Err(Error::AccessDenied { .. })
        );
        tx.commit().unwrap();
    }

    #[test]
    fn test_public_default_is_the_last_resort() {
        let creator = AccessContext::new("alice", "storage-admins");
        let anon = AccessContext::public();

        let open = protection_for(&creator, Some(AccessType::View));
        assert_eq!(open.query_access(&anon), Some(AccessType::View));

        let closed = protection_for(&creator, None);
        assert_eq!(closed.query_access(&anon), None);
        assert_matches!(
            closed.require_access(&anon, AccessType::View),
            Err(Error::AccessDenied { .. })
        );
    }

    #[test]
    fn test_grant_requires_control() {
        let tx = TransactionContext::new();
        let creator = AccessContext::new("alice", "storage-admins");
        let bandit = AccessContext::new("mallory", "operators");
        let prot = protection_for(&creator, Some(AccessType::View));

        assert_matches!(
            prot.grant(
                &tx,
                &bandit,
                AclSubject::Role(bandit.role().clone()),
                AccessType::Control,
            ),
            Err(Error::AccessDenied { .. })
        );
    }

    #[test]
    fn test_acl_changes_roll_back_with_the_context() {
        let tx = TransactionContext::new();
        let creator = AccessContext::new("alice", "storage-admins");
        let buddy = AccessContext::new("bob", "operators");
        let prot = protection_for(&creator, None);

        prot.grant(
            &tx,
            &creator,
            AclSubject::Role(buddy.role().clone()),
            AccessType::Use,
        )
        .unwrap();
        assert_eq!(prot.query_access(&buddy), Some(AccessType::Use));

        tx.rollback();
        assert_eq!(prot.query_access(&buddy), None);
    }
}
