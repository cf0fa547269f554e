//! Typed bitmask state flags
//!
//! Every flagged entity carries a [`StateFlags`] layered on one
//! `TransactionalValue<u64>`, so flag changes share the owning entity's
//! commit/rollback boundary. Flag enums implement [`FlagSet`] (usually via
//! the [`flag_set!`](crate::flag_set) macro); members may be composite — a
//! superset of another member's bits — to express is-a relationships, e.g. an
//! evicted node is also marked for deletion.

use crate::error::{Error, Result};
use crate::object::ObjectId;
use crate::security::{AccessContext, AccessType, ObjectProtection};
use crate::transaction::{TransactionContext, TransactionalValue, ValueDriver};
use std::marker::PhantomData;
use std::sync::Arc;

// =============================================================================
// Flag Set
// =============================================================================

/// A closed enum of bitmask flags for one entity type
pub trait FlagSet: Copy + Eq + Send + Sync + 'static {
    /// Every member of the set, in declaration order
    const VALUES: &'static [Self];

    /// Bit value of this member; composite members return a superset of
    /// another member's bits
    fn bits(self) -> u64;

    /// Canonical name of this member
    fn name(self) -> &'static str;

    /// Union of all member bits
    fn valid_mask() -> u64 {
        Self::VALUES.iter().fold(0, |mask, flag| mask | flag.bits())
    }

    /// Look up a member by name, ignoring case and surrounding whitespace
    fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim();
        Self::VALUES
            .iter()
            .copied()
            .find(|flag| flag.name().eq_ignore_ascii_case(wanted))
    }
}

/// Combine a list of flags into one mask
pub fn mask_of<F: FlagSet>(flags: &[F]) -> u64 {
    flags.iter().fold(0, |mask, flag| mask | flag.bits())
}

/// Canonical text encoding of a mask: the names of all members whose bits
/// are fully contained in the mask, in declaration order
pub fn to_string_list<F: FlagSet>(mask: u64) -> Vec<String> {
    F::VALUES
        .iter()
        .filter(|flag| mask & flag.bits() == flag.bits())
        .map(|flag| flag.name().to_ascii_uppercase())
        .collect()
}

/// Parse a list of flag names back into a mask; the inverse of
/// [`to_string_list`] up to canonicalization
pub fn from_string_list<F: FlagSet>(names: &[impl AsRef<str>]) -> Result<u64> {
    let mut mask = 0;
    for name in names {
        let flag = F::from_name(name.as_ref()).ok_or_else(|| Error::InvalidName {
            kind: "state flag",
            value: name.as_ref().to_string(),
            reason: "unknown flag name",
        })?;
        mask |= flag.bits();
    }
    Ok(mask)
}

/// Define a [`FlagSet`] enum
///
/// ```
/// controlplane_core::flag_set! {
///     pub enum DemoFlags {
///         Delete = 1,
///         // Composite: an evicted object is also marked for deletion
///         Evicted = 1 | 1 << 1,
///     }
/// }
/// ```
#[macro_export]
macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident = $bits:expr
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                $variant
            ),+
        }

        impl $crate::flags::FlagSet for $name {
            const VALUES: &'static [Self] = &[$(Self::$variant),+];

            fn bits(self) -> u64 {
                match self {
                    $(Self::$variant => $bits),+
                }
            }

            fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant)),+
                }
            }
        }
    };
}

// =============================================================================
// State Flags
// =============================================================================

/// Bitmask state of one entity, gated by the entity's protection
///
/// Reads require VIEW, mutations CHANGE. All mutations route through the
/// single backing transactional value.
pub struct StateFlags<F: FlagSet> {
    bits: Arc<TransactionalValue<u64>>,
    protection: Arc<ObjectProtection>,
    _flags: PhantomData<fn() -> F>,
}

impl<F: FlagSet> std::fmt::Debug for StateFlags<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateFlags").finish_non_exhaustive()
    }
}

impl<F: FlagSet> StateFlags<F> {
    pub fn new(
        owner: ObjectId,
        protection: Arc<ObjectProtection>,
        initial: u64,
        driver: Option<Arc<dyn ValueDriver<u64>>>,
    ) -> Self {
        Self {
            bits: TransactionalValue::new(owner, initial, driver),
            protection,
            _flags: PhantomData,
        }
    }

    /// Raw mask, including uncommitted staged changes
    pub fn bits(&self, ctx: &AccessContext) -> Result<u64> {
        self.protection.require_access(ctx, AccessType::View)?;
        Ok(self.bits.get())
    }

    /// Whether all bits of `flag` are set
    ///
    /// An all-bits test rather than a nonzero test, so a composite flag is
    /// also detected through any flag whose bits it contains.
    pub fn is_set(&self, ctx: &AccessContext, flag: F) -> Result<bool> {
        self.protection.require_access(ctx, AccessType::View)?;
        Ok(self.bits.get() & flag.bits() == flag.bits())
    }

    /// Whether any bit of any given flag is set
    pub fn is_some_set(&self, ctx: &AccessContext, flags: &[F]) -> Result<bool> {
        self.protection.require_access(ctx, AccessType::View)?;
        Ok(self.bits.get() & mask_of(flags) != 0)
    }

    /// Whether no bit of any given flag is set
    pub fn is_unset(&self, ctx: &AccessContext, flags: &[F]) -> Result<bool> {
        self.is_some_set(ctx, flags).map(|some| !some)
    }

    pub fn enable_flags(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        flags: &[F],
    ) -> Result<()> {
        self.protection.require_access(ctx, AccessType::Change)?;
        self.bits.set(tx, self.bits.get() | mask_of(flags));
        Ok(())
    }

    pub fn disable_flags(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        flags: &[F],
    ) -> Result<()> {
        self.protection.require_access(ctx, AccessType::Change)?;
        self.bits.set(tx, self.bits.get() & !mask_of(flags));
        Ok(())
    }

    /// Enable every member of the set except the given ones
    pub fn enable_flags_except(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        flags: &[F],
    ) -> Result<()> {
        self.protection.require_access(ctx, AccessType::Change)?;
        self.bits
            .set(tx, self.bits.get() | (F::valid_mask() & !mask_of(flags)));
        Ok(())
    }

    /// Disable every member of the set except the given ones
    pub fn disable_flags_except(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        flags: &[F],
    ) -> Result<()> {
        self.protection.require_access(ctx, AccessType::Change)?;
        self.bits.set(tx, self.bits.get() & mask_of(flags));
        Ok(())
    }

    /// Replace the whole mask with exactly the given flags
    pub fn reset_flags_to(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        flags: &[F],
    ) -> Result<()> {
        self.protection.require_access(ctx, AccessType::Change)?;
        self.bits.set(tx, mask_of(flags));
        Ok(())
    }
}
