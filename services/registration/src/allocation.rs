//! Capacity-bounded membership changes.
//!
//! Spot types and shifts are both pools with a fixed capacity. Every change
//! to who holds a spot type or who is enrolled in a shift goes through
//! [`AllocationService`], which delegates the locked check-then-write to the
//! store. The admission policy itself is the pure [`admit`] / [`release`]
//! pair so that both store implementations decide identically.

use std::fmt;
use std::sync::Arc;

use festreg_id::{ShiftId, SpotTypeId, UserId};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{Occupancy, User};
use crate::store::{Store, StoreError};

/// A capacity pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolRef {
    SpotType(SpotTypeId),
    Shift(ShiftId),
}

impl fmt::Display for PoolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolRef::SpotType(id) => write!(f, "spot type {id}"),
            PoolRef::Shift(id) => write!(f, "shift {id}"),
        }
    }
}

/// Allocation failures.
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("{pool} is full ({current}/{limit})")]
    CapacityExceeded {
        pool: PoolRef,
        current: i64,
        limit: i64,
    },

    #[error("user {user} is already a member of {pool}")]
    AlreadyMember { pool: PoolRef, user: UserId },

    #[error("user {user} is not a member of {pool}")]
    NotMember { pool: PoolRef, user: UserId },

    #[error("{0} not found")]
    PoolNotFound(PoolRef),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl AllocationError {
    /// Stable machine-readable code used in problem responses.
    pub fn code(&self) -> &'static str {
        match self {
            AllocationError::CapacityExceeded { .. } => "capacity_exceeded",
            AllocationError::AlreadyMember { .. } => "already_member",
            AllocationError::NotMember { .. } => "not_member",
            AllocationError::PoolNotFound(_) => "pool_not_found",
            AllocationError::UserNotFound(_) => "user_not_found",
            AllocationError::Storage(_) => "storage_error",
        }
    }
}

/// Decides whether `user` may join `pool`.
///
/// Capacity is checked before membership, so a full pool reports
/// `CapacityExceeded` even to an existing member.
pub fn admit(
    pool: PoolRef,
    user: UserId,
    occupancy: Occupancy,
    already_member: bool,
) -> Result<(), AllocationError> {
    if occupancy.is_full() {
        return Err(AllocationError::CapacityExceeded {
            pool,
            current: occupancy.current,
            limit: occupancy.limit,
        });
    }
    if already_member {
        return Err(AllocationError::AlreadyMember { pool, user });
    }
    Ok(())
}

/// Decides whether `user` may leave `pool`.
pub fn release(pool: PoolRef, user: UserId, is_member: bool) -> Result<(), AllocationError> {
    if is_member {
        Ok(())
    } else {
        Err(AllocationError::NotMember { pool, user })
    }
}

/// Requested spot type on a user update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpotChange {
    /// Field absent from the update.
    #[default]
    Keep,
    /// `null` (or the legacy `0`).
    Clear,
    Set(SpotTypeId),
}

/// What a user update has to do to the spot relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityCheck {
    /// Nothing changes; no capacity check.
    Unchanged,
    /// Drop the current spot type; never capacity constrained.
    Clear,
    /// Take a slot in a different spot type.
    Claim(SpotTypeId),
}

/// Maps a requested change onto the work it needs, given what the user holds.
pub fn capacity_check_for(current: Option<SpotTypeId>, change: SpotChange) -> CapacityCheck {
    match change {
        SpotChange::Keep => CapacityCheck::Unchanged,
        SpotChange::Clear if current.is_none() => CapacityCheck::Unchanged,
        SpotChange::Clear => CapacityCheck::Clear,
        SpotChange::Set(id) if current == Some(id) => CapacityCheck::Unchanged,
        SpotChange::Set(id) => CapacityCheck::Claim(id),
    }
}

/// Single gate for spot and shift membership.
#[derive(Clone)]
pub struct AllocationService {
    store: Arc<dyn Store>,
}

impl AllocationService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Gives `user` a slot in `spot`, moving it out of any other spot type.
    pub async fn assign_spot(
        &self,
        spot: SpotTypeId,
        user: UserId,
    ) -> Result<Occupancy, AllocationError> {
        let result = self.store.claim_spot(spot, user).await;
        log_outcome("assign", PoolRef::SpotType(spot), user, &result);
        result
    }

    pub async fn unassign_spot(
        &self,
        spot: SpotTypeId,
        user: UserId,
    ) -> Result<Occupancy, AllocationError> {
        let result = self.store.release_spot(spot, user).await;
        log_outcome("unassign", PoolRef::SpotType(spot), user, &result);
        result
    }

    /// Applies the spot part of a user update.
    ///
    /// Only a real change touches the pool; re-saving the same spot type
    /// succeeds even when it is full.
    pub async fn apply_spot_change(
        &self,
        user: &User,
        change: SpotChange,
    ) -> Result<CapacityCheck, AllocationError> {
        let check = capacity_check_for(user.spot_type_id, change);
        match check {
            CapacityCheck::Unchanged => {
                debug!(user_id = %user.id, "spot type unchanged");
            }
            CapacityCheck::Clear => {
                self.store.clear_spot(user.id).await?;
                info!(user_id = %user.id, "spot type cleared");
            }
            CapacityCheck::Claim(spot) => {
                self.assign_spot(spot, user.id).await?;
            }
        }
        Ok(check)
    }

    pub async fn enroll(&self, shift: ShiftId, user: UserId) -> Result<Occupancy, AllocationError> {
        let result = self.store.enroll(shift, user).await;
        log_outcome("enroll", PoolRef::Shift(shift), user, &result);
        result
    }

    pub async fn withdraw(
        &self,
        shift: ShiftId,
        user: UserId,
    ) -> Result<Occupancy, AllocationError> {
        let result = self.store.withdraw(shift, user).await;
        log_outcome("withdraw", PoolRef::Shift(shift), user, &result);
        result
    }

    /// Reads the live occupancy of a pool.
    pub async fn current_occupancy(&self, pool: PoolRef) -> Result<Occupancy, AllocationError> {
        match pool {
            PoolRef::SpotType(id) => self
                .store
                .get_spot_type(id)
                .await?
                .map(|s| s.occupancy())
                .ok_or(AllocationError::PoolNotFound(pool)),
            PoolRef::Shift(id) => self
                .store
                .get_shift(id)
                .await?
                .map(|s| s.occupancy())
                .ok_or(AllocationError::PoolNotFound(pool)),
        }
    }
}

fn log_outcome(
    action: &'static str,
    pool: PoolRef,
    user: UserId,
    result: &Result<Occupancy, AllocationError>,
) {
    match result {
        Ok(occupancy) => info!(
            action,
            pool = %pool,
            user_id = %user,
            current = occupancy.current,
            limit = occupancy.limit,
            "allocation applied"
        ),
        Err(AllocationError::Storage(e)) => {
            tracing::error!(action, pool = %pool, user_id = %user, error = %e, "allocation storage failure")
        }
        Err(e) => warn!(action, pool = %pool, user_id = %user, error = %e, "allocation rejected"),
    }
}
