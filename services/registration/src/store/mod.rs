//! Persistence interface.
//!
//! Two implementations exist:
//! - [`PgStore`]: Postgres via sqlx, used in production
//! - [`MemoryStore`]: process-local, used by tests and `FESTREG_STORE=memory`
//!
//! Membership changes (`claim_spot`, `release_spot`, `clear_spot`, `enroll`,
//! `withdraw`) are the only writes that touch a pool relation. Each one runs
//! its occupancy read, the admission decision from [`crate::allocation`] and
//! the write inside a single critical section, so concurrent callers cannot
//! both take the last slot.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use festreg_id::{ShiftId, SpotTypeId, UserId};
use thiserror::Error;

use crate::allocation::AllocationError;
use crate::model::{
    Occupancy, Role, Shift, ShiftDay, ShiftWithRoster, SpotType, SpotTypeWithCount, User,
    UserWithSpot,
};

/// Storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint was violated (nickname or username taken).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The row to update or delete does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored value could not be decoded into a domain type.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Injected by [`MemoryStore`] to exercise rollback paths.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.code().as_deref() == Some("23505") {
                let constraint = db_err.constraint().unwrap_or("unique").to_string();
                return StoreError::Conflict(constraint);
            }
        }
        StoreError::Query(e)
    }
}

/// Fields of a user about to be created.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: Option<String>,
    pub password_hash: Option<String>,
    pub role: Role,
    pub nickname: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub is_activated: bool,
    pub verification_token_hash: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

/// Fields of a spot type about to be created.
#[derive(Debug, Clone)]
pub struct NewSpotType {
    pub name: String,
    pub price: i64,
    pub limit: i64,
    pub description: Option<String>,
}

/// Fields of a shift about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewShift {
    pub name: String,
    pub head_count: i32,
    pub points: i32,
    pub description: Option<String>,
    pub day: Option<ShiftDay>,
    pub start_time: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError>;

    async fn get_user(&self, id: UserId) -> Result<Option<UserWithSpot>, StoreError>;

    /// Looks up by lowercase login email.
    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserWithSpot>, StoreError>;

    async fn find_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>, StoreError>;

    /// All users, most recent login first.
    async fn list_users(&self) -> Result<Vec<UserWithSpot>, StoreError>;

    /// Persists every column except `spot_type_id`.
    async fn save_user(&self, user: &User) -> Result<(), StoreError>;

    /// Returns false if no such user existed.
    async fn delete_user(&self, id: UserId) -> Result<bool, StoreError>;

    // -------------------------------------------------------------------------
    // Spot types
    // -------------------------------------------------------------------------

    async fn insert_spot_type(&self, new: NewSpotType) -> Result<SpotType, StoreError>;

    /// Loads a spot type with its live holder count.
    async fn get_spot_type(&self, id: SpotTypeId)
        -> Result<Option<SpotTypeWithCount>, StoreError>;

    async fn find_spot_type_by_name(&self, name: &str) -> Result<Option<SpotType>, StoreError>;

    async fn list_spot_types(&self) -> Result<Vec<SpotTypeWithCount>, StoreError>;

    async fn save_spot_type(&self, spot_type: &SpotType) -> Result<(), StoreError>;

    /// Holders of a deleted spot type fall back to "no spot type".
    async fn delete_spot_type(&self, id: SpotTypeId) -> Result<bool, StoreError>;

    // -------------------------------------------------------------------------
    // Spot allocation
    // -------------------------------------------------------------------------

    /// Moves `user` into `spot` if the pool admits a new holder.
    ///
    /// Returns the occupancy after the write.
    async fn claim_spot(&self, spot: SpotTypeId, user: UserId)
        -> Result<Occupancy, AllocationError>;

    /// Removes `user` from `spot`; fails with `NotMember` if it holds another
    /// spot type or none.
    async fn release_spot(
        &self,
        spot: SpotTypeId,
        user: UserId,
    ) -> Result<Occupancy, AllocationError>;

    /// Drops whatever spot type `user` holds. Never capacity constrained.
    async fn clear_spot(&self, user: UserId) -> Result<(), AllocationError>;

    // -------------------------------------------------------------------------
    // Shifts
    // -------------------------------------------------------------------------

    async fn insert_shift(&self, new: NewShift) -> Result<Shift, StoreError>;

    /// Inserts every shift or none of them.
    async fn insert_shifts(&self, batch: Vec<NewShift>) -> Result<Vec<Shift>, StoreError>;

    async fn get_shift(&self, id: ShiftId) -> Result<Option<ShiftWithRoster>, StoreError>;

    async fn list_shifts(&self) -> Result<Vec<ShiftWithRoster>, StoreError>;

    async fn save_shift(&self, shift: &Shift) -> Result<(), StoreError>;

    async fn delete_shift(&self, id: ShiftId) -> Result<bool, StoreError>;

    // -------------------------------------------------------------------------
    // Shift enrollment
    // -------------------------------------------------------------------------

    async fn enroll(&self, shift: ShiftId, user: UserId) -> Result<Occupancy, AllocationError>;

    async fn withdraw(&self, shift: ShiftId, user: UserId) -> Result<Occupancy, AllocationError>;

    // -------------------------------------------------------------------------
    // Health
    // -------------------------------------------------------------------------

    async fn health_check(&self) -> Result<(), StoreError>;
}
