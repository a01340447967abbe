//! In-process store.
//!
//! All tables sit behind one mutex, which makes each operation, including
//! the occupancy check of an allocation, a single critical section.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use festreg_id::{ShiftId, SpotTypeId, UserId};
use tokio::sync::Mutex;

use super::{NewShift, NewSpotType, NewUser, Store, StoreError};
use crate::allocation::{admit, release, AllocationError, PoolRef};
use crate::model::{
    Occupancy, Shift, ShiftMember, ShiftWithRoster, SpotType, SpotTypeWithCount, User,
    UserWithSpot,
};

#[derive(Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    spot_types: BTreeMap<SpotTypeId, SpotType>,
    shifts: BTreeMap<ShiftId, Shift>,
    members: BTreeSet<(ShiftId, UserId)>,
    /// Zero-based batch row at which the next `insert_shifts` fails.
    fail_batch_at: Option<usize>,
}

impl Tables {
    fn with_spot(&self, user: &User) -> UserWithSpot {
        UserWithSpot {
            user: user.clone(),
            spot_type: user
                .spot_type_id
                .and_then(|id| self.spot_types.get(&id).cloned()),
        }
    }

    fn spot_count(&self, id: SpotTypeId) -> i64 {
        self.users
            .values()
            .filter(|u| u.spot_type_id == Some(id))
            .count() as i64
    }

    fn spot_occupancy(&self, id: SpotTypeId) -> Result<Occupancy, AllocationError> {
        let spot = self
            .spot_types
            .get(&id)
            .ok_or(AllocationError::PoolNotFound(PoolRef::SpotType(id)))?;
        Ok(Occupancy {
            current: self.spot_count(id),
            limit: spot.limit,
        })
    }

    fn roster(&self, shift: &Shift) -> ShiftWithRoster {
        let mut members: Vec<ShiftMember> = self
            .members
            .iter()
            .filter(|(s, _)| *s == shift.id)
            .filter_map(|(_, u)| self.users.get(u))
            .map(|u| ShiftMember {
                user_id: u.id,
                display_name: u.display_name().to_string(),
            })
            .collect();
        members.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        ShiftWithRoster::new(shift.clone(), members)
    }

    fn shift_occupancy(&self, id: ShiftId) -> Result<Occupancy, AllocationError> {
        let shift = self
            .shifts
            .get(&id)
            .ok_or(AllocationError::PoolNotFound(PoolRef::Shift(id)))?;
        let current = self.members.iter().filter(|(s, _)| *s == id).count() as i64;
        Ok(Occupancy {
            current,
            limit: i64::from(shift.head_count),
        })
    }

    fn check_unique(
        &self,
        id: UserId,
        nickname: &str,
        username: Option<&str>,
    ) -> Result<(), StoreError> {
        for other in self.users.values().filter(|u| u.id != id) {
            if other.nickname == nickname {
                return Err(StoreError::Conflict("users_nickname_key".to_string()));
            }
            if username.is_some() && other.username.as_deref() == username {
                return Err(StoreError::Conflict("users_username_key".to_string()));
            }
        }
        Ok(())
    }

    fn require_user(&self, id: UserId) -> Result<&User, AllocationError> {
        self.users.get(&id).ok_or(AllocationError::UserNotFound(id))
    }
}

/// Store that keeps everything in memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next batch shift insert fail at `row` (zero-based), after the
    /// preceding rows were staged.
    pub async fn fail_batch_insert_at(&self, row: usize) {
        self.tables.lock().await.fail_batch_at = Some(row);
    }
}

fn build_shift(new: NewShift) -> Shift {
    let now = Utc::now();
    Shift {
        id: ShiftId::new(),
        name: new.name,
        head_count: new.head_count,
        points: new.points,
        description: new.description,
        day: new.day,
        start_time: new.start_time,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let user = User {
            id: UserId::new(),
            username: new.username,
            password_hash: new.password_hash,
            role: new.role,
            nickname: new.nickname,
            full_name: new.full_name,
            phone: new.phone,
            soli_amount: 0,
            takes_soli: false,
            amount_paid: 0,
            is_activated: new.is_activated,
            verification_token_hash: new.verification_token_hash,
            token_expires_at: new.token_expires_at,
            last_login: None,
            spot_type_id: None,
            created_at: now,
            updated_at: now,
        };
        tables.check_unique(user.id, &user.nickname, user.username.as_deref())?;
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserWithSpot>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.get(&id).map(|u| tables.with_spot(u)))
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserWithSpot>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username.as_deref() == Some(username))
            .map(|u| tables.with_spot(u)))
    }

    async fn find_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.verification_token_hash.as_deref() == Some(token_hash))
            .cloned())
    }

    async fn list_users(&self) -> Result<Vec<UserWithSpot>, StoreError> {
        let tables = self.tables.lock().await;
        let mut users: Vec<UserWithSpot> =
            tables.users.values().map(|u| tables.with_spot(u)).collect();
        // None sorts first in Option's Ord, so reverse puts never-logged-in last.
        users.sort_by(|a, b| {
            b.user
                .last_login
                .cmp(&a.user.last_login)
                .then_with(|| a.user.nickname.cmp(&b.user.nickname))
        });
        Ok(users)
    }

    async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.check_unique(user.id, &user.nickname, user.username.as_deref())?;
        let stored = tables
            .users
            .get_mut(&user.id)
            .ok_or_else(|| StoreError::NotFound(user.id.to_string()))?;
        let spot_type_id = stored.spot_type_id;
        *stored = User {
            spot_type_id,
            updated_at: Utc::now(),
            ..user.clone()
        };
        Ok(())
    }

    async fn delete_user(&self, id: UserId) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let existed = tables.users.remove(&id).is_some();
        tables.members.retain(|(_, u)| *u != id);
        Ok(existed)
    }

    async fn insert_spot_type(&self, new: NewSpotType) -> Result<SpotType, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let spot_type = SpotType {
            id: SpotTypeId::new(),
            name: new.name,
            price: new.price,
            limit: new.limit,
            description: new.description,
            created_at: now,
            updated_at: now,
        };
        tables.spot_types.insert(spot_type.id, spot_type.clone());
        Ok(spot_type)
    }

    async fn get_spot_type(
        &self,
        id: SpotTypeId,
    ) -> Result<Option<SpotTypeWithCount>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .spot_types
            .get(&id)
            .map(|s| SpotTypeWithCount::new(s.clone(), tables.spot_count(id))))
    }

    async fn find_spot_type_by_name(&self, name: &str) -> Result<Option<SpotType>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .spot_types
            .values()
            .find(|s| s.name == name)
            .cloned())
    }

    async fn list_spot_types(&self) -> Result<Vec<SpotTypeWithCount>, StoreError> {
        let tables = self.tables.lock().await;
        let mut spots: Vec<SpotTypeWithCount> = tables
            .spot_types
            .values()
            .map(|s| SpotTypeWithCount::new(s.clone(), tables.spot_count(s.id)))
            .collect();
        spots.sort_by(|a, b| a.spot_type.name.cmp(&b.spot_type.name));
        Ok(spots)
    }

    async fn save_spot_type(&self, spot_type: &SpotType) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let stored = tables
            .spot_types
            .get_mut(&spot_type.id)
            .ok_or_else(|| StoreError::NotFound(spot_type.id.to_string()))?;
        *stored = SpotType {
            updated_at: Utc::now(),
            ..spot_type.clone()
        };
        Ok(())
    }

    async fn delete_spot_type(&self, id: SpotTypeId) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let existed = tables.spot_types.remove(&id).is_some();
        for user in tables.users.values_mut() {
            if user.spot_type_id == Some(id) {
                user.spot_type_id = None;
            }
        }
        Ok(existed)
    }

    async fn claim_spot(
        &self,
        spot: SpotTypeId,
        user: UserId,
    ) -> Result<Occupancy, AllocationError> {
        let mut tables = self.tables.lock().await;
        let occupancy = tables.spot_occupancy(spot)?;
        let already_member = tables.require_user(user)?.spot_type_id == Some(spot);
        admit(PoolRef::SpotType(spot), user, occupancy, already_member)?;

        if let Some(stored) = tables.users.get_mut(&user) {
            stored.spot_type_id = Some(spot);
            stored.updated_at = Utc::now();
        }
        Ok(Occupancy {
            current: occupancy.current + 1,
            ..occupancy
        })
    }

    async fn release_spot(
        &self,
        spot: SpotTypeId,
        user: UserId,
    ) -> Result<Occupancy, AllocationError> {
        let mut tables = self.tables.lock().await;
        let occupancy = tables.spot_occupancy(spot)?;
        let is_member = tables.require_user(user)?.spot_type_id == Some(spot);
        release(PoolRef::SpotType(spot), user, is_member)?;

        if let Some(stored) = tables.users.get_mut(&user) {
            stored.spot_type_id = None;
            stored.updated_at = Utc::now();
        }
        Ok(Occupancy {
            current: occupancy.current - 1,
            ..occupancy
        })
    }

    async fn clear_spot(&self, user: UserId) -> Result<(), AllocationError> {
        let mut tables = self.tables.lock().await;
        let stored = tables
            .users
            .get_mut(&user)
            .ok_or(AllocationError::UserNotFound(user))?;
        stored.spot_type_id = None;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_shift(&self, new: NewShift) -> Result<Shift, StoreError> {
        let mut tables = self.tables.lock().await;
        let shift = build_shift(new);
        tables.shifts.insert(shift.id, shift.clone());
        Ok(shift)
    }

    async fn insert_shifts(&self, batch: Vec<NewShift>) -> Result<Vec<Shift>, StoreError> {
        let mut tables = self.tables.lock().await;
        let fail_at = tables.fail_batch_at.take();

        let mut staged = Vec::with_capacity(batch.len());
        for (row, new) in batch.into_iter().enumerate() {
            if fail_at == Some(row) {
                return Err(StoreError::Unavailable(format!(
                    "insert of batch row {row} failed"
                )));
            }
            staged.push(build_shift(new));
        }

        for shift in &staged {
            tables.shifts.insert(shift.id, shift.clone());
        }
        Ok(staged)
    }

    async fn get_shift(&self, id: ShiftId) -> Result<Option<ShiftWithRoster>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.shifts.get(&id).map(|s| tables.roster(s)))
    }

    async fn list_shifts(&self) -> Result<Vec<ShiftWithRoster>, StoreError> {
        let tables = self.tables.lock().await;
        let mut shifts: Vec<ShiftWithRoster> =
            tables.shifts.values().map(|s| tables.roster(s)).collect();
        shifts.sort_by(|a, b| {
            (a.shift.created_at, a.shift.id).cmp(&(b.shift.created_at, b.shift.id))
        });
        Ok(shifts)
    }

    async fn save_shift(&self, shift: &Shift) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let stored = tables
            .shifts
            .get_mut(&shift.id)
            .ok_or_else(|| StoreError::NotFound(shift.id.to_string()))?;
        *stored = Shift {
            updated_at: Utc::now(),
            ..shift.clone()
        };
        Ok(())
    }

    async fn delete_shift(&self, id: ShiftId) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let existed = tables.shifts.remove(&id).is_some();
        tables.members.retain(|(s, _)| *s != id);
        Ok(existed)
    }

    async fn enroll(&self, shift: ShiftId, user: UserId) -> Result<Occupancy, AllocationError> {
        let mut tables = self.tables.lock().await;
        let occupancy = tables.shift_occupancy(shift)?;
        tables.require_user(user)?;
        let already_member = tables.members.contains(&(shift, user));
        admit(PoolRef::Shift(shift), user, occupancy, already_member)?;

        tables.members.insert((shift, user));
        Ok(Occupancy {
            current: occupancy.current + 1,
            ..occupancy
        })
    }

    async fn withdraw(&self, shift: ShiftId, user: UserId) -> Result<Occupancy, AllocationError> {
        let mut tables = self.tables.lock().await;
        let occupancy = tables.shift_occupancy(shift)?;
        tables.require_user(user)?;
        let is_member = tables.members.contains(&(shift, user));
        release(PoolRef::Shift(shift), user, is_member)?;

        tables.members.remove(&(shift, user));
        Ok(Occupancy {
            current: occupancy.current - 1,
            ..occupancy
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
