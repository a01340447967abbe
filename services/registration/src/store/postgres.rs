//! Postgres store.
//!
//! Ids are stored as their `{prefix}_{ulid}` text form. Occupancy is never a
//! column: spot type counts come from a correlated `COUNT(*)` over `users`,
//! shift counts from `shift_members`.
//!
//! Allocation writes lock the pool row (`SELECT ... FOR UPDATE`) before
//! counting, so two transactions racing for the last slot serialize on that
//! lock and the second one counts the first one's committed write.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use festreg_id::{ShiftId, SpotTypeId, UserId};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};

use super::{NewShift, NewSpotType, NewUser, Store, StoreError};
use crate::allocation::{admit, release, AllocationError, PoolRef};
use crate::model::{
    Occupancy, Role, Shift, ShiftDay, ShiftMember, ShiftWithRoster, SpotType, SpotTypeWithCount,
    User, UserWithSpot,
};

const USER_SELECT: &str = r#"
    SELECT u.id, u.username, u.password_hash, u.role, u.nickname, u.full_name, u.phone,
           u.soli_amount, u.takes_soli, u.amount_paid, u.is_activated,
           u.verification_token_hash, u.token_expires_at, u.last_login, u.spot_type_id,
           u.created_at, u.updated_at,
           s.name AS spot_name, s.price AS spot_price, s.spot_limit AS spot_limit,
           s.description AS spot_description, s.created_at AS spot_created_at,
           s.updated_at AS spot_updated_at
    FROM users u
    LEFT JOIN spot_types s ON s.id = u.spot_type_id
"#;

const SPOT_TYPE_SELECT: &str = r#"
    SELECT s.id, s.name, s.price, s.spot_limit, s.description, s.created_at, s.updated_at,
           (SELECT COUNT(*) FROM users u WHERE u.spot_type_id = s.id) AS current_count
    FROM spot_types s
"#;

const SHIFT_SELECT: &str = r#"
    SELECT id, name, head_count, points, description, day, start_time, created_at, updated_at
    FROM shifts
"#;

const MEMBER_SELECT: &str = r#"
    SELECT m.shift_id, u.id AS user_id,
           COALESCE(NULLIF(TRIM(u.full_name), ''), u.nickname) AS display_name
    FROM shift_members m
    JOIN users u ON u.id = m.user_id
"#;

fn parse_col<T>(column: &str, value: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("{column} '{value}': {e}")))
}

// =============================================================================
// Rows
// =============================================================================

struct UserRow {
    id: String,
    username: Option<String>,
    password_hash: Option<String>,
    role: String,
    nickname: String,
    full_name: Option<String>,
    phone: Option<String>,
    soli_amount: i64,
    takes_soli: bool,
    amount_paid: i64,
    is_activated: bool,
    verification_token_hash: Option<String>,
    token_expires_at: Option<DateTime<Utc>>,
    last_login: Option<DateTime<Utc>>,
    spot_type_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    spot_name: Option<String>,
    spot_price: Option<i64>,
    spot_limit: Option<i64>,
    spot_description: Option<String>,
    spot_created_at: Option<DateTime<Utc>>,
    spot_updated_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            password_hash: row.try_get("password_hash")?,
            role: row.try_get("role")?,
            nickname: row.try_get("nickname")?,
            full_name: row.try_get("full_name")?,
            phone: row.try_get("phone")?,
            soli_amount: row.try_get("soli_amount")?,
            takes_soli: row.try_get("takes_soli")?,
            amount_paid: row.try_get("amount_paid")?,
            is_activated: row.try_get("is_activated")?,
            verification_token_hash: row.try_get("verification_token_hash")?,
            token_expires_at: row.try_get("token_expires_at")?,
            last_login: row.try_get("last_login")?,
            spot_type_id: row.try_get("spot_type_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            spot_name: row.try_get("spot_name")?,
            spot_price: row.try_get("spot_price")?,
            spot_limit: row.try_get("spot_limit")?,
            spot_description: row.try_get("spot_description")?,
            spot_created_at: row.try_get("spot_created_at")?,
            spot_updated_at: row.try_get("spot_updated_at")?,
        })
    }
}

impl TryFrom<UserRow> for UserWithSpot {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let spot_type_id: Option<SpotTypeId> = row
            .spot_type_id
            .as_deref()
            .map(|id| parse_col("spot_type_id", id))
            .transpose()?;

        let spot_type = match (
            spot_type_id,
            row.spot_name,
            row.spot_price,
            row.spot_limit,
            row.spot_created_at,
            row.spot_updated_at,
        ) {
            (Some(id), Some(name), Some(price), Some(limit), Some(created_at), Some(updated_at)) => {
                Some(SpotType {
                    id,
                    name,
                    price,
                    limit,
                    description: row.spot_description,
                    created_at,
                    updated_at,
                })
            }
            _ => None,
        };

        let role = Role::parse(&row.role)
            .ok_or_else(|| StoreError::Corrupt(format!("role '{}'", row.role)))?;

        Ok(UserWithSpot {
            user: User {
                id: parse_col("id", &row.id)?,
                username: row.username,
                password_hash: row.password_hash,
                role,
                nickname: row.nickname,
                full_name: row.full_name,
                phone: row.phone,
                soli_amount: row.soli_amount,
                takes_soli: row.takes_soli,
                amount_paid: row.amount_paid,
                is_activated: row.is_activated,
                verification_token_hash: row.verification_token_hash,
                token_expires_at: row.token_expires_at,
                last_login: row.last_login,
                spot_type_id,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
            spot_type,
        })
    }
}

struct SpotTypeRow {
    id: String,
    name: String,
    price: i64,
    spot_limit: i64,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    current_count: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for SpotTypeRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            price: row.try_get("price")?,
            spot_limit: row.try_get("spot_limit")?,
            description: row.try_get("description")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            current_count: row.try_get("current_count")?,
        })
    }
}

impl SpotTypeRow {
    fn into_spot_type(self) -> Result<(SpotType, i64), StoreError> {
        let spot_type = SpotType {
            id: parse_col("id", &self.id)?,
            name: self.name,
            price: self.price,
            limit: self.spot_limit,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        Ok((spot_type, self.current_count))
    }
}

struct ShiftRow {
    id: String,
    name: String,
    head_count: i32,
    points: i32,
    description: Option<String>,
    day: Option<String>,
    start_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ShiftRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            head_count: row.try_get("head_count")?,
            points: row.try_get("points")?,
            description: row.try_get("description")?,
            day: row.try_get("day")?,
            start_time: row.try_get("start_time")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<ShiftRow> for Shift {
    type Error = StoreError;

    fn try_from(row: ShiftRow) -> Result<Self, Self::Error> {
        let day = row
            .day
            .as_deref()
            .map(|d| ShiftDay::parse(d).ok_or_else(|| StoreError::Corrupt(format!("day '{d}'"))))
            .transpose()?;
        Ok(Shift {
            id: parse_col("id", &row.id)?,
            name: row.name,
            head_count: row.head_count,
            points: row.points,
            description: row.description,
            day,
            start_time: row.start_time,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

struct MemberRow {
    shift_id: String,
    user_id: String,
    display_name: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for MemberRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            shift_id: row.try_get("shift_id")?,
            user_id: row.try_get("user_id")?,
            display_name: row.try_get("display_name")?,
        })
    }
}

// =============================================================================
// Store
// =============================================================================

/// Store backed by a Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn spot_occupancy_locked(
        tx: &mut Transaction<'_, Postgres>,
        spot: SpotTypeId,
    ) -> Result<Occupancy, AllocationError> {
        let limit: Option<i64> =
            sqlx::query_scalar("SELECT spot_limit FROM spot_types WHERE id = $1 FOR UPDATE")
                .bind(spot.to_string())
                .fetch_optional(&mut **tx)
                .await
                .map_err(StoreError::from)?;
        let limit = limit.ok_or(AllocationError::PoolNotFound(PoolRef::SpotType(spot)))?;

        let current: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE spot_type_id = $1")
            .bind(spot.to_string())
            .fetch_one(&mut **tx)
            .await
            .map_err(StoreError::from)?;

        Ok(Occupancy { current, limit })
    }

    async fn held_spot_locked(
        tx: &mut Transaction<'_, Postgres>,
        user: UserId,
    ) -> Result<Option<String>, AllocationError> {
        let held: Option<Option<String>> =
            sqlx::query_scalar("SELECT spot_type_id FROM users WHERE id = $1 FOR UPDATE")
                .bind(user.to_string())
                .fetch_optional(&mut **tx)
                .await
                .map_err(StoreError::from)?;
        held.ok_or(AllocationError::UserNotFound(user))
    }

    async fn shift_occupancy_locked(
        tx: &mut Transaction<'_, Postgres>,
        shift: ShiftId,
        user: UserId,
    ) -> Result<(Occupancy, bool), AllocationError> {
        let head_count: Option<i32> =
            sqlx::query_scalar("SELECT head_count FROM shifts WHERE id = $1 FOR UPDATE")
                .bind(shift.to_string())
                .fetch_optional(&mut **tx)
                .await
                .map_err(StoreError::from)?;
        let head_count = head_count.ok_or(AllocationError::PoolNotFound(PoolRef::Shift(shift)))?;

        let user_exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
                .bind(user.to_string())
                .fetch_one(&mut **tx)
                .await
                .map_err(StoreError::from)?;
        if !user_exists {
            return Err(AllocationError::UserNotFound(user));
        }

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS current,
                   COALESCE(BOOL_OR(user_id = $2), FALSE) AS is_member
            FROM shift_members
            WHERE shift_id = $1
            "#,
        )
        .bind(shift.to_string())
        .bind(user.to_string())
        .fetch_one(&mut **tx)
        .await
        .map_err(StoreError::from)?;
        let current: i64 = row.try_get("current").map_err(StoreError::from)?;
        let is_member: bool = row.try_get("is_member").map_err(StoreError::from)?;

        Ok((
            Occupancy {
                current,
                limit: i64::from(head_count),
            },
            is_member,
        ))
    }

    /// Rosters keyed by raw shift id, optionally for a single shift.
    async fn rosters(
        &self,
        shift: Option<ShiftId>,
    ) -> Result<HashMap<String, Vec<ShiftMember>>, StoreError> {
        let rows = match shift {
            Some(id) => {
                let sql = format!("{MEMBER_SELECT} WHERE m.shift_id = $1 ORDER BY display_name");
                sqlx::query_as::<_, MemberRow>(&sql)
                    .bind(id.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!("{MEMBER_SELECT} ORDER BY display_name");
                sqlx::query_as::<_, MemberRow>(&sql)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut rosters: HashMap<String, Vec<ShiftMember>> = HashMap::new();
        for row in rows {
            rosters.entry(row.shift_id).or_default().push(ShiftMember {
                user_id: parse_col("user_id", &row.user_id)?,
                display_name: row.display_name,
            });
        }
        Ok(rosters)
    }

    async fn insert_shift_in(
        tx: &mut Transaction<'_, Postgres>,
        new: NewShift,
    ) -> Result<Shift, StoreError> {
        let row = sqlx::query_as::<_, ShiftRow>(
            r#"
            INSERT INTO shifts (id, name, head_count, points, description, day, start_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, name, head_count, points, description, day, start_time,
                      created_at, updated_at
            "#,
        )
        .bind(ShiftId::new().to_string())
        .bind(&new.name)
        .bind(new.head_count)
        .bind(new.points)
        .bind(&new.description)
        .bind(new.day.map(|d| d.as_str()))
        .bind(new.start_time)
        .fetch_one(&mut **tx)
        .await?;
        row.try_into()
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError> {
        let id = UserId::new();
        sqlx::query(
            r#"
            INSERT INTO users (
                id, username, password_hash, role, nickname, full_name, phone,
                is_activated, verification_token_hash, token_expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(id.to_string())
        .bind(&new.username)
        .bind(&new.password_hash)
        .bind(new.role.as_str())
        .bind(&new.nickname)
        .bind(&new.full_name)
        .bind(&new.phone)
        .bind(new.is_activated)
        .bind(&new.verification_token_hash)
        .bind(new.token_expires_at)
        .execute(&self.pool)
        .await?;

        self.get_user(id)
            .await?
            .map(|entry| entry.user)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserWithSpot>, StoreError> {
        let sql = format!("{USER_SELECT} WHERE u.id = $1");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(UserWithSpot::try_from)
            .transpose()
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserWithSpot>, StoreError> {
        let sql = format!("{USER_SELECT} WHERE u.username = $1");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .map(UserWithSpot::try_from)
            .transpose()
    }

    async fn find_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("{USER_SELECT} WHERE u.verification_token_hash = $1");
        let entry = sqlx::query_as::<_, UserRow>(&sql)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?
            .map(UserWithSpot::try_from)
            .transpose()?;
        Ok(entry.map(|e| e.user))
    }

    async fn list_users(&self) -> Result<Vec<UserWithSpot>, StoreError> {
        let sql = format!("{USER_SELECT} ORDER BY u.last_login DESC NULLS LAST, u.nickname");
        sqlx::query_as::<_, UserRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(UserWithSpot::try_from)
            .collect()
    }

    async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                username = $2,
                password_hash = $3,
                role = $4,
                nickname = $5,
                full_name = $6,
                phone = $7,
                soli_amount = $8,
                takes_soli = $9,
                amount_paid = $10,
                is_activated = $11,
                verification_token_hash = $12,
                token_expires_at = $13,
                last_login = $14,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(&user.nickname)
        .bind(&user.full_name)
        .bind(&user.phone)
        .bind(user.soli_amount)
        .bind(user.takes_soli)
        .bind(user.amount_paid)
        .bind(user.is_activated)
        .bind(&user.verification_token_hash)
        .bind(user.token_expires_at)
        .bind(user.last_login)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(user.id.to_string()));
        }
        Ok(())
    }

    async fn delete_user(&self, id: UserId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_spot_type(&self, new: NewSpotType) -> Result<SpotType, StoreError> {
        let row = sqlx::query_as::<_, SpotTypeRow>(
            r#"
            INSERT INTO spot_types (id, name, price, spot_limit, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, price, spot_limit, description, created_at, updated_at,
                      0::bigint AS current_count
            "#,
        )
        .bind(SpotTypeId::new().to_string())
        .bind(&new.name)
        .bind(new.price)
        .bind(new.limit)
        .bind(&new.description)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_spot_type()?.0)
    }

    async fn get_spot_type(
        &self,
        id: SpotTypeId,
    ) -> Result<Option<SpotTypeWithCount>, StoreError> {
        let sql = format!("{SPOT_TYPE_SELECT} WHERE s.id = $1");
        let row = sqlx::query_as::<_, SpotTypeRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let (spot, count) = r.into_spot_type()?;
            Ok(SpotTypeWithCount::new(spot, count))
        })
        .transpose()
    }

    async fn find_spot_type_by_name(&self, name: &str) -> Result<Option<SpotType>, StoreError> {
        let sql = format!("{SPOT_TYPE_SELECT} WHERE s.name = $1 ORDER BY s.created_at LIMIT 1");
        let row = sqlx::query_as::<_, SpotTypeRow>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.into_spot_type().map(|(spot, _)| spot))
            .transpose()
    }

    async fn list_spot_types(&self) -> Result<Vec<SpotTypeWithCount>, StoreError> {
        let sql = format!("{SPOT_TYPE_SELECT} ORDER BY s.name");
        sqlx::query_as::<_, SpotTypeRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|r| {
                let (spot, count) = r.into_spot_type()?;
                Ok(SpotTypeWithCount::new(spot, count))
            })
            .collect()
    }

    async fn save_spot_type(&self, spot_type: &SpotType) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE spot_types
            SET name = $2, price = $3, spot_limit = $4, description = $5, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(spot_type.id.to_string())
        .bind(&spot_type.name)
        .bind(spot_type.price)
        .bind(spot_type.limit)
        .bind(&spot_type.description)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(spot_type.id.to_string()));
        }
        Ok(())
    }

    async fn delete_spot_type(&self, id: SpotTypeId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM spot_types WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_spot(
        &self,
        spot: SpotTypeId,
        user: UserId,
    ) -> Result<Occupancy, AllocationError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        let occupancy = Self::spot_occupancy_locked(&mut tx, spot).await?;
        let held = Self::held_spot_locked(&mut tx, user).await?;
        let already_member = held.as_deref() == Some(spot.to_string().as_str());
        admit(PoolRef::SpotType(spot), user, occupancy, already_member)?;

        sqlx::query("UPDATE users SET spot_type_id = $1, updated_at = now() WHERE id = $2")
            .bind(spot.to_string())
            .bind(user.to_string())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        tx.commit().await.map_err(StoreError::from)?;

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
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        let occupancy = Self::spot_occupancy_locked(&mut tx, spot).await?;
        let held = Self::held_spot_locked(&mut tx, user).await?;
        let is_member = held.as_deref() == Some(spot.to_string().as_str());
        release(PoolRef::SpotType(spot), user, is_member)?;

        sqlx::query("UPDATE users SET spot_type_id = NULL, updated_at = now() WHERE id = $1")
            .bind(user.to_string())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        tx.commit().await.map_err(StoreError::from)?;

        Ok(Occupancy {
            current: occupancy.current - 1,
            ..occupancy
        })
    }

    async fn clear_spot(&self, user: UserId) -> Result<(), AllocationError> {
        let result =
            sqlx::query("UPDATE users SET spot_type_id = NULL, updated_at = now() WHERE id = $1")
                .bind(user.to_string())
                .execute(&self.pool)
                .await
                .map_err(StoreError::from)?;
        if result.rows_affected() == 0 {
            return Err(AllocationError::UserNotFound(user));
        }
        Ok(())
    }

    async fn insert_shift(&self, new: NewShift) -> Result<Shift, StoreError> {
        let mut tx = self.pool.begin().await?;
        let shift = Self::insert_shift_in(&mut tx, new).await?;
        tx.commit().await?;
        Ok(shift)
    }

    async fn insert_shifts(&self, batch: Vec<NewShift>) -> Result<Vec<Shift>, StoreError> {
        // Dropping the transaction on an early return rolls the batch back.
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(batch.len());
        for new in batch {
            inserted.push(Self::insert_shift_in(&mut tx, new).await?);
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn get_shift(&self, id: ShiftId) -> Result<Option<ShiftWithRoster>, StoreError> {
        let sql = format!("{SHIFT_SELECT} WHERE id = $1");
        let Some(row) = sqlx::query_as::<_, ShiftRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let mut rosters = self.rosters(Some(id)).await?;
        let members = rosters.remove(&row.id).unwrap_or_default();
        Ok(Some(ShiftWithRoster::new(row.try_into()?, members)))
    }

    async fn list_shifts(&self) -> Result<Vec<ShiftWithRoster>, StoreError> {
        let sql = format!("{SHIFT_SELECT} ORDER BY created_at, id");
        let rows = sqlx::query_as::<_, ShiftRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        let mut rosters = self.rosters(None).await?;
        rows.into_iter()
            .map(|row| {
                let members = rosters.remove(&row.id).unwrap_or_default();
                Ok(ShiftWithRoster::new(row.try_into()?, members))
            })
            .collect()
    }

    async fn save_shift(&self, shift: &Shift) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE shifts
            SET name = $2, head_count = $3, points = $4, description = $5,
                day = $6, start_time = $7, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(shift.id.to_string())
        .bind(&shift.name)
        .bind(shift.head_count)
        .bind(shift.points)
        .bind(&shift.description)
        .bind(shift.day.map(|d| d.as_str()))
        .bind(shift.start_time)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(shift.id.to_string()));
        }
        Ok(())
    }

    async fn delete_shift(&self, id: ShiftId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM shifts WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn enroll(&self, shift: ShiftId, user: UserId) -> Result<Occupancy, AllocationError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        let (occupancy, is_member) = Self::shift_occupancy_locked(&mut tx, shift, user).await?;
        admit(PoolRef::Shift(shift), user, occupancy, is_member)?;

        sqlx::query("INSERT INTO shift_members (shift_id, user_id) VALUES ($1, $2)")
            .bind(shift.to_string())
            .bind(user.to_string())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        tx.commit().await.map_err(StoreError::from)?;

        Ok(Occupancy {
            current: occupancy.current + 1,
            ..occupancy
        })
    }

    async fn withdraw(&self, shift: ShiftId, user: UserId) -> Result<Occupancy, AllocationError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        let (occupancy, is_member) = Self::shift_occupancy_locked(&mut tx, shift, user).await?;
        release(PoolRef::Shift(shift), user, is_member)?;

        sqlx::query("DELETE FROM shift_members WHERE shift_id = $1 AND user_id = $2")
            .bind(shift.to_string())
            .bind(user.to_string())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        tx.commit().await.map_err(StoreError::from)?;

        Ok(Occupancy {
            current: occupancy.current - 1,
            ..occupancy
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
