//! Domain records: users, spot types and shifts.
//!
//! Occupancy numbers (`currentCount`) are never stored. The read-side types
//! [`SpotTypeWithCount`] and [`ShiftWithRoster`] carry the value observed by
//! the store at query time and expose it only through getters.

use chrono::{DateTime, Utc};
use festreg_id::{ShiftId, SpotTypeId, UserId};
use serde::{Deserialize, Serialize};

// =============================================================================
// Users
// =============================================================================

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Reg,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Reg => "reg",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "reg" => Some(Role::Reg),
            _ => None,
        }
    }
}

/// A stored user account.
///
/// `spot_type_id` is only ever changed by the allocation service; store
/// implementations ignore it in [`crate::store::Store::save_user`].
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    /// Login email, always lowercase. `None` for admin-created placeholders.
    pub username: Option<String>,
    pub password_hash: Option<String>,
    pub role: Role,
    pub nickname: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    /// Solidarity amount this user adds on top of the price.
    pub soli_amount: i64,
    /// Whether this user receives the global solidarity credit.
    pub takes_soli: bool,
    pub amount_paid: i64,
    pub is_activated: bool,
    /// SHA-256 of the outstanding verification / reset token.
    pub verification_token_hash: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub spot_type_id: Option<SpotTypeId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Name shown on shift rosters.
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.nickname)
    }
}

/// A user together with its resolved spot type.
///
/// This is the input of the balance engine: when `user.spot_type_id` is set,
/// `spot_type` holds the matching record.
#[derive(Debug, Clone)]
pub struct UserWithSpot {
    pub user: User,
    pub spot_type: Option<SpotType>,
}

// =============================================================================
// Spot types
// =============================================================================

/// Stored columns of a capacity pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotType {
    pub id: SpotTypeId,
    pub name: String,
    pub price: i64,
    pub limit: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A spot type with the number of holders observed at read time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotTypeWithCount {
    #[serde(flatten)]
    pub spot_type: SpotType,
    current_count: i64,
}

impl SpotTypeWithCount {
    pub fn new(spot_type: SpotType, current_count: i64) -> Self {
        Self {
            spot_type,
            current_count,
        }
    }

    pub fn current_count(&self) -> i64 {
        self.current_count
    }

    pub fn occupancy(&self) -> Occupancy {
        Occupancy {
            current: self.current_count,
            limit: self.spot_type.limit,
        }
    }
}

// =============================================================================
// Shifts
// =============================================================================

/// Festival days a shift may be scheduled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ShiftDay {
    Freitag,
    Samstag,
    Sonntag,
    Montag,
}

impl ShiftDay {
    pub const ALL: [ShiftDay; 4] = [
        ShiftDay::Freitag,
        ShiftDay::Samstag,
        ShiftDay::Sonntag,
        ShiftDay::Montag,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftDay::Freitag => "Freitag",
            ShiftDay::Samstag => "Samstag",
            ShiftDay::Sonntag => "Sonntag",
            ShiftDay::Montag => "Montag",
        }
    }

    /// Exact match against the whitelist.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|day| day.as_str() == s)
    }
}

/// Stored columns of a shift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Shift {
    pub id: ShiftId,
    pub name: String,
    pub head_count: i32,
    pub points: i32,
    pub description: Option<String>,
    pub day: Option<ShiftDay>,
    pub start_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One enrolled user as shown on a roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftMember {
    pub user_id: UserId,
    pub display_name: String,
}

/// A shift loaded together with its current enrollees.
#[derive(Debug, Clone)]
pub struct ShiftWithRoster {
    pub shift: Shift,
    members: Vec<ShiftMember>,
}

impl ShiftWithRoster {
    pub fn new(shift: Shift, members: Vec<ShiftMember>) -> Self {
        Self { shift, members }
    }

    pub fn current_count(&self) -> i64 {
        self.members.len() as i64
    }

    pub fn user_names(&self) -> Vec<String> {
        self.members
            .iter()
            .map(|m| m.display_name.clone())
            .collect()
    }

    pub fn has_member(&self, user_id: UserId) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }

    pub fn occupancy(&self) -> Occupancy {
        Occupancy {
            current: self.current_count(),
            limit: i64::from(self.shift.head_count),
        }
    }
}

// =============================================================================
// Occupancy
// =============================================================================

/// Holders of a pool versus its capacity at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Occupancy {
    pub current: i64,
    pub limit: i64,
}

impl Occupancy {
    pub fn is_full(&self) -> bool {
        self.current >= self.limit
    }

    pub fn remaining(&self) -> i64 {
        (self.limit - self.current).max(0)
    }
}
