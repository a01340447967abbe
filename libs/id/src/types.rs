//! Id types for every festreg resource.

use crate::define_id;

define_id!(
    /// A registered (or admin-created) account.
    UserId,
    "usr"
);

define_id!(
    /// A capacity pool users hold at most one of (lodging tier).
    SpotTypeId,
    "spot"
);

define_id!(
    /// A time-scoped task slot several users can join.
    ShiftId,
    "shf"
);

define_id!(
    /// Correlates log lines and problem responses for one HTTP request.
    RequestId,
    "req"
);
