//! Storage-boundary conversions for values whose column type differs from
//! their logical type.

use crate::services::error::IdentityError;

/// Resident-key text stored for credentials that require a resident key.
pub const RESIDENT_KEY_REQUIRED: &str = "required";

/// Narrow a stored BIGINT into the logical u32 domain.
pub fn u32_from_i64_checked(value: i64) -> Result<u32, IdentityError> {
    u32::try_from(value).map_err(|_| IdentityError::OutOfRange(value))
}

/// Narrow an optional stored BIGINT, keeping NULL as `None`.
pub fn opt_u32_from_i64_checked(value: Option<i64>) -> Result<Option<u32>, IdentityError> {
    value.map(u32_from_i64_checked).transpose()
}

/// Widen a u32 into the stored BIGINT domain.
pub fn u32_to_i64(value: u32) -> i64 {
    i64::from(value)
}

pub fn encode_resident_key(required: bool) -> &'static str {
    if required { RESIDENT_KEY_REQUIRED } else { "" }
}

/// Any non-blank text counts as a resident key.
pub fn decode_resident_key(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}
