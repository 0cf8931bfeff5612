//! Field adapters for the strict wire schema.
//!
//! serde treats a missing `Option` field and an explicit `null` the same way.
//! The wire schema does not: optional fields must be absent rather than null,
//! and nullable fields must still be present.

use serde::{Deserialize, Deserializer};

/// Optional field: absent means `None` (with `#[serde(default)]`), `null` is rejected.
pub(crate) fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Required field whose value may be `null`.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer)
}
