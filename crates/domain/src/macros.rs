//! Macro for implementing Display and FromStr for category and status enums
//!
//! Sync messages persist their direction, operation and status as text. This
//! macro keeps the text form of each closed enum in one place and turns an
//! unrecognized value into a typed [`crate::DualSyncError::InvalidInput`].
//!
//! # Example
//!
//! ```rust
//! use dualsync_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum LegState {
//!     Queued,
//!     Applied,
//! }
//!
//! impl_domain_status_conversions!(LegState {
//!     Queued => "queued",
//!     Applied => "applied",
//! });
//!
//! assert_eq!("APPLIED".parse::<LegState>().unwrap(), LegState::Applied);
//! ```

/// Implements Display and FromStr traits for category/status enums
///
/// - Display writes the canonical lowercase string
/// - FromStr trims and matches case-insensitively; hyphens are accepted in
///   place of underscores (`bulk-insert` parses as `bulk_insert`)
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:literal),+ $(,)? }) => {
        impl $enum_name {
            /// Canonical persisted string for this variant.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = $crate::errors::DualSyncError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                let normalized = s.trim().to_lowercase().replace('-', "_");
                match normalized.as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err($crate::errors::DualSyncError::InvalidInput(
                        format!("Invalid {}: {}", stringify!($enum_name), s),
                    )),
                }
            }
        }
    };
}
