//! Macro for implementing Display and FromStr for wire-named enums
//!
//! Operation kinds, notification kinds and connection states are stored in
//! SQLite, sent over HTTP and decoded from push frames by name. This macro
//! gives each of them one table of names backing both Display and FromStr,
//! with case-insensitive parsing.
//!
//! # Example
//!
//! ```rust
//! use tallysync_domain::impl_wire_name_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum DrainOutcome {
//!     Drained,
//!     Halted,
//!     Offline,
//! }
//!
//! impl_wire_name_conversions!(DrainOutcome {
//!     Drained => "drained",
//!     Halted => "halted",
//!     Offline => "offline",
//! });
//! ```

/// Implements Display and FromStr traits for enums with a fixed wire name
///
/// This macro generates:
/// - Display trait: writes the variant's wire name
/// - FromStr trait: parses case-insensitive strings to enum variants
///
/// # Arguments
///
/// * `$enum_name` - The name of the enum type
/// * `$variant => $str` - Mapping of enum variants to their string
///   representations
///
/// # Features
///
/// - Case-insensitive parsing (e.g., "EXPENSE", "expense", "Expense" all work)
/// - Wire names are used verbatim (kebab-case names work as-is)
/// - Descriptive error messages with enum name
#[macro_export]
macro_rules! impl_wire_name_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => write!(f, $str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}
