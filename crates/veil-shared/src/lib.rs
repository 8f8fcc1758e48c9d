//! # veil-shared
//!
//! Types shared between the Veil store and server: the real-time wire
//! protocol, the group theme enumeration, and the generators for join codes
//! and per-group anonymous display names.

pub mod names;
pub mod protocol;
pub mod theme;

pub use theme::Theme;
