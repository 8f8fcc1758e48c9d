//! Anonymous display names and group join codes.
//!
//! Anonymous names are drawn from a fixed adjective x noun x number space.
//! Uniqueness is scoped to a single group and enforced at join time by the
//! caller (retry on collision, bounded by [`MAX_NAME_ATTEMPTS`]).

use rand::Rng;
use uuid::Uuid;

/// How many candidate names a join attempt may try before giving up.
pub const MAX_NAME_ATTEMPTS: usize = 10;

/// Length of a group join code.
pub const CODE_LEN: usize = 6;

const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const ADJECTIVES: &[&str] = &[
    "Happy", "Cheerful", "Bright", "Swift", "Gentle", "Brave", "Cool", "Wise",
    "Lucky", "Noble", "Bold", "Calm", "Kind", "Sunny", "Clever", "Witty",
    "Mighty", "Serene", "Jolly", "Proud", "Fierce", "Silent", "Golden", "Silver",
];

const NOUNS: &[&str] = &[
    "Panda", "Dragon", "Phoenix", "Tiger", "Eagle", "Wolf", "Fox", "Bear",
    "Lion", "Hawk", "Owl", "Dolphin", "Whale", "Butterfly", "Falcon", "Leopard",
    "Shark", "Raven", "Swan", "Deer", "Otter", "Lynx", "Koala", "Penguin",
];

/// Draw a random anonymous name candidate, e.g. `"Silent Raven 42"`.
pub fn anonymous_candidate<R: Rng + ?Sized>(rng: &mut R) -> String {
    let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    let number = rng.gen_range(0..100);
    format!("{adjective} {noun} {number}")
}

/// Generate a random 6-character uppercase alphanumeric join code.
pub fn group_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LEN)
        .map(|_| CODE_CHARS[rng.gen_range(0..CODE_CHARS.len())] as char)
        .collect()
}

/// Short per-user suffix used to disambiguate a preferred display name that
/// collides inside a group, e.g. `"Alice (3f2a)"`.
pub fn disambiguate(base: &str, user_id: Uuid) -> String {
    let simple = user_id.simple().to_string();
    format!("{} ({})", base, &simple[simple.len() - 4..])
}
