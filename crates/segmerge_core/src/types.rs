//! Core type definitions for segmerge.

use std::fmt;
use std::str::FromStr;

/// Maximum number of documents an index may hold across all segments.
pub const MAX_DOCS: i64 = i32::MAX as i64 - 128;

/// Length of segment and commit identities, in bytes.
pub const ID_LENGTH: usize = 16;

/// A 16-byte random identity.
pub type Id = [u8; ID_LENGTH];

/// Generates a new random identity.
#[must_use]
pub fn random_id() -> Id {
    uuid::Uuid::new_v4().into_bytes()
}

/// Formats an identity as lowercase hex, for logs and error messages.
#[must_use]
pub fn id_to_hex(id: &Id) -> String {
    use fmt::Write;
    let mut s = String::with_capacity(ID_LENGTH * 2);
    for b in id {
        let _ = write!(s, "{b:02x}");
    }
    s
}

const RADIX36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Formats a number in base 36 using lowercase letters.
#[must_use]
pub fn to_radix36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(RADIX36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}

/// Parses a base-36 number. Returns `None` on empty input, invalid digits
/// or overflow.
#[must_use]
pub fn parse_radix36(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for c in s.chars() {
        let digit = c.to_digit(36)?;
        value = value.checked_mul(36)?.checked_add(u64::from(digit))?;
    }
    Some(value)
}

/// A writer version: `major.minor.bugfix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Major version.
    pub major: i32,
    /// Minor version.
    pub minor: i32,
    /// Bugfix version.
    pub bugfix: i32,
}

impl Version {
    /// The version written by this library.
    pub const LATEST: Version = Version::new(10, 2, 0);

    /// The oldest index-created major version that can be read.
    pub const MIN_SUPPORTED_MAJOR: i32 = 7;

    /// Creates a new version.
    #[must_use]
    pub const fn new(major: i32, minor: i32, bugfix: i32) -> Self {
        Self {
            major,
            minor,
            bugfix,
        }
    }

    /// Returns `true` if this version is at least `other`.
    #[must_use]
    pub fn on_or_after(self, other: Version) -> bool {
        self >= other
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.bugfix)
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(format!("invalid version: {s}"));
        }
        let mut nums = [0i32; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            *slot = part
                .parse::<i32>()
                .ok()
                .filter(|n| *n >= 0)
                .ok_or_else(|| format!("invalid version: {s}"))?;
        }
        Ok(Version::new(nums[0], nums[1], nums[2]))
    }
}
