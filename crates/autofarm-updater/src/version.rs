/*
[INPUT]:  Release tag strings ("v1.9.212", "2.0.0-beta")
[OUTPUT]: Comparable Version values
[POS]:    Version layer - decides whether a release is newer than the running build
[UPDATE]: When release tag conventions change
*/

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::UpdateError;

/// Dotted numeric version. A leading `v` and any `-suffix`/`+build` part are ignored.
#[derive(Debug, Clone, Eq)]
pub struct Version {
    parts: Vec<u64>,
    raw: String,
}

impl Version {
    pub fn parse(input: &str) -> Result<Self, UpdateError> {
        let trimmed = input.trim();
        let core = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let core = core.split(['-', '+']).next().unwrap_or_default();
        if core.is_empty() {
            return Err(UpdateError::InvalidVersion(input.to_string()));
        }

        let parts = core
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| UpdateError::InvalidVersion(input.to_string()))?;

        Ok(Self {
            parts,
            raw: core.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn component(&self, index: usize) -> u64 {
        self.parts.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for Version {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    // 1.2 == 1.2.0
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        (0..len)
            .map(|index| self.component(index).cmp(&other.component(index)))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
