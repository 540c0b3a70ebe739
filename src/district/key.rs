use std::{fmt, str::FromStr, sync::LazyLock};

use anyhow::{anyhow, bail, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

static KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:US-IL-CD-(\d{2})|IL-H-(\d{3})|IL-S-(\d{3})|(US-IL-SEN))$")
        .expect("district key pattern is valid")
});

/// The four geography tiers a district key can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Congressional,  // US-IL-CD-##
    StateHouse,     // IL-H-###
    StateSenate,    // IL-S-###
    Statewide,      // US-IL-SEN, federal senators
}

impl Tier {
    pub fn to_str(&self) -> &'static str {
        match self {
            Tier::Congressional => "congressional",
            Tier::StateHouse => "il_house",
            Tier::StateSenate => "il_senate",
            Tier::Statewide => "statewide",
        }
    }

    /// Number of districts in the tier.
    pub fn count(&self) -> u16 {
        match self {
            Tier::Congressional => 17,
            Tier::StateHouse => 118,
            Tier::StateSenate => 59,
            Tier::Statewide => 1,
        }
    }

    /// Human-readable district name, e.g. "Illinois House District 7".
    pub fn display_name(&self, number: u16) -> String {
        match self {
            Tier::Congressional => format!("Illinois Congressional District {number}"),
            Tier::StateHouse => format!("Illinois House District {number}"),
            Tier::StateSenate => format!("Illinois Senate District {number}"),
            Tier::Statewide => "Illinois (statewide)".to_string(),
        }
    }

    /// Tiers backed by a polygon per district.
    pub const MAPPED: [Tier; 3] = [Tier::Congressional, Tier::StateHouse, Tier::StateSenate];
}

/// Identifier of one district, e.g. `US-IL-CD-05`, `IL-H-042`, `IL-S-017`, `US-IL-SEN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DistrictKey {
    tier: Tier,
    number: u16,
}

impl DistrictKey {
    /// The statewide pseudo-district that carries the digest.
    pub const STATEWIDE: DistrictKey = DistrictKey { tier: Tier::Statewide, number: 0 };

    pub fn new(tier: Tier, number: u16) -> Result<Self> {
        if tier == Tier::Statewide {
            return Ok(Self::STATEWIDE);
        }
        if number == 0 || number > tier.count() {
            bail!("{} district number {number} out of range 1..={}", tier.to_str(), tier.count());
        }
        Ok(Self { tier, number })
    }

    #[inline] pub fn tier(&self) -> Tier { self.tier }

    #[inline] pub fn number(&self) -> u16 { self.number }

    #[inline] pub fn is_statewide(&self) -> bool { self.tier == Tier::Statewide }

    pub fn display_name(&self) -> String { self.tier.display_name(self.number) }

    /// Every district key with its own polygon, in key order.
    pub fn roster() -> Vec<DistrictKey> {
        Tier::MAPPED.iter()
            .flat_map(|&tier| (1..=tier.count()).map(move |number| DistrictKey { tier, number }))
            .collect()
    }
}

impl fmt::Display for DistrictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tier {
            Tier::Congressional => write!(f, "US-IL-CD-{:02}", self.number),
            Tier::StateHouse => write!(f, "IL-H-{:03}", self.number),
            Tier::StateSenate => write!(f, "IL-S-{:03}", self.number),
            Tier::Statewide => f.write_str("US-IL-SEN"),
        }
    }
}

impl FromStr for DistrictKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let caps = KEY_PATTERN.captures(s.trim())
            .ok_or_else(|| anyhow!("not a district key: {s:?}"))?;

        if caps.get(4).is_some() {
            return Ok(Self::STATEWIDE);
        }

        let (tier, digits) = [Tier::Congressional, Tier::StateHouse, Tier::StateSenate].into_iter()
            .zip(1..=3)
            .find_map(|(tier, group)| caps.get(group).map(|m| (tier, m.as_str())))
            .ok_or_else(|| anyhow!("not a district key: {s:?}"))?;

        DistrictKey::new(tier, digits.parse()?)
    }
}

impl Serialize for DistrictKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DistrictKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
