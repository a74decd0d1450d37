use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    str::FromStr,
};

/// The six rarity tiers, lowest first.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Rarity {
    N,
    R,
    SR,
    SSR,
    UR,
    LR,
}

impl Rarity {
    pub const ALL: [Rarity; 6] = [
        Rarity::N,
        Rarity::R,
        Rarity::SR,
        Rarity::SSR,
        Rarity::UR,
        Rarity::LR,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rarity::N => "N",
            Rarity::R => "R",
            Rarity::SR => "SR",
            Rarity::SSR => "SSR",
            Rarity::UR => "UR",
            Rarity::LR => "LR",
        }
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown rarity '{0}'")]
pub struct UnknownRarity(pub String);

impl FromStr for Rarity {
    type Err = UnknownRarity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rarity::ALL
            .into_iter()
            .find(|rarity| rarity.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownRarity(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn from_str__accepts_any_case() {
        assert_eq!("ssr".parse::<Rarity>(), Ok(Rarity::SSR));
        assert_eq!(" LR ".parse::<Rarity>(), Ok(Rarity::LR));
        assert!("XR".parse::<Rarity>().is_err());
    }
}
