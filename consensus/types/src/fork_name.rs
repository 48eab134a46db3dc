use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The name of an Ethereum consensus upgrade, in activation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForkName {
    Base,
    Altair,
    Bellatrix,
    Capella,
    Deneb,
    Electra,
    Fulu,
    Gloas,
}

impl ForkName {
    pub fn list_all() -> Vec<ForkName> {
        vec![
            ForkName::Base,
            ForkName::Altair,
            ForkName::Bellatrix,
            ForkName::Capella,
            ForkName::Deneb,
            ForkName::Electra,
            ForkName::Fulu,
            ForkName::Gloas,
        ]
    }

    pub fn latest() -> ForkName {
        // Keep this updated to be the last variant.
        ForkName::Gloas
    }

    /// The fork immediately after this one, if any.
    pub fn next_fork(self) -> Option<ForkName> {
        let all = Self::list_all();
        let index = all.iter().position(|f| *f == self)?;
        all.get(index + 1).copied()
    }

    pub fn altair_enabled(self) -> bool {
        self >= ForkName::Altair
    }

    pub fn bellatrix_enabled(self) -> bool {
        self >= ForkName::Bellatrix
    }

    pub fn capella_enabled(self) -> bool {
        self >= ForkName::Capella
    }

    pub fn deneb_enabled(self) -> bool {
        self >= ForkName::Deneb
    }

    pub fn electra_enabled(self) -> bool {
        self >= ForkName::Electra
    }

    pub fn fulu_enabled(self) -> bool {
        self >= ForkName::Fulu
    }

    pub fn gloas_enabled(self) -> bool {
        self >= ForkName::Gloas
    }
}

impl FromStr for ForkName {
    type Err = String;

    fn from_str(fork_name: &str) -> Result<Self, String> {
        Ok(match fork_name.to_lowercase().as_ref() {
            "phase0" | "base" => ForkName::Base,
            "altair" => ForkName::Altair,
            "bellatrix" | "merge" => ForkName::Bellatrix,
            "capella" => ForkName::Capella,
            "deneb" => ForkName::Deneb,
            "electra" => ForkName::Electra,
            "fulu" => ForkName::Fulu,
            "gloas" => ForkName::Gloas,
            _ => return Err(format!("unknown fork name: {}", fork_name)),
        })
    }
}

impl fmt::Display for ForkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ForkName::Base => "phase0".fmt(f),
            ForkName::Altair => "altair".fmt(f),
            ForkName::Bellatrix => "bellatrix".fmt(f),
            ForkName::Capella => "capella".fmt(f),
            ForkName::Deneb => "deneb".fmt(f),
            ForkName::Electra => "electra".fmt(f),
            ForkName::Fulu => "fulu".fmt(f),
            ForkName::Gloas => "gloas".fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_ordering() {
        assert!(ForkName::Base < ForkName::Altair);
        assert!(ForkName::Fulu > ForkName::Electra);
        assert!(ForkName::Fulu.deneb_enabled());
        assert!(!ForkName::Deneb.fulu_enabled());
    }

    #[test]
    fn next_fork_walks_the_schedule() {
        assert_eq!(ForkName::Base.next_fork(), Some(ForkName::Altair));
        assert_eq!(ForkName::latest().next_fork(), None);
    }

    #[test]
    fn string_round_trip() {
        for fork in ForkName::list_all() {
            assert_eq!(ForkName::from_str(&fork.to_string()).unwrap(), fork);
        }
    }
}
