use std::{convert::Infallible, fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Simulated-process labels that select stitching, veto, and reweighting branches.
///
/// Parsing never fails: a label with no special treatment maps to
/// [`Process::Other`], which receives the baseline normalization, no
/// generator-match veto, and no Drell-Yan reweighting.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Process {
    /// W+jets, stitched by generator jet multiplicity.
    W,
    /// Drell-Yan with a genuine hadronic tau.
    Ztt,
    /// Drell-Yan with a misidentified tau candidate.
    Zll,
    /// Drell-Yan with a lepton-fake tau candidate.
    Zl,
    /// Drell-Yan with a jet-fake tau candidate.
    Zj,
    /// Top pair with a genuine hadronic tau.
    Ttt,
    /// Top pair with a jet-fake tau candidate.
    Ttj,
    /// Electroweak Z production to charged leptons.
    EwkZll,
    /// Electroweak Z production to neutrinos.
    EwkZnunu,
    /// Anything else, including data.
    Other,
}

impl Display for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Process::W => write!(f, "W"),
            Process::Ztt => write!(f, "ZTT"),
            Process::Zll => write!(f, "ZLL"),
            Process::Zl => write!(f, "ZL"),
            Process::Zj => write!(f, "ZJ"),
            Process::Ttt => write!(f, "TTT"),
            Process::Ttj => write!(f, "TTJ"),
            Process::EwkZll => write!(f, "EWKZLL"),
            Process::EwkZnunu => write!(f, "EWKZNuNu"),
            Process::Other => write!(f, "other"),
        }
    }
}

impl FromStr for Process {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_uppercase().as_str() {
            "W" => Self::W,
            "ZTT" => Self::Ztt,
            "ZLL" => Self::Zll,
            "ZL" => Self::Zl,
            "ZJ" => Self::Zj,
            "TTT" => Self::Ttt,
            "TTJ" => Self::Ttj,
            "EWKZLL" => Self::EwkZll,
            "EWKZNUNU" => Self::EwkZnunu,
            _ => Self::Other,
        })
    }
}

impl Process {
    /// Processes eligible for the Z-momentum/dilepton-mass reweighting chain.
    pub fn is_drell_yan_like(&self) -> bool {
        matches!(
            self,
            Process::EwkZll
                | Process::EwkZnunu
                | Process::Ztt
                | Process::Zll
                | Process::Zl
                | Process::Zj
        )
    }
}

/// Isolation-defined event subsamples. Regions are not exclusive: an event may
/// carry several flags at once (a tight tau candidate below 0.15 muon isolation
/// satisfies both [`Region::Signal`] and [`Region::Qcd`]).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    /// Tight tau isolation, muon isolation below 0.15.
    Signal,
    /// Medium tau isolation, muon isolation below 0.30.
    Qcd,
    /// Medium tau isolation, muon isolation below 0.30.
    W,
    /// Signal-like selection used for the W scale determination.
    WSignal,
    /// Tight tau isolation in the 0.15 to 0.30 muon-isolation sideband.
    QcdControl,
}

impl Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Region::Signal => write!(f, "signal"),
            Region::Qcd => write!(f, "qcd"),
            Region::W => write!(f, "w"),
            Region::WSignal => write!(f, "w_sf"),
            Region::QcdControl => write!(f, "qcd_cr"),
        }
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "signal" => Ok(Self::Signal),
            "qcd" => Ok(Self::Qcd),
            "w" => Ok(Self::W),
            "w_sf" | "wsf" => Ok(Self::WSignal),
            "qcd_cr" | "qcdcr" => Ok(Self::QcdControl),
            _ => Err(Error::ParseError {
                name: s.to_string(),
                object: "Region".to_string(),
            }),
        }
    }
}

/// Exclusive jet-topology classification, in priority order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// No reconstructed jets.
    ZeroJet,
    /// One jet, or multijet events failing the VBF selection.
    Boosted,
    /// Two or more jets with high dijet mass and boosted kinematics.
    Vbf,
    /// Two or more jets at low dijet mass.
    Vh,
}

impl Category {
    /// Index used in the 2-D histogram key (`h0` through `h3`).
    pub fn index(&self) -> usize {
        match self {
            Category::ZeroJet => 0,
            Category::Boosted => 1,
            Category::Vbf => 2,
            Category::Vh => 3,
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::ZeroJet => write!(f, "0jet"),
            Category::Boosted => write!(f, "boosted"),
            Category::Vbf => write!(f, "vbf"),
            Category::Vh => write!(f, "vh"),
        }
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "0jet" | "zerojet" => Ok(Self::ZeroJet),
            "boosted" => Ok(Self::Boosted),
            "vbf" => Ok(Self::Vbf),
            "vh" => Ok(Self::Vh),
            _ => Err(Error::ParseError {
                name: s.to_string(),
                object: "Category".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn enum_displays() {
        assert_eq!(format!("{}", Process::W), "W");
        assert_eq!(format!("{}", Process::Ztt), "ZTT");
        assert_eq!(format!("{}", Process::EwkZnunu), "EWKZNuNu");
        assert_eq!(format!("{}", Region::Signal), "signal");
        assert_eq!(format!("{}", Region::WSignal), "w_sf");
        assert_eq!(format!("{}", Category::ZeroJet), "0jet");
        assert_eq!(format!("{}", Category::Vbf), "vbf");
    }

    #[test]
    fn enum_from_str() {
        assert_eq!(Process::from_str("W").unwrap(), Process::W);
        assert_eq!(Process::from_str("ztt").unwrap(), Process::Ztt);
        assert_eq!(Process::from_str("EWKZNuNu").unwrap(), Process::EwkZnunu);
        assert_eq!(Region::from_str("signal").unwrap(), Region::Signal);
        assert_eq!(Region::from_str("wsf").unwrap(), Region::WSignal);
        assert_eq!(Category::from_str("0jet").unwrap(), Category::ZeroJet);
        assert_eq!(Category::from_str("VH").unwrap(), Category::Vh);
        assert!(Region::from_str("nonsense").is_err());
        assert!(Category::from_str("nonsense").is_err());
    }

    #[test]
    fn unknown_process_is_not_special() {
        assert_eq!(Process::from_str("QQH125").unwrap(), Process::Other);
        assert_eq!(Process::from_str("Data_Obs").unwrap(), Process::Other);
        assert!(!Process::from_str("TT").unwrap().is_drell_yan_like());
        assert!(Process::from_str("zl").unwrap().is_drell_yan_like());
    }

    #[test]
    fn category_indices_are_stable() {
        assert_eq!(Category::ZeroJet.index(), 0);
        assert_eq!(Category::Boosted.index(), 1);
        assert_eq!(Category::Vbf.index(), 2);
        assert_eq!(Category::Vh.index(), 3);
    }
}
