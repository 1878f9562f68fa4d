//! Region and category classification.
//!
//! Regions are independent isolation-defined subsamples: an event may carry
//! zero, one, or several region flags at once. Categories partition events
//! by jet topology; their rules are evaluated in a fixed priority order and
//! the first satisfied rule wins, so an event gets at most one category.

use crate::data::{JetCollection, TauCandidate};
use crate::utils::enums::{Category, Region};

type RegionPredicate = fn(&TauCandidate, f64) -> bool;
type CategoryPredicate = fn(&JetCollection, f64, f64) -> bool;

/// Region membership rules as (region, predicate) pairs over the tau
/// candidate and the muon isolation value. Evaluated independently.
pub static REGION_RULES: [(Region, RegionPredicate); 5] = [
    (Region::Signal, |tau, mu_iso| tau.tight_iso && mu_iso < 0.15),
    (Region::Qcd, |tau, mu_iso| tau.medium_iso && mu_iso < 0.30),
    (Region::W, |tau, mu_iso| tau.medium_iso && mu_iso < 0.30),
    (Region::WSignal, |tau, mu_iso| tau.tight_iso && mu_iso < 0.15),
    (Region::QcdControl, |tau, mu_iso| {
        tau.tight_iso && mu_iso > 0.15 && mu_iso < 0.30
    }),
];

/// Category rules as (category, predicate) pairs over the jet collection,
/// the reconstructed Higgs-candidate pT, and the tau pT, in priority order.
pub static CATEGORY_RULES: [(Category, CategoryPredicate); 4] = [
    (Category::ZeroJet, |jets, _higgs_pt, _tau_pt| jets.njets == 0),
    (Category::Boosted, |jets, higgs_pt, tau_pt| {
        jets.njets == 1
            || (jets.njets > 1
                && (jets.dijet_mass <= 300.0 || higgs_pt <= 50.0 || tau_pt <= 40.0))
    }),
    (Category::Vbf, |jets, higgs_pt, tau_pt| {
        jets.njets > 1 && higgs_pt > 50.0 && jets.dijet_mass > 300.0 && tau_pt > 40.0
    }),
    (Category::Vh, |jets, _higgs_pt, _tau_pt| {
        jets.njets > 1 && jets.dijet_mass < 300.0
    }),
];

/// Whether the event belongs to the given region.
pub fn in_region(region: Region, tau: &TauCandidate, mu_iso: f64) -> bool {
    REGION_RULES
        .iter()
        .find(|(candidate, _)| *candidate == region)
        .map_or(false, |(_, rule)| rule(tau, mu_iso))
}

/// All regions the event belongs to, in rule order.
pub fn region_flags(tau: &TauCandidate, mu_iso: f64) -> Vec<Region> {
    REGION_RULES
        .iter()
        .filter(|(_, rule)| rule(tau, mu_iso))
        .map(|(region, _)| *region)
        .collect()
}

/// The first category whose rule the event satisfies, if any.
pub fn categorize(jets: &JetCollection, higgs_pt: f64, tau_pt: f64) -> Option<Category> {
    CATEGORY_RULES
        .iter()
        .find(|(_, rule)| rule(jets, higgs_pt, tau_pt))
        .map(|(category, _)| *category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_record;

    fn jets(njets: u32, dijet_mass: f64) -> JetCollection {
        let mut record = test_record();
        record.njets = njets;
        record.dijet_mass = dijet_mass;
        record.jets()
    }

    #[test]
    fn regions_are_not_exclusive() {
        let tau = test_record().tau();
        let flags = region_flags(&tau, 0.05);
        assert!(flags.contains(&Region::Signal));
        assert!(flags.contains(&Region::Qcd));
        assert!(flags.contains(&Region::W));
        assert!(flags.contains(&Region::WSignal));
        assert!(!flags.contains(&Region::QcdControl));
    }

    #[test]
    fn the_qcd_control_region_sits_between_the_isolation_cuts() {
        let tau = test_record().tau();
        let flags = region_flags(&tau, 0.20);
        assert_eq!(flags, vec![Region::Qcd, Region::W, Region::QcdControl]);
        // the signal boundary itself belongs to neither signal nor control
        let flags = region_flags(&tau, 0.15);
        assert!(!flags.contains(&Region::Signal));
        assert!(!flags.contains(&Region::QcdControl));
        assert!(flags.contains(&Region::Qcd));
    }

    #[test]
    fn medium_without_tight_isolation_reaches_only_the_loose_regions() {
        let mut tau = test_record().tau();
        tau.tight_iso = false;
        assert_eq!(region_flags(&tau, 0.05), vec![Region::Qcd, Region::W]);
        assert!(in_region(Region::Qcd, &tau, 0.05));
        assert!(!in_region(Region::Signal, &tau, 0.05));
    }

    #[test]
    fn categories_follow_priority_order() {
        assert_eq!(categorize(&jets(0, 500.0), 100.0, 45.0), Some(Category::ZeroJet));
        assert_eq!(categorize(&jets(1, 500.0), 100.0, 45.0), Some(Category::Boosted));
        assert_eq!(categorize(&jets(2, 500.0), 100.0, 45.0), Some(Category::Vbf));
        assert_eq!(categorize(&jets(2, 200.0), 100.0, 45.0), Some(Category::Boosted));
        assert_eq!(categorize(&jets(2, 500.0), 40.0, 45.0), Some(Category::Boosted));
        assert_eq!(categorize(&jets(2, 500.0), 100.0, 35.0), Some(Category::Boosted));
    }

    #[test]
    fn vh_is_shadowed_by_the_boosted_rule() {
        let collection = jets(2, 200.0);
        let (category, rule) = CATEGORY_RULES[3];
        assert_eq!(category, Category::Vh);
        assert!(rule(&collection, 100.0, 45.0));
        assert_eq!(categorize(&collection, 100.0, 45.0), Some(Category::Boosted));
    }

    #[test]
    fn every_jet_topology_lands_in_a_category() {
        for njets in 0..4 {
            for dijet_mass in [0.0, 200.0, 300.0, 400.0] {
                for higgs_pt in [20.0, 50.0, 120.0] {
                    for tau_pt in [35.0, 45.0] {
                        let collection = jets(njets, dijet_mass);
                        assert!(
                            categorize(&collection, higgs_pt, tau_pt).is_some(),
                            "njets={njets} mjj={dijet_mass} higgs_pt={higgs_pt} tau_pt={tau_pt}"
                        );
                    }
                }
            }
        }
    }
}
