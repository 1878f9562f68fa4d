use serde::{Deserialize, Serialize};

use crate::{
    utils::vectors::{delta_r, Vec4},
    Error, Result,
};

/// Dataset I/O implementations and shared ingestion helpers.
pub mod io;

/// A record that can be used to test the pipeline. It describes a zero-jet,
/// opposite-charge event with an isolated muon above the single-muon trigger
/// threshold and a tight hadronic tau candidate, so that every selection stage
/// passes.
pub fn test_record() -> EventRecord {
    EventRecord {
        mu_pt: 30.0,
        mu_eta: 0.5,
        mu_phi: 0.1,
        mu_mass: 0.10566,
        mu_charge: 1,
        mu_iso: 0.05,
        tau_pt: 35.0,
        tau_eta: -0.3,
        tau_phi: 2.0,
        tau_mass: 1.2,
        tau_charge: -1,
        tau_decay_mode: 1,
        tau_gen_match: 5,
        tau_medium_iso: true,
        tau_tight_iso: true,
        pass_cross_trigger: false,
        pass_iso_mu22: true,
        pass_iso_tk_mu22: true,
        pass_iso_mu22_eta2p1: true,
        pass_iso_tk_mu22_eta2p1: true,
        njets: 0,
        dijet_mass: 0.0,
        nbtag: 0,
        b1_pt: 0.0,
        b1_flavor: 0,
        b2_pt: 0.0,
        b2_flavor: 0,
        met: 20.0,
        met_phi: 0.0,
        num_gen_jets: 0,
        gen_weight: 1.0,
        npu: 20.0,
        gen_mass: 91.2,
        gen_pt: 15.0,
        m_sv: 120.0,
        pt_sv: 48.0,
        dbkg_vbf: 0.2,
        mela_phi: 0.3,
        mela_phi1: -1.1,
        q2v1: 400.0,
        q2v2: 650.0,
        costheta1: 0.25,
        costheta2: -0.4,
        costhetastar: 0.6,
    }
}

/// A dataset holding a single [`test_record`], for pipeline tests.
pub fn test_dataset() -> Dataset {
    Dataset {
        events: vec![test_record()],
        gen_count: Some(1000.0),
    }
}

/// One row of the input ntuple: both legs of the µτ pair, trigger decisions,
/// the jet and missing-energy summaries, the generator-level block, and the
/// derived discriminants. Records are immutable once read; the physics objects
/// consumed by the pipeline are rebuilt from these fields each iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub mu_pt: f64,
    pub mu_eta: f64,
    pub mu_phi: f64,
    pub mu_mass: f64,
    pub mu_charge: i32,
    /// Relative isolation of the muon.
    pub mu_iso: f64,

    pub tau_pt: f64,
    pub tau_eta: f64,
    pub tau_phi: f64,
    pub tau_mass: f64,
    pub tau_charge: i32,
    pub tau_decay_mode: u8,
    /// Generator origin of the tau candidate: 1/3 electron fakes, 2/4 muon
    /// fakes, 5 genuine hadronic tau, 6 jet fake.
    pub tau_gen_match: u8,
    pub tau_medium_iso: bool,
    pub tau_tight_iso: bool,

    /// Muon-plus-tau cross trigger, required below the single-muon threshold.
    pub pass_cross_trigger: bool,
    pub pass_iso_mu22: bool,
    pub pass_iso_tk_mu22: bool,
    pub pass_iso_mu22_eta2p1: bool,
    pub pass_iso_tk_mu22_eta2p1: bool,

    pub njets: u32,
    pub dijet_mass: f64,
    pub nbtag: u32,
    pub b1_pt: f64,
    pub b1_flavor: i32,
    pub b2_pt: f64,
    pub b2_flavor: i32,

    pub met: f64,
    pub met_phi: f64,

    pub num_gen_jets: u32,
    pub gen_weight: f64,
    /// True pileup-interaction count.
    pub npu: f64,
    pub gen_mass: f64,
    pub gen_pt: f64,

    pub m_sv: f64,
    pub pt_sv: f64,
    pub dbkg_vbf: f64,
    pub mela_phi: f64,
    pub mela_phi1: f64,
    pub q2v1: f64,
    pub q2v2: f64,
    pub costheta1: f64,
    pub costheta2: f64,
    pub costhetastar: f64,
}

impl EventRecord {
    /// Reconstruct the muon leg.
    pub fn muon(&self) -> Muon {
        Muon {
            p4: Vec4::from_pt_eta_phi_m(self.mu_pt, self.mu_eta, self.mu_phi, self.mu_mass),
            charge: self.mu_charge,
            iso: self.mu_iso,
        }
    }

    /// Reconstruct the tau candidate.
    pub fn tau(&self) -> TauCandidate {
        TauCandidate {
            p4: Vec4::from_pt_eta_phi_m(self.tau_pt, self.tau_eta, self.tau_phi, self.tau_mass),
            charge: self.tau_charge,
            decay_mode: self.tau_decay_mode,
            gen_match: self.tau_gen_match,
            medium_iso: self.tau_medium_iso,
            tight_iso: self.tau_tight_iso,
        }
    }

    /// Reconstruct the jet summary.
    pub fn jets(&self) -> JetCollection {
        JetCollection {
            njets: self.njets,
            dijet_mass: self.dijet_mass,
            nbtag: self.nbtag,
            leading_b: BJet {
                pt: self.b1_pt,
                flavor: self.b1_flavor,
            },
            subleading_b: BJet {
                pt: self.b2_pt,
                flavor: self.b2_flavor,
            },
        }
    }

    /// Reconstruct the missing transverse energy.
    pub fn missing_energy(&self) -> MissingEnergy {
        MissingEnergy {
            magnitude: self.met,
            phi: self.met_phi,
        }
    }
}

/// The reconstructed muon leg.
#[derive(Debug, Clone, PartialEq)]
pub struct Muon {
    pub p4: Vec4,
    pub charge: i32,
    pub iso: f64,
}

/// The reconstructed hadronic tau candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct TauCandidate {
    pub p4: Vec4,
    pub charge: i32,
    pub decay_mode: u8,
    pub gen_match: u8,
    pub medium_iso: bool,
    pub tight_iso: bool,
}

impl TauCandidate {
    pub fn delta_r(&self, muon: &Muon) -> f64 {
        delta_r(
            self.p4.eta(),
            self.p4.phi(),
            muon.p4.eta(),
            muon.p4.phi(),
        )
    }
}

/// A b-tagged jet summary used by the b-tag event weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BJet {
    pub pt: f64,
    pub flavor: i32,
}

/// Per-event jet summary.
#[derive(Debug, Clone, PartialEq)]
pub struct JetCollection {
    pub njets: u32,
    pub dijet_mass: f64,
    pub nbtag: u32,
    pub leading_b: BJet,
    pub subleading_b: BJet,
}

/// Missing transverse energy as magnitude and azimuth.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingEnergy {
    pub magnitude: f64,
    pub phi: f64,
}

impl MissingEnergy {
    pub fn x(&self) -> f64 {
        self.magnitude * self.phi.cos()
    }

    pub fn y(&self) -> f64 {
        self.magnitude * self.phi.sin()
    }

    /// A massless four-momentum in the transverse plane.
    pub fn p4(&self) -> Vec4 {
        Vec4::new(self.x(), self.y(), 0.0, self.magnitude)
    }

    /// Transverse-mass discriminant against a lepton:
    /// $`m_T = \sqrt{(p_T^\ell + E_T^{miss})^2 - (p_x^\ell + E_x)^2 - (p_y^\ell + E_y)^2}`$.
    pub fn transverse_mass(&self, lepton: &Vec4) -> f64 {
        let sum_pt = lepton.pt() + self.magnitude;
        let sum_x = lepton.px() + self.x();
        let sum_y = lepton.py() + self.y();
        (sum_pt * sum_pt - sum_x * sum_x - sum_y * sum_y)
            .max(0.0)
            .sqrt()
    }
}

/// A finite, replayable sequence of event records with the generated-event
/// side channel used for normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub events: Vec<EventRecord>,
    /// Total generated events for the sample, before any selection. `None` for
    /// files that carry no counter (real data does not need one).
    pub gen_count: Option<f64>,
}

impl Dataset {
    pub fn new(events: Vec<EventRecord>) -> Self {
        Self {
            events,
            gen_count: None,
        }
    }

    pub fn n_events(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The generated-event count, required for simulated samples.
    pub fn require_gen_count(&self) -> Result<f64> {
        self.gen_count.ok_or(Error::MissingGenCount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn reconstruction_preserves_kinematics() {
        let record = test_record();
        let muon = record.muon();
        let tau = record.tau();
        assert_relative_eq!(muon.p4.pt(), 30.0, max_relative = 1e-12);
        assert_relative_eq!(muon.p4.eta(), 0.5, max_relative = 1e-12);
        assert_relative_eq!(tau.p4.mag(), 1.2, max_relative = 1e-9);
        assert_eq!(muon.charge + tau.charge, 0);
        assert_eq!(tau.gen_match, 5);
        assert!(tau.tight_iso);
    }

    #[test]
    fn jets_and_met_reconstruction() {
        let mut record = test_record();
        record.njets = 2;
        record.dijet_mass = 450.0;
        record.nbtag = 1;
        record.b1_pt = 40.0;
        record.b1_flavor = 5;
        let jets = record.jets();
        assert_eq!(jets.njets, 2);
        assert_relative_eq!(jets.dijet_mass, 450.0);
        assert_eq!(jets.leading_b.flavor, 5);
        let met = record.missing_energy();
        assert_relative_eq!(met.x(), 20.0);
        assert_relative_eq!(met.y(), 0.0);
        assert_relative_eq!(met.p4().pt(), 20.0);
    }

    #[test]
    fn transverse_mass_degenerate_case_is_zero() {
        // lepton momentum entirely along x, missing energy along x: the
        // transverse mass collapses to zero.
        let lepton = Vec4::new(30.0, 0.0, 0.0, 30.0);
        let met = MissingEnergy {
            magnitude: 20.0,
            phi: 0.0,
        };
        assert_eq!(met.transverse_mass(&lepton), 0.0);
    }

    #[test]
    fn transverse_mass_closed_form() {
        // orthogonal lepton and missing energy: mt^2 = (pt + met)^2 - pt^2 - met^2
        //                                            = 2 * pt * met
        let lepton = Vec4::new(30.0, 0.0, 0.0, 30.0);
        let met = MissingEnergy {
            magnitude: 20.0,
            phi: std::f64::consts::FRAC_PI_2,
        };
        assert_relative_eq!(
            met.transverse_mass(&lepton),
            (2.0 * 30.0 * 20.0_f64).sqrt(),
            max_relative = 1e-12
        );
        // and the fully general formula for an arbitrary configuration
        let lepton = Vec4::from_pt_eta_phi_m(42.0, 0.7, 1.1, 0.10566);
        let met = MissingEnergy {
            magnitude: 33.0,
            phi: -2.4,
        };
        let expected = ((lepton.pt() + 33.0).powi(2)
            - (lepton.px() + met.x()).powi(2)
            - (lepton.py() + met.y()).powi(2))
        .sqrt();
        assert_relative_eq!(met.transverse_mass(&lepton), expected, max_relative = 1e-12);
    }

    #[test]
    fn gen_count_is_required_for_simulation() {
        let dataset = Dataset::new(vec![test_record()]);
        assert!(dataset.require_gen_count().is_err());
        assert_relative_eq!(test_dataset().require_gen_count().unwrap(), 1000.0);
    }
}
