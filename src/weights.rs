//! The multiplicative event-weight chain.
//!
//! Real-data events keep the baseline normalization untouched. Simulated
//! events start from the baseline (or the stitching weight which replaces it
//! for W and Drell-Yan samples) and accumulate every applicable correction
//! multiplicatively. Calibration lookups go through the
//! [`ScaleFactorProvider`] capability trait so tables, workspaces, and test
//! stubs are interchangeable at construction time.

use crate::data::EventRecord;
use crate::utils::enums::Process;
use crate::{Error, Result};
use dyn_clone::DynClone;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader};
use tracing::debug;

/// Integrated luminosity of the dataset (pb⁻¹).
pub const LUMINOSITY: f64 = 35900.0;

/// Identification efficiency correction for genuine hadronic taus.
const GENUINE_TAU_ID_SF: f64 = 0.95;

/// Muon pT below which the cross-trigger scale factor (with its tau-leg
/// ratio) applies instead of the single-muon one.
const SINGLE_TRIGGER_THRESHOLD: f64 = 23.0;

/// Stitching weights indexed by generator jet multiplicity; slot 0 holds the
/// weight for any multiplicity outside 1 through 4.
const W_STITCHING: [f64; 5] = [25.446, 6.8176, 2.1038, 0.6889, 0.6900];
const DY_STITCHING: [f64; 5] = [1.4184, 0.45729, 0.4668, 0.47995, 0.39349];

/// Anti-muon discriminator corrections as (upper |η| edge, factor) pairs.
const MUON_FAKE_ETA_CORRECTIONS: [(f64, f64); 5] = [
    (0.4, 1.263),
    (0.8, 1.364),
    (1.2, 0.854),
    (1.7, 1.712),
    (2.3, 2.324),
];

/// Anti-electron discriminator corrections; |η| inside the ECAL crack gets
/// no correction.
const ELECTRON_FAKE_BARREL_SF: f64 = 1.213;
const ELECTRON_FAKE_ENDCAP_SF: f64 = 1.375;
const ECAL_CRACK_LOW: f64 = 1.460;
const ECAL_CRACK_HIGH: f64 = 1.558;

/// Sample cross sections in pb (σ·BR where a branching fraction applies).
const CROSS_SECTIONS: &[(&str, f64)] = &[
    ("DYJets", 5765.4),
    ("DYJets1", 1012.5),
    ("DYJets2", 332.8),
    ("DYJets3", 101.8),
    ("DYJets4", 54.8),
    ("WJets", 61526.7),
    ("WJets1", 11782.4),
    ("WJets2", 3841.5),
    ("WJets3", 1163.0),
    ("WJets4", 592.9),
    ("TT", 831.76),
    ("ST_tW_antitop", 35.6),
    ("ST_tW_top", 35.6),
    ("ST_t_antitop", 26.23),
    ("ST_t_top", 44.07),
    ("WW", 115.0),
    ("WZ", 47.13),
    ("ZZ", 16.523),
    ("EWKWMinus", 20.25),
    ("EWKWPlus", 25.62),
    ("EWKZ2l", 3.987),
    ("EWKZ2nu", 10.01),
    ("ggH125", 3.0469),
    ("VBF125", 0.23715),
    ("WplusH125", 0.0527),
    ("WminusH125", 0.0334),
    ("ZH125", 0.0554),
    ("ttH125", 0.0317),
];

/// Look up the production cross section registered for a sample.
pub fn cross_section(sample: &str) -> Result<f64> {
    CROSS_SECTIONS
        .iter()
        .find(|(name, _)| *name == sample)
        .map(|(_, xs)| *xs)
        .ok_or_else(|| Error::MissingCrossSection {
            sample: sample.to_string(),
        })
}

/// The stitching weight which replaces the baseline normalization for W and
/// Drell-Yan samples, keyed by generator jet multiplicity.
pub fn stitching_weight(process: Process, num_gen_jets: u32) -> Option<f64> {
    let table = match process {
        Process::W => &W_STITCHING,
        Process::Ztt | Process::Zll | Process::Zl | Process::Zj => &DY_STITCHING,
        _ => return None,
    };
    Some(match num_gen_jets {
        1..=4 => table[num_gen_jets as usize],
        _ => table[0],
    })
}

/// A calibration table or function queried at two coordinates.
///
/// One-dimensional sources ignore the second coordinate. Implementations
/// must resolve out-of-range queries themselves (the provided tables clamp
/// to the nearest bin) so a lookup never fails.
pub trait ScaleFactorProvider: DynClone + Send + Sync {
    /// Evaluate the correction at the given coordinates.
    fn lookup(&self, x: f64, y: f64) -> f64;
}
dyn_clone::clone_trait_object!(ScaleFactorProvider);

/// A provider returning the same factor everywhere.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct FlatFactor(pub f64);

impl ScaleFactorProvider for FlatFactor {
    fn lookup(&self, _x: f64, _y: f64) -> f64 {
        self.0
    }
}

/// Locate the bin holding `value` among ascending `edges`, clamping
/// out-of-range values to the first or last bin.
fn clamped_bin(edges: &[f64], value: f64) -> usize {
    let n_bins = edges.len() - 1;
    edges[1..n_bins].partition_point(|edge| *edge <= value)
}

/// A piecewise-constant correction over one binned axis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BinnedTable1D {
    edges: Vec<f64>,
    values: Vec<f64>,
}

impl BinnedTable1D {
    pub fn new(edges: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        if values.is_empty() || edges.len() != values.len() + 1 {
            return Err(Error::Custom(format!(
                "Binned table needs one more edge than value (got {} edges for {} values)!",
                edges.len(),
                values.len()
            )));
        }
        Ok(Self { edges, values })
    }

    pub fn value(&self, x: f64) -> f64 {
        self.values[clamped_bin(&self.edges, x)]
    }
}

impl ScaleFactorProvider for BinnedTable1D {
    fn lookup(&self, x: f64, _y: f64) -> f64 {
        self.value(x)
    }
}

/// A piecewise-constant correction over two binned axes; `values[i][j]`
/// covers the `i`-th x bin and `j`-th y bin.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BinnedTable2D {
    x_edges: Vec<f64>,
    y_edges: Vec<f64>,
    values: Vec<Vec<f64>>,
}

impl BinnedTable2D {
    pub fn new(x_edges: Vec<f64>, y_edges: Vec<f64>, values: Vec<Vec<f64>>) -> Result<Self> {
        let well_formed = !values.is_empty()
            && x_edges.len() == values.len() + 1
            && values
                .iter()
                .all(|row| !row.is_empty() && y_edges.len() == row.len() + 1);
        if !well_formed {
            return Err(Error::Custom(
                "2-D binned table edges do not match its value grid!".to_string(),
            ));
        }
        Ok(Self {
            x_edges,
            y_edges,
            values,
        })
    }

    pub fn value(&self, x: f64, y: f64) -> f64 {
        self.values[clamped_bin(&self.x_edges, x)][clamped_bin(&self.y_edges, y)]
    }
}

impl ScaleFactorProvider for BinnedTable2D {
    fn lookup(&self, x: f64, y: f64) -> f64 {
        self.value(x, y)
    }
}

/// Tau-leg trigger efficiency ratios keyed by decay mode.
///
/// Unmapped decay modes fall back to a ratio of one.
#[derive(Clone, Default)]
pub struct TauRatioWorkspace {
    by_decay_mode: IndexMap<u8, Box<dyn ScaleFactorProvider>>,
}

impl TauRatioWorkspace {
    pub fn unit() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, decay_mode: u8, provider: Box<dyn ScaleFactorProvider>) {
        self.by_decay_mode.insert(decay_mode, provider);
    }

    pub fn with_decay_mode(
        mut self,
        decay_mode: u8,
        provider: Box<dyn ScaleFactorProvider>,
    ) -> Self {
        self.insert(decay_mode, provider);
        self
    }

    pub fn ratio(&self, decay_mode: u8, tau_pt: f64, tau_eta: f64) -> f64 {
        self.by_decay_mode
            .get(&decay_mode)
            .map_or(1.0, |provider| provider.lookup(tau_pt, tau_eta))
    }
}

/// The jet-topology-dependent reweighting applied after the Z-pT lookup for
/// Drell-Yan-like samples.
pub trait KinematicReweighter: DynClone + Send + Sync {
    fn reweight(&self, njets: u32, dijet_mass: f64, higgs_pt: f64, tau_pt: f64) -> f64;
}
dyn_clone::clone_trait_object!(KinematicReweighter);

/// A reweighter which leaves the weight unchanged.
#[derive(Copy, Clone, Debug, Default)]
pub struct UnitReweighter;

impl KinematicReweighter for UnitReweighter {
    fn reweight(&self, _njets: u32, _dijet_mass: f64, _higgs_pt: f64, _tau_pt: f64) -> f64 {
        1.0
    }
}

/// A single correction source in a [`CorrectionSet`]: either a flat factor
/// or a binned table.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableSpec {
    Flat(f64),
    Binned1D { edges: Vec<f64>, values: Vec<f64> },
    Binned2D {
        x_edges: Vec<f64>,
        y_edges: Vec<f64>,
        values: Vec<Vec<f64>>,
    },
}

impl TableSpec {
    pub fn build(&self) -> Result<Box<dyn ScaleFactorProvider>> {
        Ok(match self {
            Self::Flat(factor) => Box::new(FlatFactor(*factor)),
            Self::Binned1D { edges, values } => {
                Box::new(BinnedTable1D::new(edges.clone(), values.clone())?)
            }
            Self::Binned2D {
                x_edges,
                y_edges,
                values,
            } => Box::new(BinnedTable2D::new(
                x_edges.clone(),
                y_edges.clone(),
                values.clone(),
            )?),
        })
    }
}

/// Declarative calibration tables, typically loaded from a JSON file.
///
/// Every entry is optional; sources left out keep the unit default. Tau-leg
/// trigger ratios are keyed by decay mode.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorrectionSet {
    pub trigger_cross: Option<TableSpec>,
    pub trigger_single: Option<TableSpec>,
    pub muon_id: Option<TableSpec>,
    pub pileup: Option<TableSpec>,
    pub z_pt: Option<TableSpec>,
    pub btag_efficiency: Option<TableSpec>,
    pub tau_trigger_ratio: IndexMap<String, TableSpec>,
}

impl CorrectionSet {
    /// Load a correction set from a JSON file.
    pub fn load(file_path: &str) -> Result<Self> {
        let path = crate::data::io::expand_output_path(file_path)?;
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

/// The per-event weight and its monitoring companions.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EventWeight {
    /// The multiplicative weight applied to histogram fills.
    pub value: f64,
    /// The combinatorial b-tag event weight. Evaluated per event for
    /// monitoring but deliberately left out of `value`; folding it in would
    /// change every stored yield.
    pub btag: f64,
}

/// Composes the final per-event weight for one sample.
#[derive(Clone)]
pub struct WeightCalculator {
    process: Process,
    is_data: bool,
    norm: f64,
    trigger_cross: Box<dyn ScaleFactorProvider>,
    trigger_single: Box<dyn ScaleFactorProvider>,
    muon_id: Box<dyn ScaleFactorProvider>,
    pileup: Box<dyn ScaleFactorProvider>,
    z_pt: Box<dyn ScaleFactorProvider>,
    tau_trigger_ratio: TauRatioWorkspace,
    kinematic: Box<dyn KinematicReweighter>,
    btag_efficiency: Box<dyn ScaleFactorProvider>,
}

impl WeightCalculator {
    /// A calculator for real data: every event keeps the baseline weight of one.
    pub fn for_data() -> Self {
        Self::with_unit_providers(Process::Other, true, 1.0)
    }

    /// A calculator for a simulated sample with the given baseline
    /// normalization (luminosity × cross section / generated-event count).
    ///
    /// All correction sources start as units; install real ones with the
    /// `with_*` methods or [`WeightCalculator::with_corrections`].
    pub fn for_simulation(process: Process, norm: f64) -> Self {
        Self::with_unit_providers(process, false, norm)
    }

    fn with_unit_providers(process: Process, is_data: bool, norm: f64) -> Self {
        Self {
            process,
            is_data,
            norm,
            trigger_cross: Box::new(FlatFactor(1.0)),
            trigger_single: Box::new(FlatFactor(1.0)),
            muon_id: Box::new(FlatFactor(1.0)),
            pileup: Box::new(FlatFactor(1.0)),
            z_pt: Box::new(FlatFactor(1.0)),
            tau_trigger_ratio: TauRatioWorkspace::unit(),
            kinematic: Box::new(UnitReweighter),
            // Zero per-jet efficiency makes the monitoring weight one for
            // untagged events.
            btag_efficiency: Box::new(FlatFactor(0.0)),
        }
    }

    pub fn with_trigger_providers(
        mut self,
        cross: Box<dyn ScaleFactorProvider>,
        single: Box<dyn ScaleFactorProvider>,
    ) -> Self {
        self.trigger_cross = cross;
        self.trigger_single = single;
        self
    }

    pub fn with_muon_id(mut self, provider: Box<dyn ScaleFactorProvider>) -> Self {
        self.muon_id = provider;
        self
    }

    pub fn with_pileup(mut self, provider: Box<dyn ScaleFactorProvider>) -> Self {
        self.pileup = provider;
        self
    }

    pub fn with_z_pt(mut self, provider: Box<dyn ScaleFactorProvider>) -> Self {
        self.z_pt = provider;
        self
    }

    pub fn with_tau_trigger_ratio(mut self, workspace: TauRatioWorkspace) -> Self {
        self.tau_trigger_ratio = workspace;
        self
    }

    pub fn with_kinematic_reweighter(mut self, reweighter: Box<dyn KinematicReweighter>) -> Self {
        self.kinematic = reweighter;
        self
    }

    pub fn with_btag_efficiency(mut self, provider: Box<dyn ScaleFactorProvider>) -> Self {
        self.btag_efficiency = provider;
        self
    }

    /// Install every source present in a [`CorrectionSet`].
    pub fn with_corrections(mut self, corrections: &CorrectionSet) -> Result<Self> {
        if let Some(spec) = &corrections.trigger_cross {
            self.trigger_cross = spec.build()?;
        }
        if let Some(spec) = &corrections.trigger_single {
            self.trigger_single = spec.build()?;
        }
        if let Some(spec) = &corrections.muon_id {
            self.muon_id = spec.build()?;
        }
        if let Some(spec) = &corrections.pileup {
            self.pileup = spec.build()?;
        }
        if let Some(spec) = &corrections.z_pt {
            self.z_pt = spec.build()?;
        }
        if let Some(spec) = &corrections.btag_efficiency {
            self.btag_efficiency = spec.build()?;
        }
        for (decay_mode, spec) in &corrections.tau_trigger_ratio {
            let decay_mode = decay_mode.parse::<u8>().map_err(|_| Error::ParseError {
                name: decay_mode.clone(),
                object: "decay mode".to_string(),
            })?;
            self.tau_trigger_ratio.insert(decay_mode, spec.build()?);
        }
        Ok(self)
    }

    /// The weight for one selected event.
    pub fn weight(&self, record: &EventRecord) -> EventWeight {
        if self.is_data {
            return EventWeight {
                value: self.norm,
                btag: 1.0,
            };
        }
        let mut value = stitching_weight(self.process, record.num_gen_jets).unwrap_or(self.norm);
        if record.tau_gen_match == 5 {
            value *= GENUINE_TAU_ID_SF;
        }
        value *= self.trigger_scale_factor(record);
        value *= self.muon_id.lookup(record.mu_pt, record.mu_eta);
        value *= self.pileup.lookup(record.npu, 0.0);
        value *= record.gen_weight;
        value *= self.anti_lepton_correction(record);
        if self.process.is_drell_yan_like() {
            value *= self.z_pt.lookup(record.gen_mass, record.gen_pt);
            let higgs_pt =
                (record.muon().p4 + record.tau().p4 + record.missing_energy().p4()).pt();
            value *= self
                .kinematic
                .reweight(record.njets, record.dijet_mass, higgs_pt, record.tau_pt);
        }
        let btag = self.btag_event_weight(record);
        debug!(btag_weight = btag, "evaluated b-tag event weight");
        EventWeight { value, btag }
    }

    fn trigger_scale_factor(&self, record: &EventRecord) -> f64 {
        if record.mu_pt < SINGLE_TRIGGER_THRESHOLD {
            let ratio =
                self.tau_trigger_ratio
                    .ratio(record.tau_decay_mode, record.tau_pt, record.tau_eta);
            self.trigger_cross.lookup(record.mu_pt, record.mu_eta) * ratio
        } else {
            self.trigger_single.lookup(record.mu_pt, record.mu_eta)
        }
    }

    fn anti_lepton_correction(&self, record: &EventRecord) -> f64 {
        let abs_eta = record.tau_eta.abs();
        match record.tau_gen_match {
            2 | 4 => {
                let mut factor = muon_fake_correction(abs_eta);
                if self.process == Process::Zl {
                    factor *= zl_decay_mode_correction(record.tau_decay_mode);
                }
                factor
            }
            1 | 3 => electron_fake_correction(abs_eta),
            _ => 1.0,
        }
    }

    /// The combinatorial probability of the observed b-tag count given the
    /// per-jet efficiencies of the two leading b jets. Counts above two are
    /// unphysical here and clamp the weight to zero.
    fn btag_event_weight(&self, record: &EventRecord) -> f64 {
        if record.nbtag > 2 {
            return 0.0;
        }
        let jets = record.jets();
        let p1 = self
            .btag_efficiency
            .lookup(jets.leading_b.pt, jets.leading_b.flavor as f64);
        let p2 = self
            .btag_efficiency
            .lookup(jets.subleading_b.pt, jets.subleading_b.flavor as f64);
        match record.nbtag {
            0 => (1.0 - p1) * (1.0 - p2),
            1 => p1 * (1.0 - p2) + p2 * (1.0 - p1),
            _ => p1 * p2,
        }
    }
}

fn muon_fake_correction(abs_eta: f64) -> f64 {
    for (upper_edge, factor) in MUON_FAKE_ETA_CORRECTIONS {
        if abs_eta < upper_edge {
            return factor;
        }
    }
    1.0
}

fn electron_fake_correction(abs_eta: f64) -> f64 {
    if abs_eta < ECAL_CRACK_LOW {
        ELECTRON_FAKE_BARREL_SF
    } else if abs_eta > ECAL_CRACK_HIGH {
        ELECTRON_FAKE_ENDCAP_SF
    } else {
        1.0
    }
}

fn zl_decay_mode_correction(decay_mode: u8) -> f64 {
    match decay_mode {
        0 => 0.74,
        _ => 1.0,
    }
}
