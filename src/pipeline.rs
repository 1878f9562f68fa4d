//! The per-event analysis pipeline: selection, weighting, classification, and
//! histogram filling, plus the run artifact a finished pipeline seals into.

use crate::data::{EventRecord, JetCollection, MissingEnergy, Muon, TauCandidate};
use crate::histograms::{analysis_store, HistogramStore};
use crate::regions::{categorize, region_flags};
use crate::selection::{Cutflow, SelectionCascade, Stage};
use crate::utils::enums::{Category, Region};
use crate::weights::WeightCalculator;
use crate::{Error, Result};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use tracing::debug;

/// Transverse-mass ceiling of the analysis selection (GeV).
const MAX_TRANSVERSE_MASS: f64 = 50.0;

/// Tau pT floor of the analysis selection (GeV).
const MIN_SELECTED_TAU_PT: f64 = 30.0;

/// Minimum muon-tau ΔR for the inclusive signal battery.
const MIN_PAIR_SEPARATION: f64 = 0.5;

/// Transverse-mass window of the high-mT control selection (GeV).
const CONTROL_MT_WINDOW: (f64, f64) = (80.0, 200.0);

/// Muon-isolation ceiling of the high-mT control selection.
const CONTROL_MAX_MUON_ISO: f64 = 0.10;

/// Abscissa at which the control-event total lands in the `n70` summary
/// histogram. The per-category fills stay below it.
const CONTROL_COUNT_BIN: f64 = 4.0;

/// Histogram group name carried by the output artifact.
const ARTIFACT_GROUP: &str = "grabbag";

/// The reconstructed quantities shared by every fill of one event.
struct EventView<'a> {
    record: &'a EventRecord,
    muon: Muon,
    tau: TauCandidate,
    jets: JetCollection,
    met: MissingEnergy,
    /// Transverse mass of the muon-MET system.
    mt: f64,
    /// Missing transverse momentum recomputed from its components.
    met_pt: f64,
    /// pT of the muon + tau + MET system.
    higgs_pt: f64,
    /// Sum of the muon and tau charges.
    charge: i32,
}

impl<'a> EventView<'a> {
    fn new(record: &'a EventRecord) -> Self {
        let muon = record.muon();
        let tau = record.tau();
        let jets = record.jets();
        let met = record.missing_energy();
        let mt = met.transverse_mass(&muon.p4);
        let met_pt = met.x().hypot(met.y());
        let higgs_pt = (muon.p4 + tau.p4 + met.p4()).pt();
        let charge = muon.charge + tau.charge;
        Self {
            record,
            muon,
            tau,
            jets,
            met,
            mt,
            met_pt,
            higgs_pt,
            charge,
        }
    }

    fn is_opposite_charge(&self) -> bool {
        self.charge == 0
    }
}

/// One sample's event loop: the cascade, the weight chain, and the owned
/// accumulators they feed.
///
/// Events stream through [`Pipeline::process_event`] (or [`Pipeline::run`]
/// over a slice); [`Pipeline::finish`] seals the accumulators into a
/// [`RunArtifact`]. Partitioned runs merge partition pipelines back into the
/// parent, so parallel and sequential runs produce identical artifacts.
pub struct Pipeline {
    cascade: SelectionCascade,
    weights: WeightCalculator,
    cutflow: Cutflow,
    store: HistogramStore,
    control_events: u64,
}

impl Pipeline {
    pub fn new(cascade: SelectionCascade, weights: WeightCalculator) -> Self {
        Self {
            cascade,
            weights,
            cutflow: Cutflow::new(),
            store: analysis_store(),
            control_events: 0,
        }
    }

    pub fn cutflow(&self) -> &Cutflow {
        &self.cutflow
    }

    pub fn histograms(&self) -> &HistogramStore {
        &self.store
    }

    /// Events which entered the high-mT control selection.
    pub fn control_events(&self) -> u64 {
        self.control_events
    }

    /// A pipeline sharing this one's configuration with empty accumulators.
    fn partition(&self) -> Self {
        Self::new(self.cascade.clone(), self.weights.clone())
    }

    /// Fold a finished partition's accumulators into this pipeline.
    fn absorb(&mut self, partition: Self) {
        self.cutflow += &partition.cutflow;
        self.store += &partition.store;
        self.control_events += partition.control_events;
    }

    /// Run one event through the full analysis.
    pub fn process_event(&mut self, record: &EventRecord) -> Result<()> {
        if !self.cascade.accept(record, &mut self.cutflow) {
            return Ok(());
        }
        let weight = self.weights.weight(record).value;
        self.cutflow.record(Stage::Weighted);

        let view = EventView::new(record);
        self.fill_control_region(&view, weight)?;

        // unweighted monitoring of the quantities cut on next
        self.store.fill_1d("pre_mt", view.mt, 1.0)?;
        self.store.fill_1d("pre_tau_pt", record.tau_pt, 1.0)?;
        self.store
            .fill_1d("pre_tau_iso", f64::from(u8::from(view.tau.tight_iso)), 1.0)?;
        self.store.fill_1d("pre_mu_iso", view.muon.iso, 1.0)?;

        if !(view.mt < MAX_TRANSVERSE_MASS && record.tau_pt > MIN_SELECTED_TAU_PT) {
            return Ok(());
        }
        self.cutflow.record(Stage::MassWindow);

        let regions = region_flags(&view.tau, view.muon.iso);
        if let Some(category) = categorize(&view.jets, view.higgs_pt, record.tau_pt) {
            self.fill_category_planes(category, &view, &regions, weight)?;
        }

        if regions.contains(&Region::Signal) {
            self.cutflow.record(Stage::SignalRegion);
            if view.is_opposite_charge() {
                self.cutflow.record(Stage::OppositeCharge);
                if view.tau.delta_r(&view.muon) > MIN_PAIR_SEPARATION {
                    self.cutflow.record(Stage::Separation);
                    self.fill_inclusive_battery(&view, weight)?;
                }
            } else {
                self.fill_region_battery("SS", &view, weight)?;
            }
        }
        if regions.contains(&Region::Qcd) {
            self.fill_region_battery("QCD", &view, weight)?;
        }
        if regions.contains(&Region::W) {
            let suffix = if view.is_opposite_charge() { "WOS" } else { "WSS" };
            self.fill_region_battery(suffix, &view, weight)?;
        }
        Ok(())
    }

    /// Process a slice of events, in parallel when the `rayon` feature is
    /// enabled.
    #[cfg(feature = "rayon")]
    pub fn run(&mut self, events: &[EventRecord]) -> Result<()> {
        let template = self.partition();
        let partial = events
            .par_iter()
            .try_fold(
                || template.partition(),
                |mut partition, record| -> Result<Self> {
                    partition.process_event(record)?;
                    Ok(partition)
                },
            )
            .try_reduce(
                || template.partition(),
                |mut merged, partition| -> Result<Self> {
                    merged.absorb(partition);
                    Ok(merged)
                },
            )?;
        self.absorb(partial);
        Ok(())
    }

    /// Process a slice of events, in parallel when the `rayon` feature is
    /// enabled.
    #[cfg(not(feature = "rayon"))]
    pub fn run(&mut self, events: &[EventRecord]) -> Result<()> {
        for record in events {
            self.process_event(record)?;
        }
        Ok(())
    }

    /// Seal the accumulators into a [`RunArtifact`].
    pub fn finish(mut self) -> Result<RunArtifact> {
        // The control-event total lands in the last bin of the summary
        // histogram; the per-category fills stay below it.
        self.store
            .fill_1d("n70", CONTROL_COUNT_BIN, self.control_events as f64)?;
        debug!(
            control_events = self.control_events,
            selected = self.cutflow.count(Stage::Separation),
            "sealed run artifact"
        );
        Ok(RunArtifact {
            group: ARTIFACT_GROUP.to_string(),
            cutflow: self.cutflow,
            histograms: self.store,
            control_events: self.control_events,
        })
    }

    /// Tally high-mT, opposite-charge, well-isolated events in the `n70`
    /// yield summary, split by coarse jet topology.
    fn fill_control_region(&mut self, view: &EventView, weight: f64) -> Result<()> {
        let (mt_low, mt_high) = CONTROL_MT_WINDOW;
        if !(view.mt > mt_low
            && view.mt < mt_high
            && view.is_opposite_charge()
            && view.tau.tight_iso
            && view.muon.iso < CONTROL_MAX_MUON_ISO)
        {
            return Ok(());
        }
        self.store.fill_1d("n70", 0.1, weight)?;
        if view.jets.njets == 0 && view.record.m_sv < 400.0 {
            self.store.fill_1d("n70", 1.1, weight)?;
        } else if view.jets.njets == 1
            || (view.jets.njets > 1 && view.jets.dijet_mass > 300.0 && view.higgs_pt < 100.0)
        {
            self.store.fill_1d("n70", 2.1, weight)?;
        } else if view.jets.njets > 1 && view.jets.dijet_mass > 300.0 && view.higgs_pt > 100.0 {
            self.store.fill_1d("n70", 3.1, weight)?;
        }
        self.control_events += 1;
        Ok(())
    }

    /// Fill the category's 2-D plane for every region the event belongs to.
    ///
    /// Each category pairs its own discriminating variable with the mass
    /// estimate: decay mode against visible mass for zero-jet events, and the
    /// Higgs-candidate pT, dijet mass, or tau pT against the SV-fit mass
    /// otherwise.
    fn fill_category_planes(
        &mut self,
        category: Category,
        view: &EventView,
        regions: &[Region],
        weight: f64,
    ) -> Result<()> {
        let (x, y) = match category {
            Category::ZeroJet => (
                f64::from(view.tau.decay_mode),
                (view.muon.p4 + view.tau.p4).mag(),
            ),
            Category::Boosted => (view.higgs_pt, view.record.m_sv),
            Category::Vbf => (view.jets.dijet_mass, view.record.m_sv),
            Category::Vh => (view.record.tau_pt, view.record.m_sv),
        };
        let plane = category.index();
        if regions.contains(&Region::Signal) {
            let suffix = if view.is_opposite_charge() { "OS" } else { "SS" };
            self.store
                .fill_2d(&format!("h{plane}_{suffix}"), x, y, weight)?;
        }
        if regions.contains(&Region::Qcd) {
            self.store.fill_2d(&format!("h{plane}_QCD"), x, y, weight)?;
        }
        if regions.contains(&Region::W) {
            let suffix = if view.is_opposite_charge() { "WOS" } else { "WSS" };
            self.store
                .fill_2d(&format!("h{plane}_{suffix}"), x, y, weight)?;
        }
        Ok(())
    }

    /// The full set of kinematic and discriminant histograms, filled only for
    /// well-separated opposite-charge signal events.
    fn fill_inclusive_battery(&mut self, view: &EventView, weight: f64) -> Result<()> {
        let record = view.record;
        let fills = [
            ("hmu_pt", record.mu_pt),
            ("hmu_eta", record.mu_eta),
            ("hmu_phi", record.mu_phi),
            ("htau_pt", record.tau_pt),
            ("htau_eta", record.tau_eta),
            ("htau_phi", record.tau_phi),
            ("hmet", view.met.magnitude),
            ("hmet_x", view.met.x()),
            ("hmet_y", view.met.y()),
            ("hmet_pt", view.met_pt),
            ("hmt", view.mt),
            ("hnjets", f64::from(view.jets.njets)),
            ("hmjj", view.jets.dijet_mass),
            ("hNGenJets", f64::from(record.num_gen_jets)),
            ("pt_sv", record.pt_sv),
            ("m_sv", record.m_sv),
            ("Dbkg_VBF", record.dbkg_vbf),
            ("Phi", record.mela_phi),
            ("Phi1", record.mela_phi1),
            ("Q2V1", record.q2v1),
            ("Q2V2", record.q2v2),
            ("costheta1", record.costheta1),
            ("costheta2", record.costheta2),
            ("costhetastar", record.costhetastar),
        ];
        for (name, value) in fills {
            self.store.fill_1d(name, value, weight)?;
        }
        Ok(())
    }

    /// The reduced battery filled for each auxiliary region.
    fn fill_region_battery(&mut self, suffix: &str, view: &EventView, weight: f64) -> Result<()> {
        let record = view.record;
        let fills = [
            ("htau_pt", record.tau_pt),
            ("hmu_pt", record.mu_pt),
            ("htau_phi", record.tau_phi),
            ("hmu_phi", record.mu_phi),
            ("hmet", view.met.magnitude),
            ("hmt", view.mt),
            ("hmjj", view.jets.dijet_mass),
        ];
        for (name, value) in fills {
            self.store.fill_1d(&format!("{name}_{suffix}"), value, weight)?;
        }
        Ok(())
    }
}

/// Everything one finished run produces: the cutflow, every booked histogram,
/// and the control-event total, under the histogram group name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArtifact {
    pub group: String,
    pub cutflow: Cutflow,
    pub histograms: HistogramStore,
    pub control_events: u64,
}

impl RunArtifact {
    /// Write the artifact to `path`, choosing the format from the file
    /// extension (`json`, `pkl`, or `pickle`).
    pub fn save_as(&self, file_path: &str) -> Result<()> {
        let path = crate::data::io::expand_output_path(file_path)?;
        match extension_of(&path).as_str() {
            "json" => {
                let file = File::create(path)?;
                serde_json::to_writer_pretty(BufWriter::new(file), self)?;
            }
            "pkl" | "pickle" => {
                let file = File::create(path)?;
                serde_pickle::to_writer(
                    &mut BufWriter::new(file),
                    self,
                    serde_pickle::SerOptions::new(),
                )?;
            }
            other => {
                return Err(Error::Custom(format!(
                    "Unsupported artifact extension '{other}' (expected json, pkl, or pickle)!"
                )))
            }
        }
        Ok(())
    }

    /// Read an artifact written by [`RunArtifact::save_as`].
    pub fn load(file_path: &str) -> Result<Self> {
        let path = crate::data::io::expand_output_path(file_path)?;
        let extension = extension_of(&path);
        let file = File::open(path)?;
        Ok(match extension.as_str() {
            "json" => serde_json::from_reader(BufReader::new(file))?,
            "pkl" | "pickle" => {
                serde_pickle::from_reader(BufReader::new(file), serde_pickle::DeOptions::new())?
            }
            other => {
                return Err(Error::Custom(format!(
                    "Unsupported artifact extension '{other}' (expected json, pkl, or pickle)!"
                )))
            }
        })
    }
}

fn extension_of(path: &std::path::Path) -> String {
    path.extension()
        .and_then(|extension| extension.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}
