//! The staged event selection and its bookkeeping.
//!
//! Selection proceeds as a cascade: each stage is checked in order and the
//! first failure rejects the event, so the [`Cutflow`] counts are
//! non-increasing from one stage to the next. The cascade itself covers the
//! kinematic and generator-level stages; the remaining stages are recorded by
//! the pipeline as the event survives weighting and classification.

use crate::data::EventRecord;
use crate::utils::enums::Process;
use auto_ops::impl_op_ex;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// A single stage of the selection cascade.
///
/// Stages are numbered contiguously from 1 ([`Stage::bin`]) in the order an
/// event encounters them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Every event read from the input.
    Input,
    /// Muon transverse momentum and pseudorapidity requirements.
    MuonKinematics,
    /// Cross trigger for low-pT muons, single-muon paths otherwise.
    Trigger,
    /// Tau transverse momentum and pseudorapidity requirements.
    TauKinematics,
    /// Generator-level veto specific to the sample process.
    ProcessVeto,
    /// Event weight fully assembled.
    Weighted,
    /// Transverse mass below threshold with the tau still above threshold.
    MassWindow,
    /// Event carries the signal-region flag.
    SignalRegion,
    /// Muon and tau charges sum to zero.
    OppositeCharge,
    /// Muon and tau separated by ΔR above threshold.
    Separation,
}

impl Stage {
    /// All stages, in cascade order.
    pub const ALL: [Self; 10] = [
        Self::Input,
        Self::MuonKinematics,
        Self::Trigger,
        Self::TauKinematics,
        Self::ProcessVeto,
        Self::Weighted,
        Self::MassWindow,
        Self::SignalRegion,
        Self::OppositeCharge,
        Self::Separation,
    ];

    /// The 1-based bin this stage occupies in the cutflow.
    pub fn bin(&self) -> usize {
        *self as usize + 1
    }

    /// A short human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::MuonKinematics => "muon kinematics",
            Self::Trigger => "trigger",
            Self::TauKinematics => "tau kinematics",
            Self::ProcessVeto => "process veto",
            Self::Weighted => "weighted",
            Self::MassWindow => "mass window",
            Self::SignalRegion => "signal region",
            Self::OppositeCharge => "opposite charge",
            Self::Separation => "separation",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Per-stage event counts over a run.
///
/// Counts are unweighted. Partial cutflows from independent partitions can be
/// merged with `+=`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cutflow {
    counts: [u64; Stage::ALL.len()],
}

impl Cutflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one event passing `stage`.
    pub fn record(&mut self, stage: Stage) {
        self.counts[stage as usize] += 1;
    }

    /// The number of events which passed `stage`.
    pub fn count(&self, stage: Stage) -> u64 {
        self.counts[stage as usize]
    }

    /// Iterate over `(stage, count)` pairs in cascade order.
    pub fn iter(&self) -> impl Iterator<Item = (Stage, u64)> + '_ {
        Stage::ALL.iter().map(move |stage| (*stage, self.count(*stage)))
    }
}

impl_op_ex!(+= |a: &mut Cutflow, b: &Cutflow| {
    for (count, other) in a.counts.iter_mut().zip(b.counts.iter()) {
        *count += *other;
    }
});

impl Display for Cutflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (stage, count) in self.iter() {
            writeln!(f, "{:>2}  {:<16} {}", stage.bin(), stage.label(), count)?;
        }
        Ok(())
    }
}

/// The generator-level requirement a process places on the tau's match code.
///
/// Match codes follow the usual convention: 1 and 3 are electrons faking the
/// tau, 2 and 4 are muons faking the tau, 5 is a genuine hadronic tau, and 6
/// is a jet faking the tau.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GenMatchRule {
    /// Keep events where the tau is matched to a prompt lepton (codes 1 through 4).
    LeptonFake,
    /// Keep only genuine hadronic taus (code 5).
    Genuine,
    /// Drop genuine hadronic taus (code 5).
    NotGenuine,
    /// Keep only jets faking taus (code 6).
    JetFake,
}

impl GenMatchRule {
    /// The rule a given process imposes, if any.
    ///
    /// Processes without a rule (data and most simulation) accept every
    /// match code.
    pub fn for_process(process: Process) -> Option<Self> {
        match process {
            Process::Zl => Some(Self::LeptonFake),
            Process::Ztt | Process::Ttt => Some(Self::Genuine),
            Process::Zll | Process::Ttj => Some(Self::NotGenuine),
            Process::Zj => Some(Self::JetFake),
            _ => None,
        }
    }

    /// Whether an event with the given match code survives this rule.
    pub fn allows(&self, gen_match: u8) -> bool {
        match self {
            Self::LeptonFake => gen_match <= 4,
            Self::Genuine => gen_match == 5,
            Self::NotGenuine => gen_match != 5,
            Self::JetFake => gen_match == 6,
        }
    }
}

/// The kinematic and generator-level selection applied to every event.
#[derive(Debug, Clone)]
pub struct SelectionCascade {
    /// Minimum muon transverse momentum (GeV).
    pub min_muon_pt: f64,
    /// Maximum muon |η|.
    pub max_muon_abs_eta: f64,
    /// Muon pT above which the single-muon trigger paths apply (GeV).
    pub single_trigger_threshold: f64,
    /// Minimum tau transverse momentum (GeV).
    pub min_tau_pt: f64,
    /// Maximum tau |η|.
    pub max_tau_abs_eta: f64,
    /// The process being selected, which fixes the generator-level veto.
    pub process: Process,
}

impl SelectionCascade {
    /// The standard cascade for the given process.
    pub fn new(process: Process) -> Self {
        Self {
            min_muon_pt: 20.0,
            max_muon_abs_eta: 2.1,
            single_trigger_threshold: 23.0,
            min_tau_pt: 30.0,
            max_tau_abs_eta: 2.3,
            process,
        }
    }

    /// Run the cascade on one event, recording each passed stage in `cutflow`.
    ///
    /// Returns `true` if the event survives every stage up to and including
    /// [`Stage::ProcessVeto`].
    pub fn accept(&self, record: &EventRecord, cutflow: &mut Cutflow) -> bool {
        cutflow.record(Stage::Input);
        if !(record.mu_pt > self.min_muon_pt && record.mu_eta.abs() < self.max_muon_abs_eta) {
            return false;
        }
        cutflow.record(Stage::MuonKinematics);
        if !self.passes_trigger(record) {
            return false;
        }
        cutflow.record(Stage::Trigger);
        if !(record.tau_pt > self.min_tau_pt && record.tau_eta.abs() < self.max_tau_abs_eta) {
            return false;
        }
        cutflow.record(Stage::TauKinematics);
        if !self.passes_gen_match_veto(record) {
            return false;
        }
        cutflow.record(Stage::ProcessVeto);
        true
    }

    fn passes_trigger(&self, record: &EventRecord) -> bool {
        if record.mu_pt <= self.single_trigger_threshold {
            record.pass_cross_trigger
        } else {
            record.pass_iso_mu22
                && record.pass_iso_tk_mu22
                && record.pass_iso_mu22_eta2p1
                && record.pass_iso_tk_mu22_eta2p1
        }
    }

    fn passes_gen_match_veto(&self, record: &EventRecord) -> bool {
        GenMatchRule::for_process(self.process)
            .map_or(true, |rule| rule.allows(record.tau_gen_match))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_record;

    #[test]
    fn passing_event_records_first_five_stages() {
        let cascade = SelectionCascade::new(Process::Other);
        let mut cutflow = Cutflow::new();
        assert!(cascade.accept(&test_record(), &mut cutflow));
        for stage in &Stage::ALL[..5] {
            assert_eq!(cutflow.count(*stage), 1, "stage {stage}");
        }
        for stage in &Stage::ALL[5..] {
            assert_eq!(cutflow.count(*stage), 0, "stage {stage}");
        }
    }

    #[test]
    fn cutflow_is_monotonic() {
        let cascade = SelectionCascade::new(Process::Ztt);
        let mut cutflow = Cutflow::new();
        let mut soft_muon = test_record();
        soft_muon.mu_pt = 15.0;
        let mut forward_tau = test_record();
        forward_tau.tau_eta = 2.5;
        let mut jet_fake = test_record();
        jet_fake.tau_gen_match = 6;
        for record in [test_record(), soft_muon, forward_tau, jet_fake] {
            cascade.accept(&record, &mut cutflow);
        }
        let counts: Vec<u64> = cutflow.iter().map(|(_, count)| count).collect();
        assert!(counts.windows(2).all(|pair| pair[0] >= pair[1]));
        assert_eq!(cutflow.count(Stage::Input), 4);
        assert_eq!(cutflow.count(Stage::ProcessVeto), 1);
    }

    #[test]
    fn low_pt_muons_use_the_cross_trigger() {
        let cascade = SelectionCascade::new(Process::Other);
        let mut record = test_record();
        record.mu_pt = 21.0;
        record.pass_iso_mu22 = false;
        record.pass_iso_tk_mu22 = false;
        record.pass_iso_mu22_eta2p1 = false;
        record.pass_iso_tk_mu22_eta2p1 = false;
        record.pass_cross_trigger = true;
        let mut cutflow = Cutflow::new();
        assert!(cascade.accept(&record, &mut cutflow));
        record.pass_cross_trigger = false;
        assert!(!cascade.accept(&record, &mut cutflow));
        assert_eq!(cutflow.count(Stage::Trigger), 1);
    }

    #[test]
    fn high_pt_muons_need_every_single_muon_path() {
        let cascade = SelectionCascade::new(Process::Other);
        let mut record = test_record();
        record.pass_cross_trigger = false;
        let mut cutflow = Cutflow::new();
        assert!(cascade.accept(&record, &mut cutflow));
        record.pass_iso_tk_mu22_eta2p1 = false;
        assert!(!cascade.accept(&record, &mut cutflow));
        assert_eq!(cutflow.count(Stage::MuonKinematics), 2);
        assert_eq!(cutflow.count(Stage::Trigger), 1);
    }

    #[test]
    fn gen_match_vetoes_follow_the_process() {
        let genuine = test_record();
        let mut lepton_fake = genuine.clone();
        lepton_fake.tau_gen_match = 2;
        let mut jet_fake = genuine.clone();
        jet_fake.tau_gen_match = 6;
        let cases = [
            (Process::Zl, &lepton_fake, true),
            (Process::Zl, &genuine, false),
            (Process::Ztt, &genuine, true),
            (Process::Ztt, &jet_fake, false),
            (Process::Ttt, &genuine, true),
            (Process::Zll, &genuine, false),
            (Process::Zll, &jet_fake, true),
            (Process::Ttj, &genuine, false),
            (Process::Zj, &jet_fake, true),
            (Process::Zj, &genuine, false),
            (Process::W, &genuine, true),
            (Process::W, &jet_fake, true),
            (Process::Other, &lepton_fake, true),
        ];
        for (process, record, expected) in cases {
            let mut cutflow = Cutflow::new();
            assert_eq!(
                SelectionCascade::new(process).accept(record, &mut cutflow),
                expected,
                "{process} with gen match {}",
                record.tau_gen_match
            );
        }
    }

    #[test]
    fn gen_match_rules_partition_the_codes() {
        for code in 1..=6 {
            assert_eq!(GenMatchRule::LeptonFake.allows(code), code <= 4);
            assert_eq!(GenMatchRule::Genuine.allows(code), code == 5);
            assert_eq!(GenMatchRule::NotGenuine.allows(code), code != 5);
            assert_eq!(GenMatchRule::JetFake.allows(code), code == 6);
        }
    }

    #[test]
    fn cutflows_merge_by_addition() {
        let cascade = SelectionCascade::new(Process::Other);
        let mut total = Cutflow::new();
        let mut partial = Cutflow::new();
        cascade.accept(&test_record(), &mut total);
        cascade.accept(&test_record(), &mut partial);
        total += &partial;
        assert_eq!(total.count(Stage::Input), 2);
        assert_eq!(total.count(Stage::ProcessVeto), 2);
        assert_eq!(total.count(Stage::Weighted), 0);
    }
}
