//! Weighted histogram accumulators and the analysis booking schema.
//!
//! Histograms are uniformly binned and track the sum of weights and the sum
//! of squared weights per bin, with out-of-range fills recorded separately.
//! The whole set for a run lives in a [`HistogramStore`] booked once from
//! [`analysis_store`] before the event loop; filling an unbooked name is a
//! contract violation and fails the run.

use crate::utils::{get_bin_edges, get_bin_index};
use crate::{Error, Result};
use accurate::{sum::Klein, traits::*};
use auto_ops::impl_op_ex;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A uniformly binned 1-D histogram of weighted fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist1D {
    bins: usize,
    lo: f64,
    hi: f64,
    bin_content: Vec<f64>,
    sumw2: Vec<f64>,
    underflow: f64,
    overflow: f64,
    entries: u64,
}

impl Hist1D {
    pub fn new(bins: usize, lo: f64, hi: f64) -> Self {
        Self {
            bins,
            lo,
            hi,
            bin_content: vec![0.0; bins],
            sumw2: vec![0.0; bins],
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
        }
    }

    /// Add a weighted entry; out-of-range values land in the underflow or
    /// overflow accumulator.
    pub fn fill(&mut self, value: f64, weight: f64) {
        self.entries += 1;
        match get_bin_index(value, self.bins, (self.lo, self.hi)) {
            Some(bin) => {
                self.bin_content[bin] += weight;
                self.sumw2[bin] += weight * weight;
            }
            None if value < self.lo => self.underflow += weight,
            None => self.overflow += weight,
        }
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn range(&self) -> (f64, f64) {
        (self.lo, self.hi)
    }

    /// The edges of each bin (length is one greater than the bin count).
    pub fn edges(&self) -> Vec<f64> {
        get_bin_edges(self.bins, (self.lo, self.hi))
    }

    pub fn bin_content(&self) -> &[f64] {
        &self.bin_content
    }

    pub fn sumw2(&self) -> &[f64] {
        &self.sumw2
    }

    pub fn underflow(&self) -> f64 {
        self.underflow
    }

    pub fn overflow(&self) -> f64 {
        self.overflow
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// The sum of all in-range bin contents.
    pub fn integral(&self) -> f64 {
        self.bin_content
            .iter()
            .copied()
            .sum_with_accumulator::<Klein<f64>>()
    }
}

impl_op_ex!(+= |a: &mut Hist1D, b: &Hist1D| {
    debug_assert_eq!((a.bins, a.lo, a.hi), (b.bins, b.lo, b.hi));
    for (content, other) in a.bin_content.iter_mut().zip(b.bin_content.iter()) {
        *content += other;
    }
    for (content, other) in a.sumw2.iter_mut().zip(b.sumw2.iter()) {
        *content += other;
    }
    a.underflow += b.underflow;
    a.overflow += b.overflow;
    a.entries += b.entries;
});

/// A uniformly binned 2-D histogram of weighted fills, stored row-major in
/// the x index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist2D {
    x_bins: usize,
    x_lo: f64,
    x_hi: f64,
    y_bins: usize,
    y_lo: f64,
    y_hi: f64,
    bin_content: Vec<f64>,
    sumw2: Vec<f64>,
    out_of_range: f64,
    entries: u64,
}

impl Hist2D {
    pub fn new(x_bins: usize, x_lo: f64, x_hi: f64, y_bins: usize, y_lo: f64, y_hi: f64) -> Self {
        Self {
            x_bins,
            x_lo,
            x_hi,
            y_bins,
            y_lo,
            y_hi,
            bin_content: vec![0.0; x_bins * y_bins],
            sumw2: vec![0.0; x_bins * y_bins],
            out_of_range: 0.0,
            entries: 0,
        }
    }

    /// Add a weighted entry; a value outside either axis lands in the single
    /// out-of-range accumulator.
    pub fn fill(&mut self, x: f64, y: f64, weight: f64) {
        self.entries += 1;
        let x_bin = get_bin_index(x, self.x_bins, (self.x_lo, self.x_hi));
        let y_bin = get_bin_index(y, self.y_bins, (self.y_lo, self.y_hi));
        match (x_bin, y_bin) {
            (Some(x_bin), Some(y_bin)) => {
                let flat = x_bin * self.y_bins + y_bin;
                self.bin_content[flat] += weight;
                self.sumw2[flat] += weight * weight;
            }
            _ => self.out_of_range += weight,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.x_bins, self.y_bins)
    }

    pub fn x_range(&self) -> (f64, f64) {
        (self.x_lo, self.x_hi)
    }

    pub fn y_range(&self) -> (f64, f64) {
        (self.y_lo, self.y_hi)
    }

    pub fn bin_content(&self, x_bin: usize, y_bin: usize) -> f64 {
        self.bin_content[x_bin * self.y_bins + y_bin]
    }

    pub fn out_of_range(&self) -> f64 {
        self.out_of_range
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// The sum of all in-range bin contents.
    pub fn integral(&self) -> f64 {
        self.bin_content
            .iter()
            .copied()
            .sum_with_accumulator::<Klein<f64>>()
    }
}

impl_op_ex!(+= |a: &mut Hist2D, b: &Hist2D| {
    debug_assert_eq!(a.shape(), b.shape());
    for (content, other) in a.bin_content.iter_mut().zip(b.bin_content.iter()) {
        *content += other;
    }
    for (content, other) in a.sumw2.iter_mut().zip(b.sumw2.iter()) {
        *content += other;
    }
    a.out_of_range += b.out_of_range;
    a.entries += b.entries;
});

/// A named collection of histograms with a schema fixed at booking time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramStore {
    h1: IndexMap<String, Hist1D>,
    h2: IndexMap<String, Hist2D>,
}

impl HistogramStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn book_1d(&mut self, name: &str, bins: usize, lo: f64, hi: f64) {
        self.h1.insert(name.to_string(), Hist1D::new(bins, lo, hi));
    }

    #[allow(clippy::too_many_arguments)]
    pub fn book_2d(
        &mut self,
        name: &str,
        x_bins: usize,
        x_lo: f64,
        x_hi: f64,
        y_bins: usize,
        y_lo: f64,
        y_hi: f64,
    ) {
        self.h2.insert(
            name.to_string(),
            Hist2D::new(x_bins, x_lo, x_hi, y_bins, y_lo, y_hi),
        );
    }

    /// Fill a booked 1-D histogram by name.
    pub fn fill_1d(&mut self, name: &str, value: f64, weight: f64) -> Result<()> {
        self.h1
            .get_mut(name)
            .ok_or_else(|| Error::UnknownHistogram {
                name: name.to_string(),
            })?
            .fill(value, weight);
        Ok(())
    }

    /// Fill a booked 2-D histogram by name.
    pub fn fill_2d(&mut self, name: &str, x: f64, y: f64, weight: f64) -> Result<()> {
        self.h2
            .get_mut(name)
            .ok_or_else(|| Error::UnknownHistogram {
                name: name.to_string(),
            })?
            .fill(x, y, weight);
        Ok(())
    }

    pub fn h1(&self, name: &str) -> Option<&Hist1D> {
        self.h1.get(name)
    }

    pub fn h2(&self, name: &str) -> Option<&Hist2D> {
        self.h2.get(name)
    }

    pub fn iter_1d(&self) -> impl Iterator<Item = (&String, &Hist1D)> {
        self.h1.iter()
    }

    pub fn iter_2d(&self) -> impl Iterator<Item = (&String, &Hist2D)> {
        self.h2.iter()
    }

    pub fn len_1d(&self) -> usize {
        self.h1.len()
    }

    pub fn len_2d(&self) -> usize {
        self.h2.len()
    }
}

impl_op_ex!(+= |a: &mut HistogramStore, b: &HistogramStore| {
    for (name, histogram) in &b.h1 {
        if let Some(target) = a.h1.get_mut(name) {
            *target += histogram;
        } else {
            a.h1.insert(name.clone(), histogram.clone());
        }
    }
    for (name, histogram) in &b.h2 {
        if let Some(target) = a.h2.get_mut(name) {
            *target += histogram;
        } else {
            a.h2.insert(name.clone(), histogram.clone());
        }
    }
});

/// Kinematic histograms filled for every selection region: (name prefix,
/// bins, range). Region-specific copies get the region's suffix appended.
const REGION_BATTERY: [(&str, usize, f64, f64); 7] = [
    ("htau_pt", 40, 0.0, 200.0),
    ("hmu_pt", 40, 0.0, 200.0),
    ("htau_phi", 32, -3.2, 3.2),
    ("hmu_phi", 32, -3.2, 3.2),
    ("hmet", 40, 0.0, 200.0),
    ("hmt", 40, 0.0, 200.0),
    ("hmjj", 50, 0.0, 1000.0),
];

/// The extended signal-region battery beyond [`REGION_BATTERY`].
const SIGNAL_BATTERY: [(&str, usize, f64, f64); 17] = [
    ("hmu_eta", 30, -3.0, 3.0),
    ("htau_eta", 30, -3.0, 3.0),
    ("hmet_x", 40, -200.0, 200.0),
    ("hmet_y", 40, -200.0, 200.0),
    ("hmet_pt", 40, 0.0, 200.0),
    ("hnjets", 10, 0.0, 10.0),
    ("hNGenJets", 10, 0.0, 10.0),
    ("pt_sv", 40, 0.0, 400.0),
    ("m_sv", 40, 0.0, 400.0),
    ("Dbkg_VBF", 20, 0.0, 1.0),
    ("Phi", 32, -3.2, 3.2),
    ("Phi1", 32, -3.2, 3.2),
    ("Q2V1", 40, 0.0, 2000.0),
    ("Q2V2", 40, 0.0, 2000.0),
    ("costheta1", 20, -1.0, 1.0),
    ("costheta2", 20, -1.0, 1.0),
    ("costhetastar", 20, -1.0, 1.0),
];

/// Category-binned 2-D histogram axes: (name prefix, x bins, x range). The
/// y axis is the mass discriminant for every category.
const CATEGORY_PLANES: [(&str, usize, f64, f64); 4] = [
    ("h0", 12, 0.0, 12.0),
    ("h1", 40, 0.0, 400.0),
    ("h2", 50, 0.0, 1000.0),
    ("h3", 40, 0.0, 200.0),
];

/// Charge/region suffixes carried by the category planes.
pub const PLANE_SUFFIXES: [&str; 5] = ["OS", "SS", "QCD", "WOS", "WSS"];

/// Book the full fixed schema used by the analysis.
pub fn analysis_store() -> HistogramStore {
    let mut store = HistogramStore::new();
    store.book_1d("pre_mt", 40, 0.0, 200.0);
    store.book_1d("pre_tau_pt", 40, 0.0, 200.0);
    store.book_1d("pre_tau_iso", 2, 0.0, 2.0);
    store.book_1d("pre_mu_iso", 25, 0.0, 0.5);
    store.book_1d("n70", 5, 0.0, 5.0);
    for (name, bins, lo, hi) in REGION_BATTERY {
        store.book_1d(name, bins, lo, hi);
        for suffix in ["SS", "QCD", "WOS", "WSS"] {
            store.book_1d(&format!("{name}_{suffix}"), bins, lo, hi);
        }
    }
    for (name, bins, lo, hi) in SIGNAL_BATTERY {
        store.book_1d(name, bins, lo, hi);
    }
    for (prefix, x_bins, x_lo, x_hi) in CATEGORY_PLANES {
        for suffix in PLANE_SUFFIXES {
            store.book_2d(&format!("{prefix}_{suffix}"), x_bins, x_lo, x_hi, 40, 0.0, 400.0);
        }
    }
    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn weighted_fills_track_content_and_variance() {
        let mut histogram = Hist1D::new(4, 0.0, 4.0);
        histogram.fill(0.5, 2.0);
        histogram.fill(0.7, 3.0);
        histogram.fill(3.9, 1.0);
        assert_relative_eq!(histogram.bin_content()[0], 5.0);
        assert_relative_eq!(histogram.sumw2()[0], 13.0);
        assert_relative_eq!(histogram.bin_content()[3], 1.0);
        assert_eq!(histogram.entries(), 3);
        assert_relative_eq!(histogram.integral(), 6.0);
    }

    #[test]
    fn out_of_range_fills_go_to_the_flow_accumulators() {
        let mut histogram = Hist1D::new(4, 0.0, 4.0);
        histogram.fill(-1.0, 2.0);
        histogram.fill(4.0, 3.0);
        histogram.fill(17.0, 1.0);
        assert_relative_eq!(histogram.underflow(), 2.0);
        assert_relative_eq!(histogram.overflow(), 4.0);
        assert_relative_eq!(histogram.integral(), 0.0);
        assert_eq!(histogram.entries(), 3);
    }

    #[test]
    fn two_dimensional_fills_land_in_the_right_cell() {
        let mut histogram = Hist2D::new(2, 0.0, 2.0, 4, 0.0, 400.0);
        histogram.fill(1.5, 150.0, 2.5);
        assert_relative_eq!(histogram.bin_content(1, 1), 2.5);
        histogram.fill(1.5, 450.0, 1.0);
        histogram.fill(-1.0, 150.0, 1.0);
        assert_relative_eq!(histogram.out_of_range(), 2.0);
        assert_eq!(histogram.entries(), 3);
        assert_relative_eq!(histogram.integral(), 2.5);
    }

    #[test]
    fn stores_merge_by_addition() {
        let mut total = analysis_store();
        let mut partial = analysis_store();
        total.fill_1d("hmt", 40.0, 1.0).unwrap();
        partial.fill_1d("hmt", 40.0, 2.0).unwrap();
        partial.fill_2d("h0_OS", 1.0, 120.0, 0.5).unwrap();
        total += &partial;
        assert_relative_eq!(total.h1("hmt").unwrap().integral(), 3.0);
        assert_eq!(total.h1("hmt").unwrap().entries(), 2);
        assert_relative_eq!(total.h2("h0_OS").unwrap().integral(), 0.5);
    }

    #[test]
    fn filling_an_unbooked_name_is_fatal() {
        let mut store = analysis_store();
        assert!(matches!(
            store.fill_1d("not_booked", 1.0, 1.0),
            Err(Error::UnknownHistogram { .. })
        ));
        assert!(matches!(
            store.fill_2d("h9_OS", 1.0, 1.0, 1.0),
            Err(Error::UnknownHistogram { .. })
        ));
    }

    #[test]
    fn the_analysis_schema_books_every_expected_name() {
        let store = analysis_store();
        assert_eq!(store.len_1d(), 4 + 1 + 7 * 5 + 17);
        assert_eq!(store.len_2d(), 20);
        for name in ["pre_mt", "n70", "hmu_pt", "htau_pt_SS", "hmjj_QCD", "hmt_WOS", "costhetastar"] {
            assert!(store.h1(name).is_some(), "missing {name}");
        }
        for prefix in ["h0", "h1", "h2", "h3"] {
            for suffix in PLANE_SUFFIXES {
                assert!(store.h2(&format!("{prefix}_{suffix}")).is_some());
            }
        }
        assert_eq!(store.h2("h0_OS").unwrap().shape(), (12, 40));
        assert_eq!(store.h2("h2_WSS").unwrap().x_range(), (0.0, 1000.0));
    }
}
