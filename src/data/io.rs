//! Dataset I/O implementations and shared column-decoding helpers.

use super::*;
use arrow::{
    array::{ArrayRef, Float32Array, Float64Array},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    file::{metadata::KeyValue, properties::WriterProperties},
};
use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Footer metadata key carrying the total generated-event count.
pub const GEN_COUNT_KEY: &str = "gen_count";

fn canonicalize_dataset_path(file_path: &str) -> Result<PathBuf> {
    Ok(Path::new(&*shellexpand::full(file_path)?).canonicalize()?)
}

pub(crate) fn expand_output_path(file_path: &str) -> Result<PathBuf> {
    Ok(PathBuf::from(&*shellexpand::full(file_path)?))
}

/// Load a [`Dataset`] from a Parquet file.
///
/// Columns are matched by the [`EventRecord`] field names, with the historical
/// ntuple branch names accepted as fallbacks. The generated-event count is
/// read from the footer metadata under [`GEN_COUNT_KEY`] when present.
pub fn read_parquet(file_path: &str) -> Result<Dataset> {
    let path = canonicalize_dataset_path(file_path)?;
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let gen_count = gen_count_from_metadata(
        builder
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .map(|kv| kv.as_slice()),
    )?;
    let total_rows = builder.metadata().file_metadata().num_rows() as usize;
    let reader = builder.build()?;
    let mut events = Vec::with_capacity(total_rows);
    for batch in reader {
        let batch = batch?;
        append_record_batch(&batch, &mut events)?;
    }
    Ok(Dataset { events, gen_count })
}

fn gen_count_from_metadata(metadata: Option<&[KeyValue]>) -> Result<Option<f64>> {
    let Some(entry) = metadata
        .unwrap_or_default()
        .iter()
        .find(|kv| kv.key == GEN_COUNT_KEY)
    else {
        return Ok(None);
    };
    let Some(raw) = entry.value.as_deref() else {
        return Ok(None);
    };
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| Error::Custom(format!("Malformed '{GEN_COUNT_KEY}' metadata: {raw:?}")))
}

/// Decode every row of a record batch into [`EventRecord`]s.
pub(crate) fn append_record_batch(
    batch: &RecordBatch,
    events: &mut Vec<EventRecord>,
) -> Result<()> {
    let columns = RecordColumns::prepare(batch)?;
    events.reserve(batch.num_rows());
    for row in 0..batch.num_rows() {
        events.push(columns.record(row));
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum FloatColumn<'a> {
    F32(&'a Float32Array),
    F64(&'a Float64Array),
}

impl FloatColumn<'_> {
    fn value(&self, row: usize) -> f64 {
        match self {
            Self::F32(array) => array.value(row) as f64,
            Self::F64(array) => array.value(row),
        }
    }

    fn flag(&self, row: usize) -> bool {
        self.value(row) > 0.5
    }
}

fn prepare_float_column<'a>(batch: &'a RecordBatch, candidates: &[&str]) -> Result<FloatColumn<'a>> {
    for candidate in candidates {
        if let Some(column) = batch.column_by_name(candidate) {
            return match column.data_type() {
                DataType::Float32 => Ok(FloatColumn::F32(
                    column
                        .as_any()
                        .downcast_ref::<Float32Array>()
                        .expect("Column advertised as Float32 but could not be downcast"),
                )),
                DataType::Float64 => Ok(FloatColumn::F64(
                    column
                        .as_any()
                        .downcast_ref::<Float64Array>()
                        .expect("Column advertised as Float64 but could not be downcast"),
                )),
                other => Err(Error::InvalidColumnType {
                    name: candidate.to_string(),
                    datatype: other.to_string(),
                }),
            };
        }
    }
    Err(Error::MissingColumn {
        name: candidates[0].to_string(),
    })
}

struct RecordColumns<'a> {
    mu_pt: FloatColumn<'a>,
    mu_eta: FloatColumn<'a>,
    mu_phi: FloatColumn<'a>,
    mu_mass: FloatColumn<'a>,
    mu_charge: FloatColumn<'a>,
    mu_iso: FloatColumn<'a>,
    tau_pt: FloatColumn<'a>,
    tau_eta: FloatColumn<'a>,
    tau_phi: FloatColumn<'a>,
    tau_mass: FloatColumn<'a>,
    tau_charge: FloatColumn<'a>,
    tau_decay_mode: FloatColumn<'a>,
    tau_gen_match: FloatColumn<'a>,
    tau_medium_iso: FloatColumn<'a>,
    tau_tight_iso: FloatColumn<'a>,
    pass_cross_trigger: FloatColumn<'a>,
    pass_iso_mu22: FloatColumn<'a>,
    pass_iso_tk_mu22: FloatColumn<'a>,
    pass_iso_mu22_eta2p1: FloatColumn<'a>,
    pass_iso_tk_mu22_eta2p1: FloatColumn<'a>,
    njets: FloatColumn<'a>,
    dijet_mass: FloatColumn<'a>,
    nbtag: FloatColumn<'a>,
    b1_pt: FloatColumn<'a>,
    b1_flavor: FloatColumn<'a>,
    b2_pt: FloatColumn<'a>,
    b2_flavor: FloatColumn<'a>,
    met: FloatColumn<'a>,
    met_phi: FloatColumn<'a>,
    num_gen_jets: FloatColumn<'a>,
    gen_weight: FloatColumn<'a>,
    npu: FloatColumn<'a>,
    gen_mass: FloatColumn<'a>,
    gen_pt: FloatColumn<'a>,
    m_sv: FloatColumn<'a>,
    pt_sv: FloatColumn<'a>,
    dbkg_vbf: FloatColumn<'a>,
    mela_phi: FloatColumn<'a>,
    mela_phi1: FloatColumn<'a>,
    q2v1: FloatColumn<'a>,
    q2v2: FloatColumn<'a>,
    costheta1: FloatColumn<'a>,
    costheta2: FloatColumn<'a>,
    costhetastar: FloatColumn<'a>,
}

impl<'a> RecordColumns<'a> {
    fn prepare(batch: &'a RecordBatch) -> Result<Self> {
        Ok(Self {
            mu_pt: prepare_float_column(batch, &["mu_pt", "pt_1"])?,
            mu_eta: prepare_float_column(batch, &["mu_eta", "eta_1"])?,
            mu_phi: prepare_float_column(batch, &["mu_phi", "phi_1"])?,
            mu_mass: prepare_float_column(batch, &["mu_mass", "m_1"])?,
            mu_charge: prepare_float_column(batch, &["mu_charge", "q_1"])?,
            mu_iso: prepare_float_column(batch, &["mu_iso", "iso_1"])?,
            tau_pt: prepare_float_column(batch, &["tau_pt", "pt_2"])?,
            tau_eta: prepare_float_column(batch, &["tau_eta", "eta_2"])?,
            tau_phi: prepare_float_column(batch, &["tau_phi", "phi_2"])?,
            tau_mass: prepare_float_column(batch, &["tau_mass", "m_2"])?,
            tau_charge: prepare_float_column(batch, &["tau_charge", "q_2"])?,
            tau_decay_mode: prepare_float_column(batch, &["tau_decay_mode", "l2_decayMode"])?,
            tau_gen_match: prepare_float_column(batch, &["tau_gen_match", "gen_match_2"])?,
            tau_medium_iso: prepare_float_column(batch, &["tau_medium_iso"])?,
            tau_tight_iso: prepare_float_column(batch, &["tau_tight_iso"])?,
            pass_cross_trigger: prepare_float_column(batch, &["pass_cross_trigger"])?,
            pass_iso_mu22: prepare_float_column(batch, &["pass_iso_mu22"])?,
            pass_iso_tk_mu22: prepare_float_column(batch, &["pass_iso_tk_mu22"])?,
            pass_iso_mu22_eta2p1: prepare_float_column(batch, &["pass_iso_mu22_eta2p1"])?,
            pass_iso_tk_mu22_eta2p1: prepare_float_column(batch, &["pass_iso_tk_mu22_eta2p1"])?,
            njets: prepare_float_column(batch, &["njets"])?,
            dijet_mass: prepare_float_column(batch, &["dijet_mass", "mjj"])?,
            nbtag: prepare_float_column(batch, &["nbtag"])?,
            b1_pt: prepare_float_column(batch, &["b1_pt", "bpt_1"])?,
            b1_flavor: prepare_float_column(batch, &["b1_flavor", "bflavor_1"])?,
            b2_pt: prepare_float_column(batch, &["b2_pt", "bpt_2"])?,
            b2_flavor: prepare_float_column(batch, &["b2_flavor", "bflavor_2"])?,
            met: prepare_float_column(batch, &["met"])?,
            met_phi: prepare_float_column(batch, &["met_phi", "metphi"])?,
            num_gen_jets: prepare_float_column(batch, &["num_gen_jets", "numGenJets"])?,
            gen_weight: prepare_float_column(batch, &["gen_weight", "genweight"])?,
            npu: prepare_float_column(batch, &["npu"])?,
            gen_mass: prepare_float_column(batch, &["gen_mass", "genM"])?,
            gen_pt: prepare_float_column(batch, &["gen_pt", "genpT"])?,
            m_sv: prepare_float_column(batch, &["m_sv"])?,
            pt_sv: prepare_float_column(batch, &["pt_sv"])?,
            dbkg_vbf: prepare_float_column(batch, &["dbkg_vbf", "Dbkg_VBF"])?,
            mela_phi: prepare_float_column(batch, &["mela_phi", "Phi"])?,
            mela_phi1: prepare_float_column(batch, &["mela_phi1", "Phi1"])?,
            q2v1: prepare_float_column(batch, &["q2v1", "Q2V1"])?,
            q2v2: prepare_float_column(batch, &["q2v2", "Q2V2"])?,
            costheta1: prepare_float_column(batch, &["costheta1"])?,
            costheta2: prepare_float_column(batch, &["costheta2"])?,
            costhetastar: prepare_float_column(batch, &["costhetastar"])?,
        })
    }

    fn record(&self, row: usize) -> EventRecord {
        EventRecord {
            mu_pt: self.mu_pt.value(row),
            mu_eta: self.mu_eta.value(row),
            mu_phi: self.mu_phi.value(row),
            mu_mass: self.mu_mass.value(row),
            mu_charge: self.mu_charge.value(row) as i32,
            mu_iso: self.mu_iso.value(row),
            tau_pt: self.tau_pt.value(row),
            tau_eta: self.tau_eta.value(row),
            tau_phi: self.tau_phi.value(row),
            tau_mass: self.tau_mass.value(row),
            tau_charge: self.tau_charge.value(row) as i32,
            tau_decay_mode: self.tau_decay_mode.value(row) as u8,
            tau_gen_match: self.tau_gen_match.value(row) as u8,
            tau_medium_iso: self.tau_medium_iso.flag(row),
            tau_tight_iso: self.tau_tight_iso.flag(row),
            pass_cross_trigger: self.pass_cross_trigger.flag(row),
            pass_iso_mu22: self.pass_iso_mu22.flag(row),
            pass_iso_tk_mu22: self.pass_iso_tk_mu22.flag(row),
            pass_iso_mu22_eta2p1: self.pass_iso_mu22_eta2p1.flag(row),
            pass_iso_tk_mu22_eta2p1: self.pass_iso_tk_mu22_eta2p1.flag(row),
            njets: self.njets.value(row) as u32,
            dijet_mass: self.dijet_mass.value(row),
            nbtag: self.nbtag.value(row) as u32,
            b1_pt: self.b1_pt.value(row),
            b1_flavor: self.b1_flavor.value(row) as i32,
            b2_pt: self.b2_pt.value(row),
            b2_flavor: self.b2_flavor.value(row) as i32,
            met: self.met.value(row),
            met_phi: self.met_phi.value(row),
            num_gen_jets: self.num_gen_jets.value(row) as u32,
            gen_weight: self.gen_weight.value(row),
            npu: self.npu.value(row),
            gen_mass: self.gen_mass.value(row),
            gen_pt: self.gen_pt.value(row),
            m_sv: self.m_sv.value(row),
            pt_sv: self.pt_sv.value(row),
            dbkg_vbf: self.dbkg_vbf.value(row),
            mela_phi: self.mela_phi.value(row),
            mela_phi1: self.mela_phi1.value(row),
            q2v1: self.q2v1.value(row),
            q2v2: self.q2v2.value(row),
            costheta1: self.costheta1.value(row),
            costheta2: self.costheta2.value(row),
            costhetastar: self.costhetastar.value(row),
        }
    }
}

/// Write a [`Dataset`] to a Parquet file, storing the generated-event count in
/// the footer metadata.
pub fn write_parquet(dataset: &Dataset, file_path: &str) -> Result<()> {
    let path = expand_output_path(file_path)?;
    let batch = record_batch_from_events(&dataset.events)?;
    let file = File::create(path)?;
    let mut properties = WriterProperties::builder();
    if let Some(count) = dataset.gen_count {
        properties = properties.set_key_value_metadata(Some(vec![KeyValue {
            key: GEN_COUNT_KEY.to_string(),
            value: Some(count.to_string()),
        }]));
    }
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(properties.build()))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

pub(crate) fn record_batch_from_events(events: &[EventRecord]) -> Result<RecordBatch> {
    fn column(events: &[EventRecord], get: impl Fn(&EventRecord) -> f64) -> ArrayRef {
        Arc::new(Float64Array::from_iter_values(events.iter().map(get)))
    }
    let fields: Vec<(&str, ArrayRef)> = vec![
        ("mu_pt", column(events, |r| r.mu_pt)),
        ("mu_eta", column(events, |r| r.mu_eta)),
        ("mu_phi", column(events, |r| r.mu_phi)),
        ("mu_mass", column(events, |r| r.mu_mass)),
        ("mu_charge", column(events, |r| r.mu_charge as f64)),
        ("mu_iso", column(events, |r| r.mu_iso)),
        ("tau_pt", column(events, |r| r.tau_pt)),
        ("tau_eta", column(events, |r| r.tau_eta)),
        ("tau_phi", column(events, |r| r.tau_phi)),
        ("tau_mass", column(events, |r| r.tau_mass)),
        ("tau_charge", column(events, |r| r.tau_charge as f64)),
        ("tau_decay_mode", column(events, |r| r.tau_decay_mode as f64)),
        ("tau_gen_match", column(events, |r| r.tau_gen_match as f64)),
        (
            "tau_medium_iso",
            column(events, |r| f64::from(u8::from(r.tau_medium_iso))),
        ),
        (
            "tau_tight_iso",
            column(events, |r| f64::from(u8::from(r.tau_tight_iso))),
        ),
        (
            "pass_cross_trigger",
            column(events, |r| f64::from(u8::from(r.pass_cross_trigger))),
        ),
        (
            "pass_iso_mu22",
            column(events, |r| f64::from(u8::from(r.pass_iso_mu22))),
        ),
        (
            "pass_iso_tk_mu22",
            column(events, |r| f64::from(u8::from(r.pass_iso_tk_mu22))),
        ),
        (
            "pass_iso_mu22_eta2p1",
            column(events, |r| f64::from(u8::from(r.pass_iso_mu22_eta2p1))),
        ),
        (
            "pass_iso_tk_mu22_eta2p1",
            column(events, |r| f64::from(u8::from(r.pass_iso_tk_mu22_eta2p1))),
        ),
        ("njets", column(events, |r| r.njets as f64)),
        ("dijet_mass", column(events, |r| r.dijet_mass)),
        ("nbtag", column(events, |r| r.nbtag as f64)),
        ("b1_pt", column(events, |r| r.b1_pt)),
        ("b1_flavor", column(events, |r| r.b1_flavor as f64)),
        ("b2_pt", column(events, |r| r.b2_pt)),
        ("b2_flavor", column(events, |r| r.b2_flavor as f64)),
        ("met", column(events, |r| r.met)),
        ("met_phi", column(events, |r| r.met_phi)),
        ("num_gen_jets", column(events, |r| r.num_gen_jets as f64)),
        ("gen_weight", column(events, |r| r.gen_weight)),
        ("npu", column(events, |r| r.npu)),
        ("gen_mass", column(events, |r| r.gen_mass)),
        ("gen_pt", column(events, |r| r.gen_pt)),
        ("m_sv", column(events, |r| r.m_sv)),
        ("pt_sv", column(events, |r| r.pt_sv)),
        ("dbkg_vbf", column(events, |r| r.dbkg_vbf)),
        ("mela_phi", column(events, |r| r.mela_phi)),
        ("mela_phi1", column(events, |r| r.mela_phi1)),
        ("q2v1", column(events, |r| r.q2v1)),
        ("q2v2", column(events, |r| r.q2v2)),
        ("costheta1", column(events, |r| r.costheta1)),
        ("costheta2", column(events, |r| r.costheta2)),
        ("costhetastar", column(events, |r| r.costhetastar)),
    ];
    let schema = Arc::new(Schema::new(
        fields
            .iter()
            .map(|(name, _)| Field::new(*name, DataType::Float64, false))
            .collect::<Vec<_>>(),
    ));
    let columns = fields.into_iter().map(|(_, array)| array).collect();
    Ok(RecordBatch::try_new(schema, columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{test_dataset, test_record};
    use approx::assert_relative_eq;

    #[test]
    fn decode_record_batch_round_trips() {
        let mut second = test_record();
        second.mu_charge = -1;
        second.tau_charge = 1;
        second.tau_tight_iso = false;
        second.njets = 3;
        second.met = 55.5;
        let events = vec![test_record(), second];
        let batch = record_batch_from_events(&events).unwrap();
        let mut decoded = Vec::new();
        append_record_batch(&batch, &mut decoded).unwrap();
        assert_eq!(decoded, events);
    }

    #[test]
    fn missing_column_is_fatal() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("mu_pt", DataType::Float64, false)])),
            vec![Arc::new(Float64Array::from(vec![30.0])) as ArrayRef],
        )
        .unwrap();
        let mut decoded = Vec::new();
        let err = append_record_batch(&batch, &mut decoded).unwrap_err();
        assert!(matches!(err, Error::MissingColumn { .. }));
    }

    #[test]
    fn non_float_column_is_rejected() {
        use arrow::array::Int64Array;
        let mut fields = record_batch_from_events(&[test_record()])
            .unwrap()
            .schema()
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect::<Vec<_>>();
        fields[0] = Field::new("mu_pt", DataType::Int64, false);
        let mut columns: Vec<ArrayRef> = record_batch_from_events(&[test_record()])
            .unwrap()
            .columns()
            .to_vec();
        columns[0] = Arc::new(Int64Array::from(vec![30_i64]));
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap();
        let mut decoded = Vec::new();
        let err = append_record_batch(&batch, &mut decoded).unwrap_err();
        assert!(matches!(err, Error::InvalidColumnType { .. }));
    }

    #[test]
    fn parquet_file_round_trips_with_gen_count() {
        let dataset = test_dataset();
        let path = std::env::temp_dir().join(format!(
            "mutau-io-test-{}.parquet",
            std::process::id()
        ));
        let path_str = path.to_str().unwrap();
        write_parquet(&dataset, path_str).unwrap();
        let reread = read_parquet(path_str).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(reread.events, dataset.events);
        assert_relative_eq!(reread.require_gen_count().unwrap(), 1000.0);
    }

    #[test]
    fn absent_gen_count_reads_as_none() {
        let dataset = Dataset::new(vec![test_record()]);
        let path = std::env::temp_dir().join(format!(
            "mutau-io-test-nogen-{}.parquet",
            std::process::id()
        ));
        let path_str = path.to_str().unwrap();
        write_parquet(&dataset, path_str).unwrap();
        let reread = read_parquet(path_str).unwrap();
        std::fs::remove_file(&path).ok();
        assert!(reread.gen_count.is_none());
        assert!(reread.require_gen_count().is_err());
    }
}
