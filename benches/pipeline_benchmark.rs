use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use fastrand_contrib::RngExt;
use mutau::{EventRecord, Pipeline, Process, SelectionCascade, WeightCalculator};

use rayon::ThreadPoolBuilder;

fn synthetic_events(n: usize) -> Vec<EventRecord> {
    let mut rng = fastrand::Rng::with_seed(0);
    (0..n)
        .map(|_| EventRecord {
            mu_pt: rng.f64_range(18.0..60.0),
            mu_eta: rng.f64_range(-2.4..2.4),
            mu_phi: rng.f64_range(-3.1..3.1),
            mu_mass: 0.10566,
            mu_charge: if rng.bool() { 1 } else { -1 },
            mu_iso: rng.f64_range(0.0..0.2),
            tau_pt: rng.f64_range(25.0..80.0),
            tau_eta: rng.f64_range(-2.4..2.4),
            tau_phi: rng.f64_range(-3.1..3.1),
            tau_mass: rng.f64_range(0.6..1.5),
            tau_charge: if rng.bool() { 1 } else { -1 },
            tau_decay_mode: rng.choice([0, 1, 10]).unwrap(),
            tau_gen_match: rng.u8(1..7),
            tau_medium_iso: true,
            tau_tight_iso: rng.bool(),
            pass_cross_trigger: true,
            pass_iso_mu22: rng.bool(),
            pass_iso_tk_mu22: rng.bool(),
            pass_iso_mu22_eta2p1: rng.bool(),
            pass_iso_tk_mu22_eta2p1: rng.bool(),
            njets: rng.u32(0..5),
            dijet_mass: rng.f64_range(0.0..800.0),
            nbtag: rng.u32(0..3),
            b1_pt: rng.f64_range(20.0..120.0),
            b1_flavor: rng.choice([0, 4, 5]).unwrap(),
            b2_pt: rng.f64_range(20.0..80.0),
            b2_flavor: rng.choice([0, 4, 5]).unwrap(),
            met: rng.f64_range(0.0..120.0),
            met_phi: rng.f64_range(-3.1..3.1),
            num_gen_jets: rng.u32(0..5),
            gen_weight: if rng.bool() { 1.0 } else { -1.0 },
            npu: rng.f64_range(0.0..60.0),
            gen_mass: rng.f64_range(60.0..120.0),
            gen_pt: rng.f64_range(0.0..200.0),
            m_sv: rng.f64_range(50.0..250.0),
            pt_sv: rng.f64_range(0.0..300.0),
            dbkg_vbf: rng.f64(),
            mela_phi: rng.f64_range(-3.1..3.1),
            mela_phi1: rng.f64_range(-3.1..3.1),
            q2v1: rng.f64_range(0.0..2000.0),
            q2v2: rng.f64_range(0.0..2000.0),
            costheta1: rng.f64_range(-1.0..1.0),
            costheta2: rng.f64_range(-1.0..1.0),
            costhetastar: rng.f64_range(-1.0..1.0),
        })
        .collect()
}

fn event_loop_benchmark(c: &mut Criterion) {
    let events = synthetic_events(4096);
    let cascade = SelectionCascade::new(Process::Ztt);
    let weights = WeightCalculator::for_simulation(Process::Ztt, 1.2);
    let mut group = c.benchmark_group("Event Pipeline Performance");
    let n_threads: Vec<usize> = (0..)
        .map(|x| 1 << x)
        .take_while(|&p| p <= num_cpus::get())
        .collect();
    for threads in n_threads {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |b, &_threads| {
                b.iter_batched(
                    || Pipeline::new(cascade.clone(), weights.clone()),
                    |mut pipeline| {
                        pool.install(|| pipeline.run(black_box(&events))).unwrap();
                        pipeline
                    },
                    BatchSize::SmallInput,
                )
            },
        );
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(30)).sample_size(100);
    targets = event_loop_benchmark
}
criterion_main!(benches);
