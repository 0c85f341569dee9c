use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use gmetronome::audio::spec::{SampleFormat, StreamSpec};
use gmetronome::config::GeneratorConfig;
use gmetronome::physics::{BeatKinematics, solve_cubic};
use gmetronome::sequencer::generator::Generator;
use gmetronome::synth::{SoundParameters, Synthesizer};
use gmetronome::{Meter, TrainerMode};
use std::time::Duration;

/// Benchmark the generator cycle (runs once per chunk on the audio thread)
fn bench_generator_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("generator_cycle");

    for mode in [TrainerMode::Off, TrainerMode::Continuous, TrainerMode::Stepwise] {
        let mut generator = Generator::new(GeneratorConfig::default(), StreamSpec::default());
        generator.set_meter(Meter::new(4, 4));
        generator.set_target_tempo(240.0);
        generator.set_trainer_mode(mode);
        generator.update_sounds();
        generator.start();

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", mode)),
            &mode,
            |b, _| {
                b.iter(|| black_box(generator.cycle().len()));
            },
        );
    }
    group.finish();
}

/// Benchmark click synthesis (runs on the audio thread after sound changes)
fn bench_synthesizer_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("synthesizer_render");

    for format in [SampleFormat::S16LE, SampleFormat::F32LE] {
        let spec = StreamSpec::new(format, 48000, 2);
        let synth = Synthesizer::new(spec, Duration::from_millis(60));
        let params = SoundParameters {
            tone_detune: 15.0,
            ..SoundParameters::default()
        };
        let mut buffer = Vec::new();

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", format)),
            &format,
            |b, _| {
                b.iter(|| {
                    synth.render(black_box(&params), &mut buffer);
                    black_box(buffer.len())
                });
            },
        );
    }
    group.finish();
}

/// Benchmark the cubic solver used for arrival times
fn bench_solve_cubic(c: &mut Criterion) {
    c.bench_function("solve_cubic_three_roots", |b| {
        // (x - 1)(x - 2)(x - 3)
        b.iter(|| {
            black_box(solve_cubic(
                black_box(1.0),
                black_box(-6.0),
                black_box(11.0),
                black_box(-6.0),
            ))
        });
    });

    c.bench_function("solve_cubic_one_root", |b| {
        b.iter(|| {
            black_box(solve_cubic(
                black_box(1.0),
                black_box(0.0),
                black_box(1.0),
                black_box(-2.0),
            ))
        });
    });
}

/// Benchmark oscillator stepping with an active force
fn bench_kinematics_step(c: &mut Criterion) {
    c.bench_function("kinematics_step_accelerating", |b| {
        let mut kinematics = BeatKinematics::new();
        kinematics.set_beats(4, false);
        kinematics.set_tempo(120.0);
        b.iter(|| {
            if !kinematics.is_accelerating() {
                kinematics.set_tempo(120.0);
                kinematics.accelerate(600.0, 240.0);
            }
            kinematics.step(black_box(0.05));
            black_box(kinematics.arrival(1.0))
        });
    });
}

criterion_group!(
    benches,
    bench_generator_cycle,
    bench_synthesizer_render,
    bench_solve_cubic,
    bench_kinematics_step
);
criterion_main!(benches);
