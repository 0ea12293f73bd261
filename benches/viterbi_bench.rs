use chaincrf::train::{Algorithm, Trainer};
use chaincrf::{Attribute, Model};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Train a small model over `l` labels
fn model_with_labels(l: usize) -> Model {
    let labels: Vec<String> = (0..l).map(|i| format!("L{}", i)).collect();
    let mut trainer = Trainer::new(false);
    trainer.select(Algorithm::AveragedPerceptron).unwrap();
    trainer.set("max_iterations", "5").unwrap();
    trainer.set("feature.possible_transitions", "1").unwrap();
    trainer.set("feature.possible_states", "1").unwrap();
    for shift in 0..l {
        let xseq: Vec<Vec<Attribute>> = (0..l)
            .map(|i| vec![Attribute::new(format!("a{}", (i + shift) % l), 1.0)])
            .collect();
        let yseq: Vec<&str> = (0..l).map(|i| labels[(i * 7 + shift) % l].as_str()).collect();
        trainer.append(&xseq, &yseq, 0).unwrap();
    }
    trainer.train_model(-1).unwrap().0
}

fn benchmark_viterbi_by_l(c: &mut Criterion) {
    let mut group = c.benchmark_group("viterbi_by_l");

    let t = 10; // Sequence length
    for l in [2, 3, 4, 5, 6, 7, 8, 9, 10, 12, 16, 20] {
        let model = model_with_labels(l);
        let xseq: Vec<Vec<Attribute>> = (0..t)
            .map(|i| vec![Attribute::new(format!("a{}", i % l), 1.0)])
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(l), &l, |b, _| {
            let mut tagger = model.tagger();
            b.iter(|| black_box(tagger.tag(&xseq).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_viterbi_by_l);
criterion_main!(benches);
