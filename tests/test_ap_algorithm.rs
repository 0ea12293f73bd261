use chaincrf::train::{Algorithm, AlgorithmParams, Trainer};
use chaincrf::{Attribute, Model};

fn weather() -> (Vec<Vec<Attribute>>, Vec<&'static str>) {
    let xseq = vec![
        vec![Attribute::new("walk", 1.0), Attribute::new("shop", 0.5)],
        vec![Attribute::new("walk", 1.0)],
        vec![Attribute::new("walk", 1.0), Attribute::new("clean", 0.5)],
        vec![Attribute::new("shop", 0.5), Attribute::new("clean", 0.5)],
        vec![Attribute::new("walk", 0.5), Attribute::new("clean", 1.0)],
        vec![Attribute::new("clean", 1.0), Attribute::new("shop", 0.1)],
        vec![Attribute::new("walk", 1.0), Attribute::new("shop", 0.5)],
        vec![],
        vec![Attribute::new("clean", 1.0)],
    ];
    let yseq = vec![
        "sunny", "sunny", "sunny", "rainy", "rainy", "rainy", "sunny", "sunny", "rainy",
    ];
    (xseq, yseq)
}

fn accuracy(predicted: &[&str], expected: &[&str]) -> f64 {
    let correct = predicted.iter().zip(expected).filter(|(p, t)| p == t).count();
    correct as f64 / expected.len() as f64
}

/// Test that AP algorithm can train and produce predictions
#[test]
fn test_ap_basic_training() {
    let (xseq, yseq) = weather();

    let mut trainer = Trainer::new(true);
    trainer.select(Algorithm::AveragedPerceptron).unwrap();
    let AlgorithmParams::AveragedPerceptron(params) = trainer.algorithm_params_mut() else {
        unreachable!()
    };
    params.set_max_iterations(50).unwrap();
    params.set_epsilon(0.01).unwrap();
    trainer.set_shuffle_seed(1);
    trainer.append(&xseq, &yseq, 0).unwrap();

    let temp_file = tempfile::NamedTempFile::new().unwrap();
    let summary = trainer.train(temp_file.path(), -1).unwrap();
    assert!(summary.iterations.len() <= 50);

    let model = Model::open(temp_file.path()).unwrap();
    assert_eq!(model.metadata().algorithm.as_deref(), Some("ap"));
    let predicted = model.tagger().tag(&xseq).unwrap();
    let accuracy = accuracy(&predicted, &yseq);
    assert!(
        accuracy > 0.7,
        "AP accuracy too low: {:.2}%",
        accuracy * 100.0
    );
}

#[test]
fn test_ap_convergence() {
    // Simple data that should converge quickly
    let xseq = vec![
        vec![Attribute::new("a", 1.0)],
        vec![Attribute::new("b", 1.0)],
        vec![Attribute::new("a", 1.0)],
        vec![Attribute::new("b", 1.0)],
    ];
    let yseq = ["X", "Y", "X", "Y"];

    let mut trainer = Trainer::new(false);
    trainer.select("ap").unwrap();
    trainer.set("max_iterations", "100").unwrap();
    trainer.set("epsilon", "0.000001").unwrap();
    trainer.append(&xseq, &yseq, 0).unwrap();

    let (model, summary) = trainer.train_model(-1).unwrap();
    // An epoch without mistakes ends training early
    assert!(summary.iterations.len() < 100);
    assert_eq!(summary.final_loss(), Some(0.0));
    assert_eq!(model.tagger().tag(&xseq).unwrap(), yseq);
}

/// Compare AP and LBFGS on the same dataset
#[test]
fn test_ap_vs_lbfgs() {
    let (xseq, yseq) = weather();
    let (xseq, yseq) = (&xseq[..6], &yseq[..6]);

    let mut ap_trainer = Trainer::new(false);
    ap_trainer.select(Algorithm::AveragedPerceptron).unwrap();
    ap_trainer.set("max_iterations", "100").unwrap();
    ap_trainer.set("epsilon", "0.001").unwrap();
    ap_trainer.append(xseq, yseq, 0).unwrap();
    let (ap_model, _) = ap_trainer.train_model(-1).unwrap();

    let mut lbfgs_trainer = Trainer::new(false);
    lbfgs_trainer.set("max_iterations", "50").unwrap();
    lbfgs_trainer.append(xseq, yseq, 0).unwrap();
    let (lbfgs_model, _) = lbfgs_trainer.train_model(-1).unwrap();

    let ap_accuracy = accuracy(&ap_model.tagger().tag(xseq).unwrap(), yseq);
    let lbfgs_accuracy = accuracy(&lbfgs_model.tagger().tag(xseq).unwrap(), yseq);
    // AP may not always match LBFGS on small datasets
    assert!(
        ap_accuracy > 0.5,
        "AP accuracy too low: {:.2}%",
        ap_accuracy * 100.0
    );
    assert!(
        lbfgs_accuracy > 0.7,
        "LBFGS accuracy too low: {:.2}%",
        lbfgs_accuracy * 100.0
    );
}

#[test]
fn test_ap_shuffle_seed() {
    let (xseq, yseq) = weather();
    let train = |seed: u64| {
        let mut trainer = Trainer::new(false);
        trainer.select(Algorithm::AveragedPerceptron).unwrap();
        trainer.set("max_iterations", "5").unwrap();
        trainer.set_shuffle_seed(seed);
        for i in 0..xseq.len() - 1 {
            trainer.append(&xseq[i..i + 2], &yseq[i..i + 2], 0).unwrap();
        }
        trainer.train_model(-1).unwrap().0
    };
    assert_eq!(train(3), train(3));
}
