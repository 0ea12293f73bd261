use chaincrf::train::{Algorithm, Trainer};
use chaincrf::{Attribute, Error, Model};

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

#[test]
fn test_l2sgd_basic_training() {
    let (xseq, yseq) = weather();

    let mut trainer = Trainer::new(true);
    trainer.select(Algorithm::L2Sgd).unwrap();
    trainer.set("c2", "1.0").unwrap();
    trainer.set("max_iterations", "50").unwrap();
    trainer.set("period", "10").unwrap();
    trainer.append(&xseq, &yseq, 0).unwrap();

    let temp_file = tempfile::NamedTempFile::new().unwrap();
    let summary = trainer.train(temp_file.path(), -1).unwrap();
    assert!(!summary.iterations.is_empty());
    assert!(summary.iterations.len() <= 50);

    let model = Model::open(temp_file.path()).unwrap();
    let predicted = model.tagger().tag(&xseq).unwrap();
    let accuracy = accuracy(&predicted, &yseq);
    assert!(accuracy > 0.5, "L2SGD accuracy too low: {:.2}%", accuracy * 100.0);
}

#[test]
fn test_l2sgd_calibration() {
    let xseq = vec![
        vec![Attribute::new("a", 1.0)],
        vec![Attribute::new("b", 1.0)],
        vec![Attribute::new("a", 1.0)],
        vec![Attribute::new("b", 1.0)],
    ];
    let yseq = ["X", "Y", "X", "Y"];

    let mut trainer = Trainer::new(false);
    trainer.select(Algorithm::L2Sgd).unwrap();
    trainer.set("c2", "1.0").unwrap();
    trainer.set("max_iterations", "20").unwrap();
    trainer.set("calibration.samples", "4").unwrap();
    trainer.set("calibration.candidates", "5").unwrap();
    for _ in 0..4 {
        trainer.append(&xseq, &yseq, 0).unwrap();
    }

    let (model, summary) = trainer.train_model(-1).unwrap();
    assert!(summary.final_loss().unwrap().is_finite());
    assert_eq!(model.tagger().tag(&xseq).unwrap(), yseq);
}

#[test]
fn test_l2sgd_vs_lbfgs() {
    let (xseq, yseq) = weather();

    let mut l2sgd_trainer = Trainer::new(false);
    l2sgd_trainer.select(Algorithm::L2Sgd).unwrap();
    l2sgd_trainer.set("c2", "1.0").unwrap();
    l2sgd_trainer.set("max_iterations", "100").unwrap();
    l2sgd_trainer.append(&xseq, &yseq, 0).unwrap();
    let (l2sgd_model, _) = l2sgd_trainer.train_model(-1).unwrap();

    let mut lbfgs_trainer = Trainer::new(false);
    lbfgs_trainer.set("c2", "1.0").unwrap();
    lbfgs_trainer.set("max_iterations", "100").unwrap();
    lbfgs_trainer.append(&xseq, &yseq, 0).unwrap();
    let (lbfgs_model, _) = lbfgs_trainer.train_model(-1).unwrap();

    let l2sgd_accuracy = accuracy(&l2sgd_model.tagger().tag(&xseq).unwrap(), &yseq);
    let lbfgs_accuracy = accuracy(&lbfgs_model.tagger().tag(&xseq).unwrap(), &yseq);
    assert!(l2sgd_accuracy > 0.5);
    assert!(lbfgs_accuracy > 0.5);
}

#[test]
fn test_l2sgd_parameter_validation() {
    let mut trainer = Trainer::new(false);
    trainer.select(Algorithm::L2Sgd).unwrap();

    assert!(trainer.set("c2", "1.0").is_ok());
    assert!(trainer.set("period", "10").is_ok());
    assert!(trainer.set("delta", "1e-5").is_ok());
    assert!(trainer.set("calibration.eta", "0.1").is_ok());
    assert!(trainer.set("calibration.rate", "2.0").is_ok());

    assert!(trainer.set("c2", "0").is_err());
    assert!(trainer.set("period", "0").is_err());
    assert!(trainer.set("delta", "0").is_err());
    assert!(trainer.set("calibration.eta", "0").is_err());
    assert!(trainer.set("calibration.rate", "1.0").is_err());
    assert!(trainer.set("calibration.samples", "-1").is_err());
    assert!(matches!(trainer.set("linesearch", "MoreThuente"), Err(Error::NotFound(_))));
}

#[test]
fn test_l2sgd_convergence() {
    let (xseq, yseq) = weather();

    let mut trainer = Trainer::new(false);
    trainer.select(Algorithm::L2Sgd).unwrap();
    trainer.set("c2", "1.0").unwrap();
    trainer.set("max_iterations", "100").unwrap();
    trainer.set("period", "5").unwrap();
    trainer.set("delta", "1e-4").unwrap();
    trainer.append(&xseq, &yseq, 0).unwrap();

    let (_, summary) = trainer.train_model(-1).unwrap();
    // The improvement test cannot stop before `period` epochs
    assert!(summary.iterations.len() > 5);
    assert!(summary.iterations.len() <= 100);
}
