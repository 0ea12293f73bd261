use chaincrf::train::{Algorithm, Trainer};
use chaincrf::Error;

#[test]
fn test_c1_negative_validation() {
    let mut trainer = Trainer::new(false);

    let result = trainer.set("c1", "-1.0");
    assert_eq!(result.unwrap_err().to_string(), "c1 must be non-negative");

    assert!(trainer.set("c1", "0.0").is_ok());
    assert!(trainer.set("c1", "1.0").is_ok());
}

#[test]
fn test_c2_negative_validation() {
    let mut trainer = Trainer::new(false);

    let result = trainer.set("c2", "-1.0");
    assert_eq!(result.unwrap_err().to_string(), "c2 must be non-negative");

    assert!(trainer.set("c2", "0.0").is_ok());
    assert!(trainer.set("c2", "1.0").is_ok());
}

#[test]
fn test_epsilon_validation() {
    let mut trainer = Trainer::new(false);

    assert!(trainer.set("epsilon", "0.0").is_ok());
    let result = trainer.set("epsilon", "-0.001");
    assert_eq!(
        result.unwrap_err().to_string(),
        "epsilon must be non-negative"
    );
    assert!(trainer.set("epsilon", "0.001").is_ok());
    assert!(trainer.set("epsilon", "1e-5").is_ok());
    assert_eq!(trainer.get("epsilon").unwrap(), "0.00001");
}

#[test]
fn test_negative_zero_epsilon() {
    let mut trainer = Trainer::new(false);
    trainer.set("epsilon", "-0").unwrap();
    assert_eq!(trainer.get("epsilon").unwrap(), "0");

    trainer.set("max_iterations", "5").unwrap();
    let xseq = vec![
        vec![chaincrf::Attribute::new("a", 1.0)],
        vec![chaincrf::Attribute::new("b", 1.0)],
    ];
    trainer.append(&xseq, &["X", "Y"], 0).unwrap();
    assert!(trainer.train_model(-1).is_ok());
}

#[test]
fn test_invalid_parameter_values() {
    let mut trainer = Trainer::new(false);

    assert!(trainer.set("c1", "not_a_number").is_err());
    assert!(trainer.set("c2", "abc").is_err());
    assert!(trainer.set("epsilon", "xyz").is_err());
    assert!(trainer.set("num_memories", "not_an_int").is_err());
    assert!(trainer.set("num_memories", "0").is_err());
    assert!(trainer.set("max_iterations", "1.5").is_err());
    assert!(trainer.set("feature.possible_states", "yes").is_err());
    assert!(trainer.set("feature.minfreq", "-1").is_err());
}

#[test]
fn test_unknown_parameter() {
    let mut trainer = Trainer::new(false);

    let result = trainer.set("unknown_param", "1.0");
    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert!(result.unwrap_err().to_string().contains("unknown parameter"));
    assert!(trainer.get("unknown_param").is_err());
    assert!(trainer.help("unknown_param").is_err());
}

#[test]
fn test_linesearch() {
    let mut trainer = Trainer::new(false);
    assert_eq!(trainer.get("linesearch").unwrap(), "MoreThuente");

    trainer.set("linesearch", "Backtracking").unwrap();
    assert_eq!(trainer.get("linesearch").unwrap(), "BacktrackingWolfe");
    trainer.set("linesearch", "StrongBacktracking").unwrap();
    assert_eq!(trainer.get("linesearch").unwrap(), "BacktrackingStrongWolfe");
    assert!(trainer.set("linesearch", "Newton").is_err());
    assert_eq!(trainer.get("linesearch").unwrap(), "BacktrackingStrongWolfe");
}

#[test]
fn test_defaults() {
    let defaults: &[(Algorithm, &[(&str, &str)])] = &[
        (
            Algorithm::Lbfgs,
            &[
                ("c1", "0"),
                ("c2", "1"),
                ("num_memories", "6"),
                ("max_iterations", "2147483647"),
                ("epsilon", "0.00001"),
                ("period", "10"),
                ("delta", "0.00001"),
                ("linesearch", "MoreThuente"),
                ("max_linesearch", "20"),
            ],
        ),
        (
            Algorithm::L2Sgd,
            &[
                ("c2", "1"),
                ("max_iterations", "1000"),
                ("period", "10"),
                ("delta", "0.000001"),
                ("calibration.eta", "0.1"),
                ("calibration.rate", "2"),
                ("calibration.samples", "1000"),
                ("calibration.candidates", "10"),
                ("calibration.max_trials", "20"),
            ],
        ),
        (
            Algorithm::AveragedPerceptron,
            &[("max_iterations", "100"), ("epsilon", "0")],
        ),
        (
            Algorithm::PassiveAggressive,
            &[
                ("type", "1"),
                ("c", "1"),
                ("error_sensitive", "1"),
                ("averaging", "1"),
                ("max_iterations", "100"),
                ("epsilon", "0"),
            ],
        ),
        (
            Algorithm::Arow,
            &[
                ("variance", "1"),
                ("gamma", "1"),
                ("max_iterations", "100"),
                ("epsilon", "0"),
            ],
        ),
    ];

    for (algorithm, values) in defaults {
        let mut trainer = Trainer::new(false);
        trainer.select(*algorithm).unwrap();
        // Feature parameters come first
        assert_eq!(trainer.params().len(), values.len() + 3);
        for (name, value) in *values {
            assert_eq!(trainer.get(name).unwrap(), *value, "{} {}", algorithm, name);
        }
        assert_eq!(trainer.get("feature.minfreq").unwrap(), "0");
        assert_eq!(trainer.get("feature.possible_states").unwrap(), "0");
        assert_eq!(trainer.get("feature.possible_transitions").unwrap(), "0");
    }
}

#[test]
fn test_help() {
    let trainer = Trainer::new(false);
    for name in trainer.params() {
        assert!(!trainer.help(name).unwrap().is_empty(), "{}", name);
    }
    // Help is available for parameters of other algorithms too
    assert!(!trainer.help("gamma").unwrap().is_empty());
}
