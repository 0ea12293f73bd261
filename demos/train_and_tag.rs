use chaincrf::train::{Algorithm, Trainer};
use chaincrf::{Attribute, Model};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

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

    let algorithm = std::env::args()
        .nth(1)
        .map(|name| name.parse::<Algorithm>())
        .transpose()?
        .unwrap_or(Algorithm::Lbfgs);

    let mut trainer = Trainer::new(true);
    trainer.select(algorithm)?;
    trainer.set("max_iterations", "100")?;
    trainer.append(&xseq, &yseq, 0)?;
    for name in trainer.params() {
        println!("{} = {}", name, trainer.get(name)?);
    }

    let model_path = std::env::temp_dir().join("train_and_tag.crfsuite");
    let summary = trainer.train(&model_path, -1)?;
    println!(
        "trained {} in {} iterations, final loss {:?}",
        algorithm,
        summary.iterations.len(),
        summary.final_loss()
    );

    let model = Model::open(&model_path)?;
    let mut tagger = model.tagger();

    let test_seq = vec![
        vec![Attribute::new("walk", 1.0)],
        vec![Attribute::new("shop", 1.0)],
        vec![Attribute::new("clean", 1.0)],
    ];
    let labels = tagger.tag(&test_seq)?;
    println!("walk -> shop -> clean: {:?}", labels);
    println!("p(y|x) = {:.4}", tagger.probability(&labels)?);

    let names = tagger.labels();
    for (t, row) in tagger.marginals().iter().enumerate() {
        let cells: Vec<String> = names
            .iter()
            .zip(row)
            .map(|(label, p)| format!("{}={:.4}", label, p))
            .collect();
        println!("  [{}] {}", t, cells.join(" "));
    }

    Ok(())
}
