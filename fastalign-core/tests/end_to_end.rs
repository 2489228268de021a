use fastalign_core::{
    write_moses, write_moses_pairs, Builder, Corpus, Model, ModelConfig, Phase, SymmetricAligner,
    Symmetrization, TrainingConfig,
};

const SOURCE: &str = "le chat\nle chat noir\nchat noir\nle\nnoir\nchat\nle noir\nle chat noir\nchat noir\nle chat\n\n";
const TARGET: &str = "the cat\nthe black cat\nblack cat\nthe\nblack\ncat\nthe black\nthe black cat\nblack cat\nthe cat\nthe\n";

fn training() -> TrainingConfig {
    TrainingConfig {
        iterations: 12,
        threads: 2,
        shards: 32,
        ..TrainingConfig::default()
    }
}

// With the diagonal prior the re-estimated tension pins at its upper bound on
// this corpus and "le chat noir" comes out monotone; the crossing is a
// lexical-only result.
fn lexical() -> ModelConfig {
    ModelConfig {
        favor_diagonal: false,
        ..ModelConfig::default()
    }
}

#[test]
fn trains_aligns_and_symmetrizes() {
    let corpus = Corpus::from_plaintext(SOURCE, TARGET).unwrap();
    let builder = Builder::new(lexical(), training()).unwrap();
    let (fwd, rev) = builder.build_bidirectional(&corpus.pairs).unwrap();

    let forward_links = fwd.compute_alignments(&corpus.pairs);
    let moses = write_moses(&forward_links);
    let lines: Vec<&str> = moses.lines().collect();
    assert_eq!(lines.len(), corpus.len());
    assert_eq!(lines[1], "0-0 1-2 2-1");
    // Empty source sentence: no links at all.
    assert_eq!(lines[10], "");

    let aligner = SymmetricAligner::new(fwd, rev, Symmetrization::GrowDiagonalFinalAnd).unwrap();
    let links = aligner.align_batch(&corpus.pairs).unwrap();
    assert_eq!(links[1], vec![(0, 0), (1, 2), (2, 1)]);
    assert!(links[10].is_empty());
    assert_eq!(write_moses_pairs(&links[..1]), "0-0 1-1\n");
}

#[test]
fn saved_model_reproduces_alignments() {
    let corpus = Corpus::from_plaintext(SOURCE, TARGET).unwrap();
    let model = Builder::new(ModelConfig::default(), training())
        .unwrap()
        .build(&corpus.pairs)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.fwd");
    model.save_to_path(&path).unwrap();
    let loaded = Model::load_from_path(&path).unwrap();

    assert_eq!(loaded.phase(), Phase::Frozen);
    assert_eq!(loaded.tension(), model.tension());
    assert_eq!(loaded.config(), model.config());
    assert_eq!(loaded.compute_alignments(&corpus.pairs), model.compute_alignments(&corpus.pairs));
    for pair in &corpus.pairs {
        for &f in &pair.source {
            for &e in &pair.target {
                assert_eq!(loaded.probability(e, f), model.probability(e, f));
            }
        }
    }
}

#[test]
fn vocabularies_and_models_survive_a_restart() {
    let corpus = Corpus::from_plaintext(SOURCE, TARGET).unwrap();
    let model = Builder::new(lexical(), training())
        .unwrap()
        .build(&corpus.pairs)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let vocab_path = dir.path().join("model.vocab");
    corpus
        .save_vocabularies(std::fs::File::create(&vocab_path).unwrap())
        .unwrap();
    model.save_to_path(dir.path().join("model.fwd")).unwrap();

    let mut fresh = Corpus::load_vocabularies(std::fs::File::open(&vocab_path).unwrap()).unwrap();
    fresh.extend_plaintext("le chat noir\nle chien\n", "the black cat\nthe dog\n").unwrap();
    let loaded = Model::load_from_path(dir.path().join("model.fwd")).unwrap();
    let out = loaded.compute_alignments(&fresh.pairs);
    assert_eq!(out[0].pairs(), vec![(0, 0), (1, 2), (2, 1)]);
    assert_eq!(out[1].len(), 2);
}
