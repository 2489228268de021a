use fastalign_core::{
    write_moses, write_moses_pairs, write_scores, Builder, Corpus, Model, ModelConfig,
    SymmetricAligner, Symmetrization, TrainingConfig,
};
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct AlignOutput {
    links_moses: String,
    scores: String,
    tension: f64,
}

#[wasm_bindgen]
impl AlignOutput {
    #[wasm_bindgen(getter)]
    pub fn links_moses(&self) -> String {
        self.links_moses.clone()
    }
    #[wasm_bindgen(getter)]
    pub fn scores(&self) -> String {
        self.scores.clone()
    }
    #[wasm_bindgen(getter)]
    pub fn tension(&self) -> f64 {
        self.tension
    }
}

fn js_err(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Trains on a plaintext corpus and aligns it. Without `symmetrize` only the
/// forward direction is trained; otherwise both directions are combined with
/// the named heuristic (e.g. `grow-diag-final-and`). Scores are those of the
/// forward model.
#[wasm_bindgen]
pub fn align_plaintext(
    source_text: &str,
    target_text: &str,
    iterations: usize,
    symmetrize: Option<String>,
) -> Result<AlignOutput, JsValue> {
    let corpus = Corpus::from_plaintext(source_text, target_text).map_err(js_err)?;
    let training = TrainingConfig {
        iterations,
        threads: 1,
        ..TrainingConfig::default()
    };
    let builder = Builder::new(ModelConfig::default(), training).map_err(js_err)?;

    match symmetrize {
        None => {
            let model = builder.build(&corpus.pairs).map_err(js_err)?;
            let links = write_moses(&model.compute_alignments(&corpus.pairs));
            Ok(output(links, &model, &corpus))
        }
        Some(name) => {
            let method: Symmetrization = name.parse().map_err(js_err)?;
            let (fwd, rev) = builder.build_bidirectional(&corpus.pairs).map_err(js_err)?;
            let aligner = SymmetricAligner::new(fwd, rev, method).map_err(js_err)?;
            let links = aligner.align_batch(&corpus.pairs).map_err(js_err)?;
            Ok(output(write_moses_pairs(&links), aligner.forward(), &corpus))
        }
    }
}

fn output(links_moses: String, model: &Model, corpus: &Corpus) -> AlignOutput {
    let scores: Vec<f64> = corpus
        .pairs
        .iter()
        .map(|p| model.score(&p.source, &p.target))
        .collect();
    AlignOutput {
        links_moses,
        scores: write_scores(&scores),
        tension: model.tension(),
    }
}
