use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use fastalign_core::{
    write_moses, write_moses_pairs, write_scores, Builder, Corpus, Model, ModelConfig,
    SymmetricAligner, Symmetrization, TensionSolver, TrainingConfig,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Word alignment with a reparameterized IBM Model 2")]
struct Args {
    /// Source side, one sentence per line ("-" for stdin).
    #[arg(short = 's', long = "source")]
    source: String,
    /// Target side, one sentence per line ("-" for stdin).
    #[arg(short = 't', long = "target")]
    target: String,
    /// Write forward (source -> target) links here.
    #[arg(short = 'f', long = "forward")]
    links_fwd: Option<String>,
    /// Write reverse (target -> source) links here.
    #[arg(short = 'r', long = "reverse")]
    links_rev: Option<String>,
    /// Write symmetrized links here. Used when --symmetrize is given or
    /// neither -f nor -r is.
    #[arg(short = 'o', long = "output", default_value = "-")]
    output: String,
    #[arg(long = "symmetrize")]
    symmetrize: Option<Symmetrization>,
    #[arg(short = 'i', long = "iterations", default_value_t = fastalign_core::DEFAULT_ITERATIONS)]
    iterations: usize,
    #[arg(short = 'N', long = "null-prob", default_value_t = fastalign_core::DEFAULT_PROB_ALIGN_NULL)]
    null_prob: f64,
    #[arg(short = 'T', long = "tension", default_value_t = fastalign_core::DEFAULT_DIAGONAL_TENSION)]
    tension: f64,
    #[arg(long = "no-null")]
    no_null: bool,
    #[arg(long = "no-diagonal")]
    no_diagonal: bool,
    /// Variational-Bayes normalization with this Dirichlet alpha.
    #[arg(long = "vb")]
    vb: Option<f64>,
    /// Stop when the relative log-likelihood gain of a pass falls below this.
    #[arg(long = "converge")]
    converge: Option<f64>,
    /// Drop table entries below this probability after training.
    #[arg(long = "prune")]
    prune: Option<f64>,
    /// Re-estimate the tension with fixed-rate gradient steps instead of Newton.
    #[arg(long = "gradient-tension")]
    gradient_tension: bool,
    /// Worker threads (0 = one per core).
    #[arg(long = "threads", default_value_t = 0)]
    threads: usize,
    /// Save vocabularies and trained models under this prefix.
    #[arg(long = "save-model")]
    save_model: Option<PathBuf>,
    /// Align with models saved under this prefix instead of training.
    #[arg(long = "load-model")]
    load_model: Option<PathBuf>,
    /// Write per-sentence negative log-likelihoods of the forward model here.
    #[arg(long = "scores")]
    scores: Option<String>,
    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn read_all(path: &str) -> Result<String> {
    if path == "-" {
        let mut s = String::new();
        io::stdin().read_to_string(&mut s).context("reading stdin")?;
        Ok(s)
    } else {
        fs::read_to_string(path).with_context(|| format!("reading {path}"))
    }
}

fn write_all(path: &str, data: &str) -> Result<()> {
    if path == "-" {
        io::stdout().lock().write_all(data.as_bytes())?;
    } else {
        fs::write(path, data).with_context(|| format!("writing {path}"))?;
    }
    Ok(())
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

struct Directions {
    forward: bool,
    reverse: bool,
    symmetric: bool,
}

impl Args {
    fn directions(&self) -> Directions {
        let symmetric =
            self.symmetrize.is_some() || (self.links_fwd.is_none() && self.links_rev.is_none());
        Directions {
            forward: symmetric || self.links_fwd.is_some() || self.scores.is_some(),
            reverse: symmetric || self.links_rev.is_some(),
            symmetric,
        }
    }

    fn model_config(&self) -> ModelConfig {
        ModelConfig {
            reverse: false,
            use_null: !self.no_null,
            favor_diagonal: !self.no_diagonal,
            prob_align_null: self.null_prob,
            diagonal_tension: self.tension,
        }
    }

    fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            iterations: self.iterations,
            threads: self.threads,
            convergence_threshold: self.converge,
            variational_bayes: self.vb,
            prune_threshold: self.prune,
            tension_solver: if self.gradient_tension {
                TensionSolver::classic()
            } else {
                TensionSolver::default()
            },
            ..TrainingConfig::default()
        }
    }
}

fn load_model(prefix: &Path, suffix: &str) -> Result<Model> {
    let path = with_suffix(prefix, suffix);
    Model::load_from_path(&path).with_context(|| format!("loading model {}", path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.source == "-" && args.target == "-" {
        bail!("source and target cannot both be read from stdin");
    }
    let src_s = read_all(&args.source)?;
    let tgt_s = read_all(&args.target)?;

    let mut corpus = match &args.load_model {
        Some(prefix) => {
            let path = with_suffix(prefix, ".vocab");
            let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
            Corpus::load_vocabularies(BufReader::new(file))?
        }
        None => Corpus::default(),
    };
    corpus
        .extend_plaintext(&src_s, &tgt_s)
        .context("loading corpus")?;
    info!(pairs = corpus.len(), "corpus loaded");

    let wanted = args.directions();
    let config = if wanted.reverse && !wanted.forward {
        args.model_config().reversed()
    } else {
        args.model_config()
    };
    let builder = Builder::new(config, args.training_config())?;

    let (forward, reverse) = match &args.load_model {
        Some(prefix) => (
            wanted.forward.then(|| load_model(prefix, ".fwd")).transpose()?,
            wanted.reverse.then(|| load_model(prefix, ".rev")).transpose()?,
        ),
        None if wanted.forward && wanted.reverse => {
            let (f, r) = builder.build_bidirectional(&corpus.pairs)?;
            (Some(f), Some(r))
        }
        None => {
            let model = builder.build(&corpus.pairs)?;
            if model.is_reverse() {
                (None, Some(model))
            } else {
                (Some(model), None)
            }
        }
    };

    if let Some(prefix) = &args.save_model {
        let path = with_suffix(prefix, ".vocab");
        let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        corpus.save_vocabularies(&mut writer)?;
        writer.flush()?;
        for (model, suffix) in [(&forward, ".fwd"), (&reverse, ".rev")] {
            if let Some(model) = model {
                let path = with_suffix(prefix, suffix);
                model
                    .save_to_path(&path)
                    .with_context(|| format!("saving model {}", path.display()))?;
            }
        }
    }

    if let (Some(path), Some(model)) = (&args.links_fwd, &forward) {
        let links = builder.install(|| model.compute_alignments(&corpus.pairs));
        write_all(path, &write_moses(&links))?;
    }
    if let (Some(path), Some(model)) = (&args.links_rev, &reverse) {
        let links = builder.install(|| model.compute_alignments(&corpus.pairs));
        write_all(path, &write_moses(&links))?;
    }
    if let (Some(path), Some(model)) = (&args.scores, &forward) {
        let scores: Vec<f64> = corpus
            .pairs
            .iter()
            .map(|p| model.score(&p.source, &p.target))
            .collect();
        write_all(path, &write_scores(&scores))?;
    }

    if wanted.symmetric {
        let (Some(f), Some(r)) = (forward, reverse) else {
            bail!("symmetrization needs both a forward and a reverse model");
        };
        let method = args.symmetrize.unwrap_or_default();
        let aligner = SymmetricAligner::new(f, r, method)?;
        let links = builder.install(|| aligner.align_batch(&corpus.pairs))?;
        info!(%method, "symmetrized");
        write_all(&args.output, &write_moses_pairs(&links))?;
    }

    Ok(())
}
