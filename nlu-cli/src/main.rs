//! `nlu` — REPL, servidor HTTP/WebSocket e utilitários de dataset
//!
//! ```bash
//! # Monta o vocabulário a partir do corpus
//! nlu vocab --corpus nlp_data.json --out vocab.txt
//!
//! # Gera train/val/test em JSON Lines
//! nlu format --corpus nlp_data.json --vocab vocab.txt --out data/
//!
//! # Comandos interativos
//! nlu repl --vocab vocab.txt --weights weights.json
//!
//! # API em http://localhost:3000
//! nlu serve --vocab vocab.txt --weights weights.json
//! ```

mod repl;
mod server;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nlu_core::corpus::DEFAULT_SPLIT_LIMIT;
use nlu_core::{
    format_split, load_corpus, normalize, split_dataset, write_jsonl, Aligner, DecodeStrategy,
    EmbeddingEncoder, JointBert, JointModel, NluConfig, NluPipeline, Vocab, WordPieceTokenizer,
};

/// Dimensão do encoder zerado usado quando não há pesos.
const UNTRAINED_HIDDEN: usize = 8;

#[derive(Parser)]
#[command(name = "nlu", version, about = "NLU conjunto intenção + slots")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lê comandos da entrada padrão e imprime intenção + entidades
    Repl(ModelArgs),
    /// Sobe a API HTTP/WebSocket
    Serve {
        #[command(flatten)]
        model: ModelArgs,
        #[arg(long, default_value = "0.0.0.0:3000")]
        addr: SocketAddr,
    },
    /// Converte o corpus anotado em train/val/test.jsonl
    Format {
        #[arg(long)]
        corpus: PathBuf,
        #[arg(long, env = "NLU_VOCAB")]
        vocab: PathBuf,
        #[arg(long, env = "NLU_CONFIG")]
        config: Option<PathBuf>,
        /// Diretório de saída
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = DEFAULT_SPLIT_LIMIT)]
        limit: usize,
    },
    /// Monta um vocabulário WordPiece a partir do corpus
    Vocab {
        #[arg(long)]
        corpus: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 1)]
        min_freq: usize,
    },
}

/// Opções comuns a quem carrega o pipeline de inferência.
#[derive(Args)]
struct ModelArgs {
    #[arg(long, env = "NLU_VOCAB")]
    vocab: PathBuf,
    /// Pesos JSON do modelo; sem eles o modelo sai zerado
    #[arg(long, env = "NLU_WEIGHTS")]
    weights: Option<PathBuf>,
    #[arg(long, env = "NLU_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = Decoder::Argmax)]
    decoder: Decoder,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Decoder {
    Argmax,
    Viterbi,
}

impl From<Decoder> for DecodeStrategy {
    fn from(decoder: Decoder) -> Self {
        match decoder {
            Decoder::Argmax => DecodeStrategy::Argmax,
            Decoder::Viterbi => DecodeStrategy::Viterbi,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Repl(args) => {
            let pipeline = build_pipeline(&args)?;
            let stdin = std::io::stdin();
            repl::run(&pipeline, stdin.lock(), std::io::stdout())
        }
        Command::Serve { model, addr } => {
            let pipeline = build_pipeline(&model)?;
            server::serve(Arc::new(pipeline), addr).await
        }
        Command::Format {
            corpus,
            vocab,
            config,
            out,
            seed,
            limit,
        } => run_format(&corpus, &vocab, config.as_deref(), &out, seed, limit),
        Command::Vocab {
            corpus,
            out,
            min_freq,
        } => run_vocab(&corpus, &out, min_freq),
    }
}

fn load_config(path: Option<&Path>) -> Result<NluConfig> {
    match path {
        Some(path) => NluConfig::from_file(path)
            .with_context(|| format!("falha ao ler a configuração {}", path.display())),
        None => Ok(NluConfig::default()),
    }
}

fn load_aligner(vocab_path: &Path, config: NluConfig) -> Result<Aligner> {
    let vocab = Vocab::from_file(vocab_path)
        .with_context(|| format!("falha ao ler o vocabulário {}", vocab_path.display()))?;
    info!(tokens = vocab.len(), "vocabulário carregado");
    Ok(Aligner::new(WordPieceTokenizer::new(Arc::new(vocab)), config)?)
}

fn build_pipeline(args: &ModelArgs) -> Result<NluPipeline> {
    let config = load_config(args.config.as_deref())?;
    let aligner = load_aligner(&args.vocab, config.clone())?;
    let vocab_size = aligner.tokenizer().vocab().len();

    let model: Arc<dyn JointModel> = match &args.weights {
        Some(path) => Arc::new(
            JointBert::from_weights_file(path, config, vocab_size)
                .with_context(|| format!("falha ao carregar os pesos {}", path.display()))?,
        ),
        None => {
            warn!("sem --weights: usando modelo não treinado (toda saída será O / intenção 0)");
            let encoder = EmbeddingEncoder::new(vec![vec![0.0; UNTRAINED_HIDDEN]; vocab_size])?;
            Arc::new(JointBert::untrained(encoder, config))
        }
    };

    Ok(NluPipeline::new(aligner, model).with_strategy(args.decoder.into()))
}

fn run_format(
    corpus: &Path,
    vocab: &Path,
    config: Option<&Path>,
    out: &Path,
    seed: u64,
    limit: usize,
) -> Result<()> {
    let config = load_config(config)?;
    let aligner = load_aligner(vocab, config)?;
    let records = load_corpus(corpus)
        .with_context(|| format!("falha ao ler o corpus {}", corpus.display()))?;

    std::fs::create_dir_all(out)
        .with_context(|| format!("falha ao criar {}", out.display()))?;

    let split = split_dataset(records, limit, seed);
    for (name, records) in [("train", &split.train), ("val", &split.val), ("test", &split.test)] {
        let dataset = format_split(&aligner, records);
        let path = out.join(format!("{name}.jsonl"));
        write_jsonl(&path, &dataset.examples)
            .with_context(|| format!("falha ao escrever {}", path.display()))?;
        info!(
            split = name,
            examples = dataset.examples.len(),
            skipped = dataset.skipped.len(),
            path = %path.display(),
            "split gravado"
        );
    }
    Ok(())
}

fn run_vocab(corpus: &Path, out: &Path, min_freq: usize) -> Result<()> {
    let records = load_corpus(corpus)
        .with_context(|| format!("falha ao ler o corpus {}", corpus.display()))?;
    let texts: Vec<_> = records.iter().map(|r| normalize(&r.text)).collect();
    let vocab = Vocab::build_from_texts(&texts, min_freq);
    vocab
        .save(out)
        .with_context(|| format!("falha ao escrever {}", out.display()))?;
    info!(tokens = vocab.len(), path = %out.display(), "vocabulário gravado");
    Ok(())
}
