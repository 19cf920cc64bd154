use anyhow::{bail, Result};
use std::path::PathBuf;

use faceprep::align::Aligner;
use faceprep::config::Config;
use faceprep::embed::FaceEmbedder;
use faceprep::logging;
use faceprep::pipeline::Pipeline;

#[derive(Debug, Default)]
struct Args {
    input: Option<PathBuf>,
    out: Option<PathBuf>,
    config: Option<PathBuf>,
    reference: Option<PathBuf>,
    min_conf: Option<f32>,
    output_size: Option<u32>,
    face_scale: Option<f32>,
    keep_input_size: bool,
    dump_meta: bool,
    no_embed_dedupe: bool,
}

fn parse_args() -> Args {
    let argv: Vec<String> = std::env::args().collect();
    let mut args = Args::default();

    fn value(argv: &[String], i: usize, flag: &str) -> String {
        match argv.get(i + 1) {
            Some(v) => v.clone(),
            None => {
                eprintln!("Error: {flag} requires an argument");
                std::process::exit(1);
            }
        }
    }

    fn parse<T: std::str::FromStr>(raw: &str, flag: &str) -> T {
        match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                eprintln!("Error: invalid value for {flag}: {raw}");
                std::process::exit(1);
            }
        }
    }

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("faceprep {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--input" | "-i" => {
                args.input = Some(PathBuf::from(value(&argv, i, "--input")));
                i += 1;
            }
            "--out" | "-o" => {
                args.out = Some(PathBuf::from(value(&argv, i, "--out")));
                i += 1;
            }
            "--config" | "-c" => {
                args.config = Some(PathBuf::from(value(&argv, i, "--config")));
                i += 1;
            }
            "--ref" => {
                args.reference = Some(PathBuf::from(value(&argv, i, "--ref")));
                i += 1;
            }
            "--min-conf" => {
                args.min_conf = Some(parse(&value(&argv, i, "--min-conf"), "--min-conf"));
                i += 1;
            }
            "--output-size" => {
                args.output_size = Some(parse(&value(&argv, i, "--output-size"), "--output-size"));
                i += 1;
            }
            "--face-scale" => {
                args.face_scale = Some(parse(&value(&argv, i, "--face-scale"), "--face-scale"));
                i += 1;
            }
            "--keep-input-size" => {
                args.keep_input_size = true;
            }
            "--dump-meta" => {
                args.dump_meta = true;
            }
            "--no-embed-dedupe" => {
                args.no_embed_dedupe = true;
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    args
}

fn print_help() {
    println!(
        r#"faceprep - face dataset preparation pipeline

USAGE:
    faceprep --input DIR --out DIR [OPTIONS]

OPTIONS:
    --input, -i DIR     Directory scanned recursively for images
    --out, -o DIR       Output directory (images/ plus manifests)
    --config, -c PATH   Path to TOML config file
    --ref PATH          Reference image for color normalization
    --min-conf FLOAT    Minimum detection confidence (default 0.9)
    --output-size N     Canonical square crop size (default 512)
    --face-scale FLOAT  Bounding-box expansion factor (default 1.3)
    --keep-input-size   Resize crops to the source resolution
    --dump-meta         Write a JSON metadata sidecar per artifact
    --no-embed-dedupe   Skip embedding dedup, use perceptual hashing only
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    FACEPREP_LOG        Log filter (trace, debug, info, warn, error)"#
    );
}

fn main() -> Result<()> {
    let args = parse_args();

    logging::init()?;

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(v) = args.min_conf {
        config.align.min_conf = v;
    }
    if let Some(v) = args.output_size {
        config.align.output_size = v;
    }
    if let Some(v) = args.face_scale {
        config.align.face_scale = v;
    }
    if args.keep_input_size {
        config.align.keep_input_size = true;
    }
    if args.dump_meta {
        config.pipeline.dump_meta = true;
    }
    if let Some(path) = args.reference {
        config.pipeline.reference_image = Some(path);
    }

    let Some(input) = args.input else {
        bail!("--input is required (see --help)");
    };
    let Some(out) = args.out else {
        bail!("--out is required (see --help)");
    };
    if !input.is_dir() {
        bail!("input directory {} does not exist", input.display());
    }

    let mut aligner = Aligner::probe(&config.align)?;

    let embedder = if args.no_embed_dedupe {
        None
    } else {
        match FaceEmbedder::new(config.dedupe.arcface_model.as_deref()) {
            Ok(e) => Some(e),
            Err(e) => {
                tracing::warn!(error = %e, "embedder unavailable, deduplication will use perceptual hashing");
                None
            }
        }
    };

    let pipeline = Pipeline::new(config, &input, &out)?;
    let summary = pipeline.run(&mut aligner, embedder)?;

    tracing::info!(
        total = summary.total,
        accepted = summary.accepted,
        rejected = summary.rejected,
        kept = summary.kept,
        out = %out.display(),
        "Done"
    );

    Ok(())
}
