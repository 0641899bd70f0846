use std::fs;
use std::path::Path;

use anyhow::Context;
use ckpt_loader::{
    BlockLayout, Checkpoint, CheckpointLoader, LoadConfig, SourceFileVerifier, Tensor, TensorSource, Torch,
    TorchValue,
};
use ckpt_pickle::Value;
use colored::Colorize;
use serde_json::json;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Detect(args) => cmd_detect(args, &cli.format),
        Command::Inspect(args) => cmd_inspect(args, config, &cli.format),
        Command::Storages(args) => cmd_storages(args, config, &cli.format),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<LoadConfig> {
    let Some(path) = path else {
        return Ok(LoadConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn load(args: &LoadArgs, mut config: LoadConfig) -> anyhow::Result<Checkpoint> {
    if let Some(layout) = args.block_layout {
        config.block_layout = match layout {
            LayoutArg::Raw => BlockLayout::Raw,
            LayoutArg::SizePrefixed => BlockLayout::SizePrefixed,
        };
    }
    let mut loader = CheckpointLoader::new(config);
    if args.check_source {
        loader = loader.with_source_verifier(SourceFileVerifier {
            strict: args.strict_source,
        });
    }
    let checkpoint = loader.load(&args.path)?;
    Ok(checkpoint)
}

fn cmd_detect(args: DetectArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let mut rows = Vec::new();
    for path in &args.paths {
        let detected = ckpt_loader::detect(path).with_context(|| format!("reading {}", path.display()))?;
        rows.push((path, detected));
    }
    match format {
        OutputFormat::Json => {
            let out: Vec<_> = rows
                .iter()
                .map(|(path, f)| json!({ "path": path.display().to_string(), "format": f }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            for (path, f) in rows {
                println!("{}  {}", f.to_string().cyan(), path.display());
            }
        }
    }
    Ok(())
}

/// A tensor found in the object graph, addressed by its dotted path.
#[derive(Debug, PartialEq)]
struct TensorEntry<'a> {
    name: String,
    tensor: &'a Tensor,
    parameter: bool,
}

fn collect_tensors<'a>(value: &'a TorchValue, path: &str, out: &mut Vec<TensorEntry<'a>>) {
    let child = |label: &str| {
        if path.is_empty() {
            label.to_owned()
        } else {
            format!("{path}.{label}")
        }
    };
    match value {
        Value::Ext(Torch::Tensor(tensor)) => out.push(TensorEntry {
            name: path.to_owned(),
            tensor,
            parameter: false,
        }),
        Value::Ext(Torch::Parameter(tensor)) => out.push(TensorEntry {
            name: path.to_owned(),
            tensor,
            parameter: true,
        }),
        Value::Dict(pairs) => {
            for (k, v) in pairs {
                collect_tensors(v, &child(&key_label(k)), out);
            }
        }
        Value::List(items) | Value::Tuple(items) => {
            for (i, v) in items.iter().enumerate() {
                collect_tensors(v, &child(&i.to_string()), out);
            }
        }
        _ => {}
    }
}

fn key_label(key: &TorchValue) -> String {
    match key {
        Value::Str(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        other => format!("<{}>", other.type_name()),
    }
}

fn storage_label(tensor: &Tensor) -> String {
    match &tensor.source {
        TensorSource::Storage(s) => s.key().to_owned(),
        TensorSource::View(v) => format!("{}[{}..{}]", v.root().key(), v.offset(), v.offset() + v.len()),
    }
}

fn cmd_inspect(args: InspectArgs, config: LoadConfig, format: &OutputFormat) -> anyhow::Result<()> {
    let checkpoint = load(&args.load, config)?;
    let mut tensors = Vec::new();
    collect_tensors(&checkpoint.graph, "", &mut tensors);

    match format {
        OutputFormat::Json => {
            let out = json!({
                "format": checkpoint.format,
                "storages": checkpoint.storages.len(),
                "payload_bytes": checkpoint.payload_bytes(),
                "tensors": tensors.iter().map(|t| json!({
                    "name": t.name,
                    "kind": t.tensor.kind(),
                    "shape": t.tensor.shape,
                    "stride": t.tensor.stride,
                    "storage": storage_label(t.tensor),
                    "storage_offset": t.tensor.storage_offset,
                    "parameter": t.parameter,
                    "requires_grad": t.tensor.requires_grad,
                })).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!(
                "{} {} ({} storages, {} bytes)",
                "Checkpoint".bold(),
                args.load.path.display(),
                checkpoint.storages.len(),
                checkpoint.payload_bytes()
            );
            println!("  Container: {}", checkpoint.format.to_string().cyan());
            if tensors.is_empty() {
                println!("  No tensors.");
            }
            for t in &tensors {
                let marker = if t.parameter { "param".yellow() } else { "tensor".normal() };
                println!(
                    "  {:<40} {:<6} {:<8} {:?}  @ {}+{}",
                    t.name.bold(),
                    marker,
                    t.tensor.kind().to_string().cyan(),
                    t.tensor.shape,
                    storage_label(t.tensor),
                    t.tensor.storage_offset
                );
            }
        }
    }
    Ok(())
}

fn cmd_storages(args: StoragesArgs, config: LoadConfig, format: &OutputFormat) -> anyhow::Result<()> {
    let checkpoint = load(&args.load, config)?;
    let digests: Vec<Option<String>> = checkpoint
        .storages
        .iter()
        .map(|s| {
            args.digest
                .then(|| s.bytes().map(|b| blake3::hash(b).to_hex().to_string()))
                .flatten()
        })
        .collect();

    match format {
        OutputFormat::Json => {
            let out: Vec<_> = checkpoint
                .storages
                .iter()
                .zip(&digests)
                .map(|(s, digest)| {
                    json!({
                        "key": s.key(),
                        "kind": s.kind(),
                        "elements": s.len(),
                        "bytes": s.byte_len(),
                        "location": s.location(),
                        "blake3": digest,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            for (s, digest) in checkpoint.storages.iter().zip(&digests) {
                print!(
                    "{:<12} {:<8} {:>12} elements {:>14} bytes  {}",
                    s.key().yellow(),
                    s.kind().to_string().cyan(),
                    s.len(),
                    s.byte_len(),
                    s.location()
                );
                match digest {
                    Some(d) => println!("  {}", d.dimmed()),
                    None => println!(),
                }
            }
        }
    }
    Ok(())
}
