use std::env;
use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context};
use kiln_hlsl::{transpile, ShaderConfig, ShaderSource, TranspiledShader};
use tracing_subscriber::EnvFilter;

fn usage() -> &'static str {
    "\
kiln_dump: transpile one shader type and print the generated HLSL

USAGE:
    cargo run -p kiln-hlsl --bin kiln_dump -- <source.cs> --type NAME [--config cfg.json] [--bindings] [--layout] [--json]

FLAGS:
    --type NAME       Shader type to transpile
    --config PATH     JSON shader configuration (default: empty configuration)
    --bindings        Print the binding table after the HLSL
    --layout          Print the constant buffer layout after the HLSL
    --json            Print the whole transpiled shader as JSON instead of HLSL

Set RUST_LOG=kiln_hlsl=debug to trace the pipeline stages.
"
}

fn main() {
    if let Err(err) = real_main() {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

fn real_main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut path: Option<PathBuf> = None;
    let mut type_name: Option<String> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut bindings = false;
    let mut layout = false;
    let mut json = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print!("{}", usage());
                return Ok(());
            }
            "--type" => {
                let Some(v) = args.next() else {
                    bail!("--type requires a value");
                };
                type_name = Some(v);
            }
            "--config" => {
                let Some(v) = args.next() else {
                    bail!("--config requires a value");
                };
                config_path = Some(PathBuf::from(v));
            }
            "--bindings" => bindings = true,
            "--layout" => layout = true,
            "--json" => json = true,
            _ if arg.starts_with("--type=") => {
                type_name = Some(arg["--type=".len()..].to_string());
            }
            _ if arg.starts_with('-') => {
                bail!("unknown option {arg:?}\n\n{}", usage());
            }
            _ => {
                if path.is_some() {
                    bail!("unexpected positional argument {arg:?}\n\n{}", usage());
                }
                path = Some(PathBuf::from(arg));
            }
        }
    }

    let Some(path) = path else {
        bail!("missing shader source path\n\n{}", usage());
    };
    let Some(type_name) = type_name else {
        bail!("missing --type\n\n{}", usage());
    };

    let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let config = match &config_path {
        Some(config_path) => {
            let json = fs::read_to_string(config_path)
                .with_context(|| format!("read {}", config_path.display()))?;
            ShaderConfig::from_json(&json)
                .with_context(|| format!("parse {}", config_path.display()))?
        }
        None => ShaderConfig::default(),
    };

    let source = ShaderSource::with_path(text, &path);
    let shader = match transpile(&source, &type_name, &config) {
        Ok(shader) => shader,
        Err(err) => {
            if let Some(diagnostics) = err.diagnostics() {
                eprint!("{diagnostics}");
                bail!(
                    "{type_name}: {} error(s) in {}",
                    diagnostics.errors().count(),
                    path.display()
                );
            }
            return Err(err).with_context(|| format!("transpile {type_name}"));
        }
    };

    for warning in shader.diagnostics.warnings() {
        eprintln!("{warning}");
    }

    if json {
        let out = serde_json::to_string_pretty(&shader).context("serialize transpiled shader")?;
        println!("{out}");
        return Ok(());
    }

    print!("{}", shader.hlsl);
    if bindings {
        print_bindings(&shader);
    }
    if layout {
        print_layout(&shader);
    }
    Ok(())
}

fn print_bindings(shader: &TranspiledShader) {
    println!();
    println!("bindings ({}):", shader.bindings.len());
    for binding in &shader.bindings {
        println!(
            "  slot {:>2}  {:<5} {:<17} {}",
            binding.slot,
            binding.register.to_string(),
            format!("{:?}", binding.kind),
            binding.field.as_deref().unwrap_or("<output>")
        );
    }
}

fn print_layout(shader: &TranspiledShader) {
    let layout = &shader.model.layout;
    println!();
    println!(
        "constant buffer: {} bytes ({} padded), limit {}",
        layout.size(),
        layout.register_size(),
        shader.model.constant_data_limit()
    );
    for field in layout.fields() {
        println!(
            "  {:>5}  {:<8} {:>4} bytes  {} {}",
            field.offset,
            field.packoffset(),
            field.size,
            field.ty,
            field.name
        );
    }
}
