use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use zip::ZipArchive;
use zip::write::SimpleFileOptions;

use classweave::access::AccessTransformer;
use classweave::mappings::parse_srg_file;
use classweave::pipeline::Pipeline;
use classweave::remap::DeobfuscationRemapper;

/// CLI arguments for offline jar/class-directory rewriting.
#[derive(Parser, Debug)]
#[command(
    name = "classweave",
    about = "Applies access-widening rules and deobfuscation mappings to JVM class and JAR files.",
    version
)]
struct Cli {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    output: PathBuf,
    #[arg(long = "access-config", value_name = "PATH")]
    access_config: Vec<PathBuf>,
    #[arg(long, value_name = "PATH")]
    mappings: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    /// Internal-name prefix of the engine namespace, e.g. `net/minecraft/`.
    /// Enables the shadowed-static-field descriptor correction.
    #[arg(long, value_name = "PREFIX")]
    engine_namespace: Option<String>,
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

#[derive(Serialize)]
struct TransformReport {
    classes_total: usize,
    classes_transformed: usize,
    classes_renamed: usize,
    resources_copied: usize,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    for entry in &cli.classpath {
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
    }

    let started_at = Instant::now();
    let (classes, resources) = load_input(&cli.input)?;

    // Ancestor resolution sees the classpath first, then the input classes
    // on top, so the jar being rewritten always wins.
    let mut source = HashMap::new();
    for entry in &cli.classpath {
        let (entries, _) = load_input(entry)?;
        source.extend(entries);
    }
    source.extend(classes.iter().cloned());

    let access = if cli.access_config.is_empty() {
        None
    } else {
        Some(AccessTransformer::from_paths(&cli.access_config)?)
    };
    let remapper = match &cli.mappings {
        Some(path) => Some(DeobfuscationRemapper::new(
            parse_srg_file(path)?,
            Box::new(source),
            cli.engine_namespace.clone(),
        )),
        None => None,
    };
    let mut pipeline = Pipeline::new(access, remapper);

    let mut outputs = Vec::with_capacity(classes.len() + resources.len());
    let mut transformed = 0;
    let mut renamed = 0;
    for (name, bytes) in &classes {
        let output_name = pipeline.output_name(name);
        let output = pipeline
            .transform(name, Some(bytes.clone()))?
            .with_context(|| format!("class {name} produced no output"))?;
        if output != *bytes {
            transformed += 1;
        }
        if output_name != *name {
            renamed += 1;
        }
        outputs.push((format!("{output_name}.class"), output));
    }
    for (path, bytes) in &resources {
        outputs.push((path.clone(), bytes.clone()));
    }

    write_output(&cli.input, &cli.output, &outputs)?;

    let report = TransformReport {
        classes_total: classes.len(),
        classes_transformed: transformed,
        classes_renamed: renamed,
        resources_copied: resources.len(),
    };
    if let Some(path) = &cli.report {
        let mut writer = output_writer(path)?;
        serde_json::to_writer_pretty(&mut writer, &report)
            .context("failed to serialize transform report")?;
        writer
            .write_all(b"\n")
            .context("failed to write transform report")?;
    }

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} classes={} transformed={} renamed={}",
            started_at.elapsed().as_millis(),
            report.classes_total,
            report.classes_transformed,
            report.classes_renamed
        );
    }

    Ok(())
}

fn output_writer(path: &Path) -> Result<Box<dyn Write>> {
    if path == Path::new("-") {
        return Ok(Box::new(io::stdout()));
    }
    Ok(Box::new(File::create(path).with_context(|| {
        format!("failed to open {}", path.display())
    })?))
}

type Entries = Vec<(String, Vec<u8>)>;

/// Load classes and resources from a jar or a class directory. Class names
/// are internal (slash) form; ordering is sorted for determinism.
fn load_input(path: &Path) -> Result<(Entries, Entries)> {
    if path.is_dir() {
        let mut classes = Vec::new();
        let mut resources = Vec::new();
        load_dir(path, Path::new(""), &mut classes, &mut resources)?;
        classes.sort_by(|a, b| a.0.cmp(&b.0));
        resources.sort_by(|a, b| a.0.cmp(&b.0));
        return Ok((classes, resources));
    }
    load_jar(path)
}

fn load_dir(
    root: &Path,
    relative: &Path,
    classes: &mut Entries,
    resources: &mut Entries,
) -> Result<()> {
    let directory = root.join(relative);
    let mut entries = Vec::new();
    for entry in fs::read_dir(&directory)
        .with_context(|| format!("failed to read directory {}", directory.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", directory.display()))?;
        entries.push(entry.path());
    }
    entries.sort();

    for entry in entries {
        let Some(name) = entry.file_name().map(|name| name.to_string_lossy().to_string()) else {
            continue;
        };
        let child = relative.join(&name);
        if entry.is_dir() {
            load_dir(root, &child, classes, resources)?;
            continue;
        }
        let data =
            fs::read(&entry).with_context(|| format!("failed to read {}", entry.display()))?;
        push_entry(
            &child.to_string_lossy().replace('\\', "/"),
            data,
            classes,
            resources,
        );
    }
    Ok(())
}

fn load_jar(path: &Path) -> Result<(Entries, Entries)> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    let mut names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if !entry.is_dir() {
            names.push(entry.name().to_string());
        }
    }
    names.sort();

    let mut classes = Vec::new();
    let mut resources = Vec::new();
    for name in names {
        let mut entry = archive
            .by_name(&name)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        push_entry(&name, data, &mut classes, &mut resources);
    }
    Ok((classes, resources))
}

fn push_entry(name: &str, data: Vec<u8>, classes: &mut Entries, resources: &mut Entries) {
    // module-info carries no transformable symbols; copy it through.
    if name.ends_with(".class") && !name.ends_with("module-info.class") {
        let internal = name.trim_end_matches(".class").to_string();
        classes.push((internal, data));
    } else {
        resources.push((name.to_string(), data));
    }
}

fn write_output(input: &Path, output: &Path, entries: &[(String, Vec<u8>)]) -> Result<()> {
    if input.is_dir() {
        for (name, data) in entries {
            let target = output.join(name);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::write(&target, data)
                .with_context(|| format!("failed to write {}", target.display()))?;
        }
        return Ok(());
    }

    let file =
        File::create(output).with_context(|| format!("failed to create {}", output.display()))?;
    let mut writer = zip::ZipWriter::new(file);
    for (name, data) in entries {
        writer
            .start_file(name.clone(), SimpleFileOptions::default())
            .with_context(|| format!("failed to add {name} to {}", output.display()))?;
        writer
            .write_all(data)
            .with_context(|| format!("failed to write {name} to {}", output.display()))?;
    }
    writer
        .finish()
        .with_context(|| format!("failed to finish {}", output.display()))?;
    Ok(())
}
