use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;

/// Generate C device tree data from a DTS file.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Input DTS file
    input: PathBuf,

    /// Output C file (stdout if omitted)
    output: Option<PathBuf>,

    /// Directory to search for /include/d files (repeatable)
    #[arg(short = 'I', long = "include-dir")]
    include_dirs: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let code = dtgen::generate_file(&args.input, &args.include_dirs)
        .with_context(|| format!("failed to generate code for {}", args.input.display()))?;

    match &args.output {
        Some(path) => write_output(path, &code)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => print!("{code}"),
    }

    Ok(())
}

/// Write through a temporary file in the target directory, so a failed run
/// never leaves a truncated artifact behind.
fn write_output(path: &Path, code: &str) -> anyhow::Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = tempfile::NamedTempFile::new_in(dir.unwrap_or_else(|| Path::new(".")))?;
    tmp.write_all(code.as_bytes())?;
    tmp.persist(path)?;
    Ok(())
}
