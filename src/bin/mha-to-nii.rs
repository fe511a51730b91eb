use std::path::PathBuf;
use std::process::ExitCode;
use clap::Parser;
use env_logger::Env;
use mha_nii::convert::{load_volume, save_volume};

/// Convert a MetaImage volume to NIfTI
#[derive(Parser)]
#[command(version)]
struct Args {
    /// input MetaImage file (.mha or .mhd)
    input: PathBuf,
    /// output NIfTI file (.nii or .nii.gz)
    output: PathBuf,
}

fn main() -> ExitCode {

    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    println!("Reading Args.");
    let args = Args::parse();

    println!("Input image: {}", args.input.display());
    println!("Output image: {}", args.output.display());

    let volume = match load_volume(&args.input) {
        Ok(volume) => volume,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = save_volume(&args.output, &volume) {
        // reported on stderr whatever RUST_LOG says
        eprintln!("exception in file writer");
        eprintln!("{e}");
        eprintln!("while writing {}", args.output.display());
        return ExitCode::FAILURE;
    }

    log::debug!("wrote {}", args.output.display());
    println!("DONE.");
    ExitCode::SUCCESS
}
