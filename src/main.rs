use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{bail, Context, Result};
use log::debug;
use structopt::StructOpt;

use mcc::{driver, Arch, CompileError, Options, Target};

fn main() {
    env_logger::init();

    let opts = Opt::from_args();
    let src = match fs::read_to_string(&opts.path) {
        Ok(src) => src,
        Err(e) => {
            eprintln!("mcc: cannot read {}: {}", opts.path.display(), e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&opts, &src) {
        match e.downcast_ref::<CompileError>() {
            Some(diagnostic) => {
                eprintln!("{}", diagnostic.render(&src, &opts.path.to_string_lossy()))
            }
            None => eprintln!("mcc: {:#}", e),
        }
        std::process::exit(1);
    }
}

fn run(opts: &Opt, src: &str) -> Result<()> {
    if opts.lex {
        println!("{:#?}", driver::lex(src)?);
        return Ok(());
    }

    if opts.parse {
        println!("{:#?}", driver::parse(src)?);
        return Ok(());
    }

    if opts.validate {
        println!("{:#?}", driver::validate(src)?.0);
        return Ok(());
    }

    if opts.tacky {
        println!("{:#?}", driver::tacky(src)?.0);
        return Ok(());
    }

    let options = Options {
        target: opts.target.unwrap_or_else(Target::host),
        arch: opts.arch.unwrap_or_else(Arch::host),
    };

    if opts.codegen {
        match options.arch {
            Arch::X86_64 => println!("{:#?}", driver::codegen(src)?),
            Arch::Aarch64 => println!("{:#?}", driver::codegen_aarch64(src, options.target)?),
        }
        return Ok(());
    }

    let asm = driver::compile(src, &options)?;

    if opts.assembly_only {
        let out = opts
            .output
            .clone()
            .unwrap_or_else(|| opts.path.with_extension("s"));
        fs::write(&out, asm).with_context(|| format!("cannot write {}", out.display()))?;
        return Ok(());
    }

    let mut asm_file = tempfile::Builder::new()
        .prefix("mcc")
        .suffix(".s")
        .tempfile()
        .context("cannot create a temporary assembly file")?;
    asm_file
        .write_all(asm.as_bytes())
        .with_context(|| format!("cannot write {}", asm_file.path().display()))?;

    if opts.object_only {
        let out = opts
            .output
            .clone()
            .unwrap_or_else(|| opts.path.with_extension("o"));
        assemble(&opts.cc, &["-c"], asm_file.path(), &out)
    } else {
        let out = opts
            .output
            .clone()
            .unwrap_or_else(|| opts.path.with_extension(""));
        assemble(&opts.cc, &[], asm_file.path(), &out)
    }
}

fn assemble(cc: &str, flags: &[&str], asm_path: &Path, out: &Path) -> Result<()> {
    debug!("{} {:?} {} -o {}", cc, flags, asm_path.display(), out.display());

    let status = Command::new(cc)
        .args(flags)
        .arg(asm_path)
        .arg("-o")
        .arg(out)
        .status()
        .with_context(|| format!("failed to run `{}`", cc))?;

    if !status.success() {
        bail!("`{}` exited with {}", cc, status);
    }

    Ok(())
}

#[derive(Debug, StructOpt)]
#[structopt(name = "mcc", about = "A compiler for a small subset of C")]
struct Opt {
    #[structopt(parse(from_os_str))]
    path: PathBuf,

    #[structopt(name = "lex", long)]
    lex: bool,

    #[structopt(name = "parse", long)]
    parse: bool,

    #[structopt(name = "validate", long)]
    validate: bool,

    #[structopt(name = "tacky", long)]
    tacky: bool,

    #[structopt(name = "codegen", long)]
    codegen: bool,

    /// Stop after writing the assembly file
    #[structopt(name = "S", short = "S")]
    assembly_only: bool,

    /// Assemble into an object file without linking
    #[structopt(name = "c", short = "c")]
    object_only: bool,

    #[structopt(short = "o", long = "output", parse(from_os_str))]
    output: Option<PathBuf>,

    /// linux or macos, defaults to the host
    #[structopt(long)]
    target: Option<Target>,

    /// x86_64 or aarch64, defaults to the host
    #[structopt(long)]
    arch: Option<Arch>,

    /// Program used to assemble and link
    #[structopt(long, env = "MCC_CC", default_value = "cc")]
    cc: String,
}
