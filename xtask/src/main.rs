mod codegen;
mod ebpf;
mod user;

use clap::Parser;

#[derive(Debug, Parser)]
pub struct Options {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
enum Command {
    /// Generates kernel type bindings used by eBPF probes
    Codegen(codegen::Options),
    BuildEbpf(ebpf::BuildOptions),
    Build(user::BuildOptions),
    Run(user::RunOptions),
}

static EBPF_DIR: &str = "vigil-ebpf";

fn main() -> Result<(), anyhow::Error> {
    let opts = Options::parse();

    use Command::*;
    match opts.command {
        Codegen(opts) => codegen::generate(EBPF_DIR, &opts)?,
        BuildEbpf(opts) => ebpf::build(EBPF_DIR, &opts)?,
        Build(opts) => user::build_all(EBPF_DIR, &opts)?,
        Run(opts) => user::run(EBPF_DIR, &opts)?,
    }

    Ok(())
}
