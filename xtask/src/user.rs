use std::{os::unix::process::CommandExt, process::Command};

use anyhow::Context as _;
use clap::Parser;

use crate::ebpf::{self, BpfTarget};

#[derive(Debug, Parser, Clone)]
pub struct BuildOptions {
    /// Build the release target
    #[clap(long)]
    pub release: bool,
    /// Set the endianness of the BPF target
    #[clap(default_value = "bpfel-unknown-none", long)]
    pub bpf_target: BpfTarget,
    /// Path to custom bpf-linker
    #[clap(long)]
    pub bpf_linker: Option<String>,
    /// Additional build arguments to build userland application (it will not be propagated to eBPF build command)
    #[clap(name = "args", last = true)]
    pub build_args: Vec<String>,
}

impl From<&BuildOptions> for ebpf::BuildOptions {
    fn from(value: &BuildOptions) -> Self {
        Self {
            release: value.release,
            target_arch: std::env::consts::ARCH.into(),
            target: value.bpf_target,
            linker: value.bpf_linker.clone(),
            // we don't propagate build arguments as they will very likely
            // be different
            build_args: vec![],
        }
    }
}

#[derive(Debug, Parser, Clone)]
pub struct RunOptions {
    /// Build and run the release target
    #[clap(long)]
    pub release: bool,
    /// Set the endianness of the BPF target
    #[clap(default_value = "bpfel-unknown-none", long)]
    pub bpf_target: BpfTarget,
    /// Path to custom bpf-linker
    #[clap(long)]
    pub bpf_linker: Option<String>,
    /// The command used to wrap your application
    #[clap(short, long, default_value = "sudo -E")]
    pub runner: String,
    /// Arguments to pass to your application
    #[clap(name = "args", last = true)]
    pub run_args: Vec<String>,
}

impl From<&RunOptions> for BuildOptions {
    fn from(value: &RunOptions) -> Self {
        Self {
            release: value.release,
            bpf_target: value.bpf_target,
            bpf_linker: value.bpf_linker.clone(),
            build_args: vec![],
        }
    }
}

fn build(opts: &BuildOptions) -> Result<(), anyhow::Error> {
    let mut args = vec!["build".to_string()];
    if opts.release {
        args.push("--release".into());
    }
    args.extend(opts.build_args.iter().cloned());

    let status = Command::new("cargo")
        .args(&args)
        .status()
        .context("failed to build userspace")?;

    if !status.success() {
        return Err(anyhow::anyhow!("userspace build failed"));
    }
    Ok(())
}

pub fn build_all(ebpf_dir: &str, opts: &BuildOptions) -> Result<(), anyhow::Error> {
    // build our ebpf program followed by our application
    ebpf::build(ebpf_dir, &opts.into()).context("Error while building eBPF program")?;

    build(opts).context("Error while building userspace application")
}

/// Build and run the project
pub fn run(ebpf_dir: &str, opts: &RunOptions) -> Result<(), anyhow::Error> {
    build_all(ebpf_dir, &opts.into())?;

    let profile = if opts.release { "release" } else { "debug" };
    let bin_path = format!("target/{profile}/vigil");

    // configure args
    let mut args: Vec<_> = opts.runner.trim().split_terminator(' ').collect();
    args.push(bin_path.as_str());
    args.extend(opts.run_args.iter().map(String::as_str));

    let (program, rest) = args
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("empty runner"))?;

    // exec only returns on failure
    let err = Command::new(program).args(rest).exec();

    Err(anyhow::Error::from(err).context(format!("Failed to run `{}`", args.join(" "))))
}
