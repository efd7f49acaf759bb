use std::{path::PathBuf, process::Command};

use anyhow::Context as _;
use clap::Parser;

#[derive(Debug, Copy, Clone)]
pub enum BpfTarget {
    BpfEl,
    BpfEb,
}

impl std::str::FromStr for BpfTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bpfel-unknown-none" => BpfTarget::BpfEl,
            "bpfeb-unknown-none" => BpfTarget::BpfEb,
            _ => return Err("invalid target".to_owned()),
        })
    }
}

impl std::fmt::Display for BpfTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BpfTarget::BpfEl => "bpfel-unknown-none",
            BpfTarget::BpfEb => "bpfeb-unknown-none",
        })
    }
}

#[derive(Debug, Parser, Clone)]
pub struct BuildOptions {
    /// Build the release target
    #[clap(long)]
    pub release: bool,
    /// Architecture the probes read registers of
    #[clap(long, default_value = std::env::consts::ARCH)]
    pub target_arch: String,
    /// Set the endianness of the BPF target
    #[clap(default_value = "bpfel-unknown-none", long)]
    pub target: BpfTarget,
    /// Path to custom bpf-linker
    #[clap(long)]
    pub linker: Option<String>,
    /// Additional build arguments
    #[clap(name = "args", last = true)]
    pub build_args: Vec<String>,
}

impl BuildOptions {
    fn rustflags(&self) -> String {
        let mut rustflags = vec![std::env::var("RUSTFLAGS").unwrap_or_default()];

        if let Some(linker) = &self.linker {
            rustflags.push(format!("-C linker={linker}"));
        }

        rustflags.push(format!(r#"--cfg bpf_target_arch="{}""#, self.target_arch));
        rustflags.push(
            "--check-cfg=cfg(bpf_target_arch,values(\"x86_64\",\"arm\",\"aarch64\",\"riscv64\"))"
                .into(),
        );

        // enable BTF emission
        rustflags.push("-C link-arg=--btf".into());

        rustflags.join(" ")
    }
}

fn cargo(command: &str, dir: &str, opts: &BuildOptions) -> Command {
    let dir = PathBuf::from(dir);

    let mut args = vec![
        command.to_string(),
        format!("--target={}", opts.target),
        "-Z".into(),
        "build-std=core".into(),
    ];

    if opts.release {
        args.push("--release".into())
    }

    args.extend(opts.build_args.iter().cloned());

    // RUSTUP_TOOLCHAIN and CARGO are removed so that the toolchain
    // of the eBPF directory is honored
    let mut cmd = Command::new("cargo");
    cmd.current_dir(dir)
        .env_remove("RUSTUP_TOOLCHAIN")
        .env_remove("CARGO")
        .args(&args);
    cmd
}

pub fn build(dir: &str, opts: &BuildOptions) -> Result<(), anyhow::Error> {
    let status = cargo("build", dir, opts)
        .env("RUSTFLAGS", opts.rustflags())
        .status()
        .context("failed to build bpf program")?;

    if !status.success() {
        return Err(anyhow::anyhow!("eBPF build failed"));
    }
    Ok(())
}
