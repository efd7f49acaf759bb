use std::{fs, path::PathBuf, process::Command};

use anyhow::Context as _;
use clap::Parser;

/// Kernel types the probes read fields of
const KERNEL_TYPES: &[&str] = &[
    "kernel_clone_args",
    "linux_binprm",
    "file",
    "inode",
    "mount",
    "vfsmount",
    "task_struct",
    "signal_struct",
    "tty_struct",
    "trace_event_raw_sys_enter",
    "trace_event_raw_sched_process_fork",
];

#[derive(Debug, Parser)]
pub struct Options {
    /// BTF file to generate bindings from
    #[clap(long, default_value = "/sys/kernel/btf/vmlinux")]
    pub btf: PathBuf,
}

pub fn generate(ebpf_dir: &str, opts: &Options) -> Result<(), anyhow::Error> {
    which::which("aya-tool").context("aya-tool must be installed to generate bindings")?;

    let output = Command::new("aya-tool")
        .arg("generate")
        .arg("--btf")
        .arg(&opts.btf)
        .args(KERNEL_TYPES)
        .output()
        .context("failed to run aya-tool")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "aya-tool failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    let out = PathBuf::from(ebpf_dir).join("src").join("vmlinux.rs");
    fs::write(&out, &output.stdout)
        .with_context(|| format!("failed to write {}", out.to_string_lossy()))?;

    Ok(())
}
