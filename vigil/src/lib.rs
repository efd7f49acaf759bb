use std::fs;

use anyhow::Context as _;
use aya::{Ebpf, EbpfLoader, VerifierLogLevel};
use log::info;
use probes::Programs;
use vigil_common::config::BpfConfig;

use crate::config::Config;

pub mod config;
pub mod events;
pub mod probes;
pub mod util;

/// Sets probe priorities. Entry probes producing pending state are
/// attached before the probes consuming it.
pub fn configure_probes(programs: &mut Programs) -> Result<(), probes::Error> {
    programs.get_mut("enter_kernel_clone")?.prio(0);
    programs.get_mut("sys_enter_execve")?.prio(0);
    programs.get_mut("sys_enter_execveat")?.prio(0);

    programs.get_mut("sched_process_fork")?.prio(10);
    programs.get_mut("enter_security_bprm_check")?.prio(10);
    programs.get_mut("enter_exit_itimers")?.prio(20);
    programs.get_mut("enter_security_bprm_committed_creds")?.prio(30);

    programs.get_mut("sys_exit_execve")?.prio(40);
    programs.get_mut("sys_exit_execveat")?.prio(40);
    programs.get_mut("enter_do_exit")?.prio(40);
    Ok(())
}

/// Loads the eBPF object and pushes the configuration into it
pub fn prepare_bpf(conf: &Config, vll: VerifierLogLevel) -> anyhow::Result<(Ebpf, Vec<u8>)> {
    let data = fs::read(&conf.ebpf)
        .with_context(|| format!("failed to read eBPF object {}", conf.ebpf.to_string_lossy()))?;

    let mut bpf = EbpfLoader::new().verifier_log_level(vll).load(&data)?;

    BpfConfig::init_config_in_bpf(&mut bpf, conf.try_into()?)
        .context("failed to initialize eBPF configuration")?;

    Ok((bpf, data))
}

/// Loads and attaches all the programs of the object, `data` being the
/// raw object `bpf` was loaded from
pub fn load_and_attach_bpf(bpf: &mut Ebpf, data: &[u8]) -> anyhow::Result<()> {
    let mut programs = Programs::with_bpf(bpf).with_elf_info(data)?;

    configure_probes(&mut programs)?;

    for (name, mut p) in programs.into_vec_sorted_by_prio() {
        info!(
            "loading: {name} attach={} priority={}",
            p.attach_point().unwrap_or_default(),
            p.prio
        );

        p.load_and_attach()
            .with_context(|| format!("failed to load and attach {name}"))?;
    }

    Ok(())
}
