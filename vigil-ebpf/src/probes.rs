use aya_ebpf::macros::*;

use vigil_common::{
    bpf_events::*,
    config::{BpfConfig, Filter},
    errors::{self, *},
    log_err,
    task::{CurrentTask, Task},
};

use crate::maps;

mod clone;
mod erpc;
mod execve;
mod exit;
mod tty;

/// kprobe_arg macro retrieves the Nth argument (starting from 0) for a kprobe
/// # Example
///
/// ```
/// let bprm: *const linux_binprm = kprobe_arg!(ctx, 0)?;
/// ```
macro_rules! kprobe_arg {
    ($ctx: expr, $i: literal) => {
        $ctx.arg($i)
            .ok_or(vigil_common::errors::ProbeError::KProbeArgFailure)
    };
}

use kprobe_arg;

/// convenient macro to get Vigil config
macro_rules! get_cfg {
    () => {
        vigil_common::config::config().ok_or(ProbeError::Config)
    };
}

use get_cfg;

/// Runs a fallible probe body and reports its error to userland.
/// The body is skipped for tasks of the sensor itself.
macro_rules! probe_body {
    ($ctx:expr, $try_fn:ident) => {
        match unsafe { $try_fn($ctx) } {
            Ok(_) => errors::BPF_PROG_SUCCESS,
            Err(e) => {
                log_err!($ctx, e);
                errors::BPF_PROG_FAILURE
            }
        }
    };
}

use probe_body;

/// Returns the configuration if the current task must be processed
#[inline(always)]
unsafe fn monitored_cfg<K: Task>(task: &K) -> ProbeResult<Option<&'static BpfConfig>> {
    let cfg = get_cfg!()?;
    if cfg.is_loader(task.tgid()) {
        return Ok(None);
    }
    Ok(Some(cfg))
}

#[inline(always)]
fn filter(cfg: &BpfConfig) -> &Filter {
    &cfg.filter
}
