#![no_std]
#![no_main]

mod kernel;
mod maps;

// bringing probes into main
mod probes;

// kernel types generated from BTF with `cargo xtask codegen`
#[allow(
    clippy::all,
    dead_code,
    non_camel_case_types,
    non_snake_case,
    non_upper_case_globals,
    improper_ctypes_definitions
)]
#[rustfmt::skip]
mod vmlinux;

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
