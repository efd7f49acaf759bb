pub mod elf;
pub mod uptime;

#[inline(always)]
pub fn get_current_uid() -> u32 {
    unsafe { libc::getuid() }
}
