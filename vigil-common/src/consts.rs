// task related sizes
pub const COMM_SIZE: usize = 16;
pub const TTY_NAME_LEN: usize = 64;
pub const CONTAINER_ID_LEN: usize = 64;

// clone flags from sched.h
pub const CLONE_THREAD: u64 = 0x0001_0000;

// argument and environment capture
pub const MAX_PERF_STR_BUFF_LEN: usize = 64;
pub const MAX_STR_BUFF_LEN: usize = 1 << 15;
pub const MAX_ARRAY_ELEMENT: usize = 64;
pub const MAX_ARRAY_ELEMENT_SIZE: usize = 4096;
/// Every element write lands below this offset so that an element of
/// maximum size written there never goes past the end of the buffer
pub const STR_BUFF_WRAP: usize = MAX_STR_BUFF_LEN - MAX_ARRAY_ELEMENT_SIZE;

pub const ARGS_BUFFER_KEY: u32 = 0;
pub const ENVS_BUFFER_KEY: u32 = 1;

// span correlation
pub const STACK_SIG_DEPTH: usize = 3;
pub const COROUTINE_DATA_LEN: usize = 223;
pub const SPAN_REQUEST_SIZE: usize = 33 + COROUTINE_DATA_LEN;

// map sizes
pub const PID_CACHE_SIZE: u32 = 4096;
pub const PROC_CACHE_SIZE: u32 = 4096;
pub const SYSCALL_CACHE_SIZE: u32 = 1024;
pub const ARGS_ENVS_CACHE_SIZE: u32 = 255;
pub const PID_DISCARDERS_SIZE: u32 = 512;
pub const SPAN_MAPS_SIZE: u32 = 4096;
