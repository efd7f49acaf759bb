/// Tests whether all the bits of `$flag` are set in `$v`
#[macro_export]
macro_rules! test_flag {
    ($v:expr, $flag:expr) => {
        $v & $flag == $flag
    };
}

#[macro_export]
macro_rules! bpf_target_code {
    ($($tokens:tt)*) => {
        $crate::cfg_if::cfg_if!{
            if #[cfg(target_arch = "bpf")] {
                $($tokens)*
            }
        }
    };
}

#[macro_export]
macro_rules! not_bpf_target_code {
    ($($tokens:tt)*) => {
        $crate::cfg_if::cfg_if!{
            if #[cfg(not(target_arch = "bpf"))] {
                $($tokens)*
            }
        }
    };
}
