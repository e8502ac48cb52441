#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error(core::ffi::c_int);

impl Error {
    #[inline]
    pub fn as_isize(self) -> isize {
        self.0 as isize
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(errno::error_info(self.as_isize()))
    }
}

pub type KResult<T = isize> = core::result::Result<T, Error>;

pub mod errno {
    macro_rules! declare_errno {
        ($($name:tt, $errno:literal, $desc:literal,)*) => {
            $(#[doc = $desc]
            pub const $name: super::Error = super::Error($errno);)*
            pub fn error_info(errno: isize) -> &'static str {
                match errno {
                    $($errno => ::core::concat!(stringify!($name), ", ", stringify!($desc)),)*
                    _ => "unknown errno",
                }
            }
        };
    }

    #[rustfmt::skip]
    declare_errno!(
        EIO,            -5,     "I/O error.",
        EBADF,          -9,     "Bad file number.",
        EFAULT,         -14,    "Bad address.",
        EEXIST,         -17,    "File exists.",
        EINVAL,         -22,    "Invalid argument.",
    );
}

#[cfg(test)]
mod tests {
    use super::errno;

    #[test]
    fn describes_known_errno() {
        assert_eq!(errno::EEXIST.as_isize(), -17);
        assert_eq!(
            errno::error_info(errno::EFAULT.as_isize()),
            "EFAULT, \"Bad address.\""
        );
        assert_eq!(errno::error_info(-4096), "unknown errno");
    }
}
