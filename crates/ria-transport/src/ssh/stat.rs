//! Remote file mode lookup.
//!
//! `stat` takes different format flags on BSD-derived systems and on GNU
//! coreutils. The flavor is picked once per session from `uname -s`.

/// Which `stat` dialect the remote host speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatFlavor {
    Gnu,
    Bsd,
}

impl StatFlavor {
    pub fn from_uname(uname: &str) -> Self {
        match uname.trim() {
            "Darwin" | "FreeBSD" | "OpenBSD" | "NetBSD" | "DragonFly" => Self::Bsd,
            _ => Self::Gnu,
        }
    }

    /// Command printing the octal permission bits of an already quoted path.
    pub fn mode_command(&self, quoted_path: &str) -> String {
        match self {
            Self::Gnu => format!("stat -c '%a' {quoted_path}"),
            Self::Bsd => format!("stat -f '%OLp' {quoted_path}"),
        }
    }

    /// Parse the output of [`mode_command`](Self::mode_command).
    pub fn parse_mode(output: &str) -> Option<u32> {
        u32::from_str_radix(output.trim(), 8).ok()
    }
}
