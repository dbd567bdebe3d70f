//! Architecture compatibility: `(os, cpu)` pairs and the rules that decide
//! whether a candidate implementation's architecture satisfies a requirement.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use strum_macros::{Display as StrumDisplay, EnumString};

/// Operating system family a candidate implementation targets.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, EnumString, StrumDisplay)]
pub enum Os {
    Windows,
    Linux,
    MacOSX,
    Solaris,
    POSIX,
    /// Matches any requirement; used by source/script implementations.
    Any,
}

/// CPU family a candidate implementation was built for.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, EnumString, StrumDisplay)]
pub enum Cpu {
    #[strum(serialize = "i386")]
    I386,
    #[strum(serialize = "i486")]
    I486,
    #[strum(serialize = "i586")]
    I586,
    #[strum(serialize = "i686")]
    I686,
    #[strum(serialize = "x86_64")]
    X86_64,
    #[strum(serialize = "ppc")]
    Ppc,
    #[strum(serialize = "ppc64")]
    Ppc64,
    /// Matches any requirement.
    Any,
    /// Source packages: not bound to a CPU at all.
    Source,
}

/// `(os, cpu)` pair describing a candidate's or a requirement's architecture.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Architecture {
    pub os: Os,
    pub cpu: Cpu,
}

impl Architecture {
    pub fn new(os: Os, cpu: Cpu) -> Self {
        Self { os, cpu }
    }

    /// Every platform; the default for implementations with no explicit
    /// architecture restriction (scripts, source bundles).
    pub fn any() -> Self {
        Self::new(Os::Any, Cpu::Any)
    }

    /// Returns `true` if a candidate with this architecture is usable when a
    /// caller requires `required`.
    ///
    /// `os` compatibility is transitive-subset (e.g. `POSIX` is a superset of
    /// `Linux` and `MacOSX`); `cpu` compatibility is upward word-size
    /// compatible on 64-bit hosts (e.g. `i386` candidates run under an
    /// `x86_64` requirement, but not vice versa).
    pub fn is_compatible_with(&self, required: &Architecture) -> bool {
        os_compatible(self.os, required.os) && cpu_compatible(self.cpu, required.cpu)
    }
}

impl Display for Architecture {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.cpu)
    }
}

fn os_compatible(candidate: Os, required: Os) -> bool {
    if candidate == Os::Any || required == Os::Any {
        return true;
    }
    if candidate == required {
        return true;
    }
    // POSIX is the transitive superset of the Unix-family OSes.
    match (candidate, required) {
        (Os::Linux, Os::POSIX) | (Os::MacOSX, Os::POSIX) | (Os::Solaris, Os::POSIX) => true,
        _ => false,
    }
}

fn cpu_compatible(candidate: Cpu, required: Cpu) -> bool {
    if candidate == Cpu::Any || required == Cpu::Any {
        return true;
    }
    if candidate == Cpu::Source || required == Cpu::Source {
        return candidate == required;
    }
    if candidate == required {
        return true;
    }
    // 32-bit x86 generations are upward-compatible with each other and with
    // a 64-bit host's requirement, but a 64-bit binary cannot run on a
    // 32-bit-only requirement.
    //
    // TODO(mixed-multilib): the source algorithm leaves the precise rules for
    // running 32-bit candidates under an explicit (non-x86_64) 64-bit
    // requirement as a TODO; this only covers the x86_64-accepts-i386..i686
    // case spec.md calls out explicitly.
    let x86_32_family = [Cpu::I386, Cpu::I486, Cpu::I586, Cpu::I686];
    x86_32_family.contains(&candidate) && required == Cpu::X86_64
}

/// Parses a `(os, cpu)` pair in the `os-cpu` wire form feeds use, or `None`
/// for the empty string (meaning [`Architecture::any`]).
pub fn parse_architecture(s: &str) -> Option<Architecture> {
    if s.is_empty() {
        return Some(Architecture::any());
    }
    let (os_str, cpu_str) = s.split_once('-')?;
    let os = if os_str.is_empty() {
        Os::Any
    } else {
        Os::from_str(os_str).ok()?
    };
    let cpu = if cpu_str.is_empty() {
        Cpu::Any
    } else {
        Cpu::from_str(cpu_str).ok()?
    };
    Some(Architecture::new(os, cpu))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_is_a_superset_of_linux_and_macosx() {
        let linux = Architecture::new(Os::Linux, Cpu::X86_64);
        let required_posix = Architecture::new(Os::POSIX, Cpu::X86_64);
        assert!(linux.is_compatible_with(&required_posix));

        let windows = Architecture::new(Os::Windows, Cpu::X86_64);
        assert!(!windows.is_compatible_with(&required_posix));
    }

    #[test]
    fn i386_runs_under_x86_64_requirement_but_not_reverse() {
        let i386 = Architecture::new(Os::Linux, Cpu::I386);
        let x86_64 = Architecture::new(Os::Linux, Cpu::X86_64);
        let required = Architecture::new(Os::Linux, Cpu::X86_64);

        assert!(i386.is_compatible_with(&required));
        assert!(x86_64.is_compatible_with(&required));

        let required_i386 = Architecture::new(Os::Linux, Cpu::I386);
        assert!(!x86_64.is_compatible_with(&required_i386));
    }

    #[test]
    fn any_matches_everything() {
        let any = Architecture::any();
        let required = Architecture::new(Os::Windows, Cpu::X86_64);
        assert!(any.is_compatible_with(&required));
    }

    #[test]
    fn parses_os_cpu_wire_form() {
        let arch = parse_architecture("Linux-x86_64").unwrap();
        assert_eq!(Os::Linux, arch.os);
        assert_eq!(Cpu::X86_64, arch.cpu);

        assert_eq!(Architecture::any(), parse_architecture("").unwrap());
    }
}
