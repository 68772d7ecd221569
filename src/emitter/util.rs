use anyhow::{bail, Error};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::{fmt, str::FromStr};

lazy_static! {
    static ref NEEDS_ESCAPE: Regex = Regex::new(r#"[^ -~]|["\\?]"#).unwrap();
}

pub fn escape(s: &str) -> String {
    NEEDS_ESCAPE
        .replace_all(s, |caps: &Captures| {
            caps[0]
                .bytes()
                .map(|b| format!("\\{:03o}", b))
                .collect::<String>()
        })
        .into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Linux,
    MacOs,
}

impl Target {
    pub fn host() -> Target {
        if cfg!(target_os = "macos") {
            Target::MacOs
        } else {
            Target::Linux
        }
    }

    pub fn symbol(self, name: &str) -> String {
        match self {
            Target::Linux => name.to_owned(),
            Target::MacOs => format!("_{}", name),
        }
    }

    pub fn local_label(self, name: &str) -> String {
        match self {
            Target::Linux => format!(".L{}", name),
            Target::MacOs => format!("L{}", name),
        }
    }

    pub fn data_symbol(self, name: &str) -> String {
        if is_string_label(name) {
            self.local_label(name)
        } else {
            self.symbol(name)
        }
    }

    pub fn call_target(self, name: &str, external: bool) -> String {
        match self {
            Target::Linux if external => format!("{}@PLT", name),
            _ => self.symbol(name),
        }
    }

    pub fn string_section(self) -> &'static str {
        match self {
            Target::Linux => ".section .rodata",
            Target::MacOs => ".section __TEXT,__cstring,cstring_literals",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    pub fn host() -> Arch {
        if cfg!(target_arch = "aarch64") {
            Arch::Aarch64
        } else {
            Arch::X86_64
        }
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x86_64" | "x86-64" | "amd64" => Ok(Arch::X86_64),
            "aarch64" | "arm64" => Ok(Arch::Aarch64),
            _ => bail!("unknown architecture '{}', expected x86_64 or aarch64", s),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::X86_64 => write!(f, "x86_64"),
            Arch::Aarch64 => write!(f, "aarch64"),
        }
    }
}

pub fn is_string_label(name: &str) -> bool {
    name.starts_with("str.")
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linux" => Ok(Target::Linux),
            "macos" | "darwin" => Ok(Target::MacOs),
            _ => bail!("unknown target '{}', expected linux or macos", s),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Linux => write!(f, "linux"),
            Target::MacOs => write!(f, "macos"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes_and_control_characters() {
        assert_eq!(escape("%d: %s\n"), "%d: %s\\012");
        assert_eq!(escape("say \"hi\""), "say \\042hi\\042");
        assert_eq!(escape("a\\b"), "a\\134b");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn targets_differ_in_symbols_and_labels() {
        assert_eq!(Target::Linux.symbol("main"), "main");
        assert_eq!(Target::MacOs.symbol("main"), "_main");
        assert_eq!(Target::Linux.local_label("if_end.3"), ".Lif_end.3");
        assert_eq!(Target::MacOs.local_label("if_end.3"), "Lif_end.3");
        assert_eq!(Target::Linux.data_symbol("str.0"), ".Lstr.0");
        assert_eq!(Target::MacOs.data_symbol("memo"), "_memo");
        assert_eq!(Target::Linux.call_target("printf", true), "printf@PLT");
        assert_eq!(Target::Linux.call_target("fib", false), "fib");
        assert_eq!(Target::MacOs.call_target("printf", true), "_printf");
    }

    #[test]
    fn parses_target_names() {
        assert_eq!("linux".parse::<Target>().unwrap(), Target::Linux);
        assert_eq!("macos".parse::<Target>().unwrap(), Target::MacOs);
        assert!("windows".parse::<Target>().is_err());
    }

    #[test]
    fn parses_architecture_names() {
        assert_eq!("x86_64".parse::<Arch>().unwrap(), Arch::X86_64);
        assert_eq!("arm64".parse::<Arch>().unwrap(), Arch::Aarch64);
        assert_eq!("aarch64".parse::<Arch>().unwrap().to_string(), "aarch64");
        assert!("riscv64".parse::<Arch>().is_err());
    }
}
