use std::fs;
use std::path::Path;

/// Detected operating system, as far as provisioning cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatingSystem {
    Kali,
    Debian,
    Ubuntu,
    /// Pop!_OS, Linux Mint, elementary and other Ubuntu derivatives
    UbuntuDerivative(String),
    /// Anything apt-based that is not listed above
    DebianDerivative(String),
    /// Not apt-based at all
    Other(String),
    Unknown,
}

impl OperatingSystem {
    /// Detect the current operating system from /etc/os-release
    pub fn detect() -> Self {
        Self::detect_from(Path::new("/etc/os-release"))
    }

    pub fn detect_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse_os_release(&content),
            Err(_) => Self::Unknown,
        }
    }

    pub fn parse_os_release(content: &str) -> Self {
        let id = os_release_value(content, "ID").unwrap_or_default();
        let id_like = os_release_value(content, "ID_LIKE").unwrap_or_default();

        match id.as_str() {
            "kali" => Self::Kali,
            "debian" => Self::Debian,
            "ubuntu" => Self::Ubuntu,
            "" => Self::Unknown,
            _ if id_like.contains("ubuntu") => Self::UbuntuDerivative(id),
            _ if id_like.contains("debian") => Self::DebianDerivative(id),
            _ => Self::Other(id),
        }
    }

    /// True when apt/dpkg are the native package tools
    pub fn is_debian_based(&self) -> bool {
        !matches!(self, Self::Other(_) | Self::Unknown)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Kali => "Kali Linux",
            Self::Debian => "Debian",
            Self::Ubuntu => "Ubuntu",
            Self::UbuntuDerivative(id) | Self::DebianDerivative(id) | Self::Other(id) => id,
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn os_release_value(content: &str, key: &str) -> Option<String> {
    content.lines().find_map(|line| {
        line.strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
            .map(|val| val.trim().trim_matches('"').to_string())
    })
}
