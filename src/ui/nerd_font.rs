/// Icons used in console output. Requires a nerd font in the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NerdFont {
    Check,
    CrossCircle,
    Warning,
    Info,
    Folder,
    Download,
    Archive,
    Desktop,
    Terminal,
    Wrench,
    Key,
    Lock,
    Globe,
    Trash,
    List,
    Clock,
    Package,
    Palette,
    Refresh,
    Star,
    Shield,
}

impl NerdFont {
    pub const fn unicode(&self) -> char {
        match self {
            Self::Check => '\u{f00c}',       // fa-check
            Self::CrossCircle => '\u{f057}', // fa-times-circle
            Self::Warning => '\u{f071}',     // fa-exclamation-triangle
            Self::Info => '\u{f05a}',        // fa-info-circle
            Self::Folder => '\u{f07b}',      // fa-folder
            Self::Download => '\u{f019}',    // fa-download
            Self::Archive => '\u{f187}',     // fa-archive
            Self::Desktop => '\u{f108}',     // fa-desktop
            Self::Terminal => '\u{f120}',    // fa-terminal
            Self::Wrench => '\u{f0ad}',      // fa-wrench
            Self::Key => '\u{f084}',         // fa-key
            Self::Lock => '\u{f023}',        // fa-lock
            Self::Globe => '\u{f0ac}',       // fa-globe
            Self::Trash => '\u{f1f8}',       // fa-trash
            Self::List => '\u{f03a}',        // fa-list
            Self::Clock => '\u{f017}',       // fa-clock-o
            Self::Package => '\u{f487}',     // oct-package
            Self::Palette => '\u{f53f}',     // fa-palette
            Self::Refresh => '\u{f021}',     // fa-refresh
            Self::Star => '\u{f005}',        // fa-star
            Self::Shield => '\u{f132}',      // fa-shield
        }
    }
}

impl From<NerdFont> for char {
    fn from(icon: NerdFont) -> Self {
        icon.unicode()
    }
}

impl std::fmt::Display for NerdFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.unicode())
    }
}
