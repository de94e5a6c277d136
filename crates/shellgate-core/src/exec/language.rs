use std::fmt;

/// Languages the executor knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    /// `python3`
    Python,
    /// `bash`
    Bash,
    /// POSIX `sh`
    Sh,
    /// `node`
    Js,
}

impl Language {
    /// Resolve a client-supplied tag. Unknown or missing tags run as bash.
    pub fn from_tag(tag: Option<&str>) -> Self {
        let Some(tag) = tag else {
            return Language::Bash;
        };
        match tag.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Language::Python,
            "sh" | "shell" => Language::Sh,
            "js" | "javascript" | "node" => Language::Js,
            _ => Language::Bash,
        }
    }

    /// Interpreter binary
    pub fn interpreter(self) -> &'static str {
        match self {
            Language::Python => "python3",
            Language::Bash => "bash",
            Language::Sh => "sh",
            Language::Js => "node",
        }
    }

    /// Temp file extension, dot included
    pub fn extension(self) -> &'static str {
        match self {
            Language::Python => ".py",
            Language::Bash | Language::Sh => ".sh",
            Language::Js => ".js",
        }
    }

    /// Canonical name reported to the client
    pub fn name(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Bash => "bash",
            Language::Sh => "sh",
            Language::Js => "js",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
