//! Command line parsing.

use std::path::PathBuf;

/// Settings taken from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxArgs {
    pub seed: u64,
    pub radius: i32,
    pub threads: Option<usize>,
    pub frames: u32,
    pub save_dir: Option<PathBuf>,
    pub help: bool,
}

impl Default for SandboxArgs {
    fn default() -> Self {
        Self {
            seed: 42,
            radius: 4,
            threads: None,
            frames: 600,
            save_dir: None,
            help: false,
        }
    }
}

impl SandboxArgs {
    /// Parse `std::env::args`.
    pub fn from_args() -> Self {
        Self::parse(std::env::args().skip(1))
    }

    /// Parse an argument list without the program name. Unknown flags and
    /// unparsable values are ignored.
    pub fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut params = Self::default();
        let args: Vec<String> = args.into_iter().collect();

        let mut i = 0;
        while i < args.len() {
            let value = args.get(i + 1);
            let mut consumed = false;
            match args[i].as_str() {
                "--seed" => {
                    if let Some(v) = value.and_then(|v| v.parse().ok()) {
                        params.seed = v;
                        consumed = true;
                    }
                }
                "--radius" => {
                    if let Some(v) = value.and_then(|v| v.parse().ok()) {
                        params.radius = v;
                        consumed = true;
                    }
                }
                "--threads" => {
                    if let Some(v) = value.and_then(|v| v.parse().ok()) {
                        params.threads = Some(v);
                        consumed = true;
                    }
                }
                "--frames" => {
                    if let Some(v) = value.and_then(|v| v.parse().ok()) {
                        params.frames = v;
                        consumed = true;
                    }
                }
                "--save-dir" => {
                    if let Some(v) = value {
                        params.save_dir = Some(PathBuf::from(v));
                        consumed = true;
                    }
                }
                "-h" | "--help" => params.help = true,
                _ => {}
            }
            i += if consumed { 2 } else { 1 };
        }

        params
    }
}
