//! Command-line arguments and the checks clap cannot express

use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;

use crate::hash::INCREMENTAL_SIZE_THRESHOLD;
use crate::net::Auth;
use crate::tar_stream::normalize_prefix;
use crate::upload::{Operation, UploadConfig};

/// Exit status for malformed invocations
pub const USAGE_EXIT_CODE: u8 = 125;

/// Command-line arguments
#[derive(Parser, Debug, Default)]
#[command(
    name = "git-pages-cli",
    about = "Publish, update or delete a site on a git-pages server",
    override_usage = "git-pages-cli <site-url> {--challenge|--upload-dir path|--delete} [options...]",
    disable_version_flag = true
)]
pub struct Args {
    /// URL of the site to operate on
    pub site_url: Option<String>,

    /// Password for DNS challenge authorization
    #[arg(long)]
    pub password: Option<String>,

    /// Token for forge authorization
    #[arg(long)]
    pub token: Option<String>,

    /// Compute DNS challenge entry from password (output zone file record)
    #[arg(long)]
    pub challenge: bool,

    /// Compute DNS challenge entry from password (output bare TXT value)
    #[arg(long)]
    pub challenge_bare: bool,

    /// Replace whole site or a path with contents of specified directory
    #[arg(long, value_name = "DIR")]
    pub upload_dir: Option<PathBuf>,

    /// Delete whole site or a path
    #[arg(long)]
    pub delete: bool,

    /// Retrieve site manifest as ProtoJSON, for debugging
    #[arg(long)]
    pub debug_manifest: bool,

    /// Hostname of server to connect to
    #[arg(long)]
    pub server: Option<String>,

    /// Partially update site at specified path
    #[arg(long)]
    pub path: Option<String>,

    /// Create parent directories of --path
    #[arg(long)]
    pub parents: bool,

    /// Require partial updates to be atomic
    #[arg(long)]
    pub atomic: bool,

    /// Only upload changed files
    #[arg(long)]
    pub incremental: bool,

    /// Stop if the server still lacks blobs after this many requests
    #[arg(long, value_name = "N")]
    pub max_rounds: Option<u32>,

    /// Append a timestamped record of requests to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Display more information for debugging
    #[arg(short, long)]
    pub verbose: bool,

    /// Display version information
    #[arg(short = 'V', long)]
    pub version: bool,
}

/// Invocation that parses but cannot be run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct UsageError(pub String);

fn usage(msg: &str) -> Result<(), UsageError> {
    Err(UsageError(msg.to_string()))
}

impl Args {
    fn operation_count(&self) -> usize {
        [
            self.challenge,
            self.challenge_bare,
            self.upload_dir.is_some(),
            self.delete,
            self.debug_manifest,
            self.version,
        ]
        .into_iter()
        .filter(|selected| *selected)
        .count()
    }

    /// Reject flag combinations that do not describe exactly one operation
    pub fn validate(&self) -> Result<(), UsageError> {
        if self.operation_count() != 1 {
            return usage("exactly one operation must be selected");
        }
        if !self.version && self.site_url.is_none() {
            return usage("a site URL is required");
        }
        if self.password.is_some() && self.token.is_some() {
            return usage("--password and --token are mutually exclusive");
        }
        if let Some(path) = &self.path {
            if self.upload_dir.is_none() && !self.delete {
                return usage("--path requires --upload-dir or --delete");
            }
            // An empty path would turn a partial update into a whole-site one
            if normalize_prefix(path).is_empty() {
                return usage("--path must name a location below the site root");
            }
        }
        if self.incremental && self.upload_dir.is_none() {
            return usage("--incremental requires --upload-dir");
        }
        if self.max_rounds == Some(0) {
            return usage("--max-rounds must be at least 1");
        }
        Ok(())
    }

    /// Normalized archive prefix for --path ("" when absent)
    pub fn path_prefix(&self) -> String {
        self.path.as_deref().map(normalize_prefix).unwrap_or_default()
    }

    pub fn auth(&self) -> Option<Auth> {
        match (&self.password, &self.token) {
            (Some(password), _) if !password.is_empty() => Some(Auth::Password(password.clone())),
            (_, Some(token)) if !token.is_empty() => Some(Auth::Token(token.clone())),
            _ => None,
        }
    }

    /// Site operation selected by the flags, if it talks to the server
    pub fn operation(&self) -> Option<Operation> {
        if let Some(dir) = &self.upload_dir {
            let mut config = UploadConfig::new(dir);
            config.path_prefix = self.path_prefix();
            config.incremental = self.incremental;
            config.size_threshold = INCREMENTAL_SIZE_THRESHOLD;
            config.create_parents = self.parents;
            config.atomic = self.atomic;
            config.max_rounds = self.max_rounds;
            Some(Operation::UploadDir(config))
        } else if self.delete {
            Some(Operation::Delete {
                path_prefix: self.path_prefix(),
                atomic: self.atomic,
            })
        } else if self.debug_manifest {
            Some(Operation::DebugManifest)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("git-pages-cli").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_single_operation_required() {
        assert!(parse(&["http://x/"]).validate().is_err());
        assert!(parse(&["http://x/", "--delete", "--challenge"]).validate().is_err());
        assert!(parse(&["http://x/", "--delete"]).validate().is_ok());
        assert!(parse(&["-V"]).validate().is_ok());
        assert!(parse(&["--delete"]).validate().is_err());
    }

    #[test]
    fn test_flag_dependencies() {
        assert!(parse(&["http://x/", "--challenge", "--path", "a"]).validate().is_err());
        assert!(parse(&["http://x/", "--delete", "--incremental"]).validate().is_err());
        assert!(parse(&["http://x/", "--delete", "--password", "p", "--token", "t"])
            .validate()
            .is_err());
        assert!(parse(&["http://x/", "--upload-dir", ".", "--incremental", "--path", "/a/b/"])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_root_path_is_refused() {
        for path in ["/", "//", ""] {
            let err = parse(&["http://x/", "--delete", "--path", path]).validate().unwrap_err();
            assert!(err.to_string().contains("--path"), "{err}");
            assert!(parse(&["http://x/", "--upload-dir", ".", "--path", path])
                .validate()
                .is_err());
        }
        assert!(parse(&["http://x/", "--delete"]).validate().is_ok());
    }

    #[test]
    fn test_upload_operation_from_flags() {
        let args = parse(&[
            "http://x/",
            "--upload-dir",
            "site",
            "--path",
            "/blog/",
            "--incremental",
            "--parents",
            "--atomic",
            "--max-rounds",
            "5",
        ]);
        match args.operation() {
            Some(Operation::UploadDir(config)) => {
                assert_eq!(config.root, PathBuf::from("site"));
                assert_eq!(config.path_prefix, "blog/");
                assert!(config.incremental && config.create_parents && config.atomic);
                assert_eq!(config.max_rounds, Some(5));
            }
            other => panic!("unexpected operation {other:?}"),
        }
    }

    #[test]
    fn test_delete_and_auth_from_flags() {
        let args = parse(&["http://x/", "--delete", "--path", "old", "--token", "t0k"]);
        assert!(matches!(
            args.operation(),
            Some(Operation::Delete { ref path_prefix, atomic: false }) if path_prefix == "old/"
        ));
        assert_eq!(args.auth(), Some(Auth::Token("t0k".into())));
        assert_eq!(parse(&["http://x/", "--challenge"]).auth(), None);
        assert!(parse(&["http://x/", "--challenge"]).operation().is_none());
    }
}
