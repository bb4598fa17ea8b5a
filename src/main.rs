//! git-pages-cli - publish static sites to a git-pages server
//!
//! Uploads a directory as a zstd-compressed tar archive. With --incremental,
//! large files are sent as blob references first and only the blobs the
//! server reports missing are uploaded in follow-up requests.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::io::{self, Write};
use std::process::ExitCode;

use git_pages_cli::challenge::{challenge_digest, generate_password, zone_record};
use git_pages_cli::cli::{Args, USAGE_EXIT_CODE};
use git_pages_cli::fs_enum::describe_tree;
use git_pages_cli::logger::{
    ConsoleLogger, Logger, NoopLogger, ProgressLogger, TeeLogger, TextLogger,
};
use git_pages_cli::net::{version_info, HttpTransport, SiteTarget};
use git_pages_cli::upload::{Operation, Outcome};

fn main() -> ExitCode {
    // Set up Ctrl-C handler
    if let Err(err) = ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // Exit immediately with 130 (128 + SIGINT)
        std::process::exit(130);
    }) {
        eprintln!("warning: cannot install Ctrl-C handler: {}", err);
    }

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if err.use_stderr() => {
            let _ = err.print();
            return ExitCode::from(USAGE_EXIT_CODE);
        }
        Err(err) => {
            // --help
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
    };

    if let Err(err) = args.validate() {
        eprintln!("error: {}", err);
        let _ = Args::command().print_help();
        return ExitCode::from(USAGE_EXIT_CODE);
    }

    if args.version {
        println!("{}", version_info());
        return ExitCode::SUCCESS;
    }

    match run(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let site = args.site_url.as_deref().unwrap_or_default();
    let mut target = SiteTarget::parse(site)?;

    if args.challenge || args.challenge_bare {
        let password = match &args.password {
            Some(password) if !password.is_empty() => password.clone(),
            _ => {
                let password = generate_password();
                eprintln!("password: {}", password);
                password
            }
        };
        let digest = challenge_digest(&target.hostname(), &password);
        if args.challenge_bare {
            println!("{}", digest);
        } else {
            println!("{}", zone_record(&target.hostname(), &digest));
        }
        return Ok(ExitCode::SUCCESS);
    }

    target.server = args.server.clone();
    target.auth = args.auth();

    let operation = args.operation().context("no operation selected")?;

    // Choose logger once; verbose output replaces the spinner
    let mut loggers: Vec<Box<dyn Logger>> = Vec::new();
    if args.verbose {
        loggers.push(Box::new(ConsoleLogger::new()));
    } else if !matches!(operation, Operation::DebugManifest) {
        loggers.push(Box::new(ProgressLogger::new()));
    }
    if let Some(ref p) = args.log_file {
        match TextLogger::new(p) {
            Ok(l) => loggers.push(Box::new(l)),
            Err(err) => eprintln!("warning: cannot open log file {}: {:#}", p.display(), err),
        }
    }
    let logger: Box<dyn Logger> = match loggers.len() {
        0 => Box::new(NoopLogger),
        _ => Box::new(TeeLogger(loggers)),
    };

    if let Operation::UploadDir(config) = &operation {
        if args.verbose || args.log_file.is_some() {
            for line in describe_tree(&config.root, &config.path_prefix)? {
                logger.listing(&line);
            }
        }
    }

    let is_manifest = matches!(operation, Operation::DebugManifest);
    let session = operation.into_session(&target)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let transport = HttpTransport::new();
    let outcome = runtime.block_on(session.run(&transport, logger.as_ref()))?;

    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    match outcome {
        Outcome::Accepted { body, .. } if is_manifest => {
            stdout.write_all(&body)?;
            writeln!(stdout)?;
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Rejected { body, .. } if is_manifest => {
            stderr.write_all(&body)?;
            Ok(ExitCode::FAILURE)
        }
        Outcome::Accepted { update_result, body } => {
            writeln!(stdout, "result: {}", update_result.unwrap_or_default())?;
            stdout.write_all(&body)?;
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Rejected { body, .. } => {
            writeln!(stderr, "result: error")?;
            stderr.write_all(&body)?;
            Ok(ExitCode::FAILURE)
        }
    }
}
