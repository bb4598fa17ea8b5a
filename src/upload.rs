//! Site operations and the blob negotiation loop
//!
//! An upload is sent as one logical request. When the server answers 422 with
//! the unresolved-blobs media type, the tree is walked again and a new archive
//! embedding exactly the listed blobs is sent with the same method, URL and
//! headers. This repeats until the server accepts or rejects the upload.

use anyhow::Result;
use bytes::Bytes;
use hyper::header::{self, HeaderValue};
use hyper::{Method, StatusCode};
use std::path::PathBuf;
use std::time::Instant;

use crate::error::PagesError;
use crate::hash::{MustEmbedSet, INCREMENTAL_SIZE_THRESHOLD};
use crate::logger::Logger;
use crate::net::{
    yes_no, Request, RequestBody, Response, SiteTarget, Transport, ACCEPT_UNRESOLVED, ATOMIC,
    CREATE_PARENTS, RACE_FREE, UPDATE_RESULT,
};
use crate::tar_stream::{
    make_whiteout, stream_archive, ArchiveOptions, ARCHIVE_CONTENT_TYPE, WHITEOUT_CONTENT_TYPE,
};

/// Everything a directory upload needs, passed explicitly instead of read from flags
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub root: PathBuf,
    /// Normalized site path ("" for the whole site, otherwise ending in `/`)
    pub path_prefix: String,
    pub incremental: bool,
    pub size_threshold: u64,
    pub create_parents: bool,
    pub atomic: bool,
    /// Give up after this many requests; None keeps negotiating
    pub max_rounds: Option<u32>,
}

impl UploadConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        UploadConfig {
            root: root.into(),
            path_prefix: String::new(),
            incremental: false,
            size_threshold: INCREMENTAL_SIZE_THRESHOLD,
            create_parents: false,
            atomic: false,
            max_rounds: None,
        }
    }

    pub fn archive_options(&self) -> ArchiveOptions {
        ArchiveOptions {
            path_prefix: self.path_prefix.clone(),
            incremental: self.incremental,
            size_threshold: self.size_threshold,
            ..ArchiveOptions::default()
        }
    }
}

/// One site operation, as selected on the command line
#[derive(Debug, Clone)]
pub enum Operation {
    /// Replace the whole site (PUT) or a path below it (PATCH) with a directory
    UploadDir(UploadConfig),
    /// Remove the whole site, or one path when `path_prefix` is non-empty
    Delete { path_prefix: String, atomic: bool },
    /// Fetch the site manifest
    DebugManifest,
}

/// What goes into the request body each round
enum Payload {
    Empty,
    Fixed(Bytes),
    Archive(UploadConfig),
}

fn patch_headers(request: &mut Request, atomic: bool) {
    request.headers.insert(ATOMIC, yes_no(atomic));
    request.headers.insert(RACE_FREE, yes_no(atomic));
}

impl Operation {
    /// Shape the request for this operation against `target`
    pub fn into_session(self, target: &SiteTarget) -> Result<UploadSession> {
        match self {
            Operation::UploadDir(config) => {
                if !config.root.is_dir() {
                    return Err(PagesError::NotADirectory(config.root).into());
                }
                let method = if config.path_prefix.is_empty() {
                    Method::PUT
                } else {
                    Method::PATCH
                };
                let mut request = target.request(method)?;
                request.headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(ARCHIVE_CONTENT_TYPE),
                );
                request
                    .headers
                    .insert(header::ACCEPT, HeaderValue::from_static(ACCEPT_UNRESOLVED));
                request
                    .headers
                    .insert(CREATE_PARENTS, yes_no(config.create_parents));
                if request.method == Method::PATCH {
                    patch_headers(&mut request, config.atomic);
                }
                let max_rounds = config.max_rounds;
                Ok(UploadSession::new(request, Payload::Archive(config), max_rounds))
            }
            Operation::Delete { path_prefix, atomic } => {
                if path_prefix.is_empty() {
                    let request = target.request(Method::DELETE)?;
                    Ok(UploadSession::new(request, Payload::Empty, None))
                } else {
                    let mut request = target.request(Method::PATCH)?;
                    request.headers.insert(
                        header::CONTENT_TYPE,
                        HeaderValue::from_static(WHITEOUT_CONTENT_TYPE),
                    );
                    patch_headers(&mut request, atomic);
                    let body = Bytes::from(make_whiteout(&path_prefix)?);
                    Ok(UploadSession::new(request, Payload::Fixed(body), None))
                }
            }
            Operation::DebugManifest => {
                let request = target.request_to(Method::GET, &target.manifest_url()?)?;
                let mut session = UploadSession::new(request, Payload::Empty, None);
                // A read, not an update: no per-response diagnostics
                session.log_responses = false;
                Ok(session)
            }
        }
    }
}

/// Terminal result of a session
#[derive(Debug, Clone)]
pub enum Outcome {
    Accepted {
        update_result: Option<String>,
        body: Bytes,
    },
    Rejected {
        status: StatusCode,
        body: Bytes,
    },
}

/// State of one negotiation: the fixed request plus what the server asked for
pub struct UploadSession {
    request: Request,
    payload: Payload,
    must_embed: MustEmbedSet,
    rounds: u32,
    max_rounds: Option<u32>,
    log_responses: bool,
}

impl UploadSession {
    fn new(request: Request, payload: Payload, max_rounds: Option<u32>) -> Self {
        UploadSession {
            request,
            payload,
            must_embed: MustEmbedSet::new(),
            rounds: 0,
            max_rounds,
            log_responses: true,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Fresh body for the current round; archives are re-walked from scratch
    fn build_body(&self) -> RequestBody {
        match &self.payload {
            Payload::Empty => RequestBody::Empty,
            Payload::Fixed(bytes) => RequestBody::Bytes(bytes.clone()),
            Payload::Archive(config) => RequestBody::Archive(stream_archive(
                config.root.clone(),
                config.archive_options(),
                self.must_embed.clone(),
            )),
        }
    }

    /// Apply a response; Some(outcome) ends the session.
    ///
    /// Only archive uploads negotiate. Anything else that gets a 422 back has
    /// nothing to resend, so it ends like any other non-200 reply.
    fn settle(&mut self, response: Response, logger: &dyn Logger) -> Result<Option<Outcome>> {
        if response.is_unresolved() && matches!(self.payload, Payload::Archive(_)) {
            let needed = MustEmbedSet::parse_unresolved(&response.body)?;
            logger.need_blobs(needed.len());
            if self.max_rounds.is_some_and(|max| self.rounds >= max) {
                return Err(PagesError::TooManyRounds(self.rounds).into());
            }
            self.must_embed = needed;
            return Ok(None);
        }

        if response.status == StatusCode::OK {
            Ok(Some(Outcome::Accepted {
                update_result: response.header(UPDATE_RESULT).map(str::to_string),
                body: response.body,
            }))
        } else {
            Ok(Some(Outcome::Rejected {
                status: response.status,
                body: response.body,
            }))
        }
    }

    async fn negotiate<T>(&mut self, transport: &T, logger: &dyn Logger) -> Result<Outcome>
    where
        T: Transport + ?Sized,
    {
        loop {
            let body = self.build_body();
            self.rounds += 1;
            logger.round(self.rounds, &self.request, self.must_embed.len());

            let response = transport.send(&self.request, body).await?;
            if self.log_responses {
                logger.response(
                    response.status,
                    response.content_type(),
                    response.header(header::SERVER),
                );
            }

            if let Some(outcome) = self.settle(response, logger)? {
                return Ok(outcome);
            }
        }
    }

    /// Drive the session until the server accepts or rejects it
    pub async fn run<T>(mut self, transport: &T, logger: &dyn Logger) -> Result<Outcome>
    where
        T: Transport + ?Sized,
    {
        let start = Instant::now();
        let result = self.negotiate(transport, logger).await;
        match &result {
            Ok(_) => logger.done(self.rounds, start.elapsed().as_secs_f64()),
            Err(err) => logger.error("negotiate", &format!("{:#}", err)),
        }
        result
    }
}
