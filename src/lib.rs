//! git-pages client library
//!
//! Incremental, content-addressed site uploads for git-pages servers

pub mod challenge;
pub mod cli;
pub mod error;
pub mod fs_enum;
pub mod hash;
pub mod logger;
pub mod net;
pub mod tar_stream;
pub mod upload;

pub use cli::Args;
pub use error::PagesError;
