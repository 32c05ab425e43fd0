//! Oxiflate: a streaming zlib/gzip/deflate session engine.
//!
//! The crate provides:
//! - A pluggable codec seam with a flate2 backend (`codec`)
//! - Per-session state, auto-detection and chunk dispatch (`session`)
//! - A worker pool with control-thread completions (`worker`)
//! - Stream and file helpers (`io`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use oxiflate::codec::Flush;
//! use oxiflate::session::{Chunk, InitOptions, Mode, Session, WriteResult};
//!
//! let result = WriteResult::new();
//! let session = Session::new(Mode::Gzip);
//! session.init(InitOptions::default().with_level(6).with_result(result.clone())).unwrap();
//!
//! let mut out = vec![0u8; 256];
//! session.write_sync(Chunk::new(Flush::Finish, b"hello world", &mut out)).unwrap();
//! out.truncate(out.len() - result.avail_out());
//! session.close().unwrap();
//!
//! let plain = oxiflate::io::transform_bytes(&out, &oxiflate::io::TransformOptions::new(Mode::AutoUnzip)).unwrap();
//! assert_eq!(plain, b"hello world");
//! ```

pub mod codec;
pub mod error;
pub mod io;
pub mod session;
pub mod worker;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::{InitError, SessionError, StreamError, StreamErrorKind, UsageError, WriteRejected};
pub use session::{Chunk, InitOptions, Mode, OwnedChunk, Session, WriteResult};
pub use worker::{EventLoop, WorkerConfig};
