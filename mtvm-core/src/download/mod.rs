//! Streaming downloads with progress reporting.
//!
//! - `progress`: the rendezvous progress pipe and the [`Progress`] value type
//! - `downloader`: cancellable HTTP transfers into memory or a file

pub mod downloader;
pub mod progress;

pub use downloader::{
    parse_content_length, ContentLength, DownloadTask, Downloaded, Downloader, Finished, Sink,
};
pub use progress::{progress_pipe, PipeClosed, Progress, ProgressReceiver, ProgressSender};
