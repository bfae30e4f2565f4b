pub mod authentication;
pub mod connection;
pub mod download;
pub mod file_query;

pub use authentication::Authentication;
pub use connection::Connection;
pub use download::{DownloadRequest, DownloadStats, download_archive, download_with_retries};
pub use file_query::{FileQuery, FileQueryReply, QueryFilter};
