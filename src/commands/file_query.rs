use crate::constants::FILE_QUERY;
use crate::dvrip::DVRIPCam;
use crate::error::Result;
use crate::marker::{EventMarker, FileKind, format_time};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::{Value, json};

/// One row of an `OPFileQuery` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileRow {
    #[serde(rename = "FileName")]
    pub file_name: Option<String>,
    #[serde(rename = "BeginTime")]
    pub begin_time: Option<String>,
    #[serde(rename = "EndTime")]
    pub end_time: Option<String>,
    #[serde(rename = "FileLength")]
    pub file_length: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FileListField {
    Rows(Vec<Value>),
    Wrapped {
        #[serde(rename = "FileList", default)]
        file_list: Vec<Value>,
    },
    Other(serde::de::IgnoredAny),
}

/// Reply to a file index query. Firmwares disagree on where the row list
/// lives: directly under `OPFileQuery`, under `OPFileQuery.FileList`, or in a
/// top-level `FileList`.
#[derive(Debug, Deserialize)]
pub struct FileQueryReply {
    #[serde(rename = "Ret")]
    pub ret: Option<u32>,
    #[serde(rename = "OPFileQuery")]
    op_file_query: Option<FileListField>,
    #[serde(rename = "FileList")]
    file_list: Option<Vec<Value>>,
}

impl FileQueryReply {
    /// Rows of the reply. Entries that are not objects of strings are skipped;
    /// a reply of any other shape yields no rows.
    pub fn from_value(reply: Value) -> Vec<FileRow> {
        let Ok(parsed) = serde_json::from_value::<FileQueryReply>(reply) else {
            return vec![];
        };
        let raw = match (parsed.op_file_query, parsed.file_list) {
            (Some(FileListField::Rows(rows)), _) => rows,
            (Some(FileListField::Wrapped { file_list }), _) => file_list,
            (Some(FileListField::Other(_)), _) => vec![],
            (None, Some(rows)) => rows,
            (None, None) => vec![],
        };
        raw.into_iter()
            .filter(Value::is_object)
            .filter_map(|row| serde_json::from_value(row).ok())
            .collect()
    }
}

/// Which index entries a query asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFilter {
    pub event: String,
    pub kind: FileKind,
    pub stream: String,
}

impl QueryFilter {
    /// Still-image alarm entries of any event type.
    pub fn photo_markers() -> Self {
        Self {
            event: "*".to_string(),
            kind: FileKind::Photo,
            stream: "Main".to_string(),
        }
    }

    /// Video recordings triggered by motion.
    pub fn motion_clips() -> Self {
        Self {
            event: "M".to_string(),
            kind: FileKind::Clip,
            stream: "Main".to_string(),
        }
    }

    pub fn request(&self, begin: &NaiveDateTime, end: &NaiveDateTime) -> Value {
        json!({
            "Name": "OPFileQuery",
            "OPFileQuery": {
                "BeginTime": format_time(begin),
                "EndTime": format_time(end),
                "Channel": 0,
                "DriverTypeMask": "0x0000FFFF",
                "Event": self.event,
                "Type": self.kind.query_type(),
                "StreamType": self.stream,
            },
        })
    }
}

#[async_trait]
pub trait FileQuery: Send + Sync {
    /// Raw index rows for `[begin, end]`. An undecodable reply is no rows.
    async fn query_files(
        &mut self,
        begin: &NaiveDateTime,
        end: &NaiveDateTime,
        filter: &QueryFilter,
    ) -> Result<Vec<FileRow>>;

    /// Index rows with a parseable begin time, as markers.
    async fn query_markers(
        &mut self,
        begin: &NaiveDateTime,
        end: &NaiveDateTime,
        filter: &QueryFilter,
    ) -> Result<Vec<EventMarker>> {
        let rows = self.query_files(begin, end, filter).await?;
        Ok(rows
            .iter()
            .filter_map(|row| EventMarker::from_row(row, filter.kind, &filter.event))
            .collect())
    }
}

#[async_trait]
impl FileQuery for DVRIPCam {
    async fn query_files(
        &mut self,
        begin: &NaiveDateTime,
        end: &NaiveDateTime,
        filter: &QueryFilter,
    ) -> Result<Vec<FileRow>> {
        let request = filter.request(begin, end);
        let Some(reply) = self.send(FILE_QUERY, &request).await? else {
            return Ok(vec![]);
        };
        let rows = FileQueryReply::from_value(reply);
        tracing::debug!(
            "OPFileQuery {} .. {} type={} event={} -> {} rows",
            format_time(begin),
            format_time(end),
            filter.kind.query_type(),
            filter.event,
            rows.len()
        );
        Ok(rows)
    }
}
