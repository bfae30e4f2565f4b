use crate::commands::file_query::FileRow;
use crate::constants::DATE_FORMAT;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// What kind of file an index row refers to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Indexed as a still image. The bytes are often a short video stream.
    Photo,
    /// Indexed as a video recording around a motion event.
    Clip,
}

impl FileKind {
    /// Value of the `Type` field in a file query.
    pub fn query_type(&self) -> &'static str {
        match self {
            FileKind::Photo => "jpg",
            FileKind::Clip => "h264",
        }
    }
}

/// Deduplication key of an index row.
pub type MarkerKey = (String, NaiveDateTime);

/// One row of the camera's file index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventMarker {
    pub file_name: String,
    pub begin: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
    pub event: String,
    pub kind: FileKind,
}

pub fn parse_time(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

pub fn format_time(value: &NaiveDateTime) -> String {
    value.format(DATE_FORMAT).to_string()
}

impl EventMarker {
    /// Builds a marker from an index row. Rows without a parseable begin
    /// time are dropped.
    pub fn from_row(row: &FileRow, kind: FileKind, event_filter: &str) -> Option<Self> {
        let begin = parse_time(row.begin_time.as_deref()?)?;
        let end = row.end_time.as_deref().and_then(parse_time);
        let file_name = row.file_name.clone().unwrap_or_default();
        let event = event_code_from_name(&file_name).unwrap_or_else(|| event_filter.to_string());
        Some(Self {
            file_name,
            begin,
            end,
            event,
            kind,
        })
    }

    pub fn key(&self) -> MarkerKey {
        (self.file_name.clone(), self.begin)
    }

    pub fn contains(&self, target: &NaiveDateTime) -> bool {
        match self.end {
            Some(end) => self.begin <= *target && *target <= end,
            None => false,
        }
    }

    /// Seconds between the begin time and `target`, unsigned.
    pub fn distance_secs(&self, target: &NaiveDateTime) -> i64 {
        (self.begin - *target).num_seconds().abs()
    }
}

/// File names look like `/idea1/2024-05-01/001/10.00.05-10.00.12[M][@1f][0].jpg`;
/// the first single-letter bracket group is the event code.
fn event_code_from_name(name: &str) -> Option<String> {
    let mut rest = name;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let close = after.find(']')?;
        let inner = &after[..close];
        if inner.len() == 1 && inner.chars().all(|c| c.is_ascii_alphabetic()) {
            return Some(inner.to_string());
        }
        rest = &after[close + 1..];
    }
    None
}

/// Picks the marker closest to `target`: rows whose `[begin, end]` contains
/// the target come first, then the smallest distance between begin time and
/// target. Ties keep the earlier row.
pub fn pick_closest<'a>(
    markers: &'a [EventMarker],
    target: &NaiveDateTime,
) -> Option<&'a EventMarker> {
    let mut best: Option<(&EventMarker, (u8, i64))> = None;
    for marker in markers {
        let key = (
            if marker.contains(target) { 0 } else { 1 },
            marker.distance_secs(target),
        );
        match best {
            Some((_, best_key)) if key >= best_key => {}
            _ => best = Some((marker, key)),
        }
    }
    best.map(|(marker, _)| marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, begin: &str, end: Option<&str>) -> FileRow {
        FileRow {
            file_name: Some(name.to_string()),
            begin_time: Some(begin.to_string()),
            end_time: end.map(str::to_string),
            file_length: None,
        }
    }

    fn marker(name: &str, begin: &str, end: Option<&str>) -> EventMarker {
        EventMarker::from_row(&row(name, begin, end), FileKind::Photo, "*").unwrap()
    }

    #[test]
    fn in_range_row_beats_nearer_out_of_range_row() {
        let target = parse_time("2024-05-01 10:00:10").unwrap();
        let markers = vec![
            marker("a.jpg", "2024-05-01 10:00:05", Some("2024-05-01 10:00:06")),
            marker("b.jpg", "2024-05-01 10:00:09", Some("2024-05-01 10:00:12")),
            marker("c.jpg", "2024-05-01 10:05:00", Some("2024-05-01 10:05:02")),
        ];
        assert_eq!(pick_closest(&markers, &target).unwrap().file_name, "b.jpg");

        let markers = vec![
            marker("near.jpg", "2024-05-01 10:00:11", None),
            marker("range.jpg", "2024-05-01 09:59:00", Some("2024-05-01 10:01:00")),
        ];
        assert_eq!(
            pick_closest(&markers, &target).unwrap().file_name,
            "range.jpg"
        );
    }

    #[test]
    fn equal_distance_keeps_first_row() {
        let target = parse_time("2024-05-01 10:00:10").unwrap();
        let markers = vec![
            marker("before.jpg", "2024-05-01 10:00:08", None),
            marker("after.jpg", "2024-05-01 10:00:12", None),
        ];
        assert_eq!(
            pick_closest(&markers, &target).unwrap().file_name,
            "before.jpg"
        );
        assert!(pick_closest(&[], &target).is_none());
    }

    #[test]
    fn rows_without_begin_time_are_dropped() {
        let bad = FileRow {
            file_name: Some("x.jpg".to_string()),
            begin_time: Some("yesterday".to_string()),
            end_time: None,
            file_length: None,
        };
        assert!(EventMarker::from_row(&bad, FileKind::Photo, "*").is_none());
    }

    #[test]
    fn event_code_comes_from_file_name() {
        let m = marker(
            "/idea1/2024-05-01/001/10.00.05-10.00.12[M][@1f][0].jpg",
            "2024-05-01 10:00:05",
            None,
        );
        assert_eq!(m.event, "M");
        let m = marker("/idea0/plain.h264", "2024-05-01 10:00:05", None);
        assert_eq!(m.event, "*");
    }

    #[test]
    fn markers_serialize_with_times() {
        let m = marker("a.jpg", "2024-05-01 10:00:05", None);
        let value = serde_json::to_value(&m).unwrap();
        assert_eq!(value["file_name"], "a.jpg");
        assert_eq!(value["begin"], "2024-05-01T10:00:05");
        assert!(value["end"].is_null());
    }

    #[test]
    fn file_kind_names() {
        assert_eq!(FileKind::Photo.query_type(), "jpg");
        assert_eq!(FileKind::Clip.query_type(), "h264");
        assert_eq!(FileKind::Clip.to_string(), "clip");
        assert_eq!("photo".parse::<FileKind>().unwrap(), FileKind::Photo);
    }
}
