//! Remote Task Requester: derives the extraction request from a located file
//!
//! Pure URL construction. Nothing is sent here; the poller's first GET of the
//! returned URL is what creates the job on the server.
use url::Url;

use crate::config::TaskParams;
use crate::data_model::{format_server_time, AlarmReference, FileEntry, VideoWindow};
use crate::error::{EvidenceError, EvidenceResult};

/// Pick the file the task is built from: the first one the server listed.
pub fn select_file<'a>(
    alarm: &AlarmReference,
    files: &'a [FileEntry],
) -> EvidenceResult<&'a FileEntry> {
    files.first().ok_or_else(|| EvidenceError::NoVideoFound {
        device_id: alarm.device_id.clone(),
    })
}

/// Rewrite the server's base task URL with the alarm window and fixed selectors.
///
/// Existing query parameters keep their position; repeated keys collapse to
/// their first value and blank values are dropped. Values are written back
/// verbatim so the `%20` inside the time parameters reaches the server as is.
pub fn build_task_url(
    base_task_url: &str,
    window: &VideoWindow,
    params: &TaskParams,
) -> EvidenceResult<String> {
    let mut url = Url::parse(base_task_url).map_err(|e| {
        EvidenceError::InvalidInput(format!("task descriptor {base_task_url:?}: {e}"))
    })?;

    let mut query: Vec<(String, String)> = Vec::new();
    for (key, value) in url.query_pairs() {
        if value.is_empty() || query.iter().any(|(k, _)| *k == key) {
            continue;
        }
        query.push((key.into_owned(), value.into_owned()));
    }

    let overrides = [
        ("fbtm", format_server_time(&window.start)),
        ("fetm", format_server_time(&window.end)),
        ("len", params.max_length.to_string()),
        ("chn", params.channel.to_string()),
        ("dtp", params.data_type.to_string()),
    ];
    for (key, value) in overrides {
        match query.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => query.push((key.to_string(), value)),
        }
    }

    let joined = query
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    url.set_query(Some(&joined));

    Ok(url.to_string())
}
