//! Row iteration over query results.
//!
//! Query responses are newline-delimited JSON: one record per line, blank
//! lines ignored. Rows are handed out strictly in document order.

use serde_json::Value;

use crate::error::{ErrorKind, RequestError};
use crate::request::Payload;

/// Call `handler` once per row of `payload` and return the number of rows.
///
/// Raw text is split into lines and each non-empty line parsed as JSON. A JSON
/// array yields its elements and any other JSON value is a single row. A line
/// that fails to parse stops the iteration; rows before it have already been
/// delivered.
pub fn for_each_row(
    payload: &Payload,
    mut handler: impl FnMut(Value),
) -> Result<usize, RequestError> {
    match payload {
        Payload::Raw(text) => {
            let mut count = 0;
            for (index, line) in text.split('\n').enumerate() {
                let line = line.trim_end_matches('\r');
                if line.is_empty() {
                    continue;
                }
                let row = serde_json::from_str(line).map_err(|e| {
                    RequestError::with_detail(
                        ErrorKind::Json,
                        Some(200),
                        text,
                        format!("line {}: {e}", index + 1),
                    )
                })?;
                handler(row);
                count += 1;
            }
            Ok(count)
        }
        Payload::Json(Value::Array(rows)) => {
            rows.iter().cloned().for_each(&mut handler);
            Ok(rows.len())
        }
        Payload::Json(row) => {
            handler(row.clone());
            Ok(1)
        }
    }
}
