//! Fluent forward decoding for the HTTP input (port 9880).
//!
//! Accepts JSON or msgpack (sniffed: a msgpack body never starts with the
//! ASCII bytes a JSON body does). Entry shapes handled:
//!
//!   ["tag", time, {record}]
//!   ["tag", [[time, {record}], ...]]        (forward batch)
//!   [["tag", time, {record}], ...]
//!   {record}                                (bare record, tag-less)

use serde_json::Value;

use crate::http::{draft_from_object, parse_timestamp};
use crate::normalize::EventDraft;
use crate::{Error, Result};

pub fn decode(payload: &[u8]) -> Result<Vec<EventDraft>> {
    let value = parse_body(payload)?;
    let mut drafts = Vec::new();

    match &value {
        Value::Object(obj) => drafts.push(draft_from_object(obj)),
        Value::Array(items) => {
            if let Some(entries) = as_entry(&value) {
                drafts.extend(entries);
            } else {
                for item in items {
                    match as_entry(item) {
                        Some(entries) => drafts.extend(entries),
                        None => {
                            return Err(Error::malformed(
                                "bad_entry",
                                "expected [tag, time, record]",
                            ))
                        }
                    }
                }
            }
        }
        _ => return Err(Error::malformed("not_object", "body must be an object or array")),
    }

    if drafts.is_empty() {
        return Err(Error::malformed("empty", "no entries in body"));
    }
    Ok(drafts)
}

fn parse_body(payload: &[u8]) -> Result<Value> {
    let first = payload
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .copied()
        .unwrap_or(0);
    if first == b'[' || first == b'{' {
        Ok(serde_json::from_slice(payload)?)
    } else {
        Ok(rmp_serde::from_slice(payload)?)
    }
}

/// Interpret one value as a forward entry; `None` when the shape is foreign.
fn as_entry(value: &Value) -> Option<Vec<EventDraft>> {
    let arr = value.as_array()?;
    let tag = arr.first()?.as_str()?;

    match arr.get(1)? {
        // ["tag", [[time, record], ...]]
        Value::Array(batch) => {
            let mut drafts = Vec::with_capacity(batch.len());
            for pair in batch {
                let pair = pair.as_array()?;
                let record = pair.get(1)?.as_object()?;
                let mut draft = draft_from_object(record);
                apply_tag(&mut draft, tag);
                if draft.timestamp.is_none() {
                    draft.timestamp = parse_timestamp(pair.first()?);
                }
                drafts.push(draft);
            }
            Some(drafts)
        }
        // ["tag", time, record]
        time => {
            let record = arr.get(2)?.as_object()?;
            let mut draft = draft_from_object(record);
            apply_tag(&mut draft, tag);
            if draft.timestamp.is_none() {
                draft.timestamp = parse_timestamp(time);
            }
            Some(vec![draft])
        }
    }
}

fn apply_tag(draft: &mut EventDraft, tag: &str) {
    if draft.category.is_none() && !tag.is_empty() {
        draft.category = Some(tag.to_string());
    }
}
