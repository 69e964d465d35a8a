//! Crossref REST API payloads.
//!
//! `GET /works/{doi}` answers with an envelope whose `message` is a CSL-shaped
//! work record; the record itself is parsed by the shared CSL item model.

use serde::Deserialize;

use super::csl::CslItem;
use super::record::Metadata;
use super::source::PayloadError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CrossrefResponse {
    status: String,
    message_type: Option<String>,
    message: CrossrefMessage,
}

/// The envelope's `message`: a work record, or a list of errors on failure.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CrossrefMessage {
    Work(Box<CslItem>),
    Other(serde_json::Value),
}

pub(crate) fn parse(body: &str) -> Result<Metadata, PayloadError> {
    let response: CrossrefResponse = serde_json::from_str(body)?;
    if response.status != "ok" {
        return Err(PayloadError::structure(format!(
            "Crossref status '{}'",
            response.status
        )));
    }
    if let Some(kind) = response.message_type.as_deref()
        && kind != "work"
    {
        return Err(PayloadError::structure(format!(
            "expected a work record, got '{kind}'"
        )));
    }
    match response.message {
        CrossrefMessage::Work(item) => Ok(item.into_metadata()),
        CrossrefMessage::Other(_) => Err(PayloadError::structure(
            "Crossref message is not an object",
        )),
    }
}
