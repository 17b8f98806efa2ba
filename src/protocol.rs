//! Wire protocol (§6.3): the line-delimited JSON request/response shapes the
//! daemon exchanges with clients over a WebSocket connection. Deliberately
//! the thinnest possible layer over `query_engine`/`registry` — this module
//! only knows how to parse a request and shape a response, never how to
//! execute one (that's `daemon::dispatch`).

use serde::{Deserialize, Serialize};

use crate::models::{ExpandedNode, RankedHit};
use crate::query_engine::GraphPayload;
use crate::registry::IndexInfo;

/// A request frame from the client (§6.3). `query` is the only variant that
/// carries a correlation `id`; `list_indexes`/`switch_index` are request-reply
/// over an otherwise in-order connection so no id is required to match them.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    Query {
        id: String,
        #[serde(default)]
        index: Option<String>,
        query: String,
        #[serde(default)]
        top_k: Option<usize>,
        #[serde(default)]
        expand: Option<bool>,
        #[serde(default)]
        expand_depth: Option<u32>,
        #[serde(default)]
        min_score: Option<f32>,
    },
    ListIndexes {},
    SwitchIndex {
        index: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub name: String,
    pub loaded: bool,
    pub busy: bool,
}

/// A response or server-push frame (§6.3). `status` is unsolicited; every
/// other variant is a reply to exactly one `ClientRequest`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerResponse {
    QueryResult {
        id: String,
        index: String,
        direct: Vec<RankedHit>,
        related: Vec<ExpandedNode>,
        graph: GraphPayload,
    },
    IndexList {
        indexes: Vec<IndexInfo>,
    },
    IndexSwitched {
        index: String,
    },
    Status {
        uptime_seconds: u64,
        indexes: Vec<IndexStatus>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        code: &'static str,
        message: String,
    },
}

impl ServerResponse {
    pub fn error(id: Option<String>, code: &'static str, message: impl Into<String>) -> Self {
        ServerResponse::Error { id, code, message: message.into() }
    }

    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","code":"QUERY_FAILED","message":"failed to serialize response: {e}"}}"#)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_request() {
        let text = r#"{"type":"query","id":"1","query":"hello","top_k":5}"#;
        let req: ClientRequest = serde_json::from_str(text).unwrap();
        match req {
            ClientRequest::Query { id, query, top_k, .. } => {
                assert_eq!(id, "1");
                assert_eq!(query, "hello");
                assert_eq!(top_k, Some(5));
            }
            _ => panic!("expected Query variant"),
        }
    }

    #[test]
    fn parses_switch_index_request() {
        let text = r#"{"type":"switch_index","index":"docs"}"#;
        let req: ClientRequest = serde_json::from_str(text).unwrap();
        assert!(matches!(req, ClientRequest::SwitchIndex { index } if index == "docs"));
    }

    #[test]
    fn malformed_frame_fails_to_parse() {
        let text = r#"{"type":"not_a_real_type"}"#;
        let result: Result<ClientRequest, _> = serde_json::from_str(text);
        assert!(result.is_err());
    }

    #[test]
    fn error_response_omits_id_when_absent() {
        let resp = ServerResponse::error(None, "INVALID_REQUEST", "query must not be empty");
        let json = resp.to_json_line();
        assert!(!json.contains("\"id\""));
        assert!(json.contains("INVALID_REQUEST"));
    }
}
