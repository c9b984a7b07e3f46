//! The JSON-RPC envelope used by the JSON endpoints.

use std::convert::TryFrom;

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use serde_json::Value;
use warp::{self, Reply};

/// A JSON-RPC 2.0 request. Only `params` is required.
#[derive(Debug, Deserialize)]
pub struct RpcRequest<P> {
    #[serde(default)]
    pub id: Option<Value>,
    pub params: P,
}

#[derive(Debug, Serialize)]
struct RpcResponse<T> {
    jsonrpc: &'static str,
    id: Option<Value>,
    result: T,
}

/// Wraps a result in a JSON-RPC 2.0 response.
pub fn reply<T: Serialize>(id: Option<Value>, result: T) -> impl Reply {
    warp::reply::json(&RpcResponse {
        jsonrpc: "2.0",
        id,
        result,
    })
}

/// The result of a JSON endpoint: a boolean, or a sentinel string on failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    Done(bool),

    /// The token didn't match.
    Unauthorized,

    /// The request referred to something that doesn't exist, or was missing a field.
    Error,
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error> {
        match *self {
            Outcome::Done(b) => serializer.serialize_bool(b),
            Outcome::Unauthorized => serializer.serialize_str("unauthorized"),
            Outcome::Error => serializer.serialize_str("error"),
        }
    }
}

/// The fields identifying the recipient of a mailing. All are optional at this level; a missing
/// field fails the token check.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RecipientParams {
    #[serde(default, deserialize_with = "lenient_id")]
    pub mailing_id: Option<i32>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub res_id: Option<i32>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl RecipientParams {
    pub fn email(&self) -> Option<&str> {
        self.email.as_ref().map(|s| s.as_str())
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_ref().map(|s| s.as_str())
    }
}

/// Parameters to `/mail/mailing/unsubscribe`.
#[derive(Clone, Debug, Deserialize)]
pub struct UnsubscribeParams {
    #[serde(flatten)]
    pub recipient: RecipientParams,
    #[serde(default)]
    pub opt_in_ids: Vec<i32>,
    #[serde(default)]
    pub opt_out_ids: Vec<i32>,
}

/// Parameters to `/mailing/feedback`.
#[derive(Clone, Debug, Deserialize)]
pub struct FeedbackParams {
    #[serde(flatten)]
    pub recipient: RecipientParams,
    #[serde(default)]
    pub feedback: String,
}

/// Accepts an ID as either a number or a numeric string. Anything else, including numbers that
/// don't fit an ID, is treated as missing.
fn lenient_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> ::std::result::Result<Option<i32>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json;

    #[test]
    fn outcomes_serialize_as_bools_or_sentinels() {
        let json = serde_json::to_value(&vec![
            Outcome::Done(true),
            Outcome::Done(false),
            Outcome::Unauthorized,
            Outcome::Error,
        ]).unwrap();
        assert_eq!(json, json!([true, false, "unauthorized", "error"]));
    }

    #[test]
    fn params_tolerate_missing_and_stringly_fields() {
        let req: RpcRequest<UnsubscribeParams> = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "params": {"mailing_id": "12", "res_id": 4, "opt_out_ids": [1, 2]},
        })).unwrap();
        assert_eq!(req.id, Some(json!(3)));
        assert_eq!(req.params.recipient.mailing_id, Some(12));
        assert_eq!(req.params.recipient.res_id, Some(4));
        assert_eq!(req.params.recipient.email, None);
        assert!(req.params.opt_in_ids.is_empty());
        assert_eq!(req.params.opt_out_ids, vec![1, 2]);

        let req: RpcRequest<RecipientParams> = serde_json::from_value(json!({
            "params": {"mailing_id": 4294967297u64, "res_id": "99999999999"},
        })).unwrap();
        assert_eq!(req.id, None);
        assert_eq!(req.params.mailing_id, None);
        assert_eq!(req.params.res_id, None);
    }
}
