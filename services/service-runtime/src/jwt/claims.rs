//! JWT claims as seen by authorization rules

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Claims of a verified token.
///
/// Registered claims are typed; everything else lands in `custom`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer
    #[serde(default)]
    pub iss: String,
    /// Subject
    #[serde(default)]
    pub sub: String,
    /// Audience; a single string is accepted and normalised to a list
    #[serde(default, deserialize_with = "one_or_many")]
    pub aud: Vec<String>,
    /// Expiry, seconds since the epoch
    pub exp: i64,
    /// Issued at
    #[serde(default)]
    pub iat: i64,
    /// Not before
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Token id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Space separated scopes (OAuth 2.0 `scope`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Scopes as a list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    /// Any other claim
    #[serde(flatten)]
    pub custom: HashMap<String, Value>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

impl Claims {
    /// Whether the token grants `scope`, from either `scope` or `scopes`
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        let in_string = self
            .scope
            .as_deref()
            .is_some_and(|s| s.split_whitespace().any(|candidate| candidate == scope));
        let in_list = self
            .scopes
            .as_ref()
            .is_some_and(|list| list.iter().any(|candidate| candidate == scope));
        in_string || in_list
    }

    /// Whether `audience` is among the token's audiences
    #[must_use]
    pub fn has_audience(&self, audience: &str) -> bool {
        self.aud.iter().any(|candidate| candidate == audience)
    }

    /// Look up a claim by name, registered or custom
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            "iss" if !self.iss.is_empty() => Some(Value::from(self.iss.clone())),
            "sub" if !self.sub.is_empty() => Some(Value::from(self.sub.clone())),
            "aud" if !self.aud.is_empty() => Some(Value::from(self.aud.clone())),
            "exp" => Some(Value::from(self.exp)),
            "iat" => Some(Value::from(self.iat)),
            "nbf" => self.nbf.map(Value::from),
            "jti" => self.jti.clone().map(Value::from),
            "scope" => self.scope.clone().map(Value::from),
            "scopes" => self.scopes.clone().map(Value::from),
            "iss" | "sub" | "aud" => None,
            other => self.custom.get(other).cloned(),
        }
    }

    /// Whether the claim `name` is present and not null
    #[must_use]
    pub fn has_claim(&self, name: &str) -> bool {
        self.get(name).is_some_and(|value| !value.is_null())
    }

    /// Whether the claim `name` equals `expected`.
    ///
    /// Strings compare verbatim, other scalars by their JSON rendering, and
    /// arrays match when any element does.
    #[must_use]
    pub fn claim_equals(&self, name: &str, expected: &str) -> bool {
        self.get(name).is_some_and(|value| value_matches(&value, expected))
    }
}

fn value_matches(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Array(items) => items.iter().any(|item| value_matches(item, expected)),
        Value::Null | Value::Object(_) => false,
        other => other.to_string() == expected,
    }
}
