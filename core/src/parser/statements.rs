//! Control statements: `IF .. THEN .. ELSE .. END`, `FOR EACH .. IN .. DO ..
//! END`, `ON ERROR .. END` and the single line `CALL API`.
//!
//! These are recorded in the document and the compiled form. Nothing
//! evaluates them; a host reads them from the form.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::params::parse_params;
use crate::types::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
}

impl Operator {
    /// Two character operators first, so `a <= b` is not read as `a < = b`
    const SEARCH_ORDER: [Operator; 6] = [
        Operator::Ne,
        Operator::Le,
        Operator::Ge,
        Operator::Eq,
        Operator::Lt,
        Operator::Gt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `IF` condition. A comparison when an operator is found, otherwise the raw
/// text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Comparison {
        left: String,
        operator: Operator,
        right: String,
    },
    Raw {
        raw: String,
    },
}

impl Condition {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        Operator::SEARCH_ORDER
            .into_iter()
            .find_map(|operator| {
                let (left, right) = text.split_once(operator.as_str())?;
                Some(Condition::Comparison {
                    left: left.trim().to_string(),
                    operator,
                    right: right.trim().to_string(),
                })
            })
            .unwrap_or_else(|| Condition::Raw {
                raw: text.to_string(),
            })
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Comparison {
                left,
                operator,
                right,
            } => write!(f, "{} {} {}", left, operator, right),
            Condition::Raw { raw } => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Block {
    If {
        condition: Condition,
        #[serde(rename = "then")]
        then_body: String,
        #[serde(rename = "else", default, skip_serializing_if = "String::is_empty")]
        else_body: String,
    },
    ForEach {
        variable: String,
        collection: String,
        body: String,
    },
    OnError {
        body: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStatement {
    #[serde(flatten)]
    pub block: Block,
    pub span: Span,
}

/// What `CALL API` calls: `service.endpoint` or a reference kind (`@tool:llm`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ApiTarget {
    Service { service: String, endpoint: String },
    Reference { kind: String },
}

impl fmt::Display for ApiTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiTarget::Service { service, endpoint } => write!(f, "{}.{}", service, endpoint),
            ApiTarget::Reference { kind } => write!(f, "@{}", kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCall {
    pub target: ApiTarget,
    /// Text after `WITH`, as written
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub payload: String,
    /// Key/value view of the payload
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl ApiCall {
    /// Parse the text after `CALL API`
    pub fn parse(args: &str) -> Result<Self, String> {
        let args = args.trim();
        let (target, rest) = args
            .split_once(char::is_whitespace)
            .map_or((args, ""), |(target, rest)| (target, rest.trim()));

        let target = if let Some(kind) = target.strip_prefix('@') {
            if kind.is_empty() {
                return Err("CALL API needs a reference kind after '@'".to_string());
            }
            ApiTarget::Reference {
                kind: kind.to_string(),
            }
        } else {
            match target.split_once('.') {
                Some((service, endpoint)) if !service.is_empty() && !endpoint.is_empty() => {
                    ApiTarget::Service {
                        service: service.to_string(),
                        endpoint: endpoint.to_string(),
                    }
                }
                _ => {
                    return Err(format!(
                        "CALL API target '{}' is not 'service.endpoint' or '@kind'",
                        target
                    ))
                }
            }
        };

        let payload = if rest.is_empty() {
            ""
        } else {
            match split_keyword(rest, "WITH") {
                Some(("", payload)) => payload,
                _ => return Err(format!("Expected 'WITH <payload>', got '{}'", rest)),
            }
        };
        let inner = payload
            .strip_prefix('{')
            .and_then(|p| p.strip_suffix('}'))
            .unwrap_or(payload);

        Ok(ApiCall {
            target,
            payload: payload.to_string(),
            params: parse_params(inner),
        })
    }
}

impl fmt::Display for ApiCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CALL API {}", self.target)?;
        if !self.payload.is_empty() {
            write!(f, " WITH {}", self.payload)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCallStatement {
    #[serde(flatten)]
    pub call: ApiCall,
    pub span: Span,
}

/// Split `s` around the first whitespace delimited occurrence of `keyword`.
/// Both halves are trimmed.
pub(crate) fn split_keyword<'a>(s: &'a str, keyword: &str) -> Option<(&'a str, &'a str)> {
    s.match_indices(keyword).find_map(|(i, _)| {
        let before = &s[..i];
        let after = &s[i + keyword.len()..];
        let open = before.chars().next_back().map_or(true, char::is_whitespace);
        let close = after.chars().next().map_or(true, char::is_whitespace);
        (open && close).then(|| (before.trim(), after.trim()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_operators() {
        let cases = [
            ("x = 1", "x", Operator::Eq, "1"),
            ("status != done", "status", Operator::Ne, "done"),
            ("count <= 10", "count", Operator::Le, "10"),
            ("count>=10", "count", Operator::Ge, "10"),
            ("a < b", "a", Operator::Lt, "b"),
            ("a > b", "a", Operator::Gt, "b"),
        ];
        for (text, left, operator, right) in cases {
            assert_eq!(
                Condition::parse(text),
                Condition::Comparison {
                    left: left.to_string(),
                    operator,
                    right: right.to_string(),
                },
                "condition {:?}",
                text
            );
        }
    }

    #[test]
    fn test_condition_without_operator_is_raw() {
        assert_eq!(
            Condition::parse(" user is admin "),
            Condition::Raw {
                raw: "user is admin".to_string()
            }
        );
    }

    #[test]
    fn test_api_call_service() {
        let call = ApiCall::parse("weather.forecast WITH {city: \"Oslo\", days: 3}").unwrap();
        assert_eq!(
            call.target,
            ApiTarget::Service {
                service: "weather".to_string(),
                endpoint: "forecast".to_string()
            }
        );
        assert_eq!(call.payload, "{city: \"Oslo\", days: 3}");
        assert_eq!(call.params.get("city").map(String::as_str), Some("Oslo"));
        assert_eq!(call.to_string(), "CALL API weather.forecast WITH {city: \"Oslo\", days: 3}");
    }

    #[test]
    fn test_api_call_reference_target() {
        let call = ApiCall::parse("@tool:llm WITH {prompt: hi}").unwrap();
        assert_eq!(
            call.target,
            ApiTarget::Reference {
                kind: "tool:llm".to_string()
            }
        );
        assert_eq!(call.params.get("prompt").map(String::as_str), Some("hi"));
    }

    #[test]
    fn test_api_call_errors() {
        assert!(ApiCall::parse("").is_err());
        assert!(ApiCall::parse("nodot WITH {}").is_err());
        assert!(ApiCall::parse("@ WITH {}").is_err());
        assert!(ApiCall::parse("a.b USING {}").is_err());
        assert!(ApiCall::parse("a.b").is_ok());
    }

    #[test]
    fn test_block_json_shape() {
        let block = Block::If {
            condition: Condition::parse("n > 3"),
            then_body: "big".to_string(),
            else_body: String::new(),
        };
        assert_eq!(
            serde_json::to_value(&block).unwrap(),
            serde_json::json!({
                "type": "if",
                "condition": { "left": "n", "operator": ">", "right": "3" },
                "then": "big"
            })
        );
    }

    #[test]
    fn test_split_keyword_needs_whole_word() {
        assert_eq!(split_keyword("x THENCE y THEN z", "THEN"), Some(("x THENCE y", "z")));
        assert_eq!(split_keyword("cond THEN", "THEN"), Some(("cond", "")));
        assert_eq!(split_keyword("nothing", "THEN"), None);
    }
}
