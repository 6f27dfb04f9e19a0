use std::fmt;

use chrono::NaiveDate;
use serde_json::{Map, Number, Value};

use crate::ConfigError;

/// 绑定参数，按位置（从 1 开始）绑定到预编译语句
#[derive(Debug, Clone, PartialEq)]
pub enum BindParam {
    Int(i32),
    Long(i64),
    Bool(bool),
    Double(f64),
    Float(f32),
    Date(NaiveDate),
    Str(String),
    Null,
}

impl BindParam {
    pub fn kind(&self) -> &'static str {
        match self {
            BindParam::Int(_) => "int",
            BindParam::Long(_) => "long",
            BindParam::Bool(_) => "boolean",
            BindParam::Double(_) => "double",
            BindParam::Float(_) => "float",
            BindParam::Date(_) => "date",
            BindParam::Str(_) => "string",
            BindParam::Null => "null",
        }
    }
}

impl fmt::Display for BindParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindParam::Int(v) => write!(f, "{}", v),
            BindParam::Long(v) => write!(f, "{}", v),
            BindParam::Bool(v) => write!(f, "{}", v),
            BindParam::Double(v) => write!(f, "{}", v),
            BindParam::Float(v) => write!(f, "{}", v),
            BindParam::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            BindParam::Str(v) => f.write_str(v),
            BindParam::Null => f.write_str("null"),
        }
    }
}

/// 解析 `params` 配置（JSON 数组），空字符串得到空列表
pub fn parse_params(text: &str) -> Result<Vec<BindParam>, ConfigError> {
    if text.is_empty() {
        return Ok(vec![]);
    }

    let value: Value = serde_json::from_str(text).map_err(|e| ConfigError::Params(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(ConfigError::Params(format!("需要 JSON 数组，收到: {}", text)));
    };

    items.into_iter().map(from_json).collect()
}

fn from_json(value: Value) -> Result<BindParam, ConfigError> {
    let param = match value {
        Value::Null => BindParam::Null,
        Value::Bool(b) => BindParam::Bool(b),
        Value::Number(n) => from_number(&n),
        Value::String(s) => BindParam::Str(s),
        Value::Object(map) if map.contains_key("type") => from_typed(map)?,
        other => BindParam::Str(other.to_string()),
    };
    Ok(param)
}

fn from_number(n: &Number) -> BindParam {
    if let Some(v) = n.as_i64() {
        match i32::try_from(v) {
            Ok(v) => BindParam::Int(v),
            Err(_) => BindParam::Long(v),
        }
    } else if n.is_u64() {
        // 超出 long 范围的整数按字符串绑定
        BindParam::Str(n.to_string())
    } else {
        BindParam::Double(n.as_f64().unwrap_or_default())
    }
}

/// 形如 `{"type": "date", "value": "2024-01-31"}` 的显式类型参数
fn from_typed(map: Map<String, Value>) -> Result<BindParam, ConfigError> {
    let kind = map
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ConfigError::Params("type 字段必须是字符串".into()))?
        .to_ascii_lowercase();
    let value = map.get("value").cloned().unwrap_or(Value::Null);
    let invalid = || ConfigError::Params(format!("{} 类型参数取值非法: {}", kind, value));

    let param = match kind.as_str() {
        "null" => BindParam::Null,
        _ if value.is_null() => BindParam::Null,
        "int" | "integer" => value
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(BindParam::Int)
            .ok_or_else(invalid)?,
        "long" => value.as_i64().map(BindParam::Long).ok_or_else(invalid)?,
        "boolean" | "bool" => value.as_bool().map(BindParam::Bool).ok_or_else(invalid)?,
        "double" => value.as_f64().map(BindParam::Double).ok_or_else(invalid)?,
        "float" => value.as_f64().map(|v| BindParam::Float(v as f32)).ok_or_else(invalid)?,
        "date" => value
            .as_str()
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .map(BindParam::Date)
            .ok_or_else(invalid)?,
        "string" => match &value {
            Value::String(s) => BindParam::Str(s.clone()),
            other => BindParam::Str(other.to_string()),
        },
        _ => return Err(ConfigError::Params(format!("不支持的参数类型: {}", kind))),
    };
    Ok(param)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_gives_no_params() {
        assert_eq!(parse_params("").unwrap(), vec![]);
        assert_eq!(parse_params("[]").unwrap(), vec![]);
    }

    #[test]
    fn scalar_kinds_follow_json_types() {
        let params = parse_params(r#"[1, "abc", null]"#).unwrap();
        assert_eq!(
            params,
            vec![BindParam::Int(1), BindParam::Str("abc".into()), BindParam::Null]
        );

        let params = parse_params("[true, 2.5, 3000000000, -7]").unwrap();
        assert_eq!(
            params,
            vec![
                BindParam::Bool(true),
                BindParam::Double(2.5),
                BindParam::Long(3_000_000_000),
                BindParam::Int(-7),
            ]
        );
    }

    #[test]
    fn huge_integers_are_bound_as_text() {
        let params = parse_params("[18446744073709551615]").unwrap();
        assert_eq!(params, vec![BindParam::Str("18446744073709551615".into())]);
    }

    #[test]
    fn typed_objects_reach_every_kind() {
        let params = parse_params(
            r#"[{"type": "date", "value": "2024-01-31"},
                {"type": "float", "value": 1.5},
                {"type": "long", "value": 5},
                {"type": "string", "value": 42},
                {"type": "int", "value": null}]"#,
        )
        .unwrap();
        assert_eq!(
            params,
            vec![
                BindParam::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()),
                BindParam::Float(1.5),
                BindParam::Long(5),
                BindParam::Str("42".into()),
                BindParam::Null,
            ]
        );
    }

    #[test]
    fn untyped_objects_and_arrays_fall_back_to_text() {
        let params = parse_params(r#"[{"a": 1}, [1, 2]]"#).unwrap();
        assert_eq!(
            params,
            vec![BindParam::Str(r#"{"a":1}"#.into()), BindParam::Str("[1,2]".into())]
        );
    }

    #[test]
    fn invalid_input_is_rejected() {
        assert!(matches!(parse_params("{\"a\": 1}"), Err(ConfigError::Params(_))));
        assert!(matches!(parse_params("[1,"), Err(ConfigError::Params(_))));
        assert!(matches!(
            parse_params(r#"[{"type": "date", "value": "31/01/2024"}]"#),
            Err(ConfigError::Params(_))
        ));
        assert!(matches!(
            parse_params(r#"[{"type": "blob", "value": "x"}]"#),
            Err(ConfigError::Params(_))
        ));
    }

    #[test]
    fn display_renders_plain_values() {
        assert_eq!(BindParam::Str("abc".into()).to_string(), "abc");
        assert_eq!(BindParam::Null.to_string(), "null");
        assert_eq!(
            BindParam::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()).to_string(),
            "2024-03-01"
        );
        assert_eq!(BindParam::Long(9).kind(), "long");
    }
}
