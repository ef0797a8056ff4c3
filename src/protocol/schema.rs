use serde_json::Value;

/// string 类型上唯一保留的 format
const KEPT_STRING_FORMAT: &str = "date-time";

/// 清理工具的 input_schema，使其能被上游接受
///
/// - 删除所有层级的 `$schema` 和 `additionalProperties`
/// - `type == "string"` 的节点删除 `format`，`date-time` 除外
///
/// 其余字段原样保留，多次调用结果相同。
pub fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let is_string = map.get("type").and_then(Value::as_str) == Some("string");
            let keep_format =
                map.get("format").and_then(Value::as_str) == Some(KEPT_STRING_FORMAT);

            let cleaned = map
                .iter()
                .filter(|(key, _)| match key.as_str() {
                    "$schema" | "additionalProperties" => false,
                    "format" => !is_string || keep_format,
                    _ => true,
                })
                .map(|(key, value)| (key.clone(), sanitize_schema(value)))
                .collect();
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}
