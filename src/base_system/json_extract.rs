//! 宽松的 JSON 字段读取：接口返回的数字字段有时是字符串，有时是数字。

use serde_json::Value;

pub type JsonMap = serde_json::Map<String, Value>;

/// 返回第一个非空的字段值，数字会被转成十进制字符串。
pub fn pick_string(map: &JsonMap, keys: &[&str]) -> Option<String> {
    for key in keys {
        let Some(val) = map.get(*key) else {
            continue;
        };
        if let Some(s) = val.as_str() {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        } else if let Some(n) = val.as_i64() {
            return Some(n.to_string());
        } else if let Some(n) = val.as_u64() {
            return Some(n.to_string());
        }
    }
    None
}

pub fn pick_i64(map: &JsonMap, keys: &[&str]) -> Option<i64> {
    for key in keys {
        match map.get(*key) {
            Some(Value::Number(n)) => {
                if let Some(v) = n.as_i64() {
                    return Some(v);
                }
            }
            Some(Value::String(s)) => {
                if let Ok(v) = s.trim().parse::<i64>() {
                    return Some(v);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn pick_u64(map: &JsonMap, keys: &[&str]) -> Option<u64> {
    pick_i64(map, keys).and_then(|v| u64::try_from(v).ok())
}

/// `1` / `"1"` / `true` 都视为真。
pub fn pick_flag(map: &JsonMap, key: &str) -> bool {
    match map.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        Some(Value::String(s)) => s.trim() == "1" || s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}
