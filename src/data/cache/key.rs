//! 缓存键生成
//!
//! 缓存键由 (表标识, 查询参数, 字段投影, 可视窗口) 唯一确定。
//! 参数先转成规范化 JSON（对象键按字典序排列），再与其余部分组成描述符，
//! 最后取 SHA-256 摘要作为紧凑的不透明键。
//!
//! 结构相同的输入必须得到相同的键，与 JSON 对象字面量的键顺序无关。

use crate::data::error::Result;
use crate::models::{PageQuery, Viewport};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// 缓存键
///
/// 同时用于缓存查找和在途请求去重。保留表标识以支持按表失效。
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct CacheKey {
    table: String,
    digest: String,
}

impl CacheKey {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, &self.digest[..16])
    }
}

/// 参与摘要计算的描述符
#[derive(Serialize)]
struct KeyDescriptor<'a> {
    table: &'a str,
    params: String,
    fields: String,
    viewport: String,
}

/// 生成缓存键
///
/// - `fields` 为 `None` 时记为 `all`，否则按给定顺序以逗号拼接
/// - `viewport` 为 `None` 时记为 `full`，否则为 `start-end`
pub fn derive_key(
    table: &str,
    params: &PageQuery,
    fields: Option<&[String]>,
    viewport: Option<&Viewport>,
) -> Result<CacheKey> {
    let params_value = serde_json::to_value(params)?;
    let mut canonical = String::new();
    write_canonical(&params_value, &mut canonical)?;

    let descriptor = KeyDescriptor {
        table,
        params: canonical,
        fields: fields
            .map(|f| f.join(","))
            .unwrap_or_else(|| "all".to_string()),
        viewport: viewport
            .map(|v| format!("{}-{}", v.start, v.end))
            .unwrap_or_else(|| "full".to_string()),
    };

    let encoded = serde_json::to_vec(&descriptor)?;
    let digest = Sha256::digest(&encoded);

    Ok(CacheKey {
        table: table.to_string(),
        digest: format!("{digest:x}"),
    })
}

/// 以对象键有序的方式序列化 JSON 值
///
/// 不依赖 `serde_json::Map` 的内部顺序（启用 `preserve_order` 后会保留插入顺序）。
fn write_canonical(value: &serde_json::Value, out: &mut String) -> Result<()> {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(item, out)?;
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}
