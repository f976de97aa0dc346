//! 分页查询数据模型
//!
//! 远端表查询接口的请求/响应结构，以及调用方传入的查询选项。
//! 字段命名与托管后端的表查询 API 保持一致（`PageNo`、`PageSize`、`List` 等）。

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 单条记录，结构由具体表决定
pub type Record = serde_json::Value;

/// 查询过滤条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub name: String,
    pub op: String,
    pub value: serde_json::Value,
}

impl QueryFilter {
    pub fn new(name: impl Into<String>, op: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
            value,
        }
    }
}

/// 分页查询参数
///
/// 序列化结果即远端接口的请求体：
/// `{PageNo, PageSize, OrderByField?, IsAsc?, Filters?, Fields?}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PageQuery {
    pub page_no: u32,
    pub page_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_asc: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<QueryFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

impl PageQuery {
    /// 创建第 `page_no` 页（从 1 开始）、每页 `page_size` 条的查询
    pub fn new(page_no: u32, page_size: u32) -> Self {
        Self {
            page_no,
            page_size,
            ..Self::default()
        }
    }

    /// 指定排序字段和方向
    pub fn order_by(mut self, field: impl Into<String>, is_asc: bool) -> Self {
        self.order_by_field = Some(field.into());
        self.is_asc = Some(is_asc);
        self
    }

    /// 追加一个过滤条件
    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// 分页查询结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageData {
    #[serde(rename = "List", default)]
    pub list: Vec<Record>,
    #[serde(rename = "VirtualCount", default)]
    pub virtual_count: u64,
}

/// 远端接口的响应信封 `{data?, error?}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PageData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PageResponse {
    /// 拆开信封：`error` 优先于 `data`
    pub fn into_result(self) -> anyhow::Result<PageData> {
        if let Some(error) = self.error {
            anyhow::bail!(error);
        }
        self.data
            .ok_or_else(|| anyhow::anyhow!("响应中缺少 data 字段"))
    }
}

/// 虚拟列表的可视窗口 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewport {
    pub start: u32,
    pub end: u32,
}

impl Viewport {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn width(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }
}

/// 请求优先级
///
/// 只影响查询整形（默认排序），不影响连接池的排队顺序。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// `fetch_data` 调用选项
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    /// 是否读写缓存
    pub use_cache: bool,
    /// 字段投影，`None` 表示全部字段
    pub fields: Option<Vec<String>>,
    /// 虚拟列表窗口
    pub viewport: Option<Viewport>,
    pub priority: Priority,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            fields: None,
            viewport: None,
            priority: Priority::Normal,
        }
    }
}

impl FetchOptions {
    /// 跳过缓存（不读也不写）
    pub fn uncached() -> Self {
        Self {
            use_cache: false,
            ..Self::default()
        }
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// `fetch_data` 返回值
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub data: Arc<PageData>,
    pub from_cache: bool,
}
