//! 查询整形：把调用选项折算进发往远端的分页参数
//!
//! - 可视窗口 `{start, end}` 折算为页码，页大小沿用调用方给定值
//!   （未给定时取窗口宽度）
//! - 字段投影原样透传为 `Fields`
//! - 高优先级且未指定排序时，按标识字段倒序
//!
//! 优先级只在这里生效，不会改变连接池的排队顺序。

use crate::models::{FetchOptions, PageQuery, Priority};

/// 生成实际发往远端的查询参数
pub fn shape_query(params: &PageQuery, options: &FetchOptions, default_order_field: &str) -> PageQuery {
    let mut query = params.clone();

    if let Some(viewport) = options.viewport {
        let page_size = if query.page_size > 0 {
            query.page_size
        } else {
            viewport.width().max(1)
        };
        query.page_size = page_size;
        query.page_no = (viewport.start / page_size).saturating_add(1);
    }

    if let Some(fields) = &options.fields {
        query.fields = Some(fields.clone());
    }

    if options.priority == Priority::High && query.order_by_field.is_none() {
        query.order_by_field = Some(default_order_field.to_string());
        query.is_asc = Some(false);
    }

    query
}
