//! 远端分页查询接口
//!
//! [`PageFetcher`] 是数据访问层唯一的外部依赖，测试中可替换为内存实现。
//! [`HttpPageFetcher`] 对接托管后端的表查询 HTTP 接口：
//! `POST {base_url}/{table}/page`，请求体为 [`PageQuery`]，响应为 `{data?, error?}` 信封。

use crate::models::{PageData, PageQuery, PageResponse};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

const USER_AGENT: &str = concat!("StationOps-Data/", env!("CARGO_PKG_VERSION"));

/// 远端分页查询能力
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// 查询指定表的一页数据
    ///
    /// # 返回
    /// - `Ok(PageData)`: 查询成功
    /// - `Err`: 远端返回错误或请求失败，错误信息会原样传递给调用方
    async fn fetch_page(&self, table: &str, query: &PageQuery) -> Result<PageData>;
}

/// 基于 HTTP 的远端查询实现
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpPageFetcher {
    /// 使用默认客户端（30 秒超时）创建
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .context("构建 HTTP 客户端失败")?;
        Self::with_client(base_url, client)
    }

    /// 使用外部构建的客户端（代理、TLS 等由调用方配置）
    pub fn with_client(base_url: &str, client: Client) -> Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("无效的接口地址: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("接口地址不能作为基础 URL: {base_url}");
        }
        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    /// 附带 Bearer 认证
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// 拼接表查询地址，表标识会做 URL 编码
    pub fn page_url(&self, table: &str) -> String {
        format!(
            "{}/{}/page",
            self.base_url.as_str().trim_end_matches('/'),
            urlencoding::encode(table)
        )
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, table: &str, query: &PageQuery) -> Result<PageData> {
        let url = self.page_url(table);
        let mut request = self.client.post(&url).json(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("请求 {table} 失败"))?;
        let status = response.status();
        let body = response.text().await.context("读取响应体失败")?;

        // 非 2xx 时优先使用信封中的错误信息
        let envelope = serde_json::from_str::<PageResponse>(&body);
        if !status.is_success() {
            if let Ok(PageResponse {
                error: Some(error), ..
            }) = envelope
            {
                anyhow::bail!(error);
            }
            anyhow::bail!("远端返回 HTTP {status}");
        }

        envelope
            .with_context(|| format!("解析 {table} 响应失败"))?
            .into_result()
    }
}
