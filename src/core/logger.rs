use crate::models::config::{LogConfig, LogFormat, LogLevel, LogOutput};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// 全局日志级别 reload handle
static LOG_LEVEL_HANDLE: OnceLock<Handle<EnvFilter, Registry>> = OnceLock::new();

/// 文件输出的后台写线程 guard，drop 后会丢失尚未落盘的日志
static FILE_WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_FILE_PREFIX: &str = "stationops-data";

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// 初始化日志系统
///
/// 支持基于配置的日志输出，包括：
/// - 日志级别（trace/debug/info/warn/error）
/// - 输出格式（JSON/纯文本）
/// - 输出目标（控制台/文件/both）
/// - 文件目录（用于文件输出，按天滚动）
///
/// 日志级别可以通过 [`update_log_level`] 热更新，其余配置需要重启进程。
///
/// # 示例
/// ```no_run
/// use stationops_data::core::init_logger;
/// use stationops_data::models::LogConfig;
///
/// init_logger(&LogConfig::default()).expect("初始化日志系统失败");
/// ```
pub fn init_logger(config: &LogConfig) -> anyhow::Result<()> {
    if LOG_LEVEL_HANDLE.get().is_some() {
        anyhow::bail!("日志系统已初始化，不能重复初始化");
    }

    let filter = create_env_filter(&config.level);
    let (filter_layer, reload_handle) = reload::Layer::new(filter);

    let console_layer = match config.output {
        LogOutput::Console | LogOutput::Both => Some(create_console_layer(config.format)),
        LogOutput::File => None,
    };
    let (file_layer, file_guard) = match config.output {
        LogOutput::File | LogOutput::Both => {
            let (layer, guard) = create_file_layer(config.format, config.file_path.as_deref())?;
            (Some(layer), Some(guard))
        }
        LogOutput::Console => (None, None),
    };

    // 过滤层必须最先挂到 Registry 上，reload handle 的类型依赖于此
    Registry::default()
        .with(filter_layer)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("注册全局日志订阅者失败: {e}"))?;

    // 并发初始化时后到者在 try_init 处就会失败，这里不会冲突
    let _ = LOG_LEVEL_HANDLE.set(reload_handle);
    // 注册成功后才保存写线程 guard；注册失败时 guard 随之 drop，可以重试
    if let Some(guard) = file_guard {
        let _ = FILE_WRITER_GUARD.set(guard);
    }

    tracing::info!(
        level = config.level.as_str(),
        format = ?config.format,
        output = ?config.output,
        file_path = ?config.file_path,
        "日志系统初始化完成"
    );

    Ok(())
}

/// 创建环境过滤器
fn create_env_filter(level: &LogLevel) -> EnvFilter {
    // 优先从环境变量读取，格式：RUST_LOG=stationops_data=trace,reqwest=warn
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// 默认过滤规则：本 crate 使用指定级别，第三方库使用 WARN
fn default_directives(level: &LogLevel) -> String {
    format!(
        "stationops_data={},hyper=warn,reqwest=warn,h2=warn,tokio=warn",
        level.as_str()
    )
}

/// 创建控制台输出层
fn create_console_layer<S>(format: LogFormat) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    match format {
        LogFormat::Text => fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(cfg!(debug_assertions))
            .with_thread_ids(false)
            .with_ansi(true)
            .with_span_events(if cfg!(debug_assertions) {
                FmtSpan::CLOSE
            } else {
                FmtSpan::NONE
            })
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stdout)
            .with_target(cfg!(debug_assertions))
            .with_thread_ids(false)
            .boxed(),
    }
}

/// 创建文件输出层（按天滚动），同时返回后台写线程的 guard
fn create_file_layer<S>(
    format: LogFormat,
    file_path: Option<&str>,
) -> anyhow::Result<(BoxedLayer<S>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let log_dir = get_log_dir(file_path)?;
    let file_appender = rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = non_blocking(file_appender);

    let layer = match format {
        LogFormat::Text => fmt::layer()
            .with_writer(writer)
            .with_target(cfg!(debug_assertions))
            .with_thread_ids(false)
            .with_ansi(false)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .boxed(),
    };
    Ok((layer, guard))
}

/// 获取日志目录，不存在时自动创建
fn get_log_dir(file_path: Option<&str>) -> anyhow::Result<PathBuf> {
    let dir = match file_path {
        Some(path) => PathBuf::from(path),
        None => dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("无法获取用户主目录"))?
            .join(".stationops")
            .join("logs"),
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// 动态更新日志级别（热重载）
///
/// 仅限调整日志级别，格式和输出目标的变更仍需要重启。
pub fn update_log_level(new_level: LogLevel) -> anyhow::Result<()> {
    let handle = LOG_LEVEL_HANDLE
        .get()
        .ok_or_else(|| anyhow::anyhow!("日志系统未初始化"))?;

    handle
        .reload(create_env_filter(&new_level))
        .map_err(|e| anyhow::anyhow!("重载日志级别失败: {}", e))?;

    tracing::info!(new_level = new_level.as_str(), "日志级别已动态更新");
    Ok(())
}
