//! TeraBox 分享链接 → HLS 播放列表（m3u8）解析服务。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/重试/短码解析等基础设施
//! - `credential`：分层 Cookie 池、远程拉取、后台校验与会话 Cookie
//! - `extractor`：分享页解析、文件转存、清单拉取与整体流程编排
//! - `web`：HTTP 接口（axum）
//! - `cookie_push`：命令行推送本地 Cookie 文件到运行中的服务

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::Parser;

mod base_system;
mod cookie_push;
mod credential;
mod extractor;
mod web;

use base_system::config::load_or_create;
use base_system::context::Config;
use base_system::logging::{LogOptions, LogSystem};
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "terabox-stream")]
#[command(about = "TeraBox share link to m3u8 extraction service")]
struct Cli {
    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 数据目录路径（用于存放 config.yml 和 logs，方便 Docker 挂载）
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 指定配置文件路径（默认 <data_dir>/config.yml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 显示版本信息后退出
    #[arg(long, default_value_t = false)]
    version: bool,

    /// 推送 Netscape 格式 Cookie 文件到运行中的服务后退出
    #[arg(long, value_name = "FILE")]
    push_cookie: Option<PathBuf>,

    /// `--push-cookie` 的目标地址
    #[arg(long, default_value = "http://localhost:8080/update_cookie")]
    push_url: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("terabox-stream v{}", VERSION);
        return Ok(());
    }

    if let Some(file) = cli.push_cookie.as_deref() {
        let reply = cookie_push::push_cookie_file(file, &cli.push_url)?;
        println!("{reply}");
        return Ok(());
    }

    let data_dir = cli.data_dir.as_deref();
    let _log = init_logging(cli.debug, data_dir)?;

    let config = load_or_create::<Config>(cli.config.as_deref(), data_dir)
        .map_err(|e| anyhow!(e.to_string()))?;
    info!(target: "startup", "当前版本: v{}", VERSION);

    web::run(config)
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        ..LogOptions::default()
    };
    LogSystem::init_with_base(opts, base_dir).map_err(|e| anyhow!(e))
}
