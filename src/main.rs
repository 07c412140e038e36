use spelltrain_hangman::*;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化全局配置
    Config::init().map_err(|e| Error::Config(e.to_string()))?;
    let config = Config::get();

    // 初始化日志
    tracing_subscriber::registry()
        .with(EnvFilter::new(config.log_filter()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("配置加载成功: {:?}", config);

    let server = HttpServer::new(config).await?;

    let http_addr = config
        .http_addr()
        .map_err(|e| Error::Config(e.to_string()))?
        .to_string();
    tracing::info!("HTTP服务器启动在 {}", http_addr);

    server.start(&http_addr).await?;

    Ok(())
}
