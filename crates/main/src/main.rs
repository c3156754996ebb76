//! 主应用程序入口
//!
//! 组装各层依赖并启动 Axum 服务。在线状态和令牌黑名单在配置了
//! REDIS_URL 时用 Redis，否则退回进程内实现。

use std::net::SocketAddr;
use std::sync::Arc;

use application::{
    ChatService, ChatServiceDependencies, ConnectionRegistry, MemoryFileStorage,
    MemoryPresenceStore, MemoryTokenBlacklist, MessageRepository, PresenceStore, RateLimiter,
    RoomBroadcaster, RoomDirectory, RoomHistory, RoomRepository, SystemClock, TokenBlacklist,
    UserService, UserServiceDependencies, WordListFilter,
};
use config::AppConfig;
use domain::{Room, RoomId, RoomKind};
use infrastructure::{
    MemoryMessageRepository, MemoryRoomRepository, MemoryUserRepository, RedisPresenceStore,
    RedisTokenBlacklist,
};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

/// 启动时播种的公共房间
const SEED_ROOMS: &[(&str, &str, &str)] = &[
    ("general", "General", "General discussion for everyone"),
    ("tech", "Tech Talk", "Technology and programming"),
    ("social", "Social", "Casual conversation and hanging out"),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env_with_defaults();

    // 仓储（内存实现；持久化数据库部署时替换这里）
    let user_repository = Arc::new(MemoryUserRepository::new());
    let room_repository = Arc::new(MemoryRoomRepository::new());
    let message_repository = Arc::new(MemoryMessageRepository::new());

    // 在线状态与令牌黑名单
    let (presence, blacklist): (Arc<dyn PresenceStore>, Arc<dyn TokenBlacklist>) =
        match &config.redis.url {
            Some(url) => {
                tracing::info!("使用 Redis 在线状态与黑名单");
                (
                    Arc::new(RedisPresenceStore::connect(url, config.chat.typing_ttl_secs).await?),
                    Arc::new(RedisTokenBlacklist::connect(url).await?),
                )
            }
            None => {
                tracing::info!("未配置 REDIS_URL，使用进程内在线状态与黑名单");
                (
                    Arc::new(MemoryPresenceStore::new(config.chat.typing_ttl_secs)),
                    Arc::new(MemoryTokenBlacklist::new()),
                )
            }
        };

    let directory = Arc::new(RoomDirectory::new());
    let broadcaster = Arc::new(RoomBroadcaster::new(config.chat.broadcast_capacity));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));
    let clock = Arc::new(SystemClock);

    // 播种公共房间
    let now = chrono::Utc::now();
    for (id, name, description) in SEED_ROOMS {
        let room_id = RoomId::parse(*id)?;
        let room = Room::new(room_id.clone(), *name, *description, RoomKind::Public, 100, now)?;
        room_repository.upsert(room.clone()).await?;
        directory.insert_room(room);

        let existing = message_repository.count(&room_id).await?;
        broadcaster.register_room(room_id, existing as u64 + 1);
    }
    tracing::info!(rooms = SEED_ROOMS.len(), "公共房间已播种");

    let user_service = Arc::new(UserService::new(UserServiceDependencies {
        users: user_repository,
        rate_limiter: Arc::clone(&rate_limiter),
        clock: clock.clone(),
    }));

    let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
        registry: Arc::new(ConnectionRegistry::new()),
        directory,
        presence,
        rate_limiter: Arc::clone(&rate_limiter),
        broadcaster,
        history: Arc::new(RoomHistory::new(config.chat.history_capacity)),
        messages: message_repository,
        rooms: room_repository,
        filter: Arc::new(WordListFilter::with_default_words()),
        clock,
        chat: config.chat.clone(),
    }));

    // 保留策略：按各房间的保留天数定期清理持久化消息
    let pruner = Arc::clone(&chat_service);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            ticker.tick().await;
            if let Err(err) = pruner.prune_expired_messages().await {
                tracing::warn!(error = %err, "retention prune failed");
            }
        }
    });

    let state = AppState {
        user_service,
        chat_service,
        jwt_service: Arc::new(JwtService::new(config.jwt.clone())),
        blacklist,
        storage: Arc::new(MemoryFileStorage::new()),
        rate_limiter,
        chat: config.chat.clone(),
    };

    let app = router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("聊天服务器启动在 http://{}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("收到关闭信号，开始优雅退出");
}
