//! 限流器
//!
//! 按 (主体, 动作) 维护固定窗口计数器，各动作有独立的额度和窗口。
//! 先检查后计数：被拒绝的调用不消耗任何点数。同一计数器的并发
//! consume 在键级互斥锁下串行，窗口内放行次数不可能超过配置上限。

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use config::RateLimitConfig;
use dashmap::DashMap;
use domain::{DomainError, DomainResult};

/// 受限动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    /// API请求：100次/60秒
    Api,
    /// 认证尝试：5次/15分钟
    Auth,
    /// 消息发送：30次/60秒
    Message,
    /// 加入房间：10次/60秒
    RoomJoin,
}

#[derive(Debug)]
struct WindowState {
    window_start: DateTime<Utc>,
    used: u32,
}

/// 固定窗口限流器
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<(String, RateLimitAction), Mutex<WindowState>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    fn quota(&self, action: RateLimitAction) -> config::Quota {
        match action {
            RateLimitAction::Api => self.config.api,
            RateLimitAction::Auth => self.config.auth,
            RateLimitAction::Message => self.config.message,
            RateLimitAction::RoomJoin => self.config.room_join,
        }
    }

    /// 消费一个点数。放行返回 Ok，拒绝返回 RateLimited 并附带重试等待秒数。
    pub fn consume(
        &self,
        subject: impl Into<String>,
        action: RateLimitAction,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        let quota = self.quota(action);
        let window = Duration::seconds(quota.window_secs as i64);
        let key = (subject.into(), action);

        let entry = self.buckets.entry(key).or_insert_with(|| {
            Mutex::new(WindowState {
                window_start: now,
                used: 0,
            })
        });
        let mut state = entry.lock().expect("bucket lock poisoned");

        if now - state.window_start >= window {
            state.window_start = now;
            state.used = 0;
        }

        if state.used >= quota.points {
            let window_end = state.window_start + window;
            let retry_after = (window_end - now).num_seconds().max(1) as u64;
            return Err(DomainError::rate_limited(retry_after));
        }

        state.used += 1;
        Ok(())
    }

    /// 清理一个完整窗口都没有活动的计数器，防止无界增长。
    pub fn cleanup_expired(&self, now: DateTime<Utc>) {
        self.buckets.retain(|(_, action), state| {
            let window = Duration::seconds(self.quota(*action).window_secs as i64);
            let state = state.lock().expect("bucket lock poisoned");
            now - state.window_start < window * 2
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::Quota;

    fn limiter(points: u32, window_secs: u64) -> RateLimiter {
        let quota = Quota { points, window_secs };
        RateLimiter::new(RateLimitConfig {
            api: quota,
            auth: quota,
            message: quota,
            room_join: quota,
        })
    }

    #[test]
    fn ceiling_is_enforced() {
        let limiter = limiter(3, 10);
        let now = Utc::now();

        for _ in 0..3 {
            assert!(limiter.consume("alice", RateLimitAction::Message, now).is_ok());
        }
        let denied = limiter.consume("alice", RateLimitAction::Message, now);
        assert!(matches!(denied, Err(DomainError::RateLimited { .. })));
    }

    #[test]
    fn denied_call_consumes_nothing() {
        let limiter = limiter(2, 10);
        let now = Utc::now();

        limiter.consume("alice", RateLimitAction::Message, now).unwrap();
        limiter.consume("alice", RateLimitAction::Message, now).unwrap();

        // 多次被拒不影响窗口重置后的额度
        for _ in 0..5 {
            assert!(limiter.consume("alice", RateLimitAction::Message, now).is_err());
        }

        let next_window = now + Duration::seconds(10);
        assert!(limiter
            .consume("alice", RateLimitAction::Message, next_window)
            .is_ok());
        assert!(limiter
            .consume("alice", RateLimitAction::Message, next_window)
            .is_ok());
        assert!(limiter
            .consume("alice", RateLimitAction::Message, next_window)
            .is_err());
    }

    #[test]
    fn window_resets_after_elapse() {
        // 场景：消息限流3次/10秒，窗口内第4次被拒，窗口过后恢复
        let limiter = limiter(3, 10);
        let now = Utc::now();

        for _ in 0..3 {
            limiter.consume("alice", RateLimitAction::Message, now).unwrap();
        }
        assert!(limiter.consume("alice", RateLimitAction::Message, now).is_err());

        let later = now + Duration::seconds(10);
        assert!(limiter.consume("alice", RateLimitAction::Message, later).is_ok());
    }

    #[test]
    fn retry_after_hint_counts_down() {
        let limiter = limiter(1, 60);
        let now = Utc::now();

        limiter.consume("alice", RateLimitAction::Auth, now).unwrap();

        let at_half = now + Duration::seconds(30);
        match limiter.consume("alice", RateLimitAction::Auth, at_half) {
            Err(DomainError::RateLimited { retry_after_secs }) => {
                assert_eq!(retry_after_secs, 30);
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn subjects_and_actions_are_independent() {
        let limiter = limiter(1, 60);
        let now = Utc::now();

        limiter.consume("alice", RateLimitAction::Message, now).unwrap();
        // 其他主体不受影响
        assert!(limiter.consume("bob", RateLimitAction::Message, now).is_ok());
        // 同一主体的其他动作不受影响
        assert!(limiter.consume("alice", RateLimitAction::RoomJoin, now).is_ok());
    }

    #[test]
    fn cleanup_drops_idle_buckets() {
        let limiter = limiter(5, 10);
        let now = Utc::now();

        limiter.consume("alice", RateLimitAction::Api, now).unwrap();
        assert_eq!(limiter.buckets.len(), 1);

        limiter.cleanup_expired(now + Duration::seconds(21));
        assert!(limiter.buckets.is_empty());
    }
}
