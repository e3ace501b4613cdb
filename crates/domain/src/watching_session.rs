//! 观影会话（Watching Session）实体
//!
//! 记录"谁正在观看哪个内容"，存放在带 TTL 的共享存储中。
//! connection_count 表示同一观看者的并发连接数（多标签页/多设备）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 观看者展示信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watcher {
    pub id: Uuid,
    pub name: String,
    pub profile_image_path: Option<String>,
}

/// 被观看内容的展示信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedContent {
    pub id: Uuid,
    pub title: String,
}

/// 观影会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchingSession {
    pub watcher: Watcher,
    pub content: WatchedContent,
    pub created_at: DateTime<Utc>,
    pub connection_count: u32,
}

impl WatchingSession {
    /// 首次加入时创建，连接数从 1 开始
    pub fn new(watcher: Watcher, content: WatchedContent) -> Self {
        Self {
            watcher,
            content,
            created_at: Utc::now(),
            connection_count: 1,
        }
    }

    /// 同一观看者的额外连接（第二个标签页等）
    pub fn increment_connections(&mut self) {
        self.connection_count += 1;
    }

    /// 连接断开，计数下限为 0
    pub fn decrement_connections(&mut self) {
        self.connection_count = self.connection_count.saturating_sub(1);
    }

    /// 所有连接均已断开，会话应当被删除
    pub fn has_no_connections(&self) -> bool {
        self.connection_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> WatchingSession {
        WatchingSession::new(
            Watcher {
                id: Uuid::new_v4(),
                name: "watcher".to_string(),
                profile_image_path: None,
            },
            WatchedContent {
                id: Uuid::new_v4(),
                title: "content".to_string(),
            },
        )
    }

    #[test]
    fn starts_with_one_connection() {
        let s = session();
        assert_eq!(s.connection_count, 1);
        assert!(!s.has_no_connections());
    }

    #[test]
    fn connection_count_never_goes_negative() {
        let mut s = session();
        s.decrement_connections();
        assert!(s.has_no_connections());

        // 重复断开保持在 0
        s.decrement_connections();
        assert_eq!(s.connection_count, 0);
    }

    #[test]
    fn join_leave_sequence_clamps_at_zero() {
        let mut s = session();
        s.increment_connections();
        s.increment_connections();
        assert_eq!(s.connection_count, 3);

        s.decrement_connections();
        s.decrement_connections();
        s.decrement_connections();
        s.decrement_connections();
        assert_eq!(s.connection_count, 0);
    }
}
