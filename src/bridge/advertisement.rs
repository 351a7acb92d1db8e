//! 会话广告与心跳策略
//!
//! 同一时刻最多只有一条会话记录。连续心跳失败达到 `directory.max_heartbeat_failures`、
//! 记录丢失、或距上次成功心跳超过 `session_expiry_secs` 时，先撤回旧记录再以新名字发布。

use directory::{DirectoryError, SessionDescriptor, SessionDirectory, SessionHandle};
use sessioncast_common::PeerId;
use sessioncast_common::config::DirectoryConfig;
use sessioncast_common::metrics::{HEARTBEAT_FAILURES, SESSION_PUBLISHES};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 一次心跳的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Healthy,
    /// 心跳失败但尚未达到重新发布的条件
    Degraded { failures: u32 },
    /// 已用新名字重新发布
    Republished { previous: String, current: String },
}

pub struct Advertisement {
    directory: Arc<dyn SessionDirectory>,
    descriptor: SessionDescriptor,
    handle: SessionHandle,
    consecutive_failures: u32,
    max_failures: u32,
    expiry: Duration,
}

impl Advertisement {
    /// 首次发布
    pub async fn publish(
        directory: Arc<dyn SessionDirectory>,
        descriptor: SessionDescriptor,
        config: &DirectoryConfig,
    ) -> Result<Self, DirectoryError> {
        let handle = directory.publish(&descriptor).await?;
        SESSION_PUBLISHES.with_label_values(&["initial"]).inc();
        info!("Session {} published", handle.name);

        Ok(Self {
            directory,
            descriptor,
            handle,
            consecutive_failures: 0,
            max_failures: config.max_heartbeat_failures,
            expiry: config.session_expiry(),
        })
    }

    pub fn session_name(&self) -> &str {
        &self.handle.name
    }

    pub fn descriptor(&self) -> &SessionDescriptor {
        &self.descriptor
    }

    pub fn add_member(&mut self, peer: PeerId) -> bool {
        self.descriptor.add_member(peer)
    }

    pub fn remove_member(&mut self, peer: PeerId) -> bool {
        self.descriptor.remove_member(peer)
    }

    /// 发送一次心跳并执行重新发布策略
    ///
    /// 只有致命错误（认证失败、请求被拒）才返回 `Err`。
    pub async fn heartbeat(&mut self) -> Result<HeartbeatOutcome, DirectoryError> {
        let error = match self
            .directory
            .heartbeat(&mut self.handle, &self.descriptor)
            .await
        {
            Ok(()) => {
                if self.consecutive_failures > 0 {
                    info!(
                        "Heartbeat recovered after {} failures",
                        self.consecutive_failures
                    );
                }
                self.consecutive_failures = 0;
                return Ok(HeartbeatOutcome::Healthy);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => e,
        };

        HEARTBEAT_FAILURES.inc();
        self.consecutive_failures += 1;
        let lost = matches!(error, DirectoryError::SessionLost { .. });
        let expired = self.handle.since_last_heartbeat() >= self.expiry;
        warn!(
            "Heartbeat for {} failed ({}/{}): {}",
            self.handle.name, self.consecutive_failures, self.max_failures, error
        );

        if lost || expired || self.consecutive_failures >= self.max_failures {
            return self.republish().await;
        }
        Ok(HeartbeatOutcome::Degraded {
            failures: self.consecutive_failures,
        })
    }

    /// 撤回旧记录（尽力而为）后以新名字发布
    async fn republish(&mut self) -> Result<HeartbeatOutcome, DirectoryError> {
        let previous = self.handle.name.clone();
        info!("Republishing session {}", previous);

        if let Err(e) = self.directory.withdraw(&self.handle).await {
            if e.is_fatal() {
                return Err(e);
            }
            debug!("Withdrawing stale session {} failed: {}", previous, e);
        }

        match self.directory.publish(&self.descriptor).await {
            Ok(handle) => {
                SESSION_PUBLISHES.with_label_values(&["republish"]).inc();
                info!("Session republished as {} (was {})", handle.name, previous);
                self.handle = handle;
                self.consecutive_failures = 0;
                Ok(HeartbeatOutcome::Republished {
                    previous,
                    current: self.handle.name.clone(),
                })
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                // 保留失败计数，下一次心跳会再次尝试
                warn!("Republish failed: {}", e);
                Ok(HeartbeatOutcome::Degraded {
                    failures: self.consecutive_failures,
                })
            }
        }
    }

    /// 撤回当前记录
    pub async fn withdraw(&self) -> Result<(), DirectoryError> {
        self.directory.withdraw(&self.handle).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sessioncast_common::NetworkId;
    use sessioncast_common::config::SessionConfig;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// 按脚本返回心跳结果的目录
    #[derive(Default)]
    struct ScriptedDirectory {
        heartbeats: Mutex<VecDeque<Result<(), DirectoryError>>>,
        published: Mutex<Vec<String>>,
        withdrawn: Mutex<Vec<String>>,
    }

    impl ScriptedDirectory {
        fn script(&self, results: Vec<Result<(), DirectoryError>>) {
            self.heartbeats.lock().unwrap().extend(results);
        }
    }

    #[async_trait]
    impl SessionDirectory for ScriptedDirectory {
        async fn publish(
            &self,
            _descriptor: &SessionDescriptor,
        ) -> Result<SessionHandle, DirectoryError> {
            let mut published = self.published.lock().unwrap();
            let name = format!("SESSION-{}", published.len());
            published.push(name.clone());
            Ok(SessionHandle::new(name))
        }

        async fn heartbeat(
            &self,
            _handle: &mut SessionHandle,
            _descriptor: &SessionDescriptor,
        ) -> Result<(), DirectoryError> {
            self.heartbeats
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }

        async fn withdraw(&self, handle: &SessionHandle) -> Result<(), DirectoryError> {
            self.withdrawn.lock().unwrap().push(handle.name.clone());
            Ok(())
        }
    }

    async fn advertisement(directory: Arc<ScriptedDirectory>) -> Advertisement {
        let descriptor = SessionDescriptor::from_config(&SessionConfig::default(), NetworkId::new(1));
        Advertisement::publish(directory, descriptor, &DirectoryConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_three_failures_trigger_republish() {
        let directory = Arc::new(ScriptedDirectory::default());
        directory.script(vec![
            Err(DirectoryError::unavailable("503")),
            Err(DirectoryError::unavailable("503")),
            Err(DirectoryError::unavailable("503")),
        ]);
        let mut ad = advertisement(directory.clone()).await;

        assert_eq!(
            ad.heartbeat().await.unwrap(),
            HeartbeatOutcome::Degraded { failures: 1 }
        );
        assert_eq!(
            ad.heartbeat().await.unwrap(),
            HeartbeatOutcome::Degraded { failures: 2 }
        );
        assert_eq!(
            ad.heartbeat().await.unwrap(),
            HeartbeatOutcome::Republished {
                previous: "SESSION-0".to_string(),
                current: "SESSION-1".to_string(),
            }
        );
        assert_eq!(*directory.withdrawn.lock().unwrap(), vec!["SESSION-0"]);

        // 重新发布后恢复心跳
        assert_eq!(ad.heartbeat().await.unwrap(), HeartbeatOutcome::Healthy);
        assert_eq!(ad.session_name(), "SESSION-1");
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let directory = Arc::new(ScriptedDirectory::default());
        directory.script(vec![
            Err(DirectoryError::unavailable("503")),
            Err(DirectoryError::unavailable("503")),
            Ok(()),
            Err(DirectoryError::unavailable("503")),
        ]);
        let mut ad = advertisement(directory.clone()).await;

        ad.heartbeat().await.unwrap();
        ad.heartbeat().await.unwrap();
        assert_eq!(ad.heartbeat().await.unwrap(), HeartbeatOutcome::Healthy);
        assert_eq!(
            ad.heartbeat().await.unwrap(),
            HeartbeatOutcome::Degraded { failures: 1 }
        );
        assert_eq!(directory.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_session_lost_republishes_immediately() {
        let directory = Arc::new(ScriptedDirectory::default());
        directory.script(vec![Err(DirectoryError::SessionLost {
            session: "SESSION-0".to_string(),
        })]);
        let mut ad = advertisement(directory).await;

        assert!(matches!(
            ad.heartbeat().await.unwrap(),
            HeartbeatOutcome::Republished { .. }
        ));
    }

    #[tokio::test]
    async fn test_single_failure_after_expiry_republishes() {
        let directory = Arc::new(ScriptedDirectory::default());
        directory.script(vec![Err(DirectoryError::unavailable("503"))]);
        let mut ad = advertisement(directory.clone()).await;

        // 上次成功心跳已超过 session_expiry_secs (默认 120s)
        ad.handle.last_heartbeat = chrono::Utc::now() - chrono::Duration::seconds(121);

        assert_eq!(
            ad.heartbeat().await.unwrap(),
            HeartbeatOutcome::Republished {
                previous: "SESSION-0".to_string(),
                current: "SESSION-1".to_string(),
            }
        );
        assert_eq!(*directory.withdrawn.lock().unwrap(), vec!["SESSION-0"]);
    }

    #[tokio::test]
    async fn test_single_failure_within_expiry_only_degrades() {
        let directory = Arc::new(ScriptedDirectory::default());
        directory.script(vec![Err(DirectoryError::unavailable("503"))]);
        let mut ad = advertisement(directory.clone()).await;

        ad.handle.last_heartbeat = chrono::Utc::now() - chrono::Duration::seconds(90);

        assert_eq!(
            ad.heartbeat().await.unwrap(),
            HeartbeatOutcome::Degraded { failures: 1 }
        );
        assert_eq!(directory.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fatal_error_is_returned() {
        let directory = Arc::new(ScriptedDirectory::default());
        directory.script(vec![Err(DirectoryError::Rejected {
            status: 400,
            body: "bad template".to_string(),
        })]);
        let mut ad = advertisement(directory).await;

        assert!(ad.heartbeat().await.is_err());
    }

    #[tokio::test]
    async fn test_member_list_follows_peers() {
        let directory = Arc::new(ScriptedDirectory::default());
        let mut ad = advertisement(directory).await;

        assert!(ad.add_member(PeerId::new(5)));
        assert!(!ad.add_member(PeerId::new(5)));
        assert_eq!(ad.descriptor().member_count(), 2);
        assert!(ad.remove_member(PeerId::new(5)));
        assert_eq!(ad.descriptor().member_count(), 1);
    }
}
