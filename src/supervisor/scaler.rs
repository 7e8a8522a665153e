use crate::config::ManagerConfig;
use crate::storage::models::run::RunType;
use crate::storage::repository::RunStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// 期望行程數：clamp(ceil(queued / capacity), min, max)
///
/// 積壓為零時維持 min（永不為 0），確保新任務到達即有 worker 可認領。
pub fn desired_processes(queued: i64, capacity_per_process: u32, min: u32, max: u32) -> u32 {
    let capacity = capacity_per_process.max(1) as i64;
    let by_backlog = ((queued.max(0) + capacity - 1) / capacity) as u32;
    by_backlog.max(min).min(max)
}

/// 受管的 worker 行程
struct WorkerProcess {
    child: Child,
    spawned_at: Instant,
}

/// 自動擴縮監督器
///
/// 每輪：查詢回測家族任務的積壓計數、修剪已退出的子行程，然後
/// 把存活行程數調整到期望值。縮容時先終止最早啟動的行程。
pub struct Supervisor {
    store: Arc<dyn RunStore>,
    config: ManagerConfig,
    workers: Vec<WorkerProcess>,
}

impl Supervisor {
    pub fn new(store: Arc<dyn RunStore>, config: ManagerConfig) -> Self {
        Self {
            store,
            config,
            workers: Vec::new(),
        }
    }

    /// 監督主迴圈；收到停止信號後優雅關閉全部子行程
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) -> Result<()> {
        info!(
            "Manager started (min={}, max={}, capacity={})",
            self.config.min_processes, self.config.max_processes, self.config.capacity_per_process
        );

        loop {
            if *stop.borrow() {
                break;
            }

            if let Err(err) = self.tick().await {
                error!("監督迴圈本輪失敗: {:#}", err);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Manager stopping, terminating workers...");
        self.shutdown_all().await;
        Ok(())
    }

    /// 單輪觀測與調整
    async fn tick(&mut self) -> Result<()> {
        let counts = self
            .store
            .count_by_status(RunType::backtest_family())
            .await
            .context("讀取積壓計數失敗")?;

        self.prune_exited();
        let current = self.workers.len() as u32;
        let desired = desired_processes(
            counts.queued,
            self.config.capacity_per_process,
            self.config.min_processes,
            self.config.max_processes,
        );

        if desired > current {
            for _ in 0..(desired - current) {
                self.spawn_worker()?;
            }
            info!(
                "[manager] queued={} running={} procs={} (scaled up)",
                counts.queued,
                counts.running,
                self.workers.len()
            );
        } else if desired < current {
            for _ in 0..(current - desired) {
                self.stop_oldest().await;
            }
            info!(
                "[manager] queued={} running={} procs={} (scaled down)",
                counts.queued,
                counts.running,
                self.workers.len()
            );
        } else {
            info!(
                "[manager] queued={} running={} procs={}",
                counts.queued,
                counts.running,
                self.workers.len()
            );
        }

        Ok(())
    }

    /// 修剪已自行退出的子行程
    fn prune_exited(&mut self) {
        self.workers.retain_mut(|w| match w.child.try_wait() {
            Ok(Some(status)) => {
                warn!("worker 行程已退出 (status={status})");
                false
            }
            Ok(None) => true,
            Err(err) => {
                warn!("無法檢查 worker 行程狀態: {err}");
                false
            }
        });
    }

    /// 啟動一個新的 worker 行程，帶上每行程的並行與輪詢設定
    fn spawn_worker(&mut self) -> Result<()> {
        let child = Command::new(&self.config.worker_binary)
            .env(
                "ORCHESTRATOR__WORKER__CONCURRENCY",
                self.config.worker_concurrency.to_string(),
            )
            .env(
                "ORCHESTRATOR__WORKER__POLL_INTERVAL_MS",
                self.config.worker_poll_ms.to_string(),
            )
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("無法啟動 worker 行程: {}", self.config.worker_binary))?;

        info!("worker 行程已啟動 (pid={:?})", child.id());
        self.workers.push(WorkerProcess {
            child,
            spawned_at: Instant::now(),
        });
        Ok(())
    }

    /// 終止最早啟動的 worker 行程（縮容順序）
    async fn stop_oldest(&mut self) {
        let oldest = self
            .workers
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| w.spawned_at)
            .map(|(i, _)| i);
        if let Some(idx) = oldest {
            let worker = self.workers.remove(idx);
            self.terminate(worker).await;
        }
    }

    /// 優雅終止：SIGTERM，限時等待，逾時再強殺
    async fn terminate(&self, mut worker: WorkerProcess) {
        let pid = worker.child.id();
        send_sigterm(&mut worker.child);

        match timeout(self.config.shutdown_timeout(), worker.child.wait()).await {
            Ok(Ok(status)) => info!("worker 行程結束 (pid={pid:?}, status={status})"),
            Ok(Err(err)) => warn!("等待 worker 行程失敗 (pid={pid:?}): {err}"),
            Err(_) => {
                warn!("worker 行程未在限時內退出，強制終止 (pid={pid:?})");
                if let Err(err) = worker.child.kill().await {
                    error!("無法強制終止 worker 行程 (pid={pid:?}): {err}");
                }
            }
        }
    }

    /// 關閉全部子行程
    async fn shutdown_all(&mut self) {
        let workers = std::mem::take(&mut self.workers);
        for worker in workers {
            self.terminate(worker).await;
        }
    }
}

/// 向子行程送 SIGTERM 請求優雅退出；非 unix 平台退回強殺
#[cfg(unix)]
fn send_sigterm(child: &mut Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    let _ = child.start_kill();
}
