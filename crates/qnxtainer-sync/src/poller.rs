use async_trait::async_trait;
use qnxtainer_common::PollingPolicy;
use std::sync::Weak;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

/// Something the poller refreshes on every tick.
#[async_trait]
pub trait PollTarget: Send + Sync + 'static {
    async fn poll(&self);
}

/// Background timer driving passive refresh.
///
/// The task follows the policy channel: an interval change re-arms the timer
/// without an immediate tick, and disabling polling drops any poll still in
/// flight. The task ends when the target or the policy sender goes away, and
/// is aborted when the `Poller` is dropped.
#[derive(Debug)]
pub struct Poller {
    handle: JoinHandle<()>,
}

impl Poller {
    pub fn spawn<T: PollTarget>(target: Weak<T>, policy: watch::Receiver<PollingPolicy>) -> Self {
        Self {
            handle: tokio::spawn(run(target, policy)),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run<T: PollTarget>(target: Weak<T>, mut policy: watch::Receiver<PollingPolicy>) {
    'policy: loop {
        let current = *policy.borrow_and_update();
        if !current.enabled {
            debug!("polling disabled");
            if policy.changed().await.is_err() {
                return;
            }
            continue;
        }

        let period = current.interval();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(interval_ms = current.interval_ms, "polling armed");

        loop {
            tokio::select! {
                changed = policy.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    continue 'policy;
                }
                _ = ticker.tick() => {}
            }

            let Some(target) = target.upgrade() else {
                return;
            };
            debug!("poll tick");

            let poll = target.poll();
            tokio::pin!(poll);
            let mut rearm = false;
            loop {
                tokio::select! {
                    _ = &mut poll => break,
                    changed = policy.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        if !policy.borrow().enabled {
                            debug!("polling disabled, dropping in-flight poll");
                            continue 'policy;
                        }
                        rearm = true;
                    }
                }
            }
            if rearm {
                continue 'policy;
            }
        }
    }
}
