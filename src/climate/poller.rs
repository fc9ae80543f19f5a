use std::sync::Arc;

use tokio::select;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::channel::ChannelStore;
use crate::climate::{Climate, Refresh};
use crate::config::PollSchedule;

/// Background task refreshing a `Climate` on a schedule. The first refresh
/// happens right away.
#[derive(Debug)]
pub struct Poller {
    stop_sender: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Poller {
    pub fn start<S>(climate: Arc<Climate<S>>, schedule: PollSchedule) -> Poller
    where
        S: ChannelStore + 'static,
    {
        let (stop_sender, mut stop_receiver) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let rate = match schedule {
                PollSchedule::Once => {
                    poll(&climate).await;
                    return;
                }
                PollSchedule::Every(rate) => rate,
            };

            let mut ticker = interval(rate);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                select! {
                    _ = ticker.tick() => poll(&climate).await,
                    changed = stop_receiver.changed() => {
                        if changed.is_err() {
                            info!("poller handle dropped before stop signal");
                            break;
                        }
                        if *stop_receiver.borrow() {
                            info!("poller received stop signal");
                            break;
                        }
                    }
                }
            }
        });

        Poller {
            stop_sender,
            handle,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the timer. A refresh already in flight runs to completion.
    pub async fn stop(self) {
        if self.stop_sender.send(true).is_err() {
            trace!("poller already finished");
        }
        if let Err(e) = self.handle.await {
            error!("poller task failed: {}", e);
        }
    }
}

async fn poll<S: ChannelStore>(climate: &Climate<S>) {
    match climate.refresh().await {
        Ok(Refresh::Applied(state)) => debug!("refreshed climate state: {}", state),
        Ok(Refresh::Superseded) => debug!("refresh superseded by a local change"),
        Err(e) => error!("could not refresh climate state: {}", e),
    }
}
