use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::channel::{ChannelError, ChannelStore, Feed, Update};
use crate::config::{ClimateConfig, ConfigError, ReadMode, TargetBounds};

pub use crate::climate::poller::Poller;
pub use crate::climate::types::{ClimateState, UnitStatus};
pub(crate) use crate::climate::types::decode_target;

mod poller;
mod types;

#[derive(Error, Debug)]
pub enum ClimateError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("Target temperature {value} is outside {bounds}")]
    OutOfRange { value: i32, bounds: TargetBounds },
    #[error("Target temperature adjustment overflowed")]
    Overflow,
    #[error("Could not acquire climate state mutex")]
    Mutex,
}

pub type Result<T> = std::result::Result<T, ClimateError>;

#[derive(Clone, Debug, PartialEq)]
pub enum Refresh {
    Applied(ClimateState),
    /// A user change happened while the read was in flight, so the read was
    /// dropped instead of reverting it.
    Superseded,
}

#[derive(Debug, Default)]
struct Local {
    state: ClimateState,
    version: u64,
    pending_writes: usize,
    /// Target the channel last confirmed, by a refresh or a write
    confirmed_target: i32,
    target_writes: usize,
    /// Token of the newest target adjustment
    latest_target: u64,
    latest_failed: bool,
}

impl Local {
    fn begin_write(&mut self) {
        self.version += 1;
        self.pending_writes += 1;
    }

    fn end_write(&mut self) {
        self.version += 1;
        self.pending_writes = self.pending_writes.saturating_sub(1);
    }

    fn begin_target_write(&mut self, target: i32) -> u64 {
        self.begin_write();
        self.state.target_temperature = target;
        self.target_writes += 1;
        self.latest_target += 1;
        self.latest_failed = false;
        self.latest_target
    }

    /// Returns true when the local target was rolled back.
    fn end_target_write(&mut self, token: u64, target: i32, written: bool) -> bool {
        self.end_write();
        self.target_writes = self.target_writes.saturating_sub(1);
        if written {
            self.confirmed_target = target;
        } else if token == self.latest_target {
            self.latest_failed = true;
        }

        // wait for every overlapping adjustment before falling back
        if self.target_writes > 0 || !self.latest_failed {
            return false;
        }
        self.latest_failed = false;
        if self.state.target_temperature == self.confirmed_target {
            return false;
        }
        self.state.target_temperature = self.confirmed_target;
        true
    }
}

/// Keeps a local `ClimateState` in step with the channel and turns user
/// intents into channel writes.
///
/// Polls overwrite everything with what the channel holds, unless a write
/// started or finished while the poll was in flight. Target changes are
/// applied locally before the write. Once the newest one fails and no other
/// adjustment is in flight, the target falls back to the last value the
/// channel confirmed. Status changes are applied only once the write went
/// through.
#[derive(Debug)]
pub struct Climate<S> {
    store: S,
    config: ClimateConfig,
    local: Mutex<Local>,
    state_sender: watch::Sender<ClimateState>,
}

impl<S: ChannelStore> Climate<S> {
    pub fn new(store: S, config: ClimateConfig) -> std::result::Result<Climate<S>, ConfigError> {
        config.validate()?;
        let (state_sender, _) = watch::channel(ClimateState::default());
        Ok(Climate {
            store,
            config,
            local: Mutex::new(Local::default()),
            state_sender,
        })
    }

    pub fn state(&self) -> ClimateState {
        self.state_sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClimateState> {
        self.state_sender.subscribe()
    }

    /// Stream yielding the current state, then every change.
    pub fn changes(&self) -> WatchStream<ClimateState> {
        WatchStream::new(self.subscribe())
    }

    fn local(&self) -> Result<MutexGuard<'_, Local>> {
        self.local.lock().map_err(|_| ClimateError::Mutex)
    }

    fn publish(&self, local: &Local) {
        self.state_sender.send_replace(local.state.clone());
    }

    /// Reads the tracked fields without touching local state.
    pub async fn fetch(&self) -> Result<ClimateState> {
        let fields = &self.config.fields;
        let feed = match self.config.read_mode {
            ReadMode::LastFeed => self.store.last_feed().await?,
            ReadMode::PerField => {
                let (temperature, humidity, status, target) = futures::try_join!(
                    self.store.last_field(fields.temperature),
                    self.store.last_field(fields.humidity),
                    self.store.last_field(fields.unit_status),
                    self.store.last_field(fields.target_temperature),
                )?;
                let mut feed = Feed::default();
                feed.merge_field(fields.temperature, &temperature);
                feed.merge_field(fields.humidity, &humidity);
                feed.merge_field(fields.unit_status, &status);
                feed.merge_field(fields.target_temperature, &target);
                feed
            }
        };
        trace!("fetched {}", feed);
        Ok(ClimateState::from_feed(&feed, fields)?)
    }

    /// Replaces local state with the channel's values. Local state is left
    /// alone when the read fails.
    pub async fn refresh(&self) -> Result<Refresh> {
        let started = self.local()?.version;
        let fetched = self.fetch().await?;

        let mut local = self.local()?;
        if local.pending_writes > 0 || local.version != started {
            debug!("dropping refresh, local state changed while it was in flight");
            return Ok(Refresh::Superseded);
        }
        local.state = fetched.clone();
        local.confirmed_target = fetched.target_temperature;
        self.publish(&local);
        Ok(Refresh::Applied(fetched))
    }

    pub async fn increment(&self) -> Result<i32> {
        self.change_target(|target| target.checked_add(1).ok_or(ClimateError::Overflow))
            .await
    }

    pub async fn decrement(&self) -> Result<i32> {
        self.change_target(|target| target.checked_sub(1).ok_or(ClimateError::Overflow))
            .await
    }

    pub async fn set_target(&self, target: i32) -> Result<i32> {
        self.change_target(|_| Ok(target)).await
    }

    fn check_bounds(&self, value: i32) -> Result<()> {
        match self.config.bounds {
            Some(bounds) if !bounds.contains(value) => {
                Err(ClimateError::OutOfRange { value, bounds })
            }
            _ => Ok(()),
        }
    }

    async fn change_target<F>(&self, change: F) -> Result<i32>
    where
        F: FnOnce(i32) -> Result<i32>,
    {
        let (target, token) = {
            let mut local = self.local()?;
            let previous = local.state.target_temperature;
            let target = change(previous)?;
            self.check_bounds(target)?;
            let token = local.begin_target_write(target);
            self.publish(&local);
            debug!("target temperature {} -> {}", previous, target);
            (target, token)
        };

        let written = self
            .write(Update::new().set(self.config.fields.target_temperature, target))
            .await;

        let mut local = self.local()?;
        if local.end_target_write(token, target, written.is_ok()) {
            info!(
                "rolling target temperature back to {}",
                local.state.target_temperature
            );
            self.publish(&local);
        }
        written?;
        Ok(target)
    }

    pub async fn toggle(&self) -> Result<UnitStatus> {
        let status = self.local()?.state.unit_status.toggled();
        self.set_status(status).await
    }

    pub async fn set_status(&self, status: UnitStatus) -> Result<UnitStatus> {
        self.local()?.begin_write();
        debug!("switching unit {}", status);

        let written = self
            .write(Update::new().set(self.config.fields.unit_status, u8::from(status)))
            .await;

        let mut local = self.local()?;
        local.end_write();
        written?;
        local.state.unit_status = status;
        self.publish(&local);
        Ok(status)
    }

    async fn write(&self, update: Update) -> Result<u64> {
        match self.store.update(&update).await {
            Ok(entry) => {
                debug!("wrote {} as entry {}", update, entry);
                Ok(entry)
            }
            Err(e) => {
                warn!("could not write {}: {}", update, e);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::channel::Field;
    use crate::config::FieldMap;
    use crate::testing::MemoryChannel;

    fn climate(store: &Arc<MemoryChannel>) -> Arc<Climate<Arc<MemoryChannel>>> {
        Arc::new(Climate::new(store.clone(), ClimateConfig::default()).unwrap())
    }

    fn written_targets(store: &MemoryChannel) -> Vec<String> {
        store
            .updates()
            .iter()
            .filter_map(|u| u.get(Field::Field4).map(|n| n.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn refresh_overwrites_every_field() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 0, 22));
        let climate = climate(&store);

        let refreshed = climate.refresh().await.unwrap();

        let expected = ClimateState {
            current_temperature: Some(21.0),
            current_humidity: Some(55.0),
            target_temperature: 22,
            unit_status: UnitStatus::Off,
        };
        assert_eq!(refreshed, Refresh::Applied(expected.clone()));
        assert_eq!(climate.state(), expected);
    }

    #[tokio::test]
    async fn last_feed_mode_reads_once() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 1, 22));
        let config = ClimateConfig {
            read_mode: ReadMode::LastFeed,
            ..ClimateConfig::default()
        };
        let climate = Climate::new(store.clone(), config).unwrap();

        climate.refresh().await.unwrap();
        assert_eq!(store.reads(), 1);
        assert_eq!(climate.state().unit_status, UnitStatus::On);
    }

    #[tokio::test]
    async fn per_field_mode_reads_each_field() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 1, 22));
        let climate = climate(&store);

        climate.refresh().await.unwrap();
        assert_eq!(store.reads(), 4);
    }

    #[tokio::test]
    async fn refresh_replaces_local_changes() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 0, 22));
        let climate = climate(&store);
        climate.increment().await.unwrap();
        store.set(Field::Field4, "18");
        store.set(Field::Field1, "19.5");

        climate.refresh().await.unwrap();
        assert_eq!(climate.state().target_temperature, 18);
        assert_eq!(climate.state().current_temperature, Some(19.5));
    }

    #[tokio::test]
    async fn repeated_refresh_is_stable() {
        let store = Arc::new(MemoryChannel::climate(23.5, 40.0, 1, 21));
        let climate = climate(&store);

        climate.refresh().await.unwrap();
        let first = climate.state();
        climate.refresh().await.unwrap();
        assert_eq!(climate.state(), first);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_state() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 1, 22));
        let climate = climate(&store);
        climate.refresh().await.unwrap();
        let before = climate.state();

        store.fail_reads(true);
        assert!(matches!(
            climate.refresh().await,
            Err(ClimateError::Channel(ChannelError::Status(_)))
        ));
        assert_eq!(climate.state(), before);
    }

    #[tokio::test]
    async fn malformed_refresh_keeps_state() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 1, 22));
        let climate = climate(&store);
        climate.refresh().await.unwrap();

        store.set(Field::Field4, "warm");
        assert!(climate.refresh().await.is_err());
        assert_eq!(climate.state().target_temperature, 22);
    }

    #[tokio::test]
    async fn three_increments_write_each_step() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 0, 20));
        let climate = climate(&store);
        climate.refresh().await.unwrap();

        for _ in 0..3 {
            climate.increment().await.unwrap();
        }

        assert_eq!(climate.state().target_temperature, 23);
        assert_eq!(store.value(Field::Field4).as_deref(), Some("23"));
        assert_eq!(written_targets(&store), vec!["21", "22", "23"]);
        assert!(store.updates().iter().all(|u| u.fields().count() == 1));
    }

    #[tokio::test]
    async fn steps_are_not_clamped() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 0, 1));
        let climate = climate(&store);
        climate.refresh().await.unwrap();

        let steps = [-1, -1, -1, 1, -1, -1];
        for step in steps {
            if step > 0 {
                climate.increment().await.unwrap();
            } else {
                climate.decrement().await.unwrap();
            }
        }

        assert_eq!(climate.state().target_temperature, 1 + steps.iter().sum::<i32>());
        assert_eq!(climate.state().target_temperature, -3);
    }

    #[tokio::test]
    async fn overflow_is_refused() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 0, i32::MAX));
        let climate = climate(&store);
        climate.refresh().await.unwrap();

        assert!(matches!(climate.increment().await, Err(ClimateError::Overflow)));
        assert!(store.updates().is_empty());
    }

    #[tokio::test]
    async fn failed_increment_rolls_back_target_only() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 1, 20));
        let climate = climate(&store);
        climate.refresh().await.unwrap();
        let before = climate.state();

        store.fail_writes(1);
        assert!(matches!(
            climate.increment().await,
            Err(ClimateError::Channel(ChannelError::Rejected))
        ));

        assert_eq!(climate.state(), before);
        assert_eq!(store.value(Field::Field4).as_deref(), Some("20"));
    }

    #[tokio::test]
    async fn optimistic_target_is_visible_during_write() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 0, 20));
        let climate = climate(&store);
        climate.refresh().await.unwrap();

        store.hold_writes(true);
        let pending = tokio::spawn({
            let climate = climate.clone();
            async move { climate.increment().await }
        });
        tokio::task::yield_now().await;
        assert_eq!(climate.state().target_temperature, 21);

        store.hold_writes(false);
        assert_eq!(pending.await.unwrap().unwrap(), 21);
    }

    #[tokio::test]
    async fn rollback_leaves_newer_change_alone() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 0, 20));
        let climate = climate(&store);
        climate.refresh().await.unwrap();

        store.hold_writes(true);
        store.fail_value(Field::Field4, "21");
        let first = tokio::spawn({
            let climate = climate.clone();
            async move { climate.increment().await }
        });
        tokio::task::yield_now().await;
        let second = tokio::spawn({
            let climate = climate.clone();
            async move { climate.increment().await }
        });
        tokio::task::yield_now().await;
        assert_eq!(climate.state().target_temperature, 22);

        store.hold_writes(false);
        assert!(first.await.unwrap().is_err());
        assert_eq!(second.await.unwrap().unwrap(), 22);
        assert_eq!(climate.state().target_temperature, 22);
    }

    #[tokio::test]
    async fn overlapping_failures_fall_back_to_channel_value() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 0, 20));
        let climate = climate(&store);
        climate.refresh().await.unwrap();

        store.hold_writes(true);
        store.fail_writes(2);
        let first = tokio::spawn({
            let climate = climate.clone();
            async move { climate.increment().await }
        });
        tokio::task::yield_now().await;
        let second = tokio::spawn({
            let climate = climate.clone();
            async move { climate.increment().await }
        });
        tokio::task::yield_now().await;
        assert_eq!(climate.state().target_temperature, 22);

        store.hold_writes(false);
        assert!(first.await.unwrap().is_err());
        assert!(second.await.unwrap().is_err());
        assert_eq!(climate.state().target_temperature, 20);
        assert_eq!(store.value(Field::Field4).as_deref(), Some("20"));
    }

    #[tokio::test]
    async fn failed_newer_change_falls_back_to_older_write() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 0, 20));
        let climate = climate(&store);
        climate.refresh().await.unwrap();

        store.hold_writes(true);
        store.fail_value(Field::Field4, "22");
        let first = tokio::spawn({
            let climate = climate.clone();
            async move { climate.increment().await }
        });
        tokio::task::yield_now().await;
        let second = tokio::spawn({
            let climate = climate.clone();
            async move { climate.increment().await }
        });
        tokio::task::yield_now().await;

        store.hold_writes(false);
        assert_eq!(first.await.unwrap().unwrap(), 21);
        assert!(second.await.unwrap().is_err());
        assert_eq!(climate.state().target_temperature, 21);
        assert_eq!(store.value(Field::Field4).as_deref(), Some("21"));
    }

    #[tokio::test]
    async fn bounds_refuse_without_writing() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 0, 30));
        let config = ClimateConfig {
            bounds: Some(TargetBounds::new(16, 30).unwrap()),
            ..ClimateConfig::default()
        };
        let climate = Climate::new(store.clone(), config).unwrap();
        climate.refresh().await.unwrap();

        assert!(matches!(
            climate.increment().await,
            Err(ClimateError::OutOfRange { value: 31, .. })
        ));
        assert!(matches!(
            climate.set_target(10).await,
            Err(ClimateError::OutOfRange { value: 10, .. })
        ));
        assert_eq!(climate.state().target_temperature, 30);
        assert!(store.updates().is_empty());
        assert_eq!(climate.decrement().await.unwrap(), 29);
    }

    #[tokio::test]
    async fn set_target_writes_absolute_value() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 0, 20));
        let climate = climate(&store);

        assert_eq!(climate.set_target(25).await.unwrap(), 25);
        assert_eq!(written_targets(&store), vec!["25"]);
    }

    #[tokio::test]
    async fn toggle_twice_restores_status() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 0, 20));
        let climate = climate(&store);
        climate.refresh().await.unwrap();

        assert_eq!(climate.toggle().await.unwrap(), UnitStatus::On);
        assert_eq!(store.value(Field::Field3).as_deref(), Some("1"));
        assert_eq!(climate.toggle().await.unwrap(), UnitStatus::Off);
        assert_eq!(store.value(Field::Field3).as_deref(), Some("0"));
        assert_eq!(climate.state().unit_status, UnitStatus::Off);
    }

    #[tokio::test]
    async fn failed_toggle_keeps_status() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 0, 20));
        let climate = climate(&store);
        climate.refresh().await.unwrap();

        store.fail_writes(1);
        assert!(climate.toggle().await.is_err());
        assert_eq!(climate.state().unit_status, UnitStatus::Off);
        assert_eq!(store.value(Field::Field3).as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn status_changes_only_after_write() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 0, 20));
        let climate = climate(&store);
        climate.refresh().await.unwrap();

        store.hold_writes(true);
        let pending = tokio::spawn({
            let climate = climate.clone();
            async move { climate.set_status(UnitStatus::On).await }
        });
        tokio::task::yield_now().await;
        assert_eq!(climate.state().unit_status, UnitStatus::Off);

        store.hold_writes(false);
        assert_eq!(pending.await.unwrap().unwrap(), UnitStatus::On);
        assert_eq!(climate.state().unit_status, UnitStatus::On);
    }

    #[tokio::test]
    async fn refresh_during_write_is_superseded() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 0, 20));
        let climate = climate(&store);
        climate.refresh().await.unwrap();

        store.hold_writes(true);
        let pending = tokio::spawn({
            let climate = climate.clone();
            async move { climate.increment().await }
        });
        tokio::task::yield_now().await;

        assert_eq!(climate.refresh().await.unwrap(), Refresh::Superseded);
        assert_eq!(climate.state().target_temperature, 21);

        store.hold_writes(false);
        pending.await.unwrap().unwrap();
        assert!(matches!(climate.refresh().await.unwrap(), Refresh::Applied(_)));
        assert_eq!(climate.state().target_temperature, 21);
    }

    #[tokio::test]
    async fn stale_read_does_not_revert_finished_write() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 0, 20));
        let climate = climate(&store);
        climate.refresh().await.unwrap();

        store.hold_reads(true);
        let refresh = tokio::spawn({
            let climate = climate.clone();
            async move { climate.refresh().await }
        });
        tokio::task::yield_now().await;

        climate.increment().await.unwrap();
        store.hold_reads(false);

        assert_eq!(refresh.await.unwrap().unwrap(), Refresh::Superseded);
        assert_eq!(climate.state().target_temperature, 21);
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 0, 20));
        let climate = climate(&store);
        let mut receiver = climate.subscribe();

        climate.refresh().await.unwrap();
        assert!(receiver.has_changed().unwrap());
        assert_eq!(receiver.borrow_and_update().target_temperature, 20);

        climate.increment().await.unwrap();
        assert!(receiver.has_changed().unwrap());
        assert_eq!(receiver.borrow_and_update().target_temperature, 21);
    }

    #[tokio::test]
    async fn change_stream_starts_with_current_state() {
        use tokio_stream::StreamExt;

        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 1, 20));
        let climate = climate(&store);
        let mut changes = climate.changes();

        assert_eq!(changes.next().await, Some(ClimateState::default()));
        climate.refresh().await.unwrap();
        let state = changes.next().await.unwrap();
        assert_eq!(state.unit_status, UnitStatus::On);
        assert_eq!(state.target_temperature, 20);
    }

    #[tokio::test]
    async fn rejects_overlapping_field_map() {
        let store = Arc::new(MemoryChannel::climate(21.0, 55.0, 0, 20));
        let config = ClimateConfig {
            fields: FieldMap {
                humidity: Field::Field1,
                ..FieldMap::default()
            },
            ..ClimateConfig::default()
        };
        assert!(matches!(
            Climate::new(store, config),
            Err(ConfigError::DuplicateField(Field::Field1))
        ));
    }
}
