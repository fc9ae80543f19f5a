use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::channel::{ChannelError, ChannelStore, Feed, Field, FieldValue, Result, Update};

/// In-memory channel keeping the latest value of every field. Reads and
/// writes can be held open or made to fail.
pub(crate) struct MemoryChannel {
    latest: Mutex<Feed>,
    updates: Mutex<Vec<Update>>,
    reads: AtomicUsize,
    failing_reads: AtomicBool,
    failing_writes: AtomicUsize,
    failing_value: Mutex<Option<(Field, String)>>,
    next_entry: AtomicU64,
    reads_open: watch::Sender<bool>,
    writes_open: watch::Sender<bool>,
}

impl MemoryChannel {
    pub fn new(latest: Feed) -> MemoryChannel {
        MemoryChannel {
            latest: Mutex::new(latest),
            updates: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            failing_reads: AtomicBool::new(false),
            failing_writes: AtomicUsize::new(0),
            failing_value: Mutex::new(None),
            next_entry: AtomicU64::new(1),
            reads_open: watch::channel(true).0,
            writes_open: watch::channel(true).0,
        }
    }

    /// Channel holding temperature, humidity, status and target in fields 1-4.
    pub fn climate(temperature: f64, humidity: f64, status: u8, target: i32) -> MemoryChannel {
        MemoryChannel::new(
            Feed::default()
                .with(Field::Field1, FieldValue::new(temperature.to_string()))
                .with(Field::Field2, FieldValue::new(humidity.to_string()))
                .with(Field::Field3, FieldValue::new(status.to_string()))
                .with(Field::Field4, FieldValue::new(target.to_string())),
        )
    }

    pub fn set(&self, field: Field, value: &str) {
        self.latest
            .lock()
            .unwrap()
            .set(field, Some(FieldValue::new(value)));
    }

    pub fn value(&self, field: Field) -> Option<String> {
        self.latest
            .lock()
            .unwrap()
            .get(field)
            .map(|v| v.as_str().to_string())
    }

    pub fn updates(&self) -> Vec<Update> {
        self.updates.lock().unwrap().clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.failing_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` writes fail.
    pub fn fail_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Makes every write of `value` to `field` fail.
    pub fn fail_value(&self, field: Field, value: &str) {
        *self.failing_value.lock().unwrap() = Some((field, value.to_string()));
    }

    fn is_failing_value(&self, update: &Update) -> bool {
        match &*self.failing_value.lock().unwrap() {
            Some((field, value)) => update.get(*field).map(|n| n.to_string()).as_deref() == Some(value),
            None => false,
        }
    }

    /// Reads take their snapshot, then wait until released.
    pub fn hold_reads(&self, hold: bool) {
        self.reads_open.send_replace(!hold);
    }

    pub fn hold_writes(&self, hold: bool) {
        self.writes_open.send_replace(!hold);
    }

    fn snapshot(&self) -> Result<Feed> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(ChannelError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        }
        Ok(self.latest.lock().unwrap().clone())
    }
}

async fn wait_open(gate: &watch::Sender<bool>) {
    let mut open = gate.subscribe();
    loop {
        if *open.borrow_and_update() {
            return;
        }
        if open.changed().await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl ChannelStore for MemoryChannel {
    async fn last_field(&self, field: Field) -> Result<Feed> {
        let latest = self.snapshot()?;
        wait_open(&self.reads_open).await;
        let mut feed = Feed::default();
        feed.merge_field(field, &latest);
        feed.entry_id = latest.entry_id;
        Ok(feed)
    }

    async fn last_feed(&self) -> Result<Feed> {
        let latest = self.snapshot()?;
        wait_open(&self.reads_open).await;
        Ok(latest)
    }

    async fn update(&self, update: &Update) -> Result<u64> {
        wait_open(&self.writes_open).await;
        if update.is_empty() {
            return Err(ChannelError::EmptyUpdate);
        }
        let failing = self.failing_writes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_writes.store(failing - 1, Ordering::SeqCst);
            return Err(ChannelError::Rejected);
        }
        if self.is_failing_value(update) {
            return Err(ChannelError::Rejected);
        }
        let entry = self.next_entry.fetch_add(1, Ordering::SeqCst);
        {
            let mut latest = self.latest.lock().unwrap();
            for (field, value) in update.fields() {
                latest.set(field, Some(FieldValue::new(value.to_string())));
            }
            latest.entry_id = Some(entry);
        }
        self.updates.lock().unwrap().push(update.clone());
        Ok(entry)
    }
}
