//! In-Process Memory Store
//!
//! A [`RemoteStore`] that lives inside the process. Several facades sharing one
//! `Arc<MemoryStore>` behave like several processes sharing one Redis: TTLs,
//! SCAN paging and pub/sub fan-out follow Redis semantics. Faults can be
//! injected to exercise the failure paths of the cache protocol.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use regex::Regex;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use super::{RemoteStore, ScanCursor, StoreMode, Subscription};
use crate::error::{DcacheError, Result};

const CHANNEL_CAPACITY: usize = 1024;

// == Records ==
#[derive(Debug, Clone)]
enum Value {
    Str(String),
    /// Members ordered by (score, member)
    ZSet(Vec<(String, f64)>),
}

#[derive(Debug, Clone)]
struct Record {
    value: Value,
    expires_at: Option<Instant>,
    /// Insertion sequence, drives SCAN cursors
    seq: u64,
}

impl Record {
    /// A TTL of 0 means no expiry.
    fn new(value: Value, ttl_secs: u64, seq: u64) -> Self {
        Self {
            value,
            expires_at: (ttl_secs > 0).then(|| Instant::now() + Duration::from_secs(ttl_secs)),
            seq,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

// == Faults ==
#[derive(Debug)]
struct Faults {
    offline: AtomicBool,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    /// Remaining DELs allowed, negative means unlimited
    delete_budget: AtomicI64,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            offline: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            delete_budget: AtomicI64::new(-1),
        }
    }
}

// == Memory Store ==
/// In-process store with Redis-like semantics and fault injection.
#[derive(Debug)]
pub struct MemoryStore {
    records: DashMap<String, Record>,
    seq: AtomicU64,
    messages: broadcast::Sender<(String, String)>,
    generation: watch::Sender<u64>,
    published: AtomicU64,
    faults: Faults,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    // == Constructor ==
    pub fn new() -> Self {
        let (messages, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (generation, _) = watch::channel(0);
        Self {
            records: DashMap::new(),
            seq: AtomicU64::new(1),
            messages,
            generation,
            published: AtomicU64::new(0),
            faults: Faults::default(),
        }
    }

    // == Fault Injection ==
    /// Makes every command, including PING and SUBSCRIBE, fail.
    pub fn set_offline(&self, offline: bool) {
        self.faults.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes GET, TTL and EXISTS fail.
    pub fn fail_reads(&self, fail: bool) {
        self.faults.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes SET, SET NX, INCRBY and sorted-set writes fail.
    pub fn fail_writes(&self, fail: bool) {
        self.faults.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Lets `allowed` more DEL commands succeed, then fails the rest.
    pub fn fail_deletes_after(&self, allowed: usize) {
        self.faults
            .delete_budget
            .store(allowed as i64, Ordering::SeqCst);
    }

    /// Clears every injected fault.
    pub fn reset_faults(&self) {
        self.set_offline(false);
        self.fail_reads(false);
        self.fail_writes(false);
        self.faults.delete_budget.store(-1, Ordering::SeqCst);
    }

    /// Ends every open subscription stream, as a dropped connection would.
    pub fn close_subscriptions(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    /// Number of messages published so far.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.messages.receiver_count()
    }

    // == Internals ==
    fn online(&self) -> Result<()> {
        if self.faults.offline.load(Ordering::SeqCst) {
            return Err(DcacheError::Connection("memory store offline".to_string()));
        }
        Ok(())
    }

    fn readable(&self) -> Result<()> {
        self.online()?;
        if self.faults.fail_reads.load(Ordering::SeqCst) {
            return Err(DcacheError::Connection("injected read failure".to_string()));
        }
        Ok(())
    }

    fn writable(&self) -> Result<()> {
        self.online()?;
        if self.faults.fail_writes.load(Ordering::SeqCst) {
            return Err(DcacheError::Connection("injected write failure".to_string()));
        }
        Ok(())
    }

    fn deletable(&self) -> Result<()> {
        self.online()?;
        let previous = self
            .faults
            .delete_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |budget| {
                if budget > 0 {
                    Some(budget - 1)
                } else {
                    None
                }
            });
        match previous {
            Ok(_) => Ok(()),
            Err(budget) if budget < 0 => Ok(()),
            Err(_) => Err(DcacheError::Connection(
                "injected delete failure".to_string(),
            )),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Live record for `key`, purging it if expired.
    fn live(&self, key: &str) -> Option<Record> {
        let now = Instant::now();
        let record = self.records.get(key).map(|r| r.value().clone())?;
        if record.is_expired(now) {
            self.records.remove_if(key, |_, r| r.is_expired(now));
            return None;
        }
        Some(record)
    }

    fn zset_members(&self, key: &str) -> Result<Vec<(String, f64)>> {
        match self.live(key) {
            None => Ok(Vec::new()),
            Some(Record {
                value: Value::ZSet(members),
                ..
            }) => Ok(members),
            Some(_) => Err(wrong_type(key)),
        }
    }
}

fn wrong_type(key: &str) -> DcacheError {
    DcacheError::WrongType(format!("{} holds the wrong kind of value", key))
}

fn parse_counter(key: &str, raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|_| DcacheError::WrongType(format!("{} is not an integer", key)))
}

/// Sets `member` to `score`, keeping (score, member) order. Returns 1 when added.
fn upsert_member(members: &mut Vec<(String, f64)>, member: &str, score: f64) -> u64 {
    let added = match members.iter_mut().find(|(m, _)| m == member) {
        Some(existing) => {
            existing.1 = score;
            0
        }
        None => {
            members.push((member.to_string(), score));
            1
        }
    };
    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    added
}

/// Translates a Redis glob (`*`, `?`, `[...]`, `\x`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                for c in chars.by_ref() {
                    match c {
                        ']' => break,
                        '\\' => out.push_str("\\\\"),
                        c => out.push(c),
                    }
                }
                out.push(']');
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| DcacheError::InvalidRequest(format!("bad pattern: {}", e)))
}

/// Redis-style inclusive range with negative indices counted from the end.
fn range_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn mode(&self) -> StoreMode {
        StoreMode::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.readable()?;
        match self.live(key) {
            None => Ok(None),
            Some(Record {
                value: Value::Str(value),
                ..
            }) => Ok(Some(value)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.writable()?;
        if ttl_secs == 0 {
            return Err(DcacheError::InvalidRequest(
                "invalid expire time in 'set' command".to_string(),
            ));
        }
        let record = Record::new(Value::Str(value.to_string()), ttl_secs, self.next_seq());
        self.records.insert(key.to_string(), record);
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        self.writable()?;
        let now = Instant::now();
        let seq = self.next_seq();
        match self.records.entry(key.to_string()) {
            Entry::Occupied(entry) if !entry.get().is_expired(now) => Ok(false),
            entry => {
                entry.insert(Record::new(Value::Str(value.to_string()), ttl_secs, seq));
                Ok(true)
            }
        }
    }

    async fn del(&self, key: &str) -> Result<u64> {
        self.deletable()?;
        let now = Instant::now();
        let existed = self
            .records
            .remove(key)
            .is_some_and(|(_, record)| !record.is_expired(now));
        Ok(u64::from(existed))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.readable()?;
        Ok(self.live(key).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        self.readable()?;
        let ttl = match self.live(key) {
            None => -2,
            Some(Record {
                expires_at: None, ..
            }) => -1,
            Some(Record {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(Instant::now()).as_millis() as i64;
                (remaining + 500) / 1000
            }
        };
        Ok(ttl)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.writable()?;
        let now = Instant::now();
        let seq = self.next_seq();
        // The entry holds the shard lock, so parse, add and write happen as one step.
        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut entry) if !entry.get().is_expired(now) => {
                let record = entry.get_mut();
                let current = match &record.value {
                    Value::Str(raw) => parse_counter(key, raw)?,
                    Value::ZSet(_) => return Err(wrong_type(key)),
                };
                let next = current.checked_add(delta).ok_or_else(|| {
                    DcacheError::InvalidRequest("increment would overflow".to_string())
                })?;
                record.value = Value::Str(next.to_string());
                Ok(next)
            }
            entry => {
                entry.insert(Record::new(Value::Str(delta.to_string()), 0, seq));
                Ok(delta)
            }
        }
    }

    async fn scan(
        &self,
        cursor: ScanCursor,
        pattern: &str,
        count: usize,
    ) -> Result<(ScanCursor, Vec<String>)> {
        self.online()?;
        let matcher = glob_to_regex(pattern)?;
        let now = Instant::now();

        let mut page: Vec<(u64, String)> = self
            .records
            .iter()
            .filter(|r| r.seq >= cursor.position && !r.is_expired(now))
            .map(|r| (r.seq, r.key().clone()))
            .collect();
        page.sort_unstable();

        let count = count.max(1);
        let next = if page.len() > count {
            ScanCursor {
                node: 0,
                position: page[count].0,
            }
        } else {
            ScanCursor::START
        };
        let keys = page
            .into_iter()
            .take(count)
            .map(|(_, key)| key)
            .filter(|key| matcher.is_match(key))
            .collect();
        Ok((next, keys))
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        self.online()?;
        self.published.fetch_add(1, Ordering::SeqCst);
        // No subscribers is not an error, same as PUBLISH returning 0.
        let _ = self
            .messages
            .send((channel.to_string(), message.to_string()));
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        self.online()?;
        debug!(channel = %channel, "memory store subscription opened");
        Ok(Box::new(MemorySubscription {
            channel: channel.to_string(),
            messages: self.messages.subscribe(),
            generation: self.generation.subscribe(),
            closed: false,
        }))
    }

    async fn ping(&self) -> Result<()> {
        self.online()
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<u64> {
        self.writable()?;
        let now = Instant::now();
        let seq = self.next_seq();
        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut entry) if !entry.get().is_expired(now) => {
                match &mut entry.get_mut().value {
                    Value::ZSet(members) => Ok(upsert_member(members, member, score)),
                    Value::Str(_) => Err(wrong_type(key)),
                }
            }
            entry => {
                let mut members = Vec::new();
                let added = upsert_member(&mut members, member, score);
                entry.insert(Record::new(Value::ZSet(members), 0, seq));
                Ok(added)
            }
        }
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        Ok(self
            .zrange_with_scores(key, start, stop)
            .await?
            .into_iter()
            .map(|(member, _)| member)
            .collect())
    }

    async fn zrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>> {
        self.readable()?;
        let members = self.zset_members(key)?;
        Ok(match range_bounds(members.len(), start, stop) {
            Some((from, to)) => members[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn zrevrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>> {
        self.readable()?;
        let mut members = self.zset_members(key)?;
        members.reverse();
        Ok(match range_bounds(members.len(), start, stop) {
            Some((from, to)) => members[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<u64> {
        self.writable()?;
        let now = Instant::now();
        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut entry) if !entry.get().is_expired(now) => {
                let members = match &mut entry.get_mut().value {
                    Value::ZSet(members) => members,
                    Value::Str(_) => return Err(wrong_type(key)),
                };
                let before = members.len();
                members.retain(|(m, _)| m != member);
                let removed = (before - members.len()) as u64;
                if members.is_empty() {
                    entry.remove();
                }
                Ok(removed)
            }
            _ => Ok(0),
        }
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        self.readable()?;
        Ok(self.zset_members(key)?.len() as u64)
    }
}

// == Memory Subscription ==
struct MemorySubscription {
    channel: String,
    messages: broadcast::Receiver<(String, String)>,
    generation: watch::Receiver<u64>,
    closed: bool,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn recv(&mut self) -> Result<Option<String>> {
        loop {
            if self.closed {
                return Ok(None);
            }
            tokio::select! {
                _ = self.generation.changed() => self.closed = true,
                message = self.messages.recv() => match message {
                    Ok((channel, payload)) if channel == self.channel => return Ok(Some(payload)),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        return Err(DcacheError::Connection(format!(
                            "subscriber lagged, {} messages lost",
                            skipped
                        )));
                    }
                    Err(broadcast::error::RecvError::Closed) => self.closed = true,
                },
            }
        }
    }
}
