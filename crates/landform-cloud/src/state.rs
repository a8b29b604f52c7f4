//! State management for cloud resources
//!
//! Recorded state lives in the state directory (`.landform/` by default):
//!
//! - `state.json`: versioned snapshot of every record, with a checksum
//! - `state.json.backup`: the snapshot before the last compaction
//! - `journal.jsonl`: append-only log of writes since the snapshot
//! - `lock.json`: the lock record of the run currently holding the state
//!
//! Every entry point that touches records takes the [`StateLock`] handle,
//! so reads used for planning and the writes of the following apply happen
//! under the same lock. Writes are journaled and fsynced one record at a
//! time; a crash mid-apply leaves every completed write recoverable.

use crate::error::{CloudError, Result};
use chrono::{DateTime, Utc};
use landform_core::{Address, Attributes};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const STATE_VERSION: u32 = 1;
pub const DEFAULT_STATE_DIR: &str = ".landform";
pub const DEFAULT_STALE_LOCK_AGE: Duration = Duration::from_secs(60 * 60);

const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const STATE_TEMP: &str = "state.json.tmp";
const JOURNAL_FILE: &str = "journal.jsonl";
const LOCK_FILE: &str = "lock.json";

static LOCK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

const LOCK_POLL_INITIAL: Duration = Duration::from_millis(50);
const LOCK_POLL_MAX: Duration = Duration::from_secs(1);

/// Hex blake3 digest of a value's JSON encoding
fn digest<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Fingerprint of a resource's applied inputs
///
/// Maps are ordered, so equal inputs always produce the same fingerprint.
pub fn fingerprint(inputs: &Attributes) -> String {
    // Serializing a map of JSON values cannot fail
    digest(inputs).unwrap_or_default()
}

/// Recorded state of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub address: Address,

    /// Provider-assigned resource ID
    pub id: String,

    pub resource_type: String,

    /// Provider that manages the resource
    pub provider: String,

    /// Evaluated inputs that were applied
    pub inputs: Attributes,

    /// Outputs returned by the provider
    pub outputs: Attributes,

    /// Dependencies at the time of the last apply
    #[serde(default)]
    pub dependencies: BTreeSet<Address>,

    /// Fingerprint of `inputs`
    pub fingerprint: String,

    /// Checksum over every other field, set when the record is written
    #[serde(default)]
    pub checksum: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    pub fn new(
        address: Address,
        id: impl Into<String>,
        provider: impl Into<String>,
        inputs: Attributes,
        outputs: Attributes,
    ) -> Self {
        let now = Utc::now();
        Self {
            resource_type: address.resource_type.clone(),
            address,
            id: id.into(),
            provider: provider.into(),
            fingerprint: fingerprint(&inputs),
            inputs,
            outputs,
            dependencies: BTreeSet::new(),
            checksum: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_dependencies(mut self, dependencies: BTreeSet<Address>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Keep the creation time of the record being replaced by an update
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    fn compute_checksum(&self) -> Result<String> {
        let mut unsealed = self.clone();
        unsealed.checksum.clear();
        digest(&unsealed)
    }

    fn seal(&mut self) -> Result<()> {
        self.checksum = self.compute_checksum()?;
        Ok(())
    }

    fn verify(&self) -> std::result::Result<(), String> {
        let expected = self
            .compute_checksum()
            .map_err(|e| format!("{}: {e}", self.address))?;
        if expected != self.checksum {
            return Err(format!("record checksum mismatch for {}", self.address));
        }
        if fingerprint(&self.inputs) != self.fingerprint {
            return Err(format!("input fingerprint mismatch for {}", self.address));
        }
        Ok(())
    }
}

/// Records as of a read, snapshot plus replayed journal
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    /// Number of writes folded into the snapshot and journal
    pub serial: u64,

    pub records: BTreeMap<Address, StateRecord>,
}

impl StateSnapshot {
    pub fn get(&self, address: &Address) -> Option<&StateRecord> {
        self.records.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.records.contains_key(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StateRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// On-disk snapshot
#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    serial: u64,
    updated_at: DateTime<Utc>,
    records: BTreeMap<Address, StateRecord>,
    checksum: String,
}

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalOp {
    Put { record: StateRecord },
    Delete { address: Address },
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalEntry {
    #[serde(flatten)]
    op: JournalOp,
    at: DateTime<Utc>,
    checksum: String,
}

impl JournalEntry {
    fn new(op: JournalOp) -> Result<Self> {
        let at = Utc::now();
        let checksum = digest(&(&op, &at))?;
        Ok(Self { op, at, checksum })
    }

    fn verify(&self) -> std::result::Result<(), String> {
        let expected = digest(&(&self.op, &self.at)).map_err(|e| e.to_string())?;
        if expected != self.checksum {
            return Err("entry checksum mismatch".to_string());
        }
        if let JournalOp::Put { record } = &self.op {
            record.verify()?;
        }
        Ok(())
    }
}

/// Lock information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Token identifying the holder, needed for `force-unlock`
    pub token: String,
    pub holder: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    /// Last heartbeat of the holder; staleness is measured from here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl LockInfo {
    fn new() -> Self {
        let holder = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("HOST"))
            .unwrap_or_else(|_| "unknown".to_string());
        let pid = std::process::id();
        let acquired_at = Utc::now();

        let seed = format!(
            "{holder}:{pid}:{}:{}",
            acquired_at.timestamp_nanos_opt().unwrap_or_default(),
            LOCK_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );
        let token = blake3::hash(seed.as_bytes()).to_hex()[..16].to_string();

        Self {
            token,
            holder,
            pid,
            acquired_at,
            refreshed_at: None,
        }
    }

    /// When the holder was last known to be alive
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.refreshed_at.unwrap_or(self.acquired_at)
    }
}

/// Store of recorded resource state
#[derive(Debug)]
pub struct StateStore {
    state_dir: PathBuf,
    stale_after: Duration,

    /// Serializes journal appends from concurrent steps
    journal_guard: Mutex<()>,
}

impl StateStore {
    /// Store rooted at `state_dir`
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
            stale_after: DEFAULT_STALE_LOCK_AGE,
            journal_guard: Mutex::new(()),
        }
    }

    /// Store in `<project_root>/.landform`
    pub fn in_project(project_root: impl AsRef<Path>) -> Self {
        Self::new(project_root.as_ref().join(DEFAULT_STATE_DIR))
    }

    /// Age after which a lock record is considered abandoned
    pub fn with_stale_lock_age(mut self, age: Duration) -> Self {
        self.stale_after = age;
        self
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir.join(STATE_BACKUP)
    }

    fn temp_path(&self) -> PathBuf {
        self.state_dir.join(STATE_TEMP)
    }

    fn journal_path(&self) -> PathBuf {
        self.state_dir.join(JOURNAL_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        if !fs::try_exists(&self.state_dir).await? {
            fs::create_dir_all(&self.state_dir).await?;
            debug!("Created state directory: {}", self.state_dir.display());
        }
        Ok(())
    }

    /// Acquire the exclusive lock, waiting up to `timeout`
    ///
    /// A lock older than the stale age is taken over with a warning.
    pub async fn acquire_lock(&self, timeout: Duration) -> Result<StateLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();
        let started = Instant::now();
        let mut delay = LOCK_POLL_INITIAL;

        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await
            {
                Ok(mut file) => {
                    let info = LockInfo::new();
                    file.write_all(&serde_json::to_vec_pretty(&info)?).await?;
                    file.sync_all().await?;

                    debug!(token = %info.token, "Acquired state lock");
                    let heartbeat = tokio::spawn(heartbeat(
                        lock_path.clone(),
                        info.clone(),
                        heartbeat_interval(self.stale_after),
                    ));
                    return Ok(StateLock {
                        lock_path,
                        info,
                        released: false,
                        heartbeat,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let existing = self.lock_info().await?;

                    if let Some(info) = &existing {
                        let age = Utc::now().signed_duration_since(info.last_seen());
                        if age.to_std().is_ok_and(|age| age >= self.stale_after) {
                            warn!(
                                holder = %info.holder,
                                token = %info.token,
                                last_seen = %info.last_seen(),
                                "Removing stale lock"
                            );
                            remove_if_exists(&lock_path).await?;
                            continue;
                        }
                    }

                    let waited = started.elapsed();
                    if waited >= timeout {
                        let (holder, token, acquired_at) = match existing {
                            Some(info) => (info.holder, info.token, info.acquired_at.to_rfc3339()),
                            None => ("unknown".into(), "unknown".into(), "unknown".into()),
                        };
                        return Err(CloudError::LockTimeout {
                            holder,
                            token,
                            acquired_at,
                            waited,
                        });
                    }

                    tokio::time::sleep(delay.min(timeout - waited)).await;
                    delay = (delay * 2).min(LOCK_POLL_MAX);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Current lock record, if any
    ///
    /// A record that cannot be parsed (e.g. still being written) reads as
    /// `None`.
    pub async fn lock_info(&self) -> Result<Option<LockInfo>> {
        match fs::read_to_string(self.lock_path()).await {
            Ok(content) => Ok(serde_json::from_str(&content).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a lock left behind by a crashed run
    pub async fn force_unlock(&self, expected_token: &str) -> Result<LockInfo> {
        let info = self
            .lock_info()
            .await?
            .ok_or_else(|| CloudError::LockError("state is not locked".to_string()))?;

        if info.token != expected_token {
            return Err(CloudError::LockError(format!(
                "lock token mismatch: the lock is held by {} with token {}",
                info.holder, info.token
            )));
        }

        remove_if_exists(&self.lock_path()).await?;
        warn!(holder = %info.holder, token = %info.token, "Lock forcibly removed");
        Ok(info)
    }

    /// Fail unless `lock` is the live lock of this store
    async fn check_lock(&self, lock: &StateLock) -> Result<()> {
        if lock.released || lock.lock_path != self.lock_path() {
            return Err(CloudError::LockError(
                "lock handle does not belong to this state store".to_string(),
            ));
        }

        match self.lock_info().await? {
            Some(info) if info.token == lock.info.token => Ok(()),
            _ => Err(CloudError::LockError(format!(
                "lock {} is no longer held",
                lock.info.token
            ))),
        }
    }

    /// Read every record: snapshot plus journal replay
    pub async fn read_all(&self, lock: &StateLock) -> Result<StateSnapshot> {
        self.check_lock(lock).await?;
        self.load().await
    }

    async fn load(&self) -> Result<StateSnapshot> {
        let mut snapshot = self.load_snapshot().await?;
        let replayed = self.replay_journal(&mut snapshot).await?;

        debug!(
            records = snapshot.records.len(),
            serial = snapshot.serial,
            replayed,
            "Loaded state"
        );
        Ok(snapshot)
    }

    async fn load_snapshot(&self) -> Result<StateSnapshot> {
        let path = self.state_path();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("State file not found, starting from empty state");
                return Ok(StateSnapshot::default());
            }
            Err(e) => return Err(e.into()),
        };

        let corruption = |reason: String| CloudError::StateCorruption {
            path: path.clone(),
            reason,
        };

        // Version check
        let header: VersionHeader =
            serde_json::from_str(&content).map_err(|e| corruption(e.to_string()))?;
        if header.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                header.version, STATE_VERSION
            )));
        }

        let file: StateFile =
            serde_json::from_str(&content).map_err(|e| corruption(e.to_string()))?;

        if digest(&file.records)? != file.checksum {
            return Err(corruption("snapshot checksum mismatch".to_string()));
        }
        for (address, record) in &file.records {
            if address != &record.address {
                return Err(corruption(format!(
                    "record keyed {address} has address {}",
                    record.address
                )));
            }
            record.verify().map_err(corruption)?;
        }

        Ok(StateSnapshot {
            serial: file.serial,
            records: file.records,
        })
    }

    async fn replay_journal(&self, snapshot: &mut StateSnapshot) -> Result<usize> {
        let path = self.journal_path();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let corruption = |line: usize, reason: String| CloudError::StateCorruption {
            path: path.clone(),
            reason: format!("line {line}: {reason}"),
        };

        if !content.is_empty() && !content.ends_with('\n') {
            let line = content.lines().count();
            return Err(corruption(line, "incomplete entry".to_string()));
        }

        let mut replayed = 0;
        for (index, line) in content.lines().enumerate() {
            let entry: JournalEntry =
                serde_json::from_str(line).map_err(|e| corruption(index + 1, e.to_string()))?;
            entry.verify().map_err(|reason| corruption(index + 1, reason))?;

            match entry.op {
                JournalOp::Put { record } => {
                    snapshot.records.insert(record.address.clone(), record);
                }
                JournalOp::Delete { address } => {
                    snapshot.records.remove(&address);
                }
            }
            snapshot.serial += 1;
            replayed += 1;
        }

        Ok(replayed)
    }

    async fn append(&self, op: JournalOp) -> Result<()> {
        let entry = JournalEntry::new(op)?;
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let _guard = self.journal_guard.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.journal_path())
            .await?;
        file.write_all(&line).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Record a resource after a successful create or update
    ///
    /// The record is durable when this returns.
    pub async fn write(&self, lock: &StateLock, mut record: StateRecord) -> Result<()> {
        self.check_lock(lock).await?;

        record.updated_at = Utc::now();
        record.fingerprint = fingerprint(&record.inputs);
        record.seal()?;

        let address = record.address.clone();
        self.append(JournalOp::Put { record }).await?;
        debug!(%address, "Recorded resource state");
        Ok(())
    }

    /// Remove a resource's record after a successful destroy
    pub async fn delete(&self, lock: &StateLock, address: &Address) -> Result<()> {
        self.check_lock(lock).await?;

        self.append(JournalOp::Delete {
            address: address.clone(),
        })
        .await?;
        debug!(%address, "Removed resource state");
        Ok(())
    }

    /// Fold the journal into a new snapshot
    ///
    /// The previous snapshot is kept as `state.json.backup`.
    pub async fn compact(&self, lock: &StateLock) -> Result<StateSnapshot> {
        self.check_lock(lock).await?;

        let snapshot = self.load().await?;
        let file = StateFile {
            version: STATE_VERSION,
            serial: snapshot.serial,
            updated_at: Utc::now(),
            checksum: digest(&snapshot.records)?,
            records: snapshot.records.clone(),
        };

        let temp = self.temp_path();
        let mut out = fs::File::create(&temp).await?;
        out.write_all(&serde_json::to_vec_pretty(&file)?).await?;
        out.sync_all().await?;

        let path = self.state_path();
        if fs::try_exists(&path).await? {
            fs::copy(&path, self.backup_path()).await?;
            debug!("Created state backup");
        }
        fs::rename(&temp, &path).await?;

        // Entries left by a crash before this point replay idempotently
        remove_if_exists(&self.journal_path()).await?;

        info!(
            records = snapshot.records.len(),
            serial = snapshot.serial,
            "Compacted state"
        );
        Ok(snapshot)
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Lock record on disk, if it still carries `token`
fn read_own_lock(lock_path: &Path, token: &str) -> Option<LockInfo> {
    std::fs::read_to_string(lock_path)
        .ok()
        .and_then(|content| serde_json::from_str::<LockInfo>(&content).ok())
        .filter(|info| info.token == token)
}

/// Interval between heartbeats: a quarter of the stale age, at least a second
fn heartbeat_interval(stale_after: Duration) -> Duration {
    (stale_after / 4).max(Duration::from_secs(1))
}

/// Keep a held lock from turning stale
///
/// Rewrites `refreshed_at` while the record on disk still carries our token;
/// stops as soon as it does not.
async fn heartbeat(lock_path: PathBuf, mut info: LockInfo, interval: Duration) {
    let temp_path = lock_path.with_extension("json.tmp");
    loop {
        tokio::time::sleep(interval).await;

        if read_own_lock(&lock_path, &info.token).is_none() {
            debug!(token = %info.token, "Lock no longer ours, heartbeat stopped");
            return;
        }

        info.refreshed_at = Some(Utc::now());
        let refreshed = async {
            fs::write(&temp_path, serde_json::to_vec_pretty(&info)?).await?;
            fs::rename(&temp_path, &lock_path).await?;
            Ok::<_, CloudError>(())
        };
        if let Err(e) = refreshed.await {
            warn!(token = %info.token, error = %e, "Failed to refresh state lock");
        }
    }
}

/// RAII guard for state lock
///
/// Dropping the guard removes the lock record, so the lock is released on
/// every exit path including panics. Only a record that still carries this
/// guard's token is ever removed.
#[derive(Debug)]
pub struct StateLock {
    lock_path: PathBuf,
    info: LockInfo,
    released: bool,
    heartbeat: JoinHandle<()>,
}

impl StateLock {
    pub fn token(&self) -> &str {
        &self.info.token
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Release the lock
    ///
    /// A lock taken over by another run is left in place.
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            self.heartbeat.abort();
            self.released = true;
            if read_own_lock(&self.lock_path, &self.info.token).is_some() {
                remove_if_exists(&self.lock_path).await?;
                debug!(token = %self.info.token, "Released state lock");
            } else {
                warn!(token = %self.info.token, "State lock was taken over, not releasing");
            }
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        self.heartbeat.abort();
        if !self.released && read_own_lock(&self.lock_path, &self.info.token).is_some() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
