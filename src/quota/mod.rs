//! Quota governor for the two rate-limited upstream services.
//!
//! Every gated call must ask [`QuotaGovernor::can_make_request`] first and
//! charge itself with [`QuotaGovernor::track_operation`] *before* the request
//! goes out; the charge stands whether or not the call succeeds. Counters are
//! kept per service (YouTube Data API and Groq), daily and per minute.
//!
//! Minute counters roll over lazily on the next access. Daily counters reset
//! when the persisted ledger belongs to a different day (checked on load).
//! Writes to disk are batched, see [`QuotaGovernor::track_operation`].

mod ledger;

pub use ledger::{OperationRecord, QuotaLedger};

use crate::config::Config;
use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Local};
use num_format::{Locale, ToFormattedString};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const QUOTA_FILE: &str = "quota_usage.json";

const SAVE_EVERY_OPS: u32 = 10;
const SAVE_EVERY_SECS: i64 = 300;
const CRITICAL_RATIO: f64 = 0.9;

/// Upstream call types with a fixed cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaOperation {
    Search,
    VideosList,
    ChannelsList,
    PlaylistsList,
    PlaylistItemsList,
    GroqAutoplay,
    GroqValidation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    YouTube,
    Groq,
}

impl QuotaOperation {
    pub const ALL: [QuotaOperation; 7] = [
        QuotaOperation::Search,
        QuotaOperation::VideosList,
        QuotaOperation::ChannelsList,
        QuotaOperation::PlaylistsList,
        QuotaOperation::PlaylistItemsList,
        QuotaOperation::GroqAutoplay,
        QuotaOperation::GroqValidation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            QuotaOperation::Search => "search",
            QuotaOperation::VideosList => "videos_list",
            QuotaOperation::ChannelsList => "channels_list",
            QuotaOperation::PlaylistsList => "playlists_list",
            QuotaOperation::PlaylistItemsList => "playlistItems_list",
            QuotaOperation::GroqAutoplay => "groq_autoplay",
            QuotaOperation::GroqValidation => "groq_validation",
        }
    }

    pub fn cost(self) -> u64 {
        match self {
            QuotaOperation::Search => 100,
            _ => 1,
        }
    }

    /// Operations named `groq_*` belong to the AI service.
    pub fn service(self) -> Service {
        if self.name().starts_with("groq_") {
            Service::Groq
        } else {
            Service::YouTube
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub youtube_daily: u64,
    pub youtube_minute: u64,
    pub groq_daily: u64,
    pub groq_minute: u64,
}

impl QuotaLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            youtube_daily: config.youtube_daily_limit,
            youtube_minute: config.youtube_minute_limit,
            groq_daily: config.groq_daily_limit,
            groq_minute: config.groq_minute_limit,
        }
    }

    fn daily(&self, service: Service) -> u64 {
        match service {
            Service::YouTube => self.youtube_daily,
            Service::Groq => self.groq_daily,
        }
    }

    fn minute(&self, service: Service) -> u64 {
        match service {
            Service::YouTube => self.youtube_minute,
            Service::Groq => self.groq_minute,
        }
    }
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceStats {
    pub daily_usage: u64,
    pub daily_limit: u64,
    pub daily_percent: f64,
    pub daily_remaining: u64,
    pub minute_usage: u64,
    pub minute_limit: u64,
    /// Calls per operation over the retained history (last 24h).
    pub operations_count: BTreeMap<String, u64>,
    pub total_operations: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuotaStats {
    pub youtube: ServiceStats,
    pub groq: ServiceStats,
}

struct QuotaState {
    ledger: QuotaLedger,
    youtube_minute: u64,
    groq_minute: u64,
    current_minute: DateTime<Local>,
    unsaved_ops: u32,
    last_save: DateTime<Local>,
    dirty: bool,
}

impl QuotaState {
    fn daily(&self, service: Service) -> u64 {
        match service {
            Service::YouTube => self.ledger.daily_usage,
            Service::Groq => self.ledger.groq_daily_usage,
        }
    }

    fn minute(&self, service: Service) -> u64 {
        match service {
            Service::YouTube => self.youtube_minute,
            Service::Groq => self.groq_minute,
        }
    }

    fn history(&self, service: Service) -> &[OperationRecord] {
        match service {
            Service::YouTube => &self.ledger.operations,
            Service::Groq => &self.ledger.groq_operations,
        }
    }

    /// Resets the minute counters once the wall-clock minute changes, and
    /// prunes history older than 24h at the same moment.
    fn roll_minute(&mut self, now: DateTime<Local>) {
        let minute = truncate_to_minute(now);
        if minute == self.current_minute {
            return;
        }

        self.current_minute = minute;
        self.youtube_minute = 0;
        self.groq_minute = 0;

        let cutoff = now - ChronoDuration::hours(24);
        self.ledger.operations.retain(|op| op.timestamp > cutoff);
        self.ledger.groq_operations.retain(|op| op.timestamp > cutoff);
    }

    fn is_critical(&self, limits: &QuotaLimits) -> bool {
        [Service::YouTube, Service::Groq]
            .into_iter()
            .any(|s| ratio(self.daily(s), limits.daily(s)) > CRITICAL_RATIO)
    }
}

fn truncate_to_minute(at: DateTime<Local>) -> DateTime<Local> {
    at.duration_trunc(ChronoDuration::minutes(1)).unwrap_or(at)
}

fn ratio(used: u64, limit: u64) -> f64 {
    if limit == 0 {
        1.0
    } else {
        used as f64 / limit as f64
    }
}

/// Process-wide quota gate, shared by reference between all pipelines.
pub struct QuotaGovernor {
    path: PathBuf,
    limits: QuotaLimits,
    state: Mutex<QuotaState>,
}

impl QuotaGovernor {
    pub fn open(data_dir: &Path, limits: QuotaLimits) -> Self {
        Self::open_at(data_dir.join(QUOTA_FILE), limits, Local::now())
    }

    pub fn open_at(path: PathBuf, limits: QuotaLimits, now: DateTime<Local>) -> Self {
        let ledger = QuotaLedger::load(&path, now);
        let governor = Self {
            path,
            limits,
            state: Mutex::new(QuotaState {
                ledger,
                youtube_minute: 0,
                groq_minute: 0,
                current_minute: truncate_to_minute(now),
                unsaved_ops: 0,
                last_save: now,
                dirty: false,
            }),
        };
        info!(
            "📊 Quota governor listo ({}): YouTube {}/día, Groq {}/día",
            governor.path.display(),
            limits.youtube_daily.to_formatted_string(&Locale::en),
            limits.groq_daily.to_formatted_string(&Locale::en)
        );
        governor
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    /// True when charging `op` now stays within both the daily and the
    /// current-minute budget of its service.
    pub fn can_make_request(&self, op: QuotaOperation) -> bool {
        self.can_make_request_at(op, Local::now())
    }

    pub fn can_make_request_at(&self, op: QuotaOperation, now: DateTime<Local>) -> bool {
        let service = op.service();
        let cost = op.cost();

        let mut state = self.state.lock();
        state.roll_minute(now);

        let daily = state.daily(service);
        let daily_limit = self.limits.daily(service);
        if daily + cost > daily_limit {
            error!(
                "❌ Quota diaria {:?} agotada: {}/{} ({} cuesta {})",
                service,
                daily,
                daily_limit,
                op.name(),
                cost
            );
            return false;
        }

        let minute = state.minute(service);
        if minute + cost > self.limits.minute(service) {
            warn!("⚠️ Límite por minuto {:?} alcanzado, esperando", service);
            return false;
        }

        true
    }

    /// Charges `op` against its service.
    ///
    /// The ledger is written when 10 operations have accumulated, when 300 s
    /// have passed since the last write, or when either service is above 90%
    /// of its daily budget, whichever happens first.
    pub fn track_operation(&self, op: QuotaOperation, details: impl Into<String>) {
        self.track_operation_at(op, details.into(), Local::now());
    }

    pub fn track_operation_at(&self, op: QuotaOperation, details: String, now: DateTime<Local>) {
        let service = op.service();
        let cost = op.cost();

        let pending = {
            let mut state = self.state.lock();
            state.roll_minute(now);

            let record = OperationRecord {
                timestamp: now,
                operation: op.name().to_string(),
                cost,
                details,
            };

            match service {
                Service::YouTube => {
                    state.ledger.daily_usage += cost;
                    state.youtube_minute += cost;
                    state.ledger.operations.push(record);
                }
                Service::Groq => {
                    state.ledger.groq_daily_usage += cost;
                    state.groq_minute += cost;
                    state.ledger.groq_operations.push(record);
                }
            }

            state.dirty = true;
            state.unsaved_ops += 1;

            let since_save = (now - state.last_save).num_seconds();
            let should_save = state.unsaved_ops >= SAVE_EVERY_OPS
                || since_save > SAVE_EVERY_SECS
                || state.is_critical(&self.limits);

            self.log_usage(&state, op, service);

            if should_save {
                let json = state.ledger.to_json(now);
                state.unsaved_ops = 0;
                state.last_save = now;
                state.dirty = false;
                debug!("💾 Guardando quota ({}s desde el último guardado)", since_save);
                Some(json)
            } else {
                None
            }
        };

        if let Some(json) = pending {
            self.persist(json);
        }
    }

    /// Unconditional write, called on shutdown.
    pub fn force_save(&self) {
        self.force_save_at(Local::now());
    }

    pub fn force_save_at(&self, now: DateTime<Local>) {
        let json = {
            let mut state = self.state.lock();
            state.unsaved_ops = 0;
            state.last_save = now;
            state.dirty = false;
            state.ledger.to_json(now)
        };
        self.persist(json);
        info!("💾 Quota guardada (forzado)");
    }

    /// True when charges are waiting for the next batched write.
    pub fn has_unsaved_changes(&self) -> bool {
        self.state.lock().dirty
    }

    fn persist(&self, json: anyhow::Result<String>) {
        let result = json.and_then(|json| ledger::write(&self.path, &json));
        if let Err(e) = result {
            error!("❌ Error al guardar quota: {:#}", e);
        }
    }

    fn log_usage(&self, state: &QuotaState, op: QuotaOperation, service: Service) {
        let daily = state.daily(service);
        let limit = self.limits.daily(service);
        let percent = ratio(daily, limit) * 100.0;

        let emoji = if percent < 50.0 {
            "🟢"
        } else if percent < 80.0 {
            "🟡"
        } else {
            "🔴"
        };

        info!(
            "{} {:?} | {} (+{}) | Día: {}/{} ({:.1}%) | Min: {}/{}",
            emoji,
            service,
            op.name(),
            op.cost(),
            daily.to_formatted_string(&Locale::en),
            limit.to_formatted_string(&Locale::en),
            percent,
            state.minute(service).to_formatted_string(&Locale::en),
            self.limits.minute(service).to_formatted_string(&Locale::en),
        );

        if percent >= 90.0 {
            warn!("⚠️ QUOTA CRÍTICA ({:?}): {}/{} ({:.1}%) usado hoy", service, daily, limit, percent);
        } else if percent >= 75.0 {
            warn!("⚠️ Quota alta ({:?}): {}/{} ({:.1}%) usado hoy", service, daily, limit, percent);
        }
    }

    pub fn stats(&self) -> QuotaStats {
        self.stats_at(Local::now())
    }

    pub fn stats_at(&self, now: DateTime<Local>) -> QuotaStats {
        let mut state = self.state.lock();
        state.roll_minute(now);

        let service_stats = |service: Service| {
            let daily_usage = state.daily(service);
            let daily_limit = self.limits.daily(service);
            let history = state.history(service);

            let mut operations_count = BTreeMap::new();
            for op in history {
                *operations_count.entry(op.operation.clone()).or_insert(0) += 1;
            }

            ServiceStats {
                daily_usage,
                daily_limit,
                daily_percent: ratio(daily_usage, daily_limit) * 100.0,
                daily_remaining: daily_limit.saturating_sub(daily_usage),
                minute_usage: state.minute(service),
                minute_limit: self.limits.minute(service),
                operations_count,
                total_operations: history.len(),
            }
        };

        QuotaStats {
            youtube: service_stats(Service::YouTube),
            groq: service_stats(Service::Groq),
        }
    }

    /// Human readable report for the `/stats` command.
    pub fn format_stats(&self) -> String {
        let stats = self.stats();
        let fmt = |n: u64| n.to_formatted_string(&Locale::en);

        let mut lines = vec![
            "📊 **API usage**".to_string(),
            String::new(),
            "🎥 **YouTube Data API v3:**".to_string(),
            format!(
                "├─ Daily quota: {} / {} ({:.1}%)",
                fmt(stats.youtube.daily_usage),
                fmt(stats.youtube.daily_limit),
                stats.youtube.daily_percent
            ),
            format!("├─ Remaining: {} units", fmt(stats.youtube.daily_remaining)),
            format!(
                "└─ Per minute: {} / {}",
                fmt(stats.youtube.minute_usage),
                fmt(stats.youtube.minute_limit)
            ),
            String::new(),
            "**YouTube operations (last 24h):**".to_string(),
        ];

        for (name, count) in &stats.youtube.operations_count {
            let cost = QuotaOperation::from_name(name).map_or(1, |op| op.cost());
            lines.push(format!("├─ {}: {}x (cost: {})", name, count, fmt(count * cost)));
        }
        lines.push(format!("└─ Total: {} operations", stats.youtube.total_operations));

        lines.extend([
            String::new(),
            "🤖 **Groq API (autoplay AI):**".to_string(),
            format!(
                "├─ Daily quota: {} / {} ({:.1}%)",
                fmt(stats.groq.daily_usage),
                fmt(stats.groq.daily_limit),
                stats.groq.daily_percent
            ),
            format!("├─ Remaining: {} requests", fmt(stats.groq.daily_remaining)),
            format!(
                "└─ Per minute: {} / {}",
                stats.groq.minute_usage, stats.groq.minute_limit
            ),
            String::new(),
            "**Groq operations (last 24h):**".to_string(),
        ]);

        for (name, count) in &stats.groq.operations_count {
            lines.push(format!("├─ {}: {}x", name, count));
        }
        lines.push(format!("└─ Total: {} requests", stats.groq.total_operations));

        lines.join("\n")
    }
}
