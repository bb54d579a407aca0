use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{error, info};

/// Entradas de historial que se guardan en disco por servicio
pub const PERSISTED_HISTORY: usize = 100;

/// Registro de una operación cobrada
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub timestamp: DateTime<Local>,
    pub operation: String,
    pub cost: u64,
    #[serde(default)]
    pub details: String,
}

/// Contadores diarios persistidos en `quota_usage.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaLedger {
    pub date: DateTime<Local>,
    #[serde(default)]
    pub daily_usage: u64,
    #[serde(default)]
    pub operations: Vec<OperationRecord>,
    #[serde(default)]
    pub groq_daily_usage: u64,
    #[serde(default)]
    pub groq_operations: Vec<OperationRecord>,
}

impl QuotaLedger {
    pub fn empty(now: DateTime<Local>) -> Self {
        Self {
            date: now,
            daily_usage: 0,
            operations: Vec::new(),
            groq_daily_usage: 0,
            groq_operations: Vec::new(),
        }
    }

    /// Carga el ledger del día. Un archivo de otro día (o ilegible) da un ledger vacío.
    pub fn load(path: &Path, now: DateTime<Local>) -> Self {
        if !path.exists() {
            return Self::empty(now);
        }

        match Self::read(path) {
            Ok(ledger) if ledger.date.date_naive() == now.date_naive() => {
                info!(
                    "📊 Quota cargada - YouTube: {} | Groq: {}",
                    ledger.daily_usage, ledger.groq_daily_usage
                );
                ledger
            }
            Ok(_) => {
                info!("📊 Nuevo día, reseteando contadores de quota");
                Self::empty(now)
            }
            Err(e) => {
                error!("❌ Error al cargar quota desde {}: {:#}", path.display(), e);
                Self::empty(now)
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let ledger = serde_json::from_str(&content)?;
        Ok(ledger)
    }

    /// Serializa el ledger recortando el historial a las últimas entradas.
    pub fn to_json(&self, now: DateTime<Local>) -> Result<String> {
        let snapshot = Self {
            date: now,
            daily_usage: self.daily_usage,
            operations: tail(&self.operations),
            groq_daily_usage: self.groq_daily_usage,
            groq_operations: tail(&self.groq_operations),
        };
        Ok(serde_json::to_string_pretty(&snapshot)?)
    }
}

fn tail(records: &[OperationRecord]) -> Vec<OperationRecord> {
    let start = records.len().saturating_sub(PERSISTED_HISTORY);
    records[start..].to_vec()
}

/// Escribe el JSON ya serializado.
pub fn write(path: &Path, json: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
