use crate::error::PayResult;
use crate::wallet::Transaction;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only record of payments made from this client
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `audit.log` under the config directory (respecting XDG)
    pub fn default_location() -> Self {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        Self::new(config_dir.join("voicepay").join("audit.log"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write an entry to the audit log
    pub fn log(&self, entry: &str) -> PayResult<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(
            file,
            "[{}] {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            entry
        )?;
        Ok(())
    }

    pub fn record_payment(&self, tx: &Transaction) -> PayResult<()> {
        self.log(&format!(
            "PAYMENT {} | {} {} | payee: {} <{}> | status: {}",
            tx.id,
            tx.direction.as_str(),
            tx.amount,
            tx.payee_name.as_deref().unwrap_or("-"),
            tx.payee_vpa.as_deref().unwrap_or("-"),
            tx.status.as_str()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::{Direction, TransactionStatus};
    use rust_decimal::Decimal;

    #[test]
    fn test_record_payment_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("logs/audit.log"));

        let tx = Transaction {
            id: "TXN1".to_string(),
            user_id: None,
            direction: Direction::Sent,
            amount: Decimal::from(200),
            payee_name: Some("Shop".to_string()),
            payee_vpa: Some("merchant@bank".to_string()),
            timestamp: 0,
            status: TransactionStatus::Success,
            note: None,
        };
        log.record_payment(&tx).unwrap();
        log.log("session closed").unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("PAYMENT TXN1 | sent 200 | payee: Shop <merchant@bank>"));
        assert!(lines[1].ends_with("session closed"));
    }
}
