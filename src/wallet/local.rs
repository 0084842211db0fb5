//! SQLite wallet for offline demos
//!
//! Same contract as the HTTP backend. Balance changes are broadcast to
//! in-process subscribers.

use super::model::{Direction, NewTransaction, Transaction, TransactionStatus, User};
use super::{BalanceCallback, BalanceFeed, FeedSubscription, WalletBackend};
use crate::error::{PayError, PayResult};
use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

const DAY_MS: i64 = 86_400_000;

pub struct LocalWallet {
    conn: Mutex<Connection>,
    updates: broadcast::Sender<(String, Decimal)>,
}

impl LocalWallet {
    pub fn open(path: &Path) -> PayResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("💾 Opening wallet database: {:?}", path);
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> PayResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> PayResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                balance TEXT NOT NULL,
                passphrase TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                direction TEXT NOT NULL,
                amount TEXT NOT NULL,
                payee_name TEXT,
                payee_vpa TEXT,
                timestamp INTEGER NOT NULL,
                status TEXT NOT NULL,
                note TEXT
            )",
            [],
        )?;
        let (updates, _) = broadcast::channel(64);
        Ok(Self {
            conn: Mutex::new(conn),
            updates,
        })
    }

    /// Insert the two demo users and their history if the database is empty
    ///
    /// Harsh ends at 13500 and Tanya at 12200; passphrase is the lower-cased name.
    pub fn seed_demo(&self) -> PayResult<()> {
        let mut conn = self.conn.lock()?;
        let existing: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
        if existing > 0 {
            return Ok(());
        }

        let now = chrono::Utc::now().timestamp_millis();
        let seeds: [(&str, i64, [(&str, Direction, i64, &str, i64); 2]); 2] = [
            (
                "Harsh",
                13_500,
                [
                    ("H1", Direction::Received, 5000, "Demo Sender", 1),
                    ("H2", Direction::Sent, 1500, "Demo Merchant", 2),
                ],
            ),
            (
                "Tanya",
                12_200,
                [
                    ("T1", Direction::Received, 3000, "Salary Credit", 3),
                    ("T2", Direction::Sent, 800, "Grocery Store", 4),
                ],
            ),
        ];

        let db = conn.transaction()?;
        for (name, balance, history) in seeds {
            let user_id = format!("user-{}", name.to_lowercase());
            db.execute(
                "INSERT INTO users (id, name, balance, passphrase) VALUES (?1, ?2, ?3, ?4)",
                params![user_id, name, balance.to_string(), name.to_lowercase()],
            )?;
            for (suffix, direction, amount, payee, days_ago) in history {
                db.execute(
                    "INSERT INTO transactions
                        (id, user_id, direction, amount, payee_name, timestamp, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'success')",
                    params![
                        format!("TXN{}{}", now, suffix),
                        user_id,
                        direction.as_str(),
                        amount.to_string(),
                        payee,
                        now - days_ago * DAY_MS
                    ],
                )?;
            }
        }
        db.commit()?;
        info!("🌱 Seeded demo wallet (Harsh, Tanya)");
        Ok(())
    }

    fn find_user(conn: &Connection, column: &str, value: &str) -> PayResult<Option<User>> {
        let sql = format!(
            "SELECT id, name, balance, passphrase FROM users WHERE {} = ?1",
            column
        );
        Ok(conn.query_row(&sql, [value], user_from_row).optional()?)
    }

    fn broadcast(&self, user_id: &str, balance: Decimal) {
        // No receivers is fine
        let _ = self.updates.send((user_id.to_string(), balance));
    }
}

fn decimal_at(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        balance: decimal_at(row, 2)?,
        passphrase: Some(row.get(3)?),
    })
}

fn transaction_from_row(row: &Row) -> rusqlite::Result<Transaction> {
    let direction: String = row.get(2)?;
    let status: String = row.get(7)?;
    Ok(Transaction {
        id: row.get(0)?,
        user_id: Some(row.get(1)?),
        direction: Direction::parse(&direction).unwrap_or(Direction::Sent),
        amount: decimal_at(row, 3)?,
        payee_name: row.get(4)?,
        payee_vpa: row.get(5)?,
        timestamp: row.get(6)?,
        status: TransactionStatus::parse(&status).unwrap_or_default(),
        note: row.get(8)?,
    })
}

#[async_trait]
impl WalletBackend for LocalWallet {
    async fn get_user(&self, name: &str) -> PayResult<User> {
        let conn = self.conn.lock()?;
        Self::find_user(&conn, "name", name)?.ok_or_else(|| PayError::UserNotFound(name.into()))
    }

    async fn validate_passphrase(&self, name: &str, passphrase: &str) -> PayResult<bool> {
        let user = self.get_user(name).await?;
        Ok(user
            .passphrase
            .map(|secret| secret.to_lowercase() == passphrase.trim().to_lowercase())
            .unwrap_or(false))
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> PayResult<Vec<Transaction>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, direction, amount, payee_name, payee_vpa, timestamp, status, note
             FROM transactions
             WHERE user_id = ?1
             ORDER BY timestamp DESC, rowid DESC
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(
            params![user_id, limit as i64, offset as i64],
            transaction_from_row,
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    async fn append_transaction(&self, tx: NewTransaction) -> PayResult<Transaction> {
        if tx.amount <= Decimal::ZERO {
            return Err(PayError::InvalidAmount(tx.amount.to_string()));
        }

        let mut conn = self.conn.lock()?;
        let user = Self::find_user(&conn, "id", &tx.user_id)?
            .ok_or_else(|| PayError::UserNotFound(tx.user_id.clone()))?;

        let balance = match tx.direction {
            Direction::Sent => user.balance - tx.amount,
            Direction::Received => user.balance + tx.amount,
        };
        if balance < Decimal::ZERO {
            return Err(PayError::InsufficientBalance {
                available: user.balance,
                requested: tx.amount,
            });
        }

        let recorded = Transaction {
            id: tx.id,
            user_id: Some(tx.user_id),
            direction: tx.direction,
            amount: tx.amount,
            payee_name: tx.payee_name,
            payee_vpa: tx.payee_vpa,
            timestamp: chrono::Utc::now().timestamp_millis(),
            status: TransactionStatus::Success,
            note: tx.note,
        };

        let db = conn.transaction()?;
        db.execute(
            "INSERT INTO transactions
                (id, user_id, direction, amount, payee_name, payee_vpa, timestamp, status, note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                recorded.id,
                user.id,
                recorded.direction.as_str(),
                recorded.amount.to_string(),
                recorded.payee_name,
                recorded.payee_vpa,
                recorded.timestamp,
                recorded.status.as_str(),
                recorded.note
            ],
        )?;
        db.execute(
            "UPDATE users SET balance = ?1 WHERE id = ?2",
            params![balance.to_string(), user.id],
        )?;
        db.commit()?;
        drop(conn);

        debug!("Local wallet: {} -> balance {}", recorded.id, balance);
        self.broadcast(&user.id, balance);
        Ok(recorded)
    }

    async fn set_balance(&self, name: &str, balance: Decimal) -> PayResult<User> {
        if balance < Decimal::ZERO {
            return Err(PayError::InvalidAmount(balance.to_string()));
        }
        let conn = self.conn.lock()?;
        let changed = conn.execute(
            "UPDATE users SET balance = ?1 WHERE name = ?2",
            params![balance.to_string(), name],
        )?;
        if changed == 0 {
            return Err(PayError::UserNotFound(name.into()));
        }
        let user = Self::find_user(&conn, "name", name)?
            .ok_or_else(|| PayError::UserNotFound(name.into()))?;
        drop(conn);

        self.broadcast(&user.id, user.balance);
        Ok(user)
    }

    fn name(&self) -> &str {
        "local"
    }
}

impl BalanceFeed for LocalWallet {
    fn subscribe(&self, user_id: &str, on_balance: BalanceCallback) -> FeedSubscription {
        let mut rx = self.updates.subscribe();
        let user_id = user_id.to_string();
        FeedSubscription::new(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok((id, balance)) if id == user_id => on_balance(balance),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Balance feed lagged by {} updates", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::generate_transaction_id;

    fn seeded() -> LocalWallet {
        let wallet = LocalWallet::in_memory().unwrap();
        wallet.seed_demo().unwrap();
        wallet
    }

    fn sent(user_id: &str, amount: i64) -> NewTransaction {
        NewTransaction {
            id: generate_transaction_id(),
            user_id: user_id.to_string(),
            direction: Direction::Sent,
            amount: Decimal::from(amount),
            payee_name: Some("Shop".to_string()),
            payee_vpa: Some("merchant@bank".to_string()),
            note: Some("lunch".to_string()),
        }
    }

    #[tokio::test]
    async fn test_seed_matches_demo_balances() {
        let wallet = seeded();
        let harsh = wallet.get_user("Harsh").await.unwrap();
        let tanya = wallet.get_user("Tanya").await.unwrap();
        assert_eq!(harsh.balance, Decimal::from(13_500));
        assert_eq!(tanya.balance, Decimal::from(12_200));

        let history = wallet.list_transactions(&harsh.id, 50, 0).await.unwrap();
        assert_eq!(history.len(), 2);
        // Newest first
        assert_eq!(history[0].payee_name.as_deref(), Some("Demo Sender"));
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let wallet = seeded();
        wallet.seed_demo().unwrap();
        let harsh = wallet.get_user("Harsh").await.unwrap();
        let history = wallet.list_transactions(&harsh.id, 50, 0).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_append_moves_balance() {
        let wallet = seeded();
        let harsh = wallet.get_user("Harsh").await.unwrap();

        let tx = wallet.append_transaction(sent(&harsh.id, 200)).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(tx.note.as_deref(), Some("lunch"));

        let after = wallet.get_user("Harsh").await.unwrap();
        assert_eq!(after.balance, Decimal::from(13_300));

        let history = wallet.list_transactions(&harsh.id, 1, 0).await.unwrap();
        assert_eq!(history[0].id, tx.id);
    }

    #[tokio::test]
    async fn test_overdraft_writes_nothing() {
        let wallet = seeded();
        let tanya = wallet.get_user("Tanya").await.unwrap();

        let err = wallet
            .append_transaction(sent(&tanya.id, 12_201))
            .await
            .unwrap_err();
        assert!(matches!(err, PayError::InsufficientBalance { .. }));

        let history = wallet.list_transactions(&tanya.id, 50, 0).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(
            wallet.get_user("Tanya").await.unwrap().balance,
            Decimal::from(12_200)
        );
    }

    #[tokio::test]
    async fn test_exact_balance_can_be_spent() {
        let wallet = seeded();
        let tanya = wallet.get_user("Tanya").await.unwrap();
        wallet
            .append_transaction(sent(&tanya.id, 12_200))
            .await
            .unwrap();
        assert_eq!(
            wallet.get_user("Tanya").await.unwrap().balance,
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn test_duplicate_transaction_id_rejected() {
        let wallet = seeded();
        let harsh = wallet.get_user("Harsh").await.unwrap();
        let tx = sent(&harsh.id, 10);
        wallet.append_transaction(tx.clone()).await.unwrap();
        assert!(wallet.append_transaction(tx).await.is_err());
        assert_eq!(
            wallet.get_user("Harsh").await.unwrap().balance,
            Decimal::from(13_490)
        );
    }

    #[tokio::test]
    async fn test_validate_passphrase_is_case_insensitive() {
        let wallet = seeded();
        assert!(wallet.validate_passphrase("Harsh", "HARSH").await.unwrap());
        assert!(!wallet.validate_passphrase("Harsh", "tanya").await.unwrap());
        assert!(matches!(
            wallet.validate_passphrase("Nobody", "x").await,
            Err(PayError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_set_balance_broadcasts() {
        let wallet = seeded();
        let harsh = wallet.get_user("Harsh").await.unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = wallet.subscribe(
            &harsh.id,
            std::sync::Arc::new(move |balance| {
                let _ = tx.send(balance);
            }),
        );

        let user = wallet.set_balance("Harsh", Decimal::from(42)).await.unwrap();
        assert_eq!(user.balance, Decimal::from(42));
        assert_eq!(rx.recv().await, Some(Decimal::from(42)));

        assert!(matches!(
            wallet.set_balance("Nobody", Decimal::ONE).await,
            Err(PayError::UserNotFound(_))
        ));
    }

    #[test]
    fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/wallet.db");
        let wallet = LocalWallet::open(&path).unwrap();
        wallet.seed_demo().unwrap();
        assert!(path.exists());
    }
}
